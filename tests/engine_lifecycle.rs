/// Erase job lifecycle tests against scripted collaborators: terminal
/// states, cancellation behavior, failure classification and the
/// one-job-per-device rule.
use expunge::engine::{
    CommandSpec, EraseEngine, FailureReason, JobOutcome, JobState, OverwriteProcess,
    OverwriteSpawner, ProcessExit,
};
use expunge::mounts::PartitionOutcome;
use expunge::{MethodKind, Transport, WipeError};
use std::io;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::{usb_device, wait_until, FakeSpawner, NoMounts, ScriptedMounts};

const GIB: u64 = 1024 * 1024 * 1024;

fn engine(spawner: FakeSpawner) -> EraseEngine {
    EraseEngine::new(Arc::new(spawner), Arc::new(NoMounts))
}

#[test]
fn successful_overwrite_reaches_completed_with_all_progress_lines() {
    let engine = engine(FakeSpawner::with_lines(
        &["10% done", "55% done", "100% done"],
        ProcessExit::Success,
    ));

    let handle = engine
        .start(usb_device("/dev/sdx", 16 * GIB), MethodKind::ZeroFill, false)
        .unwrap();
    let report = handle.wait();

    assert_eq!(report.outcome, JobOutcome::Success);
    for line in ["10% done", "55% done", "100% done"] {
        assert!(report.log.iter().any(|l| l == line), "missing '{line}'");
    }
    // Every terminal state comes with a plain-language closing line.
    assert!(report
        .log
        .iter()
        .any(|l| l.contains("completed successfully")));
    assert!(report.finished_at >= report.started_at);
}

#[test]
fn nonzero_exit_reaches_failed_with_a_device_error() {
    let engine = engine(FakeSpawner::with_lines(&["10% done"], ProcessExit::Code(1)));

    let handle = engine
        .start(usb_device("/dev/sdx", 16 * GIB), MethodKind::ZeroFill, false)
        .unwrap();
    let report = handle.wait();

    match report.outcome {
        JobOutcome::Failed(FailureReason::DeviceError(detail)) => {
            assert!(detail.contains("code 1"));
        }
        other => panic!("expected device error, got {other:?}"),
    }
    assert!(report.log.iter().any(|l| l.starts_with("Error:")));
}

#[test]
fn missing_tool_is_a_distinguishable_user_actionable_failure() {
    let engine = engine(FakeSpawner::failing_spawn(io::ErrorKind::NotFound));

    let handle = engine
        .start(usb_device("/dev/sdx", 16 * GIB), MethodKind::ZeroFill, false)
        .unwrap();
    let report = handle.wait();

    match report.outcome {
        JobOutcome::Failed(FailureReason::ToolMissing(tool)) => assert_eq!(tool, "dd"),
        other => panic!("expected tool-missing, got {other:?}"),
    }
    // The log names the missing tool for the operator.
    assert!(report.log.iter().any(|l| l.contains("'dd'")));
}

#[test]
fn permission_error_recommends_elevated_privileges() {
    let engine = engine(FakeSpawner::failing_spawn(io::ErrorKind::PermissionDenied));

    let handle = engine
        .start(usb_device("/dev/sdx", 16 * GIB), MethodKind::ZeroFill, false)
        .unwrap();
    let report = handle.wait();

    assert_eq!(
        report.outcome,
        JobOutcome::Failed(FailureReason::PermissionDenied)
    );
    assert!(report
        .log
        .iter()
        .any(|l| l.contains("elevated privileges")));
}

#[test]
fn cancelling_a_running_job_ends_in_cancelled_and_stops_progress() {
    let spawner = FakeSpawner::endless();
    let terminated = Arc::clone(&spawner.terminated);
    let engine = engine(spawner);

    let handle = engine
        .start(usb_device("/dev/sdx", 16 * GIB), MethodKind::ZeroFill, false)
        .unwrap();
    let log = handle.log();

    // Let it produce some progress first (setup lines plus a few "% done").
    assert!(wait_until(Duration::from_secs(5), || log.len() >= 6));
    assert_eq!(handle.state(), JobState::Running);

    handle.cancel();
    let report = handle.wait();

    assert_eq!(report.outcome, JobOutcome::Cancelled);
    assert!(terminated.load(std::sync::atomic::Ordering::SeqCst));
    assert!(report.log.iter().any(|l| l.contains("cancelled")));

    // No further progress lines after a bounded grace period.
    let settled = log.len();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(log.len(), settled);
}

#[test]
fn cancellation_never_masquerades_as_completion_or_failure() {
    for _ in 0..5 {
        let engine = engine(FakeSpawner::endless());
        let handle = engine
            .start(usb_device("/dev/sdx", 16 * GIB), MethodKind::ZeroFill, false)
            .unwrap();
        let log = handle.log();
        wait_until(Duration::from_secs(5), || !log.is_empty());
        handle.cancel();
        assert_eq!(handle.wait().outcome, JobOutcome::Cancelled);
    }
}

#[test]
fn inapplicable_method_is_rejected_before_any_job_starts() {
    let engine = engine(FakeSpawner::endless());
    let device = usb_device("/dev/sdx", 16 * GIB);
    assert_eq!(device.transport, Transport::USB);

    let err = engine
        .start(device, MethodKind::AtaSecureErase, false)
        .unwrap_err();
    match err {
        WipeError::MethodNotApplicable { method, transport } => {
            assert_eq!(method, MethodKind::AtaSecureErase);
            assert_eq!(transport, Transport::USB);
        }
        other => panic!("expected method-not-applicable, got {other}"),
    }
}

#[test]
fn second_job_on_a_busy_device_is_rejected() {
    let engine = engine(FakeSpawner::endless());
    let device = usb_device("/dev/sdx", 16 * GIB);

    let first = engine.start(device.clone(), MethodKind::ZeroFill, false).unwrap();
    let err = engine
        .start(device.clone(), MethodKind::ZeroFill, false)
        .unwrap_err();
    assert!(matches!(err, WipeError::JobAlreadyActive(_)));

    // The running job is undisturbed by the rejected start.
    assert!(!first.is_terminal());
    first.cancel();
    assert_eq!(first.wait().outcome, JobOutcome::Cancelled);

    // After the prior job reached a terminal state the device is free.
    let second = engine.start(device, MethodKind::ZeroFill, false).unwrap();
    second.cancel();
    second.wait();
}

#[test]
fn a_panicking_worker_frees_the_device_for_a_new_job() {
    struct PanickingSpawner;
    impl OverwriteSpawner for PanickingSpawner {
        fn spawn(&self, _spec: &CommandSpec) -> io::Result<Box<dyn OverwriteProcess>> {
            panic!("worker bug");
        }
    }

    let engine = EraseEngine::new(Arc::new(PanickingSpawner), Arc::new(NoMounts));
    let device = usb_device("/dev/sdx", 16 * GIB);

    let handle = engine
        .start(device.clone(), MethodKind::ZeroFill, false)
        .unwrap();
    let report = handle.wait();
    assert!(matches!(
        report.outcome,
        JobOutcome::Failed(FailureReason::Unknown(_))
    ));

    // The device must not stay busy after the abnormal worker exit.
    let second = engine.start(device, MethodKind::ZeroFill, false).unwrap();
    second.wait();
}

#[test]
fn jobs_on_distinct_devices_may_run_concurrently() {
    let engine = engine(FakeSpawner::endless());

    let a = engine
        .start(usb_device("/dev/sdx", 16 * GIB), MethodKind::ZeroFill, false)
        .unwrap();
    let b = engine
        .start(usb_device("/dev/sdy", 16 * GIB), MethodKind::ZeroFill, false)
        .unwrap();

    a.cancel();
    b.cancel();
    a.wait();
    b.wait();
}

#[test]
fn non_removable_device_requires_the_override() {
    let engine = engine(FakeSpawner::with_lines(&[], ProcessExit::Success));
    let mut device = usb_device("/dev/sda", 500 * GIB);
    device.removable = false;

    let err = engine
        .start(device.clone(), MethodKind::ZeroFill, false)
        .unwrap_err();
    assert!(matches!(err, WipeError::IneligibleTarget(_)));

    let handle = engine.start(device, MethodKind::ZeroFill, true).unwrap();
    assert_eq!(handle.wait().outcome, JobOutcome::Success);
}

#[test]
fn unmount_failures_are_logged_but_do_not_block_the_wipe() {
    let spawner = FakeSpawner::with_lines(&["100% done"], ProcessExit::Success);
    let release = ScriptedMounts(vec![
        PartitionOutcome {
            partition: "/dev/sdx1".to_string(),
            released: true,
            escalated: false,
            detail: None,
        },
        PartitionOutcome {
            partition: "/dev/sdx2".to_string(),
            released: false,
            escalated: true,
            detail: Some("target is busy".to_string()),
        },
    ]);
    let engine = EraseEngine::new(Arc::new(spawner), Arc::new(release));

    let handle = engine
        .start(usb_device("/dev/sdx", 16 * GIB), MethodKind::ZeroFill, false)
        .unwrap();
    let report = handle.wait();

    assert_eq!(report.outcome, JobOutcome::Success);
    assert!(report.log.iter().any(|l| l.contains("Unmounted /dev/sdx1")));
    assert!(report
        .log
        .iter()
        .any(|l| l.contains("could not unmount /dev/sdx2")));
}

#[test]
fn quick_wipe_aborts_remaining_steps_on_first_failure() {
    // Every spawned step exits 2; only the first should ever be spawned.
    let spawner = FakeSpawner::with_lines(&[], ProcessExit::Code(2));
    let spawn_count = Arc::clone(&spawner.spawn_count);
    let engine = engine(spawner);

    let handle = engine
        .start(usb_device("/dev/sdx", 16 * GIB), MethodKind::Quick, false)
        .unwrap();
    let report = handle.wait();

    assert!(matches!(
        report.outcome,
        JobOutcome::Failed(FailureReason::DeviceError(_))
    ));
    assert_eq!(spawn_count.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn quick_wipe_runs_every_sub_step_on_success() {
    let spawner = FakeSpawner::with_lines(&[], ProcessExit::Success);
    let spawn_count = Arc::clone(&spawner.spawn_count);
    let engine = engine(spawner);

    let handle = engine
        .start(usb_device("/dev/sdx", 16 * GIB), MethodKind::Quick, false)
        .unwrap();
    let report = handle.wait();

    assert_eq!(report.outcome, JobOutcome::Success);
    // wipefs, head, tail, mklabel, mkpart
    assert_eq!(spawn_count.load(std::sync::atomic::Ordering::SeqCst), 5);
    assert!(report
        .log
        .iter()
        .any(|l| l.contains("Creating new partition table")));
}
