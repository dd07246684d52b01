// Erase Engine - executes a chosen destruction method as a cancellable,
// progress-streaming background job.
//
// Job lifecycle: Pending -> Unmounting -> Running -> {Completed, Failed,
// Cancelled}. Unmount failures are logged but never block the transition to
// Running. Everything below the job boundary is translated into a terminal
// state plus a plain-language log line; nothing escapes to the caller as an
// unhandled fault.

pub mod job;
pub mod log;
pub mod plan;
pub mod runner;

pub use job::{FailureReason, JobHandle, JobOutcome, JobReport, JobState};
pub use log::JobLog;
pub use plan::{plan_for, CommandSpec, OverwritePlan, Step};
pub use runner::{OverwriteProcess, OverwriteSpawner, ProcessExit, SystemSpawner};

use crate::mounts::{DeviceRelease, UnmountCoordinator, UnmountReport};
use crate::{methods, Device, MethodKind, WipeError, WipeResult};
use chrono::Utc;
use runner::RunError;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use uuid::Uuid;

pub struct EraseEngine {
    spawner: Arc<dyn OverwriteSpawner>,
    release: Arc<dyn DeviceRelease>,
    /// Devices with a non-terminal job. One erase job per device at a time.
    active: Arc<Mutex<HashSet<String>>>,
}

impl EraseEngine {
    pub fn new(spawner: Arc<dyn OverwriteSpawner>, release: Arc<dyn DeviceRelease>) -> Self {
        Self {
            spawner,
            release,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Engine wired to the real OS collaborators.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemSpawner), Arc::new(UnmountCoordinator::system()))
    }

    /// Start an erase job in the background and return a handle to it.
    ///
    /// Rejected before any job state exists: a method not applicable to the
    /// device's transport, an ineligible target, or a device that already
    /// has an active job.
    pub fn start(
        &self,
        device: Device,
        method: MethodKind,
        allow_non_removable: bool,
    ) -> WipeResult<JobHandle> {
        methods::ensure_applicable(method, device.transport)?;

        if !device.eligible(allow_non_removable) {
            return Err(WipeError::IneligibleTarget(device.path));
        }

        {
            let mut active = self.active.lock().unwrap();
            if !active.insert(device.path.clone()) {
                return Err(WipeError::JobAlreadyActive(device.path));
            }
        }

        let id = Uuid::new_v4();
        let job_log = Arc::new(JobLog::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(JobState::Pending));

        let worker = {
            let device = device.clone();
            let job_log = Arc::clone(&job_log);
            let cancel = Arc::clone(&cancel);
            let state = Arc::clone(&state);
            let spawner = Arc::clone(&self.spawner);
            let release = Arc::clone(&self.release);
            let active = Arc::clone(&self.active);

            thread::spawn(move || {
                // Frees the device even if the worker panics.
                let _slot = ActiveSlot {
                    active,
                    path: device.path.clone(),
                };
                run_job(
                    id, device, method, spawner, release, job_log, cancel, state,
                )
            })
        };

        ::log::info!("started erase job {id} for {} ({method})", device.path);

        Ok(JobHandle {
            id,
            device_path: device.path,
            log: job_log,
            cancel,
            state,
            worker,
        })
    }
}

/// Occupancy of one device in the active set, released on drop so a worker
/// panic cannot leave the device permanently busy.
struct ActiveSlot {
    active: Arc<Mutex<HashSet<String>>>,
    path: String,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        active.remove(&self.path);
    }
}

fn set_state(state: &Mutex<JobState>, next: JobState) {
    *state.lock().unwrap() = next;
}

#[allow(clippy::too_many_arguments)]
fn run_job(
    id: Uuid,
    device: Device,
    method: MethodKind,
    spawner: Arc<dyn OverwriteSpawner>,
    release: Arc<dyn DeviceRelease>,
    job_log: Arc<JobLog>,
    cancel: Arc<AtomicBool>,
    state: Arc<Mutex<JobState>>,
) -> JobReport {
    let started_at = Utc::now();

    // Pending -> Unmounting. Unmount failures are logged but never block
    // the wipe; on several transports the destructive operation does not
    // require a clean unmount.
    set_state(&state, JobState::Unmounting);
    job_log.append(format!("Unmounting filesystems on {}...", device.path));
    let unmount_report = release.release(&device.path);
    log_unmount(&job_log, &unmount_report);

    // Unmounting -> Running.
    set_state(&state, JobState::Running);
    job_log.append(format!(
        "Starting {} wipe on {} ({} bytes)",
        method, device.path, device.size
    ));

    let plan = plan_for(&device, method);
    let result = match &plan {
        OverwritePlan::Stream(spec) => runner::run_stream(&*spawner, spec, &cancel, &job_log),
        OverwritePlan::Steps(steps) => runner::run_steps(&*spawner, steps, &cancel, &job_log),
    };

    let outcome = match result {
        Ok(()) => {
            set_state(&state, JobState::Completed);
            job_log.append(format!(
                "{} wipe completed successfully for {}",
                method, device.path
            ));
            JobOutcome::Success
        }
        Err(RunError::Cancelled) => {
            set_state(&state, JobState::Cancelled);
            job_log.append("Wipe cancelled by user.");
            JobOutcome::Cancelled
        }
        Err(RunError::Failed(reason)) => {
            set_state(&state, JobState::Failed);
            job_log.append(reason.user_message());
            JobOutcome::Failed(reason)
        }
    };

    JobReport {
        id,
        device,
        method,
        outcome,
        started_at,
        finished_at: Utc::now(),
        log: job_log.snapshot(),
    }
}

fn log_unmount(job_log: &JobLog, report: &UnmountReport) {
    if report.is_noop() {
        job_log.append("No mounted filesystems found.");
        return;
    }

    for outcome in &report.outcomes {
        if outcome.released {
            if outcome.escalated {
                job_log.append(format!("Force unmounted {} (lazy)", outcome.partition));
            } else {
                job_log.append(format!("Unmounted {}", outcome.partition));
            }
        } else {
            let detail = outcome.detail.as_deref().unwrap_or("unknown error");
            job_log.append(format!(
                "Warning: could not unmount {}: {detail}",
                outcome.partition
            ));
        }
    }

    if !report.fully_released() {
        job_log.append("Warning: some filesystems could not be unmounted; continuing.");
    }
}
