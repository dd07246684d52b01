// Overwrite execution - drives the destructive-overwrite collaborator.
//
// The collaborator streams progress text line by line and signals completion
// via an exit status; the engine can request its abrupt termination at any
// time. Cancellation is checked at each line boundary (streaming plans) or
// at a short polling interval (stepped plans), so cancel latency is bounded
// either way.

use super::job::FailureReason;
use super::log::JobLog;
use super::plan::{CommandSpec, Step};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const STEP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exit condition of an overwrite process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Success,
    Code(i32),
    /// Terminated by a signal (including our own kill on cancel).
    Signalled,
}

/// A spawned overwrite operation.
pub trait OverwriteProcess: Send {
    /// Next progress line; blocks until one is available, `Ok(None)` once
    /// the stream is exhausted.
    fn next_line(&mut self) -> io::Result<Option<String>>;

    /// Request abrupt termination. Best-effort; must be safe to call more
    /// than once.
    fn terminate(&mut self);

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>>;

    fn wait(&mut self) -> io::Result<ProcessExit>;
}

/// Spawning collaborator, the seam tests replace with a scripted process.
pub trait OverwriteSpawner: Send + Sync {
    fn spawn(&self, spec: &CommandSpec) -> io::Result<Box<dyn OverwriteProcess>>;
}

/// Production spawner wrapping `std::process`. Progress is read from the
/// child's stderr: both `dd status=progress` and `shred -v` report there.
pub struct SystemSpawner;

impl OverwriteSpawner for SystemSpawner {
    fn spawn(&self, spec: &CommandSpec) -> io::Result<Box<dyn OverwriteProcess>> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr = child.stderr.take();
        Ok(Box::new(ChildProcess {
            child,
            stderr,
            pending: VecDeque::new(),
            partial: Vec::new(),
        }))
    }
}

struct ChildProcess {
    child: Child,
    stderr: Option<ChildStderr>,
    pending: VecDeque<String>,
    partial: Vec<u8>,
}

impl ChildProcess {
    fn flush_partial(&mut self) {
        if !self.partial.is_empty() {
            let line = String::from_utf8_lossy(&self.partial).into_owned();
            self.partial.clear();
            self.pending.push_back(line);
        }
    }
}

impl OverwriteProcess for ChildProcess {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(line));
            }

            let Some(stderr) = self.stderr.as_mut() else {
                return Ok(None);
            };

            let mut chunk = [0u8; 4096];
            let n = stderr.read(&mut chunk)?;
            if n == 0 {
                self.stderr = None;
                self.flush_partial();
                continue;
            }

            // dd separates progress updates with carriage returns, so split
            // on both CR and LF.
            for &byte in &chunk[..n] {
                if byte == b'\n' || byte == b'\r' {
                    self.flush_partial();
                } else {
                    self.partial.push(byte);
                }
            }
        }
    }

    fn terminate(&mut self) {
        let _ = self.child.kill();
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self.child.try_wait()?.map(exit_of))
    }

    fn wait(&mut self) -> io::Result<ProcessExit> {
        Ok(exit_of(self.child.wait()?))
    }
}

fn exit_of(status: std::process::ExitStatus) -> ProcessExit {
    match status.code() {
        Some(0) => ProcessExit::Success,
        Some(code) => ProcessExit::Code(code),
        None => ProcessExit::Signalled,
    }
}

/// Why an overwrite run stopped short of success.
#[derive(Debug)]
pub(crate) enum RunError {
    Cancelled,
    Failed(FailureReason),
}

/// Map a spawn failure to a user-actionable reason.
fn classify_spawn_error(tool: &str, err: &io::Error) -> FailureReason {
    match err.kind() {
        io::ErrorKind::NotFound => FailureReason::ToolMissing(tool.to_string()),
        io::ErrorKind::PermissionDenied => FailureReason::PermissionDenied,
        _ => FailureReason::Unknown(format!("could not run {tool}: {err}")),
    }
}

fn classify_exit(spec: &CommandSpec, exit: ProcessExit) -> Result<(), RunError> {
    match exit {
        ProcessExit::Success => Ok(()),
        ProcessExit::Code(code) => Err(RunError::Failed(FailureReason::DeviceError(format!(
            "{} exited with code {}",
            spec.program, code
        )))),
        ProcessExit::Signalled => Err(RunError::Failed(FailureReason::DeviceError(format!(
            "{} was terminated by a signal",
            spec.program
        )))),
    }
}

/// Run a streaming plan: append each progress line to the job log, checking
/// the cancellation flag at every line boundary.
pub(crate) fn run_stream(
    spawner: &dyn OverwriteSpawner,
    spec: &CommandSpec,
    cancel: &AtomicBool,
    log: &JobLog,
) -> Result<(), RunError> {
    log.append(format!("Running: {}", spec.display_line()));

    let mut process = spawner
        .spawn(spec)
        .map_err(|e| RunError::Failed(classify_spawn_error(&spec.program, &e)))?;

    loop {
        if cancel.load(Ordering::SeqCst) {
            process.terminate();
            let _ = process.wait();
            return Err(RunError::Cancelled);
        }

        match process.next_line() {
            Ok(Some(line)) => {
                let line = line.trim();
                if !line.is_empty() {
                    log.append(line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                process.terminate();
                let _ = process.wait();
                return Err(RunError::Failed(FailureReason::DeviceError(format!(
                    "reading progress from {}: {e}",
                    spec.program
                ))));
            }
        }
    }

    // The flag may have been raised while we drained the final lines.
    if cancel.load(Ordering::SeqCst) {
        process.terminate();
        let _ = process.wait();
        return Err(RunError::Cancelled);
    }

    let exit = process.wait().map_err(|e| {
        RunError::Failed(FailureReason::Unknown(format!(
            "waiting for {}: {e}",
            spec.program
        )))
    })?;
    classify_exit(spec, exit)
}

/// Run a stepped plan: each sub-step is a bounded command; the first failure
/// aborts the remaining sub-steps. Partial work is not rolled back.
pub(crate) fn run_steps(
    spawner: &dyn OverwriteSpawner,
    steps: &[Step],
    cancel: &AtomicBool,
    log: &JobLog,
) -> Result<(), RunError> {
    for step in steps {
        if cancel.load(Ordering::SeqCst) {
            return Err(RunError::Cancelled);
        }

        log.append(format!("{}...", step.label));

        let mut process = spawner
            .spawn(&step.spec)
            .map_err(|e| RunError::Failed(classify_spawn_error(&step.spec.program, &e)))?;

        let deadline = step.spec.timeout.map(|t| Instant::now() + t);

        loop {
            if cancel.load(Ordering::SeqCst) {
                process.terminate();
                let _ = process.wait();
                return Err(RunError::Cancelled);
            }

            match process.try_wait() {
                Ok(Some(exit)) => {
                    classify_exit(&step.spec, exit).map_err(|e| {
                        if let RunError::Failed(FailureReason::DeviceError(detail)) = &e {
                            log.append(format!("Step failed: {} ({detail})", step.label));
                        }
                        e
                    })?;
                    break;
                }
                Ok(None) => {
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            process.terminate();
                            let _ = process.wait();
                            return Err(RunError::Failed(FailureReason::DeviceError(format!(
                                "step '{}' timed out",
                                step.label
                            ))));
                        }
                    }
                    thread::sleep(STEP_POLL_INTERVAL);
                }
                Err(e) => {
                    process.terminate();
                    return Err(RunError::Failed(FailureReason::Unknown(format!(
                        "waiting for {}: {e}",
                        step.spec.program
                    ))));
                }
            }
        }
    }

    Ok(())
}
