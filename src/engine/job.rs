use super::log::JobLog;
use crate::{Device, MethodKind};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use uuid::Uuid;

/// Erase job state machine.
///
/// `Pending -> Unmounting -> Running -> {Completed, Failed, Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Unmounting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

/// Distinguishable cause of a failed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// A required external tool is absent; carries the tool name.
    ToolMissing(String),
    PermissionDenied,
    DeviceError(String),
    Unknown(String),
}

impl FailureReason {
    /// Plain-language line accompanying the Failed state.
    pub fn user_message(&self) -> String {
        match self {
            FailureReason::ToolMissing(tool) => {
                format!("Error: the '{tool}' tool is missing on this system. Install it and retry.")
            }
            FailureReason::PermissionDenied => {
                "Error: insufficient permissions to access the device. Run with elevated \
                 privileges."
                    .to_string()
            }
            FailureReason::DeviceError(detail) => format!("Error: device operation failed: {detail}"),
            FailureReason::Unknown(detail) => format!("Error: {detail}"),
        }
    }
}

/// Final result of an erase job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failed(FailureReason),
    Cancelled,
}

/// Terminal snapshot of one job: what ran, when, how it ended, and the full
/// ordered log.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub id: Uuid,
    pub device: Device,
    pub method: MethodKind,
    pub outcome: JobOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub log: Vec<String>,
}

/// Foreground handle to a background erase job.
///
/// The cancellation flag is the only job state another thread of control may
/// mutate; it is a single-writer-many-reader bit, observed by the background
/// task at bounded intervals.
#[derive(Debug)]
pub struct JobHandle {
    pub(super) id: Uuid,
    pub(super) device_path: String,
    pub(super) log: Arc<JobLog>,
    pub(super) cancel: Arc<AtomicBool>,
    pub(super) state: Arc<Mutex<JobState>>,
    pub(super) worker: JoinHandle<JobReport>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Shared view of the append-only progress log.
    pub fn log(&self) -> Arc<JobLog> {
        Arc::clone(&self.log)
    }

    /// Request cooperative cancellation. Safe to call at any time, from any
    /// thread, repeatedly.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> JobState {
        *self.state.lock().unwrap()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Block until the job reaches a terminal state and return its report.
    pub fn wait(self) -> JobReport {
        match self.worker.join() {
            Ok(report) => report,
            // A worker panic is a bug; still surface a terminal report
            // rather than propagating the panic into the caller.
            Err(_) => JobReport {
                id: self.id,
                device: Device {
                    path: self.device_path.clone(),
                    size: 0,
                    transport: crate::Transport::Unknown,
                    removable: false,
                    role: crate::DeviceRole::WholeDisk,
                    model: None,
                },
                method: MethodKind::ZeroFill,
                outcome: JobOutcome::Failed(FailureReason::Unknown(
                    "erase worker terminated abnormally".to_string(),
                )),
                started_at: Utc::now(),
                finished_at: Utc::now(),
                log: self.log.snapshot(),
            },
        }
    }
}
