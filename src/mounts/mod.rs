// Unmount Coordinator - force-releases every filesystem mounted from a
// device before destructive operations proceed.
//
// The coordinator owns the bounded-timeout-then-escalate policy itself; the
// unmount collaborator performs exactly one attempt. A partial failure is
// never fatal to the wipe: on most transports the destructive operation does
// not require a clean unmount, but every failure is recorded for operator
// awareness.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::fs;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Mounted-filesystem collaborator: partitions currently mounted whose
/// backing device is the target or one of its partitions.
pub trait MountSource {
    fn mounted_partitions(&self, device_path: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountMode {
    Graceful,
    /// Lazy detach; the kernel releases the mount once it is no longer busy.
    Lazy,
}

/// Result of a single unmount attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Unmounted,
    TimedOut,
    Failed(String),
}

/// Unmount collaborator: one OS-level unmount attempt. The `timeout` bound
/// is enforced here mechanically (the attempt must return), but when to
/// escalate is the coordinator's decision.
pub trait Unmounter {
    fn unmount(&self, partition: &str, mode: UnmountMode, timeout: Duration) -> AttemptOutcome;
}

/// Per-partition record of the release attempt(s).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionOutcome {
    pub partition: String,
    pub released: bool,
    /// True when the graceful attempt timed out and a lazy unmount was used.
    pub escalated: bool,
    pub detail: Option<String>,
}

/// Outcome of releasing one device: fully unmounted, or partially with
/// per-partition errors.
#[derive(Debug, Clone, Default)]
pub struct UnmountReport {
    pub outcomes: Vec<PartitionOutcome>,
}

impl UnmountReport {
    pub fn fully_released(&self) -> bool {
        self.outcomes.iter().all(|o| o.released)
    }

    /// No filesystems were mounted; releasing was a no-op.
    pub fn is_noop(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Seam used by the erase engine so tests can substitute the whole stage.
pub trait DeviceRelease: Send + Sync {
    fn release(&self, device_path: &str) -> UnmountReport;
}

pub struct UnmountCoordinator<M, U> {
    mounts: M,
    unmounter: U,
    graceful_timeout: Duration,
}

const DEFAULT_GRACEFUL_TIMEOUT: Duration = Duration::from_secs(10);

impl UnmountCoordinator<ProcMounts, UmountCommand> {
    pub fn system() -> Self {
        Self::new(ProcMounts, UmountCommand, DEFAULT_GRACEFUL_TIMEOUT)
    }
}

impl<M: MountSource, U: Unmounter> UnmountCoordinator<M, U> {
    pub fn new(mounts: M, unmounter: U, graceful_timeout: Duration) -> Self {
        Self {
            mounts,
            unmounter,
            graceful_timeout,
        }
    }

    /// Release every filesystem mounted from `device_path`. Idempotent:
    /// zero mounted partitions is a no-op success.
    pub fn release_device(&self, device_path: &str) -> UnmountReport {
        let partitions = match self.mounts.mounted_partitions(device_path) {
            Ok(partitions) => partitions,
            Err(e) => {
                warn!("could not enumerate mounts for {device_path}: {e:#}");
                return UnmountReport::default();
            }
        };

        let mut report = UnmountReport::default();

        for partition in partitions {
            debug!("unmounting {partition}");
            let outcome = match self
                .unmounter
                .unmount(&partition, UnmountMode::Graceful, self.graceful_timeout)
            {
                AttemptOutcome::Unmounted => PartitionOutcome {
                    partition,
                    released: true,
                    escalated: false,
                    detail: None,
                },
                AttemptOutcome::TimedOut => {
                    // Graceful attempt exceeded its bound; escalate to a
                    // lazy detach.
                    debug!("graceful unmount timed out, escalating to lazy");
                    match self.unmounter.unmount(
                        &partition,
                        UnmountMode::Lazy,
                        self.graceful_timeout,
                    ) {
                        AttemptOutcome::Unmounted => PartitionOutcome {
                            partition,
                            released: true,
                            escalated: true,
                            detail: None,
                        },
                        AttemptOutcome::TimedOut => PartitionOutcome {
                            partition,
                            released: false,
                            escalated: true,
                            detail: Some("lazy unmount timed out".to_string()),
                        },
                        AttemptOutcome::Failed(detail) => PartitionOutcome {
                            partition,
                            released: false,
                            escalated: true,
                            detail: Some(detail),
                        },
                    }
                }
                AttemptOutcome::Failed(detail) => PartitionOutcome {
                    partition,
                    released: false,
                    escalated: false,
                    detail: Some(detail),
                },
            };
            report.outcomes.push(outcome);
        }

        report
    }
}

impl<M, U> DeviceRelease for UnmountCoordinator<M, U>
where
    M: MountSource + Send + Sync,
    U: Unmounter + Send + Sync,
{
    fn release(&self, device_path: &str) -> UnmountReport {
        self.release_device(device_path)
    }
}

/// Production mount source backed by `/proc/mounts`. Partition nodes share
/// the whole-disk path as a prefix (`/dev/sdb` -> `/dev/sdb1`), so a prefix
/// match covers the device and all of its partitions.
pub struct ProcMounts;

impl MountSource for ProcMounts {
    fn mounted_partitions(&self, device_path: &str) -> Result<Vec<String>> {
        let mounts = fs::read_to_string("/proc/mounts").context("reading /proc/mounts")?;

        Ok(mounts
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .filter(|source| source.starts_with(device_path))
            .map(str::to_string)
            .collect())
    }
}

/// Production unmounter running `umount`. The timeout is enforced by
/// polling the child and killing it on expiry.
pub struct UmountCommand;

impl Unmounter for UmountCommand {
    fn unmount(&self, partition: &str, mode: UnmountMode, timeout: Duration) -> AttemptOutcome {
        let mut command = Command::new("umount");
        match mode {
            UnmountMode::Graceful => command.arg("-f"),
            UnmountMode::Lazy => command.arg("-l"),
        };
        command
            .arg(partition)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return AttemptOutcome::Failed(format!("could not run umount: {e}")),
        };

        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return AttemptOutcome::Unmounted,
                Ok(Some(status)) => {
                    return AttemptOutcome::Failed(format!(
                        "umount exited with status {}",
                        status.code().unwrap_or(-1)
                    ))
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return AttemptOutcome::TimedOut;
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return AttemptOutcome::Failed(format!("waiting for umount: {e}")),
            }
        }
    }
}
