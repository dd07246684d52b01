// Allow uppercase acronyms for industry-standard terms like USB, SATA, NVMe
#![allow(clippy::upper_case_acronyms)]

pub mod certificate;
pub mod devices;
pub mod engine;
pub mod methods;
pub mod mounts;
pub mod verify;

// Re-export the main engine entry points for convenience
pub use engine::{EraseEngine, FailureReason, JobHandle, JobOutcome, JobReport, JobState};
pub use methods::{applicable_methods, default_method, WipeMethod};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How a storage device is attached to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    USB,
    SATA,
    NVMe,
    Android, // exposed through a protocol bridge, behaves like USB mass storage
    Unknown,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::USB => "usb",
            Transport::SATA => "sata",
            Transport::NVMe => "nvme",
            Transport::Android => "android",
            Transport::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a block-device entry is a whole disk or a sub-unit of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceRole {
    WholeDisk,
    Partition,
}

/// An immutable snapshot of an attached storage device.
///
/// Classification happens once, at catalog time. Re-enumeration produces a
/// new snapshot rather than mutating an existing one, because the physical
/// device can change between listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub path: String,
    pub size: u64,
    pub transport: Transport,
    pub removable: bool,
    pub role: DeviceRole,
    pub model: Option<String>,
}

impl Device {
    /// Only whole-disk, removable devices are eligible erase targets.
    ///
    /// `allow_non_removable` is the explicit override for firmware-level
    /// purges of internal SATA/NVMe drives; it never makes a partition
    /// eligible.
    pub fn eligible(&self, allow_non_removable: bool) -> bool {
        self.role == DeviceRole::WholeDisk && (self.removable || allow_non_removable)
    }
}

/// Symbolic destruction method kinds. The full catalog lives in [`methods`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MethodKind {
    Quick,
    ZeroFill,
    RandomFill,
    Shred,
    AtaSecureErase,
    NvmeSanitize,
}

impl MethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodKind::Quick => "quick",
            MethodKind::ZeroFill => "zero-fill",
            MethodKind::RandomFill => "random-fill",
            MethodKind::Shred => "multi-pass-shred",
            MethodKind::AtaSecureErase => "ata-secure-erase",
            MethodKind::NvmeSanitize => "nvme-sanitize",
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MethodKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quick" => Ok(MethodKind::Quick),
            "zero" | "zero-fill" => Ok(MethodKind::ZeroFill),
            "random" | "random-fill" => Ok(MethodKind::RandomFill),
            "shred" | "multi-pass-shred" => Ok(MethodKind::Shred),
            "secure-erase" | "ata-secure-erase" => Ok(MethodKind::AtaSecureErase),
            "sanitize" | "nvme-sanitize" => Ok(MethodKind::NvmeSanitize),
            other => Err(format!("unknown wipe method '{}'", other)),
        }
    }
}

/// NIST 800-88 media sanitization tier of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compliance {
    Clear,
    Purge,
    NonCompliant,
}

impl fmt::Display for Compliance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Compliance::Clear => "Clear",
            Compliance::Purge => "Purge",
            Compliance::NonCompliant => "Non-compliant",
        };
        f.write_str(s)
    }
}

/// Post-erase verification sampling strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyStrategy {
    #[default]
    None,
    Sampled,
    Full,
}

impl VerifyStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyStrategy::None => "none",
            VerifyStrategy::Sampled => "sampled",
            VerifyStrategy::Full => "full",
        }
    }
}

impl fmt::Display for VerifyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerifyStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(VerifyStrategy::None),
            "sampled" => Ok(VerifyStrategy::Sampled),
            "full" => Ok(VerifyStrategy::Full),
            other => Err(format!("unknown verification strategy '{}'", other)),
        }
    }
}

/// Verification verdict for one completed erase job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
    Skipped,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(Verdict::Pass),
            "fail" => Ok(Verdict::Fail),
            "skipped" => Ok(Verdict::Skipped),
            other => Err(format!("unknown verdict '{}'", other)),
        }
    }
}

/// Session handoff record passed at job start.
///
/// When the engine runs as a separate process from its front-end, this is
/// the structured record exchanged between them. Absent fields fall back to
/// the documented defaults: method `zero-fill`, verification `none`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub device: String,
    #[serde(default = "JobSpec::default_method")]
    pub method: MethodKind,
    #[serde(default)]
    pub verify: VerifyStrategy,
    #[serde(default)]
    pub allow_non_removable: bool,
}

impl JobSpec {
    fn default_method() -> MethodKind {
        MethodKind::ZeroFill
    }

    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            method: MethodKind::ZeroFill,
            verify: VerifyStrategy::None,
            allow_non_removable: false,
        }
    }
}

/// Error taxonomy for the wipe pipeline.
///
/// Everything below the job boundary is caught by the engine and translated
/// into a terminal job state plus a human-readable log line; these variants
/// surface only at the API seams (job start, verification, certificate).
#[derive(Error, Debug)]
pub enum WipeError {
    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    #[error("unmount of {path} failed: {detail}")]
    Unmount { path: String, detail: String },

    #[error("required tool '{0}' was not found; install it and retry")]
    ToolMissing(String),

    #[error("permission denied for {0}; run with elevated privileges")]
    PermissionDenied(String),

    #[error("device I/O error: {detail}")]
    DeviceIo { detail: String, offset: Option<u64> },

    #[error("operation cancelled")]
    Cancelled,

    #[error("method '{method}' is not applicable to {transport} devices")]
    MethodNotApplicable {
        method: MethodKind,
        transport: Transport,
    },

    #[error("an erase job is already active for {0}")]
    JobAlreadyActive(String),

    #[error("device {0} is not an eligible wipe target")]
    IneligibleTarget(String),

    #[error("certificate write failed: {0}")]
    CertificateWrite(#[source] std::io::Error),

    #[error("verification read failed: {0}")]
    VerifyIo(#[source] std::io::Error),
}

pub type WipeResult<T> = Result<T, WipeError>;

/// Convenience wrapper that runs the full pipeline for one job: start the
/// erase, wait for a terminal state, then verify only if the erase
/// completed. Cancelled and failed jobs never produce a verification
/// result.
pub fn run_job(
    engine: &EraseEngine,
    device: Device,
    spec: &JobSpec,
) -> WipeResult<(JobReport, Option<verify::VerificationResult>)> {
    let handle = engine.start(device.clone(), spec.method, spec.allow_non_removable)?;
    let report = handle.wait();

    let verification = match report.outcome {
        JobOutcome::Success => Some(verify::verify(
            &device.path,
            device.size,
            spec.method,
            spec.verify,
        )?),
        _ => None,
    };

    Ok((report, verification))
}
