// Certificate Emitter - durable, human-readable record of what was erased,
// with what method, and the verification outcome.
//
// Pure formatting plus a single write. Write-once: emitting again for the
// same job goes to a new destination, never an append or overwrite. A
// SHA-256 fingerprint over the body lets a later reader detect tampering.

use crate::engine::JobReport;
use crate::verify::VerificationResult;
use crate::{MethodKind, Verdict, VerifyStrategy, WipeError, WipeResult};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

const HEADER: &str = "DATA DESTRUCTION CERTIFICATE";
const RULE: &str = "============================";
const FOOTER_RULE: &str = "----------------------------";

/// A write-once snapshot combining device identity, method, timestamps and
/// the verification outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Certificate {
    pub certificate_id: String,
    pub device_path: String,
    pub device_size: u64,
    pub device_model: Option<String>,
    pub method: MethodKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub verify_strategy: VerifyStrategy,
    pub verdict: Verdict,
}

impl Certificate {
    pub fn from_job(report: &JobReport, verification: &VerificationResult) -> Self {
        Self {
            certificate_id: Uuid::new_v4().to_string(),
            device_path: report.device.path.clone(),
            device_size: report.device.size,
            device_model: report.device.model.clone(),
            method: report.method,
            started_at: report.started_at,
            finished_at: report.finished_at,
            verify_strategy: verification.strategy,
            verdict: verification.verdict,
        }
    }

    /// Render the plain-text record, fingerprint line included.
    pub fn render(&self) -> String {
        let body = self.render_body();
        let fingerprint = fingerprint_of(&body);
        format!("{body}{FOOTER_RULE}\nFingerprint: sha256:{fingerprint}\n")
    }

    fn render_body(&self) -> String {
        let mut body = String::new();
        body.push_str(HEADER);
        body.push('\n');
        body.push_str(RULE);
        body.push('\n');
        push_field(&mut body, "Certificate-Id", &self.certificate_id);
        push_field(&mut body, "Device", &self.device_path);
        push_field(&mut body, "Size-Bytes", &self.device_size.to_string());
        push_field(
            &mut body,
            "Model",
            self.device_model.as_deref().unwrap_or("unknown"),
        );
        push_field(&mut body, "Method", self.method.as_str());
        push_field(&mut body, "Started-At", &self.started_at.to_rfc3339());
        push_field(&mut body, "Finished-At", &self.finished_at.to_rfc3339());
        push_field(&mut body, "Verification", self.verify_strategy.as_str());
        push_field(&mut body, "Verdict", self.verdict.as_str());
        body
    }

    /// Write the certificate to `destination`. Refuses to overwrite an
    /// existing file: a re-emission must target a new destination.
    pub fn emit(&self, destination: &Path) -> WipeResult<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(destination)
            .map_err(WipeError::CertificateWrite)?;
        file.write_all(self.render().as_bytes())
            .map_err(WipeError::CertificateWrite)?;
        Ok(())
    }

    /// Parse a rendered certificate back into its fields.
    pub fn parse(text: &str) -> WipeResult<Self> {
        let field = |key: &str| -> WipeResult<&str> {
            let prefix = format!("{key}: ");
            text.lines()
                .find_map(|line| line.strip_prefix(&prefix))
                .ok_or_else(|| malformed(&format!("missing field '{key}'")))
        };

        let parse_time = |value: &str| -> WipeResult<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(value)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| malformed(&format!("bad timestamp '{value}': {e}")))
        };

        let model = field("Model")?;

        Ok(Self {
            certificate_id: field("Certificate-Id")?.to_string(),
            device_path: field("Device")?.to_string(),
            device_size: field("Size-Bytes")?
                .parse()
                .map_err(|e| malformed(&format!("bad size: {e}")))?,
            device_model: if model == "unknown" {
                None
            } else {
                Some(model.to_string())
            },
            method: field("Method")?
                .parse()
                .map_err(|e: String| malformed(&e))?,
            started_at: parse_time(field("Started-At")?)?,
            finished_at: parse_time(field("Finished-At")?)?,
            verify_strategy: field("Verification")?
                .parse()
                .map_err(|e: String| malformed(&e))?,
            verdict: field("Verdict")?
                .parse()
                .map_err(|e: String| malformed(&e))?,
        })
    }

    /// Check the fingerprint line of a rendered certificate against its
    /// body.
    pub fn verify_fingerprint(text: &str) -> bool {
        let Some((body, footer)) = text.split_once(FOOTER_RULE) else {
            return false;
        };
        let Some(recorded) = footer
            .lines()
            .find_map(|line| line.strip_prefix("Fingerprint: sha256:"))
        else {
            return false;
        };
        fingerprint_of(body) == recorded.trim()
    }
}

fn push_field(body: &mut String, key: &str, value: &str) {
    body.push_str(key);
    body.push_str(": ");
    body.push_str(value);
    body.push('\n');
}

fn fingerprint_of(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn malformed(detail: &str) -> WipeError {
    WipeError::CertificateWrite(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("malformed certificate: {detail}"),
    ))
}
