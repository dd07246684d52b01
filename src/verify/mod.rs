// Verification Stage - optionally re-reads the device after an erase to
// confirm the expected fill pattern. Strictly read-only.
//
// Methods without a deterministic fill pattern (firmware erase commands,
// quick wipe) verify as Skipped: claiming "pass" for sectors the method
// never touched would be misleading.

use crate::{MethodKind, Verdict, VerifyStrategy, WipeError, WipeResult};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

/// Number of evenly spaced offsets read by the sampled strategy.
const SAMPLE_COUNT: u64 = 16;
/// Bytes read per sample.
const SAMPLE_LEN: usize = 4096;
/// Chunk size for the full strategy.
const FULL_CHUNK: usize = 1024 * 1024;

/// Shannon entropy floor for random-fill verification. Uniform random data
/// scores close to 8 bits/byte even on 4 KiB blocks; any all-one-value
/// block scores 0.
const ENTROPY_FLOOR: f64 = 6.0;

/// Outcome of verifying one completed erase job. Never mutated after
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub strategy: VerifyStrategy,
    pub verdict: Verdict,
    /// Byte offsets read by the sampled strategy.
    pub sampled_offsets: Vec<u64>,
    /// First mismatching offset, when the verdict is Fail.
    pub mismatch_offset: Option<u64>,
    pub note: Option<String>,
}

impl VerificationResult {
    fn skipped(strategy: VerifyStrategy, note: Option<&str>) -> Self {
        Self {
            strategy,
            verdict: Verdict::Skipped,
            sampled_offsets: Vec::new(),
            mismatch_offset: None,
            note: note.map(str::to_string),
        }
    }
}

/// What an erase method leaves behind, from the verifier's point of view.
enum ExpectedFill {
    Zeros,
    /// Random overwrite: no byte-exact expectation, but every block must
    /// look like noise.
    HighEntropy,
    /// No deterministic pattern to compare against.
    Indeterminate(&'static str),
}

fn expected_fill(method: MethodKind) -> ExpectedFill {
    match method {
        // Shred's final pass writes zeros.
        MethodKind::ZeroFill | MethodKind::Shred => ExpectedFill::Zeros,
        MethodKind::RandomFill => ExpectedFill::HighEntropy,
        MethodKind::Quick => {
            ExpectedFill::Indeterminate("quick wipe leaves most of the device untouched")
        }
        MethodKind::AtaSecureErase => {
            ExpectedFill::Indeterminate("firmware secure erase has no fixed fill pattern")
        }
        MethodKind::NvmeSanitize => {
            ExpectedFill::Indeterminate("firmware sanitize has no fixed fill pattern")
        }
    }
}

/// Verify an erased device. The `none` strategy never opens the device.
pub fn verify(
    path: &str,
    size: u64,
    method: MethodKind,
    strategy: VerifyStrategy,
) -> WipeResult<VerificationResult> {
    if strategy == VerifyStrategy::None {
        return Ok(VerificationResult::skipped(strategy, None));
    }

    let expected = match expected_fill(method) {
        ExpectedFill::Indeterminate(note) => {
            return Ok(VerificationResult::skipped(strategy, Some(note)));
        }
        other => other,
    };

    let mut file = File::open(path).map_err(WipeError::VerifyIo)?;

    match strategy {
        VerifyStrategy::None => Ok(VerificationResult::skipped(strategy, None)),
        VerifyStrategy::Sampled => verify_sampled(&mut file, size, &expected),
        VerifyStrategy::Full => verify_full(&mut file, size, &expected),
    }
}

/// Evenly spaced offsets across `[0, size - SAMPLE_LEN]`.
fn sample_offsets(size: u64) -> Vec<u64> {
    let sample_len = SAMPLE_LEN as u64;
    if size <= sample_len {
        return vec![0];
    }

    let span = size - sample_len;
    (0..SAMPLE_COUNT)
        .map(|i| span * i / (SAMPLE_COUNT - 1))
        .collect()
}

fn verify_sampled(
    file: &mut File,
    size: u64,
    expected: &ExpectedFill,
) -> WipeResult<VerificationResult> {
    let offsets = sample_offsets(size);
    let mut buffer = vec![0u8; SAMPLE_LEN.min(size as usize).max(1)];

    for &offset in &offsets {
        file.seek(SeekFrom::Start(offset)).map_err(WipeError::VerifyIo)?;
        let want = buffer.len().min((size - offset) as usize).max(1);
        let n = read_up_to(file, &mut buffer[..want]).map_err(WipeError::VerifyIo)?;
        debug!("verifying {n} bytes at offset {offset}");

        // A sample that cannot be read in full cannot be certified.
        if n < want {
            return Ok(VerificationResult {
                strategy: VerifyStrategy::Sampled,
                verdict: Verdict::Fail,
                sampled_offsets: offsets.clone(),
                mismatch_offset: Some(offset + n as u64),
                note: Some("device ended before the expected size".to_string()),
            });
        }

        let block = &buffer[..n];
        if let Some(rel) = check_block(block, expected) {
            return Ok(VerificationResult {
                strategy: VerifyStrategy::Sampled,
                verdict: Verdict::Fail,
                sampled_offsets: offsets.clone(),
                mismatch_offset: Some(offset + rel),
                note: None,
            });
        }
    }

    Ok(VerificationResult {
        strategy: VerifyStrategy::Sampled,
        verdict: Verdict::Pass,
        sampled_offsets: offsets,
        mismatch_offset: None,
        note: None,
    })
}

fn verify_full(
    file: &mut File,
    size: u64,
    expected: &ExpectedFill,
) -> WipeResult<VerificationResult> {
    let mut buffer = vec![0u8; FULL_CHUNK];
    let mut position = 0u64;

    while position < size {
        let want = FULL_CHUNK.min((size - position) as usize);
        let n = read_up_to(file, &mut buffer[..want]).map_err(WipeError::VerifyIo)?;
        // Full means every byte up to `size`; a premature end of device
        // leaves bytes uncertified and fails the verification.
        if n < want {
            return Ok(VerificationResult {
                strategy: VerifyStrategy::Full,
                verdict: Verdict::Fail,
                sampled_offsets: Vec::new(),
                mismatch_offset: Some(position + n as u64),
                note: Some("device ended before the expected size".to_string()),
            });
        }

        if let Some(rel) = check_block(&buffer[..n], expected) {
            return Ok(VerificationResult {
                strategy: VerifyStrategy::Full,
                verdict: Verdict::Fail,
                sampled_offsets: Vec::new(),
                mismatch_offset: Some(position + rel),
                note: None,
            });
        }

        position += n as u64;
    }

    Ok(VerificationResult {
        strategy: VerifyStrategy::Full,
        verdict: Verdict::Pass,
        sampled_offsets: Vec::new(),
        mismatch_offset: None,
        note: None,
    })
}

/// Relative offset of the first violation in `block`, if any.
fn check_block(block: &[u8], expected: &ExpectedFill) -> Option<u64> {
    match expected {
        ExpectedFill::Zeros => block
            .iter()
            .position(|&b| b != 0x00)
            .map(|i| i as u64),
        ExpectedFill::HighEntropy => {
            if shannon_entropy(block) < ENTROPY_FLOOR {
                Some(0)
            } else {
                None
            }
        }
        ExpectedFill::Indeterminate(_) => None,
    }
}

fn read_up_to(file: &mut File, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buffer.len() {
        let n = file.read(&mut buffer[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

/// Shannon entropy in bits per byte.
fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut counts = [0u64; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }

    let length = data.len() as f64;
    let mut entropy = 0.0;
    for &count in &counts {
        if count > 0 {
            let probability = count as f64 / length;
            entropy -= probability * probability.log2();
        }
    }

    entropy
}
