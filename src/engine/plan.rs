// Overwrite plans - translate a chosen method into the concrete OS commands
// the engine drives.
//
// Two shapes exist. Streaming plans run one long-lived command that reports
// progress line by line (dd, shred). Stepped plans run an ordered sequence
// of bounded sub-steps (quick wipe, firmware erase commands); the first
// failing sub-step aborts the remainder with no rollback.

use crate::{Device, MethodKind};
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Password used for the ATA security handshake before a secure erase.
/// The erase itself invalidates it.
const ATA_ERASE_PASSWORD: &str = "expunge";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Bound for stepped commands; streaming commands run unbounded (a
    /// full-device overwrite can legitimately take hours).
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            timeout: None,
        }
    }

    pub fn bounded(program: &str, args: &[&str], timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::new(program, args)
        }
    }

    /// The invocation as a single log-friendly line.
    pub fn display_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub label: String,
    pub spec: CommandSpec,
}

impl Step {
    fn new(label: &str, spec: CommandSpec) -> Self {
        Self {
            label: label.to_string(),
            spec,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverwritePlan {
    /// One long-running command emitting progress lines.
    Stream(CommandSpec),
    /// Discrete sub-steps, each bounded; first failure aborts the rest.
    Steps(Vec<Step>),
}

/// Build the plan for a method against a device snapshot.
pub fn plan_for(device: &Device, kind: MethodKind) -> OverwritePlan {
    let dev = device.path.as_str();
    let of = format!("of={dev}");

    match kind {
        MethodKind::ZeroFill => OverwritePlan::Stream(CommandSpec::new(
            "dd",
            &["if=/dev/zero", &of, "bs=1M", "status=progress"],
        )),
        MethodKind::RandomFill => OverwritePlan::Stream(CommandSpec::new(
            "dd",
            &["if=/dev/urandom", &of, "bs=1M", "status=progress"],
        )),
        MethodKind::Shred => {
            // Three overwrite passes then a final zero pass.
            OverwritePlan::Stream(CommandSpec::new("shred", &["-v", "-n", "3", "-z", dev]))
        }
        MethodKind::Quick => OverwritePlan::Steps(quick_steps(device, &of)),
        MethodKind::AtaSecureErase => OverwritePlan::Steps(vec![
            Step::new(
                "Setting ATA security password",
                CommandSpec::bounded(
                    "hdparm",
                    &[
                        "--user-master",
                        "u",
                        "--security-set-pass",
                        ATA_ERASE_PASSWORD,
                        dev,
                    ],
                    Duration::from_secs(30),
                ),
            ),
            Step::new(
                "Issuing ATA SECURITY ERASE UNIT",
                // Opaque atomic step from the engine's point of view; the
                // drive firmware reports completion only when done.
                CommandSpec::new(
                    "hdparm",
                    &[
                        "--user-master",
                        "u",
                        "--security-erase",
                        ATA_ERASE_PASSWORD,
                        dev,
                    ],
                ),
            ),
        ]),
        MethodKind::NvmeSanitize => OverwritePlan::Steps(vec![Step::new(
            "Issuing NVMe sanitize (cryptographic erase)",
            // The command only kicks off the sanitize in the controller and
            // returns; the firmware continues on its own.
            CommandSpec::bounded(
                "nvme",
                &["sanitize", dev, "-a", "2"],
                Duration::from_secs(30),
            ),
        )]),
    }
}

fn quick_steps(device: &Device, of: &str) -> Vec<Step> {
    let dev = device.path.as_str();
    let mut steps = vec![
        Step::new(
            "Removing filesystem signatures",
            CommandSpec::bounded("wipefs", &["-a", dev], Duration::from_secs(30)),
        ),
        Step::new(
            "Zeroing device head (partition table)",
            CommandSpec::bounded(
                "dd",
                &["if=/dev/zero", of, "bs=1M", "count=10"],
                Duration::from_secs(30),
            ),
        ),
    ];

    // Backup GPT lives in the last sectors; zero the final MiB too.
    if device.size > MIB {
        let seek = (device.size - MIB) / MIB;
        let seek_arg = format!("seek={seek}");
        steps.push(Step::new(
            "Zeroing device tail",
            CommandSpec::bounded(
                "dd",
                &["if=/dev/zero", of, "bs=1M", &seek_arg, "count=1"],
                Duration::from_secs(30),
            ),
        ));
    }

    steps.push(Step::new(
        "Creating new partition table",
        CommandSpec::bounded(
            "parted",
            &["-s", dev, "mklabel", "msdos"],
            Duration::from_secs(10),
        ),
    ));
    steps.push(Step::new(
        "Creating new primary partition",
        CommandSpec::bounded(
            "parted",
            &["-s", dev, "mkpart", "primary", "fat32", "0%", "100%"],
            Duration::from_secs(10),
        ),
    ));

    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceRole, Transport};

    fn usb_device(size: u64) -> Device {
        Device {
            path: "/dev/sdx".to_string(),
            size,
            transport: Transport::USB,
            removable: true,
            role: DeviceRole::WholeDisk,
            model: None,
        }
    }

    #[test]
    fn zero_fill_streams_dd_with_progress() {
        let plan = plan_for(&usb_device(16 * 1024 * MIB), MethodKind::ZeroFill);
        match plan {
            OverwritePlan::Stream(spec) => {
                assert_eq!(spec.program, "dd");
                assert!(spec.args.contains(&"if=/dev/zero".to_string()));
                assert!(spec.args.contains(&"of=/dev/sdx".to_string()));
                assert!(spec.args.contains(&"status=progress".to_string()));
                assert!(spec.timeout.is_none());
            }
            other => panic!("expected streaming plan, got {other:?}"),
        }
    }

    #[test]
    fn random_fill_reads_urandom() {
        match plan_for(&usb_device(16 * 1024 * MIB), MethodKind::RandomFill) {
            OverwritePlan::Stream(spec) => {
                assert!(spec.args.contains(&"if=/dev/urandom".to_string()));
            }
            other => panic!("expected streaming plan, got {other:?}"),
        }
    }

    #[test]
    fn shred_overwrites_then_zeroes() {
        match plan_for(&usb_device(16 * 1024 * MIB), MethodKind::Shred) {
            OverwritePlan::Stream(spec) => {
                assert_eq!(spec.program, "shred");
                assert_eq!(spec.args, vec!["-v", "-n", "3", "-z", "/dev/sdx"]);
            }
            other => panic!("expected streaming plan, got {other:?}"),
        }
    }

    #[test]
    fn quick_wipe_steps_cover_head_tail_and_partition_table() {
        let size = 8 * 1024 * MIB;
        match plan_for(&usb_device(size), MethodKind::Quick) {
            OverwritePlan::Steps(steps) => {
                assert_eq!(steps.len(), 5);
                assert_eq!(steps[0].spec.program, "wipefs");
                assert_eq!(steps[1].spec.program, "dd");
                let expected_seek = format!("seek={}", (size - MIB) / MIB);
                assert!(steps[2].spec.args.contains(&expected_seek));
                assert_eq!(steps[3].spec.program, "parted");
                assert_eq!(steps[4].spec.program, "parted");
                assert!(steps.iter().all(|s| s.spec.timeout.is_some()));
            }
            other => panic!("expected stepped plan, got {other:?}"),
        }
    }

    #[test]
    fn quick_wipe_on_tiny_device_skips_the_tail_pass() {
        match plan_for(&usb_device(MIB / 2), MethodKind::Quick) {
            OverwritePlan::Steps(steps) => {
                assert_eq!(steps.len(), 4);
                assert!(!steps.iter().any(|s| s.label.contains("tail")));
            }
            other => panic!("expected stepped plan, got {other:?}"),
        }
    }

    #[test]
    fn secure_erase_sets_password_before_erasing() {
        match plan_for(&usb_device(MIB), MethodKind::AtaSecureErase) {
            OverwritePlan::Steps(steps) => {
                assert_eq!(steps.len(), 2);
                assert!(steps[0]
                    .spec
                    .args
                    .contains(&"--security-set-pass".to_string()));
                assert!(steps[1].spec.args.contains(&"--security-erase".to_string()));
                // The erase itself waits on drive firmware.
                assert!(steps[1].spec.timeout.is_none());
            }
            other => panic!("expected stepped plan, got {other:?}"),
        }
    }

    #[test]
    fn sanitize_is_a_single_bounded_firmware_step() {
        match plan_for(&usb_device(MIB), MethodKind::NvmeSanitize) {
            OverwritePlan::Steps(steps) => {
                assert_eq!(steps.len(), 1);
                assert_eq!(steps[0].spec.program, "nvme");
                // Kicks off the sanitize and returns; a seconds bound fits.
                assert!(steps[0].spec.timeout.is_some());
            }
            other => panic!("expected stepped plan, got {other:?}"),
        }
    }
}
