// Device Catalog - enumerates attached block devices and classifies each by
// transport and role. Only whole-disk entries are offered as wipe targets.
//
// Enumeration failures yield an empty catalog plus a diagnostic, never an
// error: transient failures (udev race, missing lsblk) must not abort the
// host application.

use crate::{Device, DeviceRole, Transport};
use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::process::Command;

/// One unclassified row from the enumeration collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlockDevice {
    /// Kernel name, e.g. `sdb` or `nvme0n1`.
    pub name: String,
    pub removable: bool,
    pub size: u64,
    /// Device type as reported by the lister, e.g. `disk` or `part`.
    pub devtype: String,
    /// Transport as reported by the lister, e.g. `usb`, `sata`, `nvme`.
    pub transport_hint: Option<String>,
    pub model: Option<String>,
}

/// Enumeration collaborator: a pure query with no side effects.
pub trait BlockDeviceSource {
    fn list(&self) -> Result<Vec<RawBlockDevice>>;
}

/// Classify one raw listing into an immutable device snapshot.
pub fn classify(raw: &RawBlockDevice) -> Device {
    let transport = match raw.transport_hint.as_deref() {
        Some("usb") => Transport::USB,
        Some("sata") | Some("ata") => Transport::SATA,
        Some("nvme") => Transport::NVMe,
        Some("adb") => Transport::Android,
        Some(hint) if hint.contains("android") => Transport::Android,
        _ if raw.name.starts_with("nvme") => Transport::NVMe,
        _ => Transport::Unknown,
    };

    let role = if raw.devtype == "disk" {
        DeviceRole::WholeDisk
    } else {
        DeviceRole::Partition
    };

    // Android devices are addressed by their adb serial, not a /dev node.
    let path = if transport == Transport::Android {
        raw.name.clone()
    } else {
        format!("/dev/{}", raw.name)
    };

    Device {
        path,
        size: raw.size,
        transport,
        removable: raw.removable,
        role,
        model: raw.model.clone(),
    }
}

/// The Device Catalog. Wraps an enumeration source and yields classified
/// whole-disk snapshots.
pub struct DeviceCatalog<S: BlockDeviceSource> {
    source: S,
}

impl DeviceCatalog<LsblkSource> {
    pub fn system() -> Self {
        Self::new(LsblkSource)
    }
}

impl<S: BlockDeviceSource> DeviceCatalog<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// List classified whole-disk devices. Partition entries are filtered
    /// out; an enumeration failure is reported as an empty catalog.
    pub fn list_devices(&self) -> Vec<Device> {
        let raw = match self.source.list() {
            Ok(raw) => raw,
            Err(e) => {
                warn!("device enumeration failed, reporting empty catalog: {e:#}");
                return Vec::new();
            }
        };

        raw.iter()
            .map(classify)
            .filter(|d| d.role == DeviceRole::WholeDisk)
            .collect()
    }

    /// Find one device by its `/dev` path.
    pub fn find(&self, path: &str) -> Option<Device> {
        self.list_devices().into_iter().find(|d| d.path == path)
    }
}

/// Production enumeration source backed by `lsblk`, with a
/// `/dev/disk/by-path` sweep to catch USB bridges that lsblk reports
/// without a transport, and an `adb devices` sweep for Android devices
/// attached through a protocol bridge.
pub struct LsblkSource;

impl LsblkSource {
    fn run_lsblk(&self) -> Result<String> {
        let output = Command::new("lsblk")
            .args(["-d", "-b", "-n", "-o", "NAME,RM,SIZE,TYPE,TRAN"])
            .output()
            .context("failed to run lsblk")?;

        if !output.status.success() {
            return Err(anyhow!(
                "lsblk exited with status {}",
                output.status.code().unwrap_or(-1)
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse_listing(listing: &str, usb_names: &HashSet<String>) -> Vec<RawBlockDevice> {
        let mut devices = Vec::new();

        for line in listing.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                continue;
            }

            let name = parts[0].to_string();
            if Self::should_skip_device(&name) {
                continue;
            }

            let removable = parts[1] == "1";
            let size: u64 = match parts[2].parse() {
                Ok(s) => s,
                Err(_) => {
                    debug!("unparseable size for {name}: {}", parts[2]);
                    continue;
                }
            };
            let devtype = parts[3].to_string();

            let mut transport_hint = parts.get(4).map(|s| s.to_string());
            if transport_hint.is_none() && usb_names.contains(&name) {
                transport_hint = Some("usb".to_string());
            }

            let model = Self::read_model(&name);

            devices.push(RawBlockDevice {
                name,
                removable,
                size,
                devtype,
                transport_hint,
                model,
            });
        }

        devices
    }

    /// Skip loop devices, ram disks, device mapper, optical drives, etc.
    pub(crate) fn should_skip_device(name: &str) -> bool {
        name.starts_with("loop")
            || name.starts_with("ram")
            || name.starts_with("dm-")
            || name.starts_with("sr")
            || name.starts_with("zram")
    }

    /// Kernel names of devices reachable through a USB path.
    fn usb_device_names() -> HashSet<String> {
        let mut names = HashSet::new();
        let by_path = Path::new("/dev/disk/by-path");

        let entries = match fs::read_dir(by_path) {
            Ok(entries) => entries,
            Err(_) => return names,
        };

        for entry in entries.flatten() {
            let file_name = entry.file_name();
            if !file_name.to_string_lossy().to_lowercase().contains("usb") {
                continue;
            }
            if let Ok(target) = fs::canonicalize(entry.path()) {
                if let Some(name) = target.file_name() {
                    names.insert(name.to_string_lossy().into_owned());
                }
            }
        }

        names
    }

    /// Serials of Android devices reported by `adb devices`. A missing or
    /// failing adb simply contributes nothing.
    fn android_serials() -> Vec<String> {
        let output = match Command::new("adb").arg("devices").output() {
            Ok(output) if output.status.success() => output,
            Ok(_) | Err(_) => {
                debug!("adb unavailable, skipping android sweep");
                return Vec::new();
            }
        };

        Self::parse_adb_listing(&String::from_utf8_lossy(&output.stdout))
    }

    /// Parse `adb devices` output: a header line, then one
    /// `<serial>\t<state>` line per device. Only fully authorized devices
    /// (state `device`) count.
    fn parse_adb_listing(listing: &str) -> Vec<String> {
        listing
            .lines()
            .skip(1)
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let serial = fields.next()?;
                match fields.next() {
                    Some("device") => Some(serial.to_string()),
                    _ => None,
                }
            })
            .collect()
    }

    fn android_raw(serial: String) -> RawBlockDevice {
        RawBlockDevice {
            name: serial,
            removable: true,
            // adb does not report a storage size up front.
            size: 0,
            devtype: "disk".to_string(),
            transport_hint: Some("adb".to_string()),
            model: Some("Android Device".to_string()),
        }
    }

    fn read_model(name: &str) -> Option<String> {
        let model = fs::read_to_string(format!("/sys/block/{name}/device/model")).ok()?;
        let model = model.trim();
        if model.is_empty() {
            None
        } else {
            Some(model.to_string())
        }
    }
}

impl BlockDeviceSource for LsblkSource {
    fn list(&self) -> Result<Vec<RawBlockDevice>> {
        let listing = self.run_lsblk()?;
        let usb_names = Self::usb_device_names();
        let mut devices = Self::parse_listing(&listing, &usb_names);
        devices.extend(Self::android_serials().into_iter().map(Self::android_raw));
        Ok(devices)
    }
}
