// Method Registry - maps a classified device to its applicable destruction
// methods and selects a sensible default per transport.
//
// The catalog is statically defined; the registry performs no I/O. The
// presentation layer uses the descriptions and compliance tiers verbatim.

use crate::{Compliance, MethodKind, Transport, WipeError, WipeResult};

/// A statically defined destruction method.
#[derive(Debug)]
pub struct WipeMethod {
    pub kind: MethodKind,
    pub transports: &'static [Transport],
    pub compliance: Compliance,
    pub description: &'static str,
}

const OVERWRITE_TRANSPORTS: &[Transport] = &[
    Transport::USB,
    Transport::SATA,
    Transport::NVMe,
    Transport::Android,
    Transport::Unknown,
];

pub static CATALOG: [WipeMethod; 6] = [
    WipeMethod {
        kind: MethodKind::Quick,
        transports: &[Transport::USB, Transport::Android],
        compliance: Compliance::NonCompliant,
        description: "Destroy the partition table and overwrite only the head and \
                      tail of the device, then recreate an empty partition table. \
                      Fast, but most data remains recoverable.",
    },
    WipeMethod {
        kind: MethodKind::ZeroFill,
        transports: OVERWRITE_TRANSPORTS,
        compliance: Compliance::Clear,
        description: "Single full-device overwrite with zeros. NIST 800-88 Clear.",
    },
    WipeMethod {
        kind: MethodKind::RandomFill,
        transports: OVERWRITE_TRANSPORTS,
        compliance: Compliance::Clear,
        description: "Single full-device overwrite with random data. NIST 800-88 Clear.",
    },
    WipeMethod {
        kind: MethodKind::Shred,
        transports: OVERWRITE_TRANSPORTS,
        compliance: Compliance::Clear,
        description: "Multiple overwrite passes followed by a final zero pass \
                      (shred). Slow; NIST 800-88 Clear.",
    },
    WipeMethod {
        kind: MethodKind::AtaSecureErase,
        transports: &[Transport::SATA],
        compliance: Compliance::Purge,
        description: "ATA SECURITY ERASE UNIT firmware command. The drive \
                      controller erases all user data internally. NIST 800-88 Purge.",
    },
    WipeMethod {
        kind: MethodKind::NvmeSanitize,
        transports: &[Transport::NVMe],
        compliance: Compliance::Purge,
        description: "NVMe Sanitize firmware command (cryptographic erase). \
                      NIST 800-88 Purge.",
    },
];

/// Look up the catalog entry for a method kind.
pub fn lookup(kind: MethodKind) -> &'static WipeMethod {
    let idx = match kind {
        MethodKind::Quick => 0,
        MethodKind::ZeroFill => 1,
        MethodKind::RandomFill => 2,
        MethodKind::Shred => 3,
        MethodKind::AtaSecureErase => 4,
        MethodKind::NvmeSanitize => 5,
    };
    &CATALOG[idx]
}

// Selection policy by transport, most-specific (firmware-level) first.
fn kinds_for(transport: Transport) -> &'static [MethodKind] {
    match transport {
        Transport::NVMe => &[
            MethodKind::NvmeSanitize,
            MethodKind::ZeroFill,
            MethodKind::RandomFill,
            MethodKind::Shred,
        ],
        Transport::SATA => &[
            MethodKind::AtaSecureErase,
            MethodKind::ZeroFill,
            MethodKind::RandomFill,
            MethodKind::Shred,
        ],
        Transport::USB | Transport::Android => &[
            MethodKind::Quick,
            MethodKind::ZeroFill,
            MethodKind::RandomFill,
            MethodKind::Shred,
        ],
        Transport::Unknown => &[
            MethodKind::ZeroFill,
            MethodKind::RandomFill,
            MethodKind::Shred,
        ],
    }
}

/// Ordered set of methods applicable to a device transport.
pub fn applicable_methods(transport: Transport) -> Vec<&'static WipeMethod> {
    kinds_for(transport).iter().map(|&k| lookup(k)).collect()
}

/// Default method for a transport: firmware purge where the transport
/// supports one, zero-fill otherwise.
pub fn default_method(transport: Transport) -> &'static WipeMethod {
    match transport {
        Transport::NVMe => lookup(MethodKind::NvmeSanitize),
        Transport::SATA => lookup(MethodKind::AtaSecureErase),
        _ => lookup(MethodKind::ZeroFill),
    }
}

pub fn is_applicable(kind: MethodKind, transport: Transport) -> bool {
    lookup(kind).transports.contains(&transport)
}

/// Reject a method/transport mismatch before any job state exists.
pub fn ensure_applicable(
    kind: MethodKind,
    transport: Transport,
) -> WipeResult<&'static WipeMethod> {
    if is_applicable(kind, transport) {
        Ok(lookup(kind))
    } else {
        Err(WipeError::MethodNotApplicable {
            method: kind,
            transport,
        })
    }
}
