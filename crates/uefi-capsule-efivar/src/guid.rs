//! GUID constants and the firmware byte order
//!
//! Firmware stores GUIDs "mixed-endian": the first three fields are
//! little-endian and the trailing eight bytes keep declaration order. A GUID
//! parsed from its canonical string must be converted with
//! [`to_mixed_endian`] before it is written into any firmware structure.

use uefi_capsule_errors::{CapsuleError, Result};
use uuid::Uuid;

/// Namespace of the update-info variables written for firmware.
pub const FWUPDATE: Uuid = uuid::uuid!("0abba7dc-e516-4167-bbf5-4d9d1c739416");

/// Capsule type GUID of a UX (boot splash) capsule.
pub const UX_CAPSULE: Uuid = uuid::uuid!("3b8c8162-188c-46a4-aec9-be43f1d65697");

/// Canonical string form of [`UX_CAPSULE`].
pub const UX_CAPSULE_STR: &str = "3b8c8162-188c-46a4-aec9-be43f1d65697";

/// EFI global variable namespace (`SecureBoot`, `BootOrder`, ...).
pub const EFI_GLOBAL: Uuid = uuid::uuid!("8be4df61-93ca-11d2-aa0d-00e098032b8c");

/// Parse a GUID in canonical `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` form.
///
/// Braced, URN and unhyphenated forms are rejected; firmware tables only ever
/// carry the canonical form.
pub fn parse(s: &str) -> Result<Uuid> {
    if s.len() != 36 {
        return Err(CapsuleError::invalid_data(format!(
            "GUID '{s}' is not in canonical form"
        )));
    }
    Uuid::try_parse(s)
        .map_err(|e| CapsuleError::invalid_data(format!("failed to parse GUID '{s}': {e}")))
}

/// Encode a GUID in firmware (mixed-endian) byte order.
pub fn to_mixed_endian(guid: &Uuid) -> [u8; 16] {
    guid.to_bytes_le()
}

/// Decode a GUID from firmware (mixed-endian) byte order.
pub fn from_mixed_endian(bytes: [u8; 16]) -> Uuid {
    Uuid::from_bytes_le(bytes)
}
