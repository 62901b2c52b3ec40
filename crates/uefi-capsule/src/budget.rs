//! Flash-budget policy and the paired-device unlock protocol.
//!
//! Some devices ship two firmware personalities on one flash part and share a
//! single, small budget of flash cycles between them. Exactly one personality
//! of a pair is active; the other carries `LOCKED` and is not updatable.
//! Unlocking the locked personality makes it updatable and freezes its
//! alternate.

use tracing::debug;
use uefi_capsule_errors::{CapsuleError, Result};

use crate::device::{DeviceDescriptor, DeviceFlags, DeviceHandle, DeviceTable, UNLOCKED_VERSION};

/// Budgets at or below this need an explicit override to be spent.
pub const LOW_FLASHES_LEFT: u32 = 2;

/// Refuse to spend one of the last flash cycles unless `force` is set.
///
/// A budget of zero means the device does not report one.
pub fn check_flashes_left(device: &DeviceDescriptor, force: bool) -> Result<()> {
    let flashes_left = device.flashes_left;
    if flashes_left == 0 {
        return Ok(());
    }
    debug!("{} has {flashes_left} flashes left", device.display_name());
    if !force && flashes_left <= LOW_FLASHES_LEFT {
        return Err(CapsuleError::not_supported(format!(
            "{} only has {flashes_left} flashes left -- \
             see https://github.com/fwupd/fwupd/wiki/Dell-TPM:-flashes-left for more information.",
            device.display_name()
        )));
    }
    Ok(())
}

/// Mark `active` as the live personality of a pair and lock its alternate.
///
/// The active device keeps its flags minus `LOCKED`. The alternate gains
/// `LOCKED` and loses `UPDATABLE`.
pub fn set_active(table: &mut DeviceTable, active: DeviceHandle) -> Result<()> {
    let alt_handle = paired_alternate(table, active)?;
    let (device, alternate) = table.pair_mut(active, alt_handle)?;
    device.flags.remove(DeviceFlags::LOCKED);
    lock(alternate);
    Ok(())
}

fn lock(device: &mut DeviceDescriptor) {
    debug!(
        "Preventing upgrades for: {} ({})",
        device.display_name(),
        device.id
    );
    device.flags.remove(DeviceFlags::UPDATABLE);
    device.flags.insert(DeviceFlags::LOCKED);
}

fn paired_alternate(table: &DeviceTable, handle: DeviceHandle) -> Result<DeviceHandle> {
    let device = table.device(handle)?;
    if !device.kind.supports_unlock() {
        return Err(CapsuleError::not_supported(format!(
            "Unable to unlock {}",
            device.display_name()
        )));
    }
    device.alternate.ok_or_else(|| {
        CapsuleError::not_supported(format!(
            "No alternate device for {}",
            device.display_name()
        ))
    })
}

/// Switch the active personality to the locked device `handle`.
///
/// On success the device takes over its alternate's flags, the alternate
/// loses `UPDATABLE` and becomes `LOCKED`, and the device version resets to
/// `0.0.0.0` until the new personality is enumerated again.
pub fn unlock(table: &mut DeviceTable, handle: DeviceHandle) -> Result<()> {
    let alt_handle = paired_alternate(table, handle)?;
    let device = table.device(handle)?;
    if !device.flags.contains(DeviceFlags::LOCKED) {
        return Err(CapsuleError::not_supported(format!(
            "{} is not locked",
            device.display_name()
        )));
    }
    debug!(
        "Unlocking upgrades for: {} ({})",
        device.display_name(),
        device.id
    );

    let (device, alternate) = table.pair_mut(handle, alt_handle)?;
    if device.flashes_left == 0 {
        if alternate.flashes_left == 0 {
            return Err(CapsuleError::not_supported(format!(
                "ERROR: {} has no flashes left.",
                device.display_name()
            )));
        }
        return Err(CapsuleError::not_supported(format!(
            "ERROR: {} is currently OWNED. Ownership must be removed to switch modes.",
            alternate.display_name()
        )));
    }

    device.flags = alternate.flags - DeviceFlags::LOCKED;
    lock(alternate);
    device.version = UNLOCKED_VERSION.to_string();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;
    use uefi_capsule_efivar::guid;

    fn tpm_pair(flashes: u32, flashes_alt: u32) -> Result<(DeviceTable, DeviceHandle, DeviceHandle)> {
        let mut table = DeviceTable::new();
        let mut a = DeviceDescriptor::new(DeviceKind::DellTpmFirmware, guid::FWUPDATE, 0);
        a.name = Some("TPM 2.0".into());
        a.flashes_left = flashes;
        a.flags = DeviceFlags::LOCKED;
        let mut b = DeviceDescriptor::new(DeviceKind::DellTpmFirmware, guid::UX_CAPSULE, 0);
        b.name = Some("TPM 1.2".into());
        b.flashes_left = flashes_alt;
        b.flags = DeviceFlags::UPDATABLE | DeviceFlags::INTERNAL;
        let a = table.push(a);
        let b = table.push(b);
        table.link_alternates(a, b)?;
        Ok((table, a, b))
    }

    fn not_supported_message(result: Result<()>) -> Option<String> {
        match result {
            Err(CapsuleError::NotSupported(m)) => Some(m),
            _ => None,
        }
    }

    #[test]
    fn test_flashes_left_gate() {
        let mut device = DeviceDescriptor::new(DeviceKind::SystemFirmware, guid::FWUPDATE, 0);
        device.name = Some("System Firmware".into());
        assert!(check_flashes_left(&device, false).is_ok());

        device.flashes_left = 2;
        let message = not_supported_message(check_flashes_left(&device, false));
        assert_eq!(
            message.as_deref(),
            Some(
                "System Firmware only has 2 flashes left -- see \
                 https://github.com/fwupd/fwupd/wiki/Dell-TPM:-flashes-left for more information."
            )
        );
        assert!(check_flashes_left(&device, true).is_ok());

        device.flashes_left = 3;
        assert!(check_flashes_left(&device, false).is_ok());
    }

    #[test]
    fn test_unlock_moves_budget_to_device() -> Result<()> {
        let (mut table, a, b) = tpm_pair(5, 3)?;
        unlock(&mut table, a)?;
        let device = table.device(a)?;
        let alternate = table.device(b)?;
        assert!(device.flags.contains(DeviceFlags::UPDATABLE | DeviceFlags::INTERNAL));
        assert!(!device.flags.contains(DeviceFlags::LOCKED));
        assert!(!alternate.flags.contains(DeviceFlags::UPDATABLE));
        assert!(alternate.flags.contains(DeviceFlags::INTERNAL | DeviceFlags::LOCKED));
        assert_eq!(device.version, "0.0.0.0");

        // the lock moved, so the same device cannot be unlocked twice
        assert_eq!(
            not_supported_message(unlock(&mut table, a)).as_deref(),
            Some("TPM 2.0 is not locked")
        );
        unlock(&mut table, b)?;
        assert!(table.device(b)?.flags.contains(DeviceFlags::UPDATABLE));
        assert!(table.device(a)?.flags.contains(DeviceFlags::LOCKED));
        Ok(())
    }

    #[test]
    fn test_set_active_locks_alternate() -> Result<()> {
        let (mut table, a, b) = tpm_pair(5, 3)?;
        table.device_mut(a)?.flags = DeviceFlags::UPDATABLE | DeviceFlags::INTERNAL;
        set_active(&mut table, b)?;
        assert_eq!(
            table.device(b)?.flags,
            DeviceFlags::UPDATABLE | DeviceFlags::INTERNAL
        );
        assert_eq!(
            table.device(a)?.flags,
            DeviceFlags::LOCKED | DeviceFlags::INTERNAL
        );
        Ok(())
    }

    #[test]
    fn test_active_personality_cannot_be_unlocked() -> Result<()> {
        let (mut table, _, b) = tpm_pair(5, 3)?;
        assert_eq!(
            not_supported_message(unlock(&mut table, b)).as_deref(),
            Some("TPM 1.2 is not locked")
        );
        assert!(table.device(b)?.flags.contains(DeviceFlags::UPDATABLE));
        Ok(())
    }

    #[test]
    fn test_unlock_owned_alternate() -> Result<()> {
        let (mut table, a, _) = tpm_pair(0, 3)?;
        assert_eq!(
            not_supported_message(unlock(&mut table, a)).as_deref(),
            Some("ERROR: TPM 1.2 is currently OWNED. Ownership must be removed to switch modes.")
        );
        assert!(table.device(a)?.flags.contains(DeviceFlags::LOCKED));
        Ok(())
    }

    #[test]
    fn test_unlock_no_flashes_left() -> Result<()> {
        let (mut table, a, _) = tpm_pair(0, 0)?;
        assert_eq!(
            not_supported_message(unlock(&mut table, a)).as_deref(),
            Some("ERROR: TPM 2.0 has no flashes left.")
        );
        Ok(())
    }

    #[test]
    fn test_unlock_requires_pairable_kind_and_alternate() {
        let mut table = DeviceTable::new();
        let mut system = DeviceDescriptor::new(DeviceKind::SystemFirmware, guid::FWUPDATE, 0);
        system.name = Some("System Firmware".into());
        let system = table.push(system);
        assert_eq!(
            not_supported_message(unlock(&mut table, system)).as_deref(),
            Some("Unable to unlock System Firmware")
        );

        let mut lone = DeviceDescriptor::new(DeviceKind::DellTpmFirmware, guid::UX_CAPSULE, 0);
        lone.name = Some("TPM 2.0".into());
        let lone = table.push(lone);
        assert_eq!(
            not_supported_message(unlock(&mut table, lone)).as_deref(),
            Some("No alternate device for TPM 2.0")
        );
    }
}
