//! ESRT enumeration
//!
//! The kernel exposes each EFI System Resource Table entry as a directory of
//! text attributes under `/sys/firmware/efi/esrt/entries/entryN`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use uefi_capsule_efivar::guid;
use uefi_capsule_errors::{CapsuleError, Result, ResultExt};

use crate::capsule::CapsuleFlags;
use crate::device::{DeviceDescriptor, DeviceKind};
use crate::sysfs;

/// Entry directories below `entries_dir`, sorted by name.
///
/// Fails with `NotFound` when the directory cannot be listed.
pub fn entry_paths(entries_dir: &Path) -> Result<Vec<PathBuf>> {
    let listing = fs::read_dir(entries_dir).map_err(|e| {
        CapsuleError::not_found(format!(
            "failed to list {}: {e}",
            entries_dir.display()
        ))
    })?;
    let mut paths = Vec::new();
    for entry in listing {
        let entry = entry.map_err(|e| {
            CapsuleError::not_found(format!(
                "failed to list {}: {e}",
                entries_dir.display()
            ))
        })?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

/// Build a descriptor from one entry directory.
pub fn parse_entry(path: &Path) -> Result<DeviceDescriptor> {
    let fw_class = sysfs::read_string(&path.join("fw_class"))?;
    let guid = guid::parse(&fw_class).prefix_err("fw_class invalid: ")?;
    let kind = DeviceKind::from_raw(sysfs::read_u32(&path.join("fw_type"))?);

    let mut device = DeviceDescriptor::new(kind, guid, 0);
    device.set_version_raw(sysfs::read_u32(&path.join("fw_version"))?);
    device.version_lowest = sysfs::read_u32(&path.join("lowest_supported_fw_version"))?;
    device.capsule_flags =
        CapsuleFlags::from_bits_retain(sysfs::read_u32(&path.join("capsule_flags"))?);
    device.last_attempt_version = sysfs::read_u32(&path.join("last_attempt_version"))?;
    device.last_attempt_status = sysfs::read_u32(&path.join("last_attempt_status"))?;
    device.entry_path = path.to_path_buf();
    Ok(device)
}

/// Parse every entry below `entries_dir`.
///
/// An entry that fails to parse is logged and skipped; only a listing
/// failure is fatal.
pub fn enumerate(entries_dir: &Path) -> Result<Vec<DeviceDescriptor>> {
    let mut devices = Vec::new();
    for path in entry_paths(entries_dir)? {
        match parse_entry(&path) {
            Ok(device) => devices.push(device),
            Err(e) => warn!("failed to add {}: {e}", path.display()),
        }
    }
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;
    use uefi_capsule_test_helpers::fixtures::{EsrtEntryFixture, FakeFirmwareTree, SYSFS_FIRMWARE};
    use uefi_capsule_test_helpers::must;

    const SYSTEM_GUID: &str = "ddc0ee61-e7f0-4e7d-acc5-c070a398838e";
    const DEVICE_GUID: &str = "671d19d0-d43c-4852-98d9-1ce16f9967e4";

    fn entries(tree: &FakeFirmwareTree) -> PathBuf {
        tree.path(SYSFS_FIRMWARE).join("efi/esrt/entries")
    }

    #[test]
    fn test_parse_entry() -> Result<()> {
        let tree = must(FakeFirmwareTree::new());
        let path = must(tree.add_esrt_entry(
            0,
            &EsrtEntryFixture::new(SYSTEM_GUID).with_last_attempt(18472960, 6),
        ));
        let device = parse_entry(&path)?;
        assert_eq!(device.kind, DeviceKind::SystemFirmware);
        assert_eq!(device.guid.to_string(), SYSTEM_GUID);
        assert_eq!(device.version, "65586");
        assert_eq!(device.version_lowest, 65582);
        assert_eq!(device.capsule_flags.bits(), 0xfe);
        assert_eq!(device.last_attempt_version, 18472960);
        assert_eq!(device.last_attempt_status, 6);
        assert_eq!(device.id, format!("UEFI-{SYSTEM_GUID}-dev0"));
        assert_eq!(device.entry_path, path);
        Ok(())
    }

    #[test]
    fn test_missing_directory_is_not_found() {
        let tree = must(FakeFirmwareTree::new());
        let missing = tree.path("sys/firmware/efi/nothing");
        assert!(matches!(
            enumerate(&missing),
            Err(CapsuleError::NotFound(_))
        ));
    }

    #[traced_test]
    #[test]
    fn test_bad_entries_are_skipped() -> Result<()> {
        let tree = must(FakeFirmwareTree::new());
        must(tree.add_esrt_entry(0, &EsrtEntryFixture::new(SYSTEM_GUID)));
        must(tree.add_esrt_entry(1, &EsrtEntryFixture::new(DEVICE_GUID).with_type(2)));
        must(tree.set_esrt_file(1, "fw_version", "banana\n"));
        must(tree.add_esrt_entry(2, &EsrtEntryFixture::new("not-a-guid")));
        must(tree.add_esrt_entry(3, &EsrtEntryFixture::new(DEVICE_GUID).with_type(3)));
        must(tree.remove_esrt_file(3, "last_attempt_status"));

        let devices = enumerate(&entries(&tree))?;
        assert_eq!(devices.len(), 1);
        assert!(logs_contain("failed to add"));
        assert!(logs_contain("entry1"));
        assert!(logs_contain("fw_class invalid"));
        Ok(())
    }

    #[test]
    fn test_entries_are_sorted() -> Result<()> {
        let tree = must(FakeFirmwareTree::new());
        must(tree.add_esrt_entry(1, &EsrtEntryFixture::new(DEVICE_GUID).with_type(2)));
        must(tree.add_esrt_entry(0, &EsrtEntryFixture::new(SYSTEM_GUID)));
        let devices = enumerate(&entries(&tree))?;
        let kinds: Vec<_> = devices.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, [DeviceKind::SystemFirmware, DeviceKind::DeviceFirmware]);
        Ok(())
    }
}
