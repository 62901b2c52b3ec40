//! Device descriptors and the per-session device table.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use bitflags::bitflags;
use serde::Serialize;
use uefi_capsule_errors::{CapsuleError, Result};
use uuid::Uuid;

use crate::capsule::CapsuleFlags;
use crate::status::UpdateOutcome;

/// The ESRT firmware type of an update target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    /// Type 0, or any value nothing else claims
    Unknown,
    /// Type 1
    SystemFirmware,
    /// Type 2
    DeviceFirmware,
    /// Type 3
    UefiDriver,
    /// Firmware Management Protocol device
    Fmp,
    /// Dell TPM firmware with a paired TPM 1.2 / 2.0 personality
    DellTpmFirmware,
}

impl DeviceKind {
    /// Map a raw `fw_type` value.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => DeviceKind::SystemFirmware,
            2 => DeviceKind::DeviceFirmware,
            3 => DeviceKind::UefiDriver,
            4 => DeviceKind::Fmp,
            5 => DeviceKind::DellTpmFirmware,
            _ => DeviceKind::Unknown,
        }
    }

    /// Short identifier used in logs and metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Unknown => "unknown",
            DeviceKind::SystemFirmware => "system-firmware",
            DeviceKind::DeviceFirmware => "device-firmware",
            DeviceKind::UefiDriver => "uefi-driver",
            DeviceKind::Fmp => "fmp",
            DeviceKind::DellTpmFirmware => "dell-tpm-firmware",
        }
    }

    /// Display name used when firmware supplies none.
    pub fn fallback_name(&self) -> Option<&'static str> {
        match self {
            DeviceKind::Unknown => Some("Unknown Firmware"),
            DeviceKind::SystemFirmware => Some("System Firmware"),
            DeviceKind::DeviceFirmware => Some("UEFI Device Firmware"),
            DeviceKind::UefiDriver => Some("UEFI Driver"),
            DeviceKind::Fmp => Some("Firmware Management Protocol"),
            DeviceKind::DellTpmFirmware => Some("TPM Firmware"),
        }
    }

    /// Whether the kind takes part in the paired-device unlock protocol.
    pub fn supports_unlock(&self) -> bool {
        matches!(self, DeviceKind::DellTpmFirmware)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Host-visible device flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
    #[serde(transparent)]
    pub struct DeviceFlags: u32 {
        /// A capsule may be staged for this device
        const UPDATABLE            = 1 << 0;
        /// The device keeps working while an update is staged
        const USABLE_DURING_UPDATE = 1 << 1;
        /// The update is applied on the next reboot
        const NEEDS_REBOOT         = 1 << 2;
        /// The device is internal to the machine
        const INTERNAL             = 1 << 3;
        /// The device needs an unlock before it becomes updatable
        const LOCKED               = 1 << 4;
    }
}

bitflags! {
    /// Flags that are never shown to users.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
    #[serde(transparent)]
    pub struct InternalFlags: u32 {
        /// Metadata may later replace the kind-derived name
        const MD_SET_NAME_CATEGORY = 1 << 0;
    }
}

/// Custom flag disabling the UX capsule for a device.
pub const FLAG_NO_UX_CAPSULE: &str = "no-ux-capsule";

/// Custom flag selecting the legacy boot-manager description.
pub const FLAG_LEGACY_BOOTMGR_DESC: &str = "use-legacy-bootmgr-desc";

/// Version assigned to a freshly unlocked device.
pub const UNLOCKED_VERSION: &str = "0.0.0.0";

/// One updatable firmware component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// Stable identifier, `UEFI-<guid>-dev<instance>`
    pub id: String,
    /// Firmware type
    pub kind: DeviceKind,
    /// ESRT firmware class
    pub guid: Uuid,
    /// Hardware instance of the firmware class
    pub hw_instance: u64,
    /// Human readable name
    pub name: Option<String>,
    /// Vendor name
    pub vendor: Option<String>,
    /// Vendor identifiers such as `DMI:LENOVO`
    pub vendor_ids: Vec<String>,
    /// Current version as displayed
    pub version: String,
    /// Current raw version
    pub version_raw: u32,
    /// Lowest version firmware accepts
    pub version_lowest: u32,
    /// Capsule flags to use for this device
    pub capsule_flags: CapsuleFlags,
    /// Version of the last attempted update
    pub last_attempt_version: u32,
    /// Raw status of the last attempted update
    pub last_attempt_status: u32,
    /// Remaining flash budget; 0 means unknown or unlimited
    pub flashes_left: u32,
    /// Paired device sharing the flash budget
    pub alternate: Option<DeviceHandle>,
    /// Host-visible flags
    pub flags: DeviceFlags,
    /// Internal flags
    pub internal_flags: InternalFlags,
    /// Custom quirk flags
    pub custom_flags: BTreeSet<String>,
    /// Derived metadata
    pub metadata: BTreeMap<String, String>,
    /// Result of the last `get_results`
    pub update_state: Option<UpdateOutcome>,
    /// Why the device cannot be updated, or how the last update failed
    pub update_error: Option<String>,
    /// ESRT entry directory the device was read from
    pub entry_path: PathBuf,
}

impl DeviceDescriptor {
    /// A descriptor with every optional field empty.
    pub fn new(kind: DeviceKind, guid: Uuid, hw_instance: u64) -> Self {
        Self {
            id: format!("UEFI-{}-dev{hw_instance}", guid.hyphenated()),
            kind,
            guid,
            hw_instance,
            name: None,
            vendor: None,
            vendor_ids: Vec::new(),
            version: String::new(),
            version_raw: 0,
            version_lowest: 0,
            capsule_flags: CapsuleFlags::empty(),
            last_attempt_version: 0,
            last_attempt_status: 0,
            flashes_left: 0,
            alternate: None,
            flags: DeviceFlags::empty(),
            internal_flags: InternalFlags::empty(),
            custom_flags: BTreeSet::new(),
            metadata: BTreeMap::new(),
            update_state: None,
            update_error: None,
            entry_path: PathBuf::new(),
        }
    }

    /// The name, or a placeholder for devices without one.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("UEFI device")
    }

    /// Set a raw version and its displayed form.
    pub fn set_version_raw(&mut self, raw: u32) {
        self.version_raw = raw;
        self.version = raw.to_string();
    }

    /// Whether a custom flag is set.
    pub fn has_custom_flag(&self, flag: &str) -> bool {
        self.custom_flags.contains(flag)
    }

    /// Name of the update-info variable for this device.
    pub fn update_info_name(&self) -> String {
        format!("fwupd-{}-{}", self.guid.hyphenated(), self.hw_instance)
    }

    /// Whether `query` names this device by id or GUID.
    pub fn matches(&self, query: &str) -> bool {
        self.id == query || self.guid.hyphenated().to_string().eq_ignore_ascii_case(query)
    }
}

/// Index of a device inside a [`DeviceTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeviceHandle(usize);

impl DeviceHandle {
    /// Position in the table.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// The devices of one enumeration session.
///
/// Devices refer to each other only through [`DeviceHandle`]s, so pairing
/// two devices never creates an ownership cycle.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct DeviceTable {
    devices: Vec<DeviceDescriptor>,
}

impl DeviceTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device and return its handle.
    pub fn push(&mut self, device: DeviceDescriptor) -> DeviceHandle {
        self.devices.push(device);
        DeviceHandle(self.devices.len() - 1)
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Drop every device.
    pub fn clear(&mut self) {
        self.devices.clear();
    }

    /// Look up a device.
    pub fn get(&self, handle: DeviceHandle) -> Option<&DeviceDescriptor> {
        self.devices.get(handle.0)
    }

    /// Look up a device mutably.
    pub fn get_mut(&mut self, handle: DeviceHandle) -> Option<&mut DeviceDescriptor> {
        self.devices.get_mut(handle.0)
    }

    /// Look up a device, failing with `NotFound`.
    pub fn device(&self, handle: DeviceHandle) -> Result<&DeviceDescriptor> {
        self.get(handle)
            .ok_or_else(|| CapsuleError::not_found(format!("no device with handle {}", handle.0)))
    }

    /// Look up a device mutably, failing with `NotFound`.
    pub fn device_mut(&mut self, handle: DeviceHandle) -> Result<&mut DeviceDescriptor> {
        self.get_mut(handle)
            .ok_or_else(|| CapsuleError::not_found(format!("no device with handle {}", handle.0)))
    }

    /// Find a device by id or GUID.
    pub fn find(&self, query: &str) -> Option<DeviceHandle> {
        self.devices
            .iter()
            .position(|d| d.matches(query))
            .map(DeviceHandle)
    }

    /// Iterate over handles and devices.
    pub fn iter(&self) -> impl Iterator<Item = (DeviceHandle, &DeviceDescriptor)> {
        self.devices
            .iter()
            .enumerate()
            .map(|(i, d)| (DeviceHandle(i), d))
    }

    /// Handles of every device.
    pub fn handles(&self) -> Vec<DeviceHandle> {
        (0..self.devices.len()).map(DeviceHandle).collect()
    }

    /// Pair two devices as each other's alternate.
    ///
    /// Both must exist, be distinct and be of a kind that supports unlock.
    pub fn link_alternates(&mut self, a: DeviceHandle, b: DeviceHandle) -> Result<()> {
        if a == b {
            return Err(CapsuleError::invalid_data(
                "a device cannot be its own alternate",
            ));
        }
        for handle in [a, b] {
            let device = self.device(handle)?;
            if !device.kind.supports_unlock() {
                return Err(CapsuleError::not_supported(format!(
                    "{} does not support an alternate device",
                    device.display_name()
                )));
            }
        }
        self.device_mut(a)?.alternate = Some(b);
        self.device_mut(b)?.alternate = Some(a);
        Ok(())
    }

    /// Borrow a device and its alternate mutably at the same time.
    pub fn pair_mut(
        &mut self,
        a: DeviceHandle,
        b: DeviceHandle,
    ) -> Result<(&mut DeviceDescriptor, &mut DeviceDescriptor)> {
        if a == b {
            return Err(CapsuleError::invalid_data(
                "a device cannot be its own alternate",
            ));
        }
        let (low, high) = if a.0 < b.0 { (a.0, b.0) } else { (b.0, a.0) };
        if high >= self.devices.len() {
            return Err(CapsuleError::not_found(format!("no device with handle {high}")));
        }
        let (head, tail) = self.devices.split_at_mut(high);
        let (first, second) = match (head.get_mut(low), tail.first_mut()) {
            (Some(first), Some(second)) => (first, second),
            _ => return Err(CapsuleError::not_found(format!("no device with handle {low}"))),
        };
        if a.0 < b.0 {
            Ok((first, second))
        } else {
            Ok((second, first))
        }
    }
}
