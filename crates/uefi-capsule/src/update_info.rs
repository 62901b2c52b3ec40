//! Update-info variables
//!
//! Each staged capsule is announced to the boot-time loader by an NVRAM
//! variable in the FWUPDATE namespace:
//!
//! ```text
//!   0  update_info_version   4  = 7
//!   4  guid                 16  mixed-endian
//!  20  capsule_flags         4
//!  24  hw_inst               8
//!  32  time_attempted       16
//!  48  status                4
//!  52  device path          ..  File node, then End node
//! ```

use std::path::{Component, Path};

use serde::Serialize;
use tracing::debug;
use uefi_capsule_efivar::{EfivarStore, VariableAttributes, guid};
use uefi_capsule_errors::{CapsuleError, Result};
use uuid::Uuid;

use crate::capsule::CapsuleFlags;
use crate::device::DeviceDescriptor;

/// Current `update_info_version`.
pub const UPDATE_INFO_VERSION: u32 = 7;

/// Size of the fixed part of the record.
pub const UPDATE_INFO_HEADER_SIZE: usize = 52;

/// Variable name of the UX capsule record.
pub const UX_CAPSULE_VARIABLE: &str = "fwupd-ux-capsule";

/// No update pending.
pub const STATUS_CLEARED: u32 = 0;
/// The loader should apply the capsule on the next boot.
pub const STATUS_ATTEMPT_UPDATE: u32 = 1;
/// The loader handed the capsule to firmware.
pub const STATUS_ATTEMPTED: u32 = 2;

const DEVICE_PATH_MEDIA: u8 = 0x04;
const DEVICE_PATH_MEDIA_FILE: u8 = 0x04;
const DEVICE_PATH_END: u8 = 0x7f;
const DEVICE_PATH_END_ENTIRE: u8 = 0xff;

/// One update-info variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateInfoRecord {
    /// Variable name
    pub name: String,
    /// Record format version
    pub version: u32,
    /// Capsule type
    pub guid: Uuid,
    /// Capsule flags the loader passes to firmware
    pub capsule_flags: CapsuleFlags,
    /// Hardware instance
    pub hw_instance: u64,
    /// `EFI_TIME` of the attempt, filled in by the loader
    #[serde(skip)]
    pub time_attempted: [u8; 16],
    /// One of the `STATUS_*` values
    pub status: u32,
    /// Capsule location relative to the ESP root, backslash separated
    pub capsule_path: Option<String>,
}

impl UpdateInfoRecord {
    /// A pending record for `device` pointing at `capsule_path`.
    pub fn attempt(
        name: impl Into<String>,
        guid: Uuid,
        device: &DeviceDescriptor,
        capsule_path: String,
    ) -> Self {
        Self {
            name: name.into(),
            version: UPDATE_INFO_VERSION,
            guid,
            capsule_flags: device.capsule_flags,
            hw_instance: device.hw_instance,
            time_attempted: [0; 16],
            status: STATUS_ATTEMPT_UPDATE,
            capsule_path: Some(capsule_path),
        }
    }

    /// Serialize the variable body.
    ///
    /// Fails with `InvalidData` when the capsule path does not fit in one
    /// device path node.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(UPDATE_INFO_HEADER_SIZE + 128);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&guid::to_mixed_endian(&self.guid));
        buf.extend_from_slice(&self.capsule_flags.bits().to_le_bytes());
        buf.extend_from_slice(&self.hw_instance.to_le_bytes());
        buf.extend_from_slice(&self.time_attempted);
        buf.extend_from_slice(&self.status.to_le_bytes());
        if let Some(path) = &self.capsule_path {
            encode_file_node(path, &mut buf)?;
        }
        buf.extend_from_slice(&[DEVICE_PATH_END, DEVICE_PATH_END_ENTIRE, 4, 0]);
        Ok(buf)
    }

    /// Parse a variable body.
    pub fn decode(name: impl Into<String>, data: &[u8]) -> Result<Self> {
        let (header, device_path) = data
            .split_first_chunk::<UPDATE_INFO_HEADER_SIZE>()
            .ok_or_else(|| CapsuleError::internal("EFI variable is corrupt"))?;
        let (version, rest) = split::<4>(header)?;
        let (guid_bytes, rest) = split::<16>(rest)?;
        let (flags, rest) = split::<4>(rest)?;
        let (hw_inst, rest) = split::<8>(rest)?;
        let (time_attempted, rest) = split::<16>(rest)?;
        let (status, _) = split::<4>(rest)?;
        Ok(Self {
            name: name.into(),
            version: u32::from_le_bytes(version),
            guid: guid::from_mixed_endian(guid_bytes),
            capsule_flags: CapsuleFlags::from_bits_retain(u32::from_le_bytes(flags)),
            hw_instance: u64::from_le_bytes(hw_inst),
            time_attempted,
            status: u32::from_le_bytes(status),
            capsule_path: decode_file_path(device_path)?,
        })
    }
}

fn split<const N: usize>(buf: &[u8]) -> Result<([u8; N], &[u8])> {
    buf.split_first_chunk::<N>()
        .map(|(head, rest)| (*head, rest))
        .ok_or_else(|| CapsuleError::internal("EFI variable is corrupt"))
}

fn encode_file_node(path: &str, buf: &mut Vec<u8>) -> Result<()> {
    let mut name: Vec<u8> = path.encode_utf16().flat_map(u16::to_le_bytes).collect();
    name.extend_from_slice(&[0, 0]);
    let len = name
        .len()
        .checked_add(4)
        .and_then(|len| u16::try_from(len).ok())
        .ok_or_else(|| {
            CapsuleError::invalid_data(format!(
                "capsule path of {} UTF-16 units does not fit in a device path node",
                path.encode_utf16().count()
            ))
        })?;
    buf.extend_from_slice(&[DEVICE_PATH_MEDIA, DEVICE_PATH_MEDIA_FILE]);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&name);
    Ok(())
}

fn decode_file_path(mut device_path: &[u8]) -> Result<Option<String>> {
    while let Some((&[node_type, subtype, l0, l1], _)) = device_path.split_first_chunk::<4>() {
        let len = usize::from(u16::from_le_bytes([l0, l1]));
        if len < 4 {
            return Err(CapsuleError::invalid_data(format!(
                "device path node length {len} is invalid"
            )));
        }
        let node = device_path.get(..len).ok_or_else(|| {
            CapsuleError::invalid_data("device path node runs past the variable")
        })?;
        if node_type == DEVICE_PATH_END {
            break;
        }
        if node_type == DEVICE_PATH_MEDIA && subtype == DEVICE_PATH_MEDIA_FILE {
            let (chars, _) = node.get(4..).unwrap_or_default().as_chunks::<2>();
            let units: Vec<u16> = chars
                .iter()
                .map(|c| u16::from_le_bytes(*c))
                .take_while(|&u| u != 0)
                .collect();
            let path = String::from_utf16(&units).map_err(|_| {
                CapsuleError::invalid_data("device path file name is not valid UTF-16")
            })?;
            return Ok(Some(path));
        }
        device_path = device_path.get(len..).unwrap_or_default();
    }
    Ok(None)
}

/// `capsule` relative to the `esp` root in loader form, e.g. `\EFI\fedora\fw\x.cap`.
pub fn esp_relative_path(capsule: &Path, esp: &Path) -> Result<String> {
    let relative = capsule.strip_prefix(esp).map_err(|_| {
        CapsuleError::invalid_data(format!(
            "{} is not below the ESP {}",
            capsule.display(),
            esp.display()
        ))
    })?;
    let mut out = String::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    CapsuleError::invalid_data(format!(
                        "{} is not valid UTF-8",
                        capsule.display()
                    ))
                })?;
                out.push('\\');
                out.push_str(part);
            }
            _ => {
                return Err(CapsuleError::invalid_data(format!(
                    "{} is not a plain path",
                    capsule.display()
                )));
            }
        }
    }
    Ok(out)
}

/// Reads and writes update-info variables.
///
/// Writability is decided once, when the session checks the efivarfs
/// mount, and every operation refuses with `NotSupported` when it failed.
#[derive(Debug)]
pub struct UpdateInfoStore<S> {
    store: S,
    writable: bool,
}

impl<S: EfivarStore> UpdateInfoStore<S> {
    /// Wrap a variable store.
    pub fn new(store: S, writable: bool) -> Self {
        Self { store, writable }
    }

    /// The underlying variable store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether operations are allowed.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(CapsuleError::not_supported(
                "EFI variable store is not writable",
            ))
        }
    }

    /// Record that `capsule_path` on the ESP at `esp` should be applied.
    pub fn write(
        &self,
        device: &DeviceDescriptor,
        capsule_path: &Path,
        esp: &Path,
        name: &str,
        capsule_guid: &str,
    ) -> Result<UpdateInfoRecord> {
        self.ensure_writable()?;
        let guid = guid::parse(capsule_guid)?;
        let relative = esp_relative_path(capsule_path, esp)?;
        let record = UpdateInfoRecord::attempt(name, guid, device, relative);
        self.store.write_variable(
            &guid::FWUPDATE,
            name,
            &record.encode()?,
            VariableAttributes::NV_BS_RT,
        )?;
        debug!(name, path = ?capsule_path, "wrote update info");
        Ok(record)
    }

    /// Read a record back.
    pub fn read(&self, name: &str) -> Result<UpdateInfoRecord> {
        self.ensure_writable()?;
        let var = self.store.read_variable(&guid::FWUPDATE, name)?;
        UpdateInfoRecord::decode(name, &var.data)
    }

    /// Remove a record if present.
    pub fn delete(&self, name: &str) -> Result<()> {
        self.ensure_writable()?;
        self.store.delete_variable(&guid::FWUPDATE, name)
    }

    /// Reset the status word of a record, keeping everything else.
    pub fn clear_status(&self, name: &str) -> Result<()> {
        self.ensure_writable()?;
        let var = self.store.read_variable(&guid::FWUPDATE, name)?;
        let mut record = UpdateInfoRecord::decode(name, &var.data)?;
        record.status = STATUS_CLEARED;
        self.store
            .write_variable(&guid::FWUPDATE, name, &record.encode()?, var.attributes)
    }
}
