//! Capsule binaries: headers, the UX splash capsule and the firmware wrapper
//!
//! Layouts match the packed UEFI structures:
//!
//! ```text
//! EFI_CAPSULE_HEADER (28 bytes)
//!   0  guid                16  mixed-endian
//!  16  header_size          4
//!  20  flags                4
//!  24  capsule_image_size   4
//!
//! UX capsule header (16 bytes)
//!   0  version              1  = 1
//!   1  checksum             1
//!   2  image_type           1  = 0 (bitmap)
//!   3  reserved             1
//!   4  mode                 4
//!   8  x_offset             4
//!  12  y_offset             4
//! ```
//!
//! All integers are little-endian.

use std::fs;
use std::io::Write;
use std::path::Path;

use bitflags::bitflags;
use serde::Serialize;
use tracing::debug;
use uefi_capsule_efivar::guid;
use uefi_capsule_errors::{CapsuleError, Result, ResultExt};
use uuid::Uuid;

use crate::bitmap::{self, BitmapInfo};
use crate::checksum;
use crate::display::{Bgrt, Resolution};

/// Size of [`CapsuleHeader`] on the wire.
pub const CAPSULE_HEADER_SIZE: usize = 28;

/// Size of [`UxCapsuleHeader`] on the wire.
pub const UX_CAPSULE_HEADER_SIZE: usize = 16;

/// Header size used when wrapping a bare firmware payload.
pub const FIRMWARE_HEADER_SIZE: usize = 4096;

bitflags! {
    /// `EFI_CAPSULE_HEADER.Flags`.
    ///
    /// The low 16 bits are capsule-type specific and are kept verbatim.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    #[serde(transparent)]
    pub struct CapsuleFlags: u32 {
        /// Firmware keeps the capsule in memory across a warm reset
        const PERSIST_ACROSS_RESET  = 0x0001_0000;
        /// Firmware publishes the capsule in the system table
        const POPULATE_SYSTEM_TABLE = 0x0002_0000;
        /// Firmware resets after processing
        const INITIATE_RESET        = 0x0004_0000;

        const _ = !0;
    }
}

/// The outer capsule header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapsuleHeader {
    /// Capsule type GUID
    pub guid: Uuid,
    /// Bytes from the start of the header to the capsule body
    pub header_size: u32,
    /// Capsule flags
    pub flags: CapsuleFlags,
    /// Total capsule size including this header
    pub capsule_image_size: u32,
}

impl CapsuleHeader {
    /// Serialize to the wire layout.
    pub fn to_bytes(&self) -> [u8; CAPSULE_HEADER_SIZE] {
        let mut buf = [0u8; CAPSULE_HEADER_SIZE];
        let (guid_bytes, rest) = buf.split_at_mut(16);
        guid_bytes.copy_from_slice(&guid::to_mixed_endian(&self.guid));
        let (header_size, rest) = rest.split_at_mut(4);
        header_size.copy_from_slice(&self.header_size.to_le_bytes());
        let (flags, image_size) = rest.split_at_mut(4);
        flags.copy_from_slice(&self.flags.bits().to_le_bytes());
        image_size.copy_from_slice(&self.capsule_image_size.to_le_bytes());
        buf
    }

    /// Parse the wire layout from the start of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let (head, _) = buf
            .split_first_chunk::<CAPSULE_HEADER_SIZE>()
            .ok_or_else(|| {
                CapsuleError::invalid_data(format!(
                    "capsule of {} bytes is smaller than its header",
                    buf.len()
                ))
            })?;
        let (guid_bytes, rest) = head.split_first_chunk::<16>().ok_or_else(truncated)?;
        let (header_size, rest) = rest.split_first_chunk::<4>().ok_or_else(truncated)?;
        let (flags, rest) = rest.split_first_chunk::<4>().ok_or_else(truncated)?;
        let (image_size, _) = rest.split_first_chunk::<4>().ok_or_else(truncated)?;
        Ok(Self {
            guid: guid::from_mixed_endian(*guid_bytes),
            header_size: u32::from_le_bytes(*header_size),
            flags: CapsuleFlags::from_bits_retain(u32::from_le_bytes(*flags)),
            capsule_image_size: u32::from_le_bytes(*image_size),
        })
    }
}

fn truncated() -> CapsuleError {
    CapsuleError::invalid_data("capsule header truncated")
}

/// The UX (display) capsule sub-header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UxCapsuleHeader {
    /// Always 1
    pub version: u8,
    /// Makes the whole capsule sum to zero
    pub checksum: u8,
    /// 0 for bitmap
    pub image_type: u8,
    /// Display mode; 0 for the current mode
    pub mode: u32,
    /// Left edge of the image
    pub x_offset: u32,
    /// Top edge of the image
    pub y_offset: u32,
}

impl UxCapsuleHeader {
    /// A bitmap header at the given placement with a zero checksum.
    pub fn bitmap(x_offset: u32, y_offset: u32) -> Self {
        Self {
            version: 1,
            checksum: 0,
            image_type: 0,
            mode: 0,
            x_offset,
            y_offset,
        }
    }

    /// Serialize to the wire layout.
    pub fn to_bytes(&self) -> [u8; UX_CAPSULE_HEADER_SIZE] {
        let mut buf = [0u8; UX_CAPSULE_HEADER_SIZE];
        let (bytes, rest) = buf.split_at_mut(4);
        bytes.copy_from_slice(&[self.version, self.checksum, self.image_type, 0]);
        let (mode, rest) = rest.split_at_mut(4);
        mode.copy_from_slice(&self.mode.to_le_bytes());
        let (x, y) = rest.split_at_mut(4);
        x.copy_from_slice(&self.x_offset.to_le_bytes());
        y.copy_from_slice(&self.y_offset.to_le_bytes());
        buf
    }

    /// Parse the wire layout from the start of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let (head, _) = buf
            .split_first_chunk::<UX_CAPSULE_HEADER_SIZE>()
            .ok_or_else(|| CapsuleError::invalid_data("UX capsule header truncated"))?;
        let [version, checksum, image_type, _reserved, rest @ ..] = *head;
        let [m0, m1, m2, m3, x0, x1, x2, x3, y0, y1, y2, y3] = rest;
        Ok(Self {
            version,
            checksum,
            image_type,
            mode: u32::from_le_bytes([m0, m1, m2, m3]),
            x_offset: u32::from_le_bytes([x0, x1, x2, x3]),
            y_offset: u32::from_le_bytes([y0, y1, y2, y3]),
        })
    }
}

/// Where a splash image goes: centred horizontally, directly below the logo.
pub fn splash_offsets(screen: Resolution, image: BitmapInfo, logo: &Bgrt) -> (u32, u32) {
    let x_offset = (screen.width / 2).saturating_sub(image.width / 2);
    (x_offset, logo.bottom())
}

fn image_size(payload_len: usize, header_len: usize) -> Result<u32> {
    payload_len
        .checked_add(header_len)
        .and_then(|total| u32::try_from(total).ok())
        .ok_or_else(|| {
            CapsuleError::invalid_data(format!("payload of {payload_len} bytes is too large"))
        })
}

/// Build a UX capsule carrying `bmp`.
///
/// The result is `CapsuleHeader ‖ UxCapsuleHeader ‖ bmp` with the checksum
/// byte chosen so every byte sums to zero modulo 256.
pub fn build_ux_capsule(
    bmp: &[u8],
    screen: Resolution,
    logo: &Bgrt,
    capsule_guid: &str,
) -> Result<Vec<u8>> {
    let image = bitmap::parse(bmp).prefix_err("splash invalid: ")?;
    let guid = guid::parse(capsule_guid)?;

    let header = CapsuleHeader {
        guid,
        header_size: CAPSULE_HEADER_SIZE as u32,
        flags: CapsuleFlags::PERSIST_ACROSS_RESET,
        capsule_image_size: image_size(bmp.len(), CAPSULE_HEADER_SIZE + UX_CAPSULE_HEADER_SIZE)?,
    };
    let (x_offset, y_offset) = splash_offsets(screen, image, logo);
    let mut ux = UxCapsuleHeader::bitmap(x_offset, y_offset);

    let header_bytes = header.to_bytes();
    let sum = checksum::sum8_all(&[&header_bytes, &ux.to_bytes(), bmp]);
    ux.checksum = checksum::complement(sum);
    debug!(
        x_offset,
        y_offset,
        checksum = ux.checksum,
        "built UX capsule for {}x{} image",
        image.width,
        image.height
    );

    let mut out = Vec::with_capacity(header.capsule_image_size as usize);
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&ux.to_bytes());
    out.extend_from_slice(bmp);
    Ok(out)
}

/// Wrap a firmware payload in a capsule header for `device_guid`.
///
/// A payload that already starts with a header for that GUID is returned
/// unchanged. Otherwise a page-sized header carrying `flags` is prepended.
pub fn wrap_firmware_payload(
    payload: &[u8],
    device_guid: &Uuid,
    flags: CapsuleFlags,
) -> Result<Vec<u8>> {
    if let Ok(existing) = CapsuleHeader::from_bytes(payload)
        && existing.guid == *device_guid
    {
        debug!(guid = %device_guid, "payload already has a capsule header");
        return Ok(payload.to_vec());
    }

    let header = CapsuleHeader {
        guid: *device_guid,
        header_size: FIRMWARE_HEADER_SIZE as u32,
        flags,
        capsule_image_size: image_size(payload.len(), FIRMWARE_HEADER_SIZE)?,
    };
    let mut out = Vec::with_capacity(header.capsule_image_size as usize);
    out.extend_from_slice(&header.to_bytes());
    out.resize(FIRMWARE_HEADER_SIZE, 0);
    out.extend_from_slice(payload);
    Ok(out)
}

/// File name used for a capsule of type `guid`.
pub fn capsule_file_name(guid: &Uuid) -> String {
    format!("fwupd-{}.cap", guid.hyphenated())
}

/// Atomically create or replace the capsule file at `path`.
///
/// Parent directories are created as needed. Data goes to a sibling
/// temporary file that is renamed over `path` only after a successful sync,
/// so a partially written capsule is never visible under the final name.
pub fn write_capsule_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            CapsuleError::io(format!("failed to create {}", parent.display()), e)
        })?;
    }

    let temp_path = path.with_extension("tmp");
    let written = write_synced(&temp_path, data).and_then(|()| {
        fs::rename(&temp_path, path).map_err(|e| {
            CapsuleError::io(
                format!("failed to replace {}", path.display()),
                e,
            )
        })
    });
    if written.is_err()
        && temp_path.exists()
        && let Err(e) = fs::remove_file(&temp_path)
    {
        debug!(path = ?temp_path, "failed to remove temporary capsule: {e}");
    }
    written?;

    debug!(path = ?path, size = data.len(), "wrote capsule");
    Ok(())
}

fn write_synced(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)
        .map_err(|e| CapsuleError::io(format!("failed to create {}", path.display()), e))?;
    file.write_all(data)
        .and_then(|()| file.sync_all())
        .map_err(|e| CapsuleError::io(format!("failed to write {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uefi_capsule_test_helpers::fixtures::bmp;

    const LOGO: Bgrt = Bgrt {
        x_offset: 123,
        y_offset: 456,
        width: 54,
        height: 24,
    };

    #[test]
    fn test_capsule_header_layout() {
        let header = CapsuleHeader {
            guid: guid::UX_CAPSULE,
            header_size: 28,
            flags: CapsuleFlags::PERSIST_ACROSS_RESET,
            capsule_image_size: 0x0102_0304,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.get(..4), Some(&[0x62, 0x81, 0x8c, 0x3b][..]));
        assert_eq!(bytes.get(16..20), Some(&[28, 0, 0, 0][..]));
        assert_eq!(bytes.get(20..24), Some(&[0, 0, 1, 0][..]));
        assert_eq!(bytes.get(24..28), Some(&[4, 3, 2, 1][..]));
    }

    #[test]
    fn test_capsule_header_parse() -> Result<()> {
        let header = CapsuleHeader {
            guid: guid::FWUPDATE,
            header_size: 4096,
            flags: CapsuleFlags::from_bits_retain(0x0005_00fe),
            capsule_image_size: 9000,
        };
        assert_eq!(CapsuleHeader::from_bytes(&header.to_bytes())?, header);
        assert!(CapsuleHeader::from_bytes(&[0u8; 27]).is_err());
        Ok(())
    }

    #[test]
    fn test_ux_header_layout() -> Result<()> {
        let mut ux = UxCapsuleHeader::bitmap(560, 480);
        ux.checksum = 0xab;
        let bytes = ux.to_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes.get(..4), Some(&[1, 0xab, 0, 0][..]));
        assert_eq!(bytes.get(4..8), Some(&[0, 0, 0, 0][..]));
        assert_eq!(bytes.get(8..12), Some(&560u32.to_le_bytes()[..]));
        assert_eq!(bytes.get(12..16), Some(&480u32.to_le_bytes()[..]));
        assert_eq!(UxCapsuleHeader::from_bytes(&bytes)?, ux);
        Ok(())
    }

    #[test]
    fn test_ux_capsule_sums_to_zero() -> Result<()> {
        let image = bmp(800, 600);
        let capsule = build_ux_capsule(
            &image,
            Resolution::new(1920, 1080),
            &LOGO,
            guid::UX_CAPSULE_STR,
        )?;
        assert_eq!(checksum::sum8(&capsule), 0);

        let header = CapsuleHeader::from_bytes(&capsule)?;
        assert_eq!(header.capsule_image_size as usize, capsule.len());
        assert_eq!(capsule.len(), 28 + 16 + image.len());

        let ux = UxCapsuleHeader::from_bytes(capsule.get(28..).unwrap_or_default())?;
        assert_eq!(ux.x_offset, 960 - 400);
        assert_eq!(ux.y_offset, 456 + 24);
        Ok(())
    }

    #[test]
    fn test_wider_image_clamps_offset() {
        let (x, _) = splash_offsets(
            Resolution::new(640, 480),
            BitmapInfo {
                width: 800,
                height: 600,
            },
            &LOGO,
        );
        assert_eq!(x, 0);
    }

    #[test]
    fn test_ux_capsule_errors() {
        let err = build_ux_capsule(&[0u8; 40], Resolution::new(800, 600), &LOGO, guid::UX_CAPSULE_STR);
        assert!(
            matches!(err, Err(CapsuleError::InvalidFile(ref m)) if m == "splash invalid: invalid BMP header signature")
        );

        let err = build_ux_capsule(&bmp(640, 480), Resolution::new(800, 600), &LOGO, "not-a-guid");
        assert!(matches!(err, Err(CapsuleError::InvalidData(_))));
    }

    #[test]
    fn test_wrap_adds_page_header() -> Result<()> {
        let payload = vec![0x5au8; 100];
        let guid = guid::parse("ddc0ee61-e7f0-4e7d-acc5-c070a398838e")?;
        let flags = CapsuleFlags::from_bits_retain(0x0001_00fe);
        let wrapped = wrap_firmware_payload(&payload, &guid, flags)?;

        assert_eq!(wrapped.len(), FIRMWARE_HEADER_SIZE + payload.len());
        let header = CapsuleHeader::from_bytes(&wrapped)?;
        assert_eq!(header.guid, guid);
        assert_eq!(header.flags, flags);
        assert_eq!(header.header_size as usize, FIRMWARE_HEADER_SIZE);
        assert_eq!(header.capsule_image_size as usize, wrapped.len());
        assert_eq!(wrapped.get(FIRMWARE_HEADER_SIZE..), Some(&payload[..]));

        let again = wrap_firmware_payload(&wrapped, &guid, flags)?;
        assert_eq!(again, wrapped);
        Ok(())
    }

    #[test]
    fn test_wrap_foreign_header_is_rewrapped() -> Result<()> {
        let other = CapsuleHeader {
            guid: guid::UX_CAPSULE,
            header_size: 28,
            flags: CapsuleFlags::empty(),
            capsule_image_size: 28,
        };
        let guid = guid::parse("ddc0ee61-e7f0-4e7d-acc5-c070a398838e")?;
        let wrapped = wrap_firmware_payload(&other.to_bytes(), &guid, CapsuleFlags::empty())?;
        assert_eq!(wrapped.len(), FIRMWARE_HEADER_SIZE + 28);
        Ok(())
    }

    #[test]
    fn test_write_capsule_file_replaces() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("EFI/fedora/fw").join(capsule_file_name(&guid::UX_CAPSULE));
        write_capsule_file(&path, b"first version")?;
        write_capsule_file(&path, b"second")?;
        assert_eq!(fs::read(&path)?, b"second");
        assert!(!path.with_extension("tmp").exists());
        assert!(path.ends_with("fwupd-3b8c8162-188c-46a4-aec9-be43f1d65697.cap"));
        Ok(())
    }

    #[test]
    fn test_write_capsule_file_failure_leaves_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        // the target is an existing directory, so the rename fails
        let path = dir.path().join("fwupd-x.cap");
        fs::create_dir_all(path.join("occupied"))?;
        assert!(write_capsule_file(&path, b"data").is_err());
        assert!(!path.with_extension("tmp").exists());
        assert!(path.is_dir());
        Ok(())
    }
}
