//! Fake firmware trees and binary fixtures.
//!
//! [`FakeFirmwareTree`] lays out a temporary directory shaped like the parts
//! of a Linux host the capsule updater reads: sysfs firmware tables, the efi
//! framebuffer driver, DMI identifiers, a mount table, an ESP and a locale
//! tree. Every absolute host path maps to `<root>/<path>`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;

/// Sysfs firmware directory, relative to the tree root.
pub const SYSFS_FIRMWARE: &str = "sys/firmware";
/// efivarfs directory, relative to the tree root.
pub const EFIVARS: &str = "sys/firmware/efi/efivars";
/// Mount table, relative to the tree root.
pub const MOUNT_TABLE: &str = "proc/self/mounts";
/// efi-framebuffer driver directory, relative to the tree root.
pub const FRAMEBUFFER: &str = "sys/bus/platform/drivers/efi-framebuffer/efi-framebuffer.0";
/// DMI id directory, relative to the tree root.
pub const DMI: &str = "sys/class/dmi/id";
/// os-release file, relative to the tree root.
pub const OS_RELEASE: &str = "etc/os-release";
/// Locale tree, relative to the tree root.
pub const LOCALE: &str = "usr/share/locale";

/// One ESRT entry as written to `esrt/entries/entryN`.
#[derive(Debug, Clone)]
pub struct EsrtEntryFixture {
    pub fw_class: String,
    pub fw_type: u32,
    pub fw_version: u32,
    pub lowest_supported_fw_version: u32,
    pub capsule_flags: u32,
    pub last_attempt_version: u32,
    pub last_attempt_status: u32,
}

impl EsrtEntryFixture {
    /// A system-firmware entry with benign defaults.
    pub fn new(fw_class: impl Into<String>) -> Self {
        Self {
            fw_class: fw_class.into(),
            fw_type: 1,
            fw_version: 65586,
            lowest_supported_fw_version: 65582,
            capsule_flags: 0xfe,
            last_attempt_version: 18472960,
            last_attempt_status: 0,
        }
    }

    pub fn with_type(mut self, fw_type: u32) -> Self {
        self.fw_type = fw_type;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.fw_version = version;
        self
    }

    pub fn with_capsule_flags(mut self, flags: u32) -> Self {
        self.capsule_flags = flags;
        self
    }

    pub fn with_last_attempt(mut self, version: u32, status: u32) -> Self {
        self.last_attempt_version = version;
        self.last_attempt_status = status;
        self
    }
}

/// Boot graphics resource table contents.
#[derive(Debug, Clone, Copy)]
pub struct BgrtFixture {
    pub status: u32,
    pub kind: u32,
    pub version: u32,
    pub xoffset: u32,
    pub yoffset: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for BgrtFixture {
    fn default() -> Self {
        Self {
            status: 1,
            kind: 0,
            version: 1,
            xoffset: 123,
            yoffset: 456,
            width: 54,
            height: 24,
        }
    }
}

/// A temporary host filesystem for capsule tests.
#[derive(Debug)]
pub struct FakeFirmwareTree {
    dir: TempDir,
    mounts: Vec<String>,
}

impl FakeFirmwareTree {
    /// Create a tree with an empty ESRT and efivars directory.
    pub fn new() -> io::Result<Self> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join(SYSFS_FIRMWARE).join("efi/esrt/entries"))?;
        fs::create_dir_all(dir.path().join(EFIVARS))?;
        let tree = Self {
            dir,
            mounts: Vec::new(),
        };
        tree.write_mounts()?;
        Ok(tree)
    }

    /// Root of the tree.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of `rel` inside the tree.
    pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        let rel = rel.as_ref();
        self.root()
            .join(rel.strip_prefix("/").unwrap_or(rel))
    }

    /// Write `entryN` under the ESRT entries directory.
    pub fn add_esrt_entry(&self, index: usize, entry: &EsrtEntryFixture) -> io::Result<PathBuf> {
        let dir = self.esrt_entry_dir(index);
        fs::create_dir_all(&dir)?;
        let files = [
            ("fw_class", entry.fw_class.clone()),
            ("fw_type", entry.fw_type.to_string()),
            ("fw_version", entry.fw_version.to_string()),
            (
                "lowest_supported_fw_version",
                entry.lowest_supported_fw_version.to_string(),
            ),
            ("capsule_flags", format!("0x{:x}", entry.capsule_flags)),
            ("last_attempt_version", entry.last_attempt_version.to_string()),
            ("last_attempt_status", entry.last_attempt_status.to_string()),
        ];
        for (name, value) in files {
            fs::write(dir.join(name), format!("{value}\n"))?;
        }
        Ok(dir)
    }

    /// Overwrite a single file of an existing ESRT entry.
    pub fn set_esrt_file(&self, index: usize, name: &str, contents: &str) -> io::Result<()> {
        fs::write(self.esrt_entry_dir(index).join(name), contents)
    }

    /// Remove a single file of an existing ESRT entry.
    pub fn remove_esrt_file(&self, index: usize, name: &str) -> io::Result<()> {
        fs::remove_file(self.esrt_entry_dir(index).join(name))
    }

    fn esrt_entry_dir(&self, index: usize) -> PathBuf {
        self.path(SYSFS_FIRMWARE)
            .join(format!("efi/esrt/entries/entry{index}"))
    }

    /// Mount efivarfs, optionally read-only.
    pub fn mount_efivarfs(&mut self, read_only: bool) -> io::Result<()> {
        let opts = if read_only { "ro,nosuid" } else { "rw,nosuid" };
        let target = self.path(EFIVARS);
        self.mounts.push(format!(
            "efivarfs {} efivarfs {opts} 0 0",
            escape(&target)
        ));
        self.write_mounts()
    }

    /// Create a vfat ESP mounted at the host path `mount_point`.
    pub fn mount_esp(&mut self, mount_point: &str) -> io::Result<PathBuf> {
        let target = self.path(mount_point);
        fs::create_dir_all(&target)?;
        self.mounts.push(format!(
            "/dev/nvme0n1p1 {} vfat rw,relatime,fmask=0077 0 0",
            escape(&target)
        ));
        self.write_mounts()?;
        Ok(target)
    }

    fn write_mounts(&self) -> io::Result<()> {
        let path = self.path(MOUNT_TABLE);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut text = self.mounts.join("\n");
        text.push('\n');
        fs::write(path, text)
    }

    /// Write the ACPI BGRT directory with an embedded logo bitmap.
    pub fn with_bgrt(&self, bgrt: BgrtFixture) -> io::Result<()> {
        let dir = self.path(SYSFS_FIRMWARE).join("acpi/bgrt");
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("status"), format!("{}\n", bgrt.status))?;
        fs::write(dir.join("type"), format!("{}\n", bgrt.kind))?;
        fs::write(dir.join("version"), format!("{}\n", bgrt.version))?;
        fs::write(dir.join("xoffset"), format!("{}\n", bgrt.xoffset))?;
        fs::write(dir.join("yoffset"), format!("{}\n", bgrt.yoffset))?;
        fs::write(dir.join("image"), bmp(bgrt.width, bgrt.height))
    }

    /// Expose an efi-framebuffer of the given size.
    pub fn with_framebuffer(&self, width: u32, height: u32) -> io::Result<()> {
        let dir = self.path(FRAMEBUFFER);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("width"), format!("{width}\n"))?;
        fs::write(dir.join("height"), format!("{height}\n"))
    }

    /// Set a DMI identifier such as `bios_vendor` or `sys_vendor`.
    pub fn with_dmi(&self, key: &str, value: &str) -> io::Result<()> {
        let dir = self.path(DMI);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(key), format!("{value}\n"))
    }

    /// Write an SMBIOS table holding a BIOS Information structure.
    pub fn with_smbios(&self, uefi_supported: bool) -> io::Result<()> {
        let dir = self.path(SYSFS_FIRMWARE).join("dmi/tables");
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("DMI"), smbios_table(uefi_supported))
    }

    /// Write `/etc/os-release`.
    pub fn with_os_release(&self, contents: &str) -> io::Result<()> {
        let path = self.path(OS_RELEASE);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)
    }

    /// Install a compressed splash image for `lang`.
    pub fn with_splash(&self, lang: &str, width: u32, height: u32) -> io::Result<PathBuf> {
        let dir = self.path(LOCALE).join(lang).join("LC_IMAGES");
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("fwupd-{width}-{height}.bmp.gz"));
        fs::write(&path, gzip(&bmp(width, height))?)?;
        Ok(path)
    }

    /// Path of an efivarfs variable file.
    pub fn efivar_path(&self, name: &str, guid: &str) -> PathBuf {
        self.path(EFIVARS).join(format!("{name}-{guid}"))
    }

    /// Write an efivarfs variable file (attributes then data).
    pub fn set_efivar(&self, name: &str, guid: &str, attributes: u32, data: &[u8]) -> io::Result<()> {
        let mut raw = attributes.to_le_bytes().to_vec();
        raw.extend_from_slice(data);
        fs::write(self.efivar_path(name, guid), raw)
    }
}

fn escape(path: &Path) -> String {
    path.display().to_string().replace(' ', "\\040")
}

/// A BMP with a valid header declaring `width` x `height`.
///
/// Only the header is meaningful; the pixel array is a short placeholder so
/// large catalog sizes stay cheap.
pub fn bmp(width: u32, height: u32) -> Vec<u8> {
    let pixels = [0u8; 16];
    let offset: u32 = 54;
    let file_size = offset + pixels.len() as u32;
    let mut buf = Vec::with_capacity(file_size as usize);
    buf.extend_from_slice(b"BM");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(&[0, 0, 0, 0]);
    buf.extend_from_slice(&offset.to_le_bytes());
    buf.extend_from_slice(&40u32.to_le_bytes());
    buf.extend_from_slice(&width.to_le_bytes());
    buf.extend_from_slice(&height.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&24u16.to_le_bytes());
    buf.extend_from_slice(&[0u8; 24]);
    buf.extend_from_slice(&pixels);
    buf
}

/// Gzip `data` with default compression.
pub fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// A raw SMBIOS table with a type 0 structure and an end-of-table marker.
///
/// BIOS characteristics extension byte 2 (offset 0x13) carries the
/// "UEFI specification is supported" bit.
pub fn smbios_table(uefi_supported: bool) -> Vec<u8> {
    let ext2 = if uefi_supported { 0x0c } else { 0x04 };
    let mut buf = vec![
        0x00, 0x18, 0x00, 0x00, // type, length, handle
        0x01, 0x02, 0x00, 0xf0, // vendor, version, start segment
        0x03, 0xff, // release date, rom size
        0x80, 0x98, 0x8b, 0x3f, 0x01, 0x00, 0x00, 0x00, // characteristics
        0x03, ext2, // extension bytes
        0x01, 0x11, 0xff, 0xff, // bios and ec release
    ];
    buf.extend_from_slice(b"LENOVO\0N2HET45W\002/05/2020\0\0");
    buf.extend_from_slice(&[0x7f, 0x04, 0x01, 0x00, 0x00, 0x00]);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::must;

    #[test]
    fn test_bmp_header_fields() {
        let buf = bmp(640, 480);
        assert_eq!(buf.get(..2), Some(&b"BM"[..]));
        assert_eq!(buf.get(18..22), Some(&640u32.to_le_bytes()[..]));
        assert_eq!(buf.get(22..26), Some(&480u32.to_le_bytes()[..]));
    }

    #[test]
    fn test_tree_layout() {
        let mut tree = must(FakeFirmwareTree::new());
        must(tree.mount_efivarfs(false));
        let esp = must(tree.mount_esp("/boot/efi"));
        must(tree.add_esrt_entry(0, &EsrtEntryFixture::new("ddc0ee61-e7f0-4e7d-acc5-c070a398838e")));

        assert!(esp.is_dir());
        assert!(tree.path("/sys/firmware/efi/esrt/entries/entry0/fw_class").is_file());
        let mounts = must(fs::read_to_string(tree.path(MOUNT_TABLE)));
        assert_eq!(mounts.lines().count(), 2);
        assert!(mounts.contains("efivarfs"));
    }

    #[test]
    fn test_smbios_table_shape() {
        let table = smbios_table(true);
        assert_eq!(table.first(), Some(&0x00));
        assert_eq!(table.get(0x13), Some(&0x0c));
        assert!(table.ends_with(&[0x7f, 0x04, 0x01, 0x00, 0x00, 0x00]));
    }
}
