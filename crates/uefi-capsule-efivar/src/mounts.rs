//! Mount table parsing
//!
//! Reads `/proc/self/mounts` style tables to answer two questions: is a
//! directory a mount point, and is that mount writable.

use std::fs;
use std::path::{Path, PathBuf};

use uefi_capsule_errors::{CapsuleError, Result};

/// Default location of the mount table.
pub const DEFAULT_MOUNT_TABLE: &str = "/proc/self/mounts";

/// A single mount table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Backing device or pseudo source
    pub source: String,
    /// Mount point
    pub target: PathBuf,
    /// Filesystem type, e.g. `vfat` or `efivarfs`
    pub fstype: String,
    /// Comma separated mount options
    pub options: Vec<String>,
}

impl MountEntry {
    /// Whether the mount was made read-only.
    pub fn is_read_only(&self) -> bool {
        self.options.iter().any(|o| o == "ro")
    }
}

/// A parsed mount table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    /// Load and parse a mount table file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| CapsuleError::io(format!("failed to read {}", path.display()), e))?;
        Ok(Self::parse(&text))
    }

    /// Parse mount table text. Malformed rows are ignored.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let source = fields.next()?;
                let target = fields.next()?;
                let fstype = fields.next()?;
                let options = fields.next().unwrap_or_default();
                Some(MountEntry {
                    source: unescape(source),
                    target: PathBuf::from(unescape(target)),
                    fstype: fstype.to_string(),
                    options: options.split(',').map(str::to_string).collect(),
                })
            })
            .collect();
        Self { entries }
    }

    /// All rows in table order.
    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    /// The mount covering exactly `target`.
    ///
    /// When a directory was mounted over more than once the last row wins,
    /// matching what the kernel exposes.
    pub fn find(&self, target: &Path) -> Option<&MountEntry> {
        self.entries.iter().rev().find(|e| e.target == target)
    }

    /// Whether `target` is a mount point with write access.
    pub fn is_writable_mount(&self, target: &Path) -> bool {
        self.find(target).is_some_and(|e| !e.is_read_only())
    }

    /// Ensure `dir` is mounted and writable.
    ///
    /// Fails with `NotFound` when nothing is mounted there and with
    /// `NotSupported` when the mount is read-only.
    pub fn ensure_writable_mount(&self, dir: &Path) -> Result<()> {
        match self.find(dir) {
            None => Err(CapsuleError::not_found(format!(
                "{} was not mounted",
                dir.display()
            ))),
            Some(entry) if entry.is_read_only() => Err(CapsuleError::not_supported(format!(
                "{} is read only",
                dir.display()
            ))),
            Some(_) => Ok(()),
        }
    }
}

// Mount tables escape space, tab, newline and backslash as `\ooo`.
fn unescape(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_string();
    }
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while let Some(&b) = bytes.get(i) {
        if b == b'\\'
            && let Some(oct) = bytes.get(i + 1..i + 4)
            && oct.iter().all(|c| (b'0'..=b'7').contains(c))
        {
            let value = oct
                .iter()
                .fold(0u32, |acc, c| acc * 8 + u32::from(c - b'0'));
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(b);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
efivarfs /sys/firmware/efi/efivars efivarfs rw,nosuid,nodev,noexec,relatime 0 0
/dev/nvme0n1p1 /boot/efi vfat rw,relatime,fmask=0077,dmask=0077 0 0
/dev/sdb1 /media/usb\\040stick vfat ro,relatime 0 0
garbage
";

    #[test]
    fn test_parse_rows() {
        let table = MountTable::parse(TABLE);
        assert_eq!(table.entries().len(), 4);
        let esp = table.find(Path::new("/boot/efi"));
        assert!(esp.is_some_and(|e| e.fstype == "vfat" && e.source == "/dev/nvme0n1p1"));
    }

    #[test]
    fn test_octal_unescape() {
        let table = MountTable::parse(TABLE);
        let usb = table.find(Path::new("/media/usb stick"));
        assert!(usb.is_some_and(MountEntry::is_read_only));
    }

    #[test]
    fn test_ensure_writable_mount() {
        let table = MountTable::parse(TABLE);
        assert!(
            table
                .ensure_writable_mount(Path::new("/sys/firmware/efi/efivars"))
                .is_ok()
        );

        let err = table.ensure_writable_mount(Path::new("/efi"));
        assert!(matches!(err, Err(CapsuleError::NotFound(ref m)) if m == "/efi was not mounted"));

        let err = table.ensure_writable_mount(Path::new("/media/usb stick"));
        assert!(
            matches!(err, Err(CapsuleError::NotSupported(ref m)) if m == "/media/usb stick is read only")
        );
    }

    #[test]
    fn test_last_mount_wins() {
        let table = MountTable::parse(
            "efivarfs /sys/firmware/efi/efivars efivarfs rw 0 0\n\
             efivarfs /sys/firmware/efi/efivars efivarfs ro 0 0\n",
        );
        assert!(!table.is_writable_mount(Path::new("/sys/firmware/efi/efivars")));
    }

    #[test]
    fn test_find_matches_mount_point_exactly() {
        let table = MountTable::parse(TABLE);
        assert!(table.find(Path::new("/boot/efi/EFI")).is_none());
        assert!(table.find(Path::new("/boot")).is_none());
        assert!(!table.is_writable_mount(Path::new("/sys/firmware/efi")));
        let err = table.ensure_writable_mount(Path::new("/boot/efi/EFI/fedora"));
        assert!(matches!(err, Err(CapsuleError::NotFound(_))));
    }
}
