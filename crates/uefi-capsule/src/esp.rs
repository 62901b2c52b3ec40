//! EFI System Partition discovery and the per-OS capsule directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;
use uefi_capsule_efivar::MountTable;
use uefi_capsule_errors::{CapsuleError, Result};

/// Filesystem types an ESP may be mounted as.
pub const ESP_FILESYSTEMS: [&str; 2] = ["vfat", "msdos"];

/// A mounted EFI System Partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EspVolume {
    mount_point: PathBuf,
}

impl EspVolume {
    /// Use an explicitly configured mount point.
    pub fn for_path(path: &Path) -> Result<Self> {
        if !path.is_absolute() {
            return Err(CapsuleError::invalid_data(format!(
                "{} is not an absolute path",
                path.display()
            )));
        }
        if !path.is_dir() {
            return Err(CapsuleError::not_found(format!(
                "{} does not exist",
                path.display()
            )));
        }
        Ok(Self {
            mount_point: path.to_path_buf(),
        })
    }

    /// The first candidate mounted with a FAT filesystem.
    pub fn default_from_mounts(mounts: &MountTable, candidates: &[PathBuf]) -> Result<Self> {
        for candidate in candidates {
            match mounts.find(candidate) {
                Some(entry) if ESP_FILESYSTEMS.contains(&entry.fstype.as_str()) => {
                    debug!(mount_point = ?candidate, "found ESP");
                    return Ok(Self {
                        mount_point: candidate.clone(),
                    });
                }
                Some(entry) => {
                    debug!(mount_point = ?candidate, fstype = %entry.fstype, "not an ESP");
                }
                None => {}
            }
        }
        let tried: Vec<String> = candidates.iter().map(|c| c.display().to_string()).collect();
        Err(CapsuleError::not_found(format!(
            "no ESP mounted at any of {}",
            tried.join(", ")
        )))
    }

    /// Where the partition is mounted.
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// The OS-specific directory capsules are staged under.
    ///
    /// `EFI/<ID>` is preferred, then any existing `EFI/<ID_LIKE>`, then
    /// `EFI/boot` when the removable path is allowed.
    pub fn os_dir(&self, os: &OsRelease, fallback_removable: bool) -> PathBuf {
        let efi = self.mount_point.join("EFI");
        let preferred = efi.join(os.id());
        if preferred.is_dir() {
            return preferred;
        }
        if let Some(like) = os.id_like.iter().map(|id| efi.join(id)).find(|p| p.is_dir()) {
            return like;
        }
        if fallback_removable {
            return efi.join("boot");
        }
        preferred
    }
}

/// The fields of `os-release` used to name the ESP directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OsRelease {
    /// `ID`
    pub id: Option<String>,
    /// `ID_LIKE`, split on whitespace
    pub id_like: Vec<String>,
}

impl OsRelease {
    /// Read an os-release file; a missing file yields an empty record.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) => {
                debug!("failed to read {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Parse `KEY=value` lines, with optional quoting.
    pub fn parse(text: &str) -> Self {
        let mut release = Self::default();
        for line in text.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let value = unquote(value.trim());
            match key {
                "ID" if !value.is_empty() => release.id = Some(value.to_string()),
                "ID_LIKE" => {
                    release.id_like = value.split_whitespace().map(str::to_string).collect();
                }
                _ => {}
            }
        }
        release
    }

    /// `ID`, or `unknown`.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or("unknown")
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use uefi_capsule_test_helpers::fixtures::{FakeFirmwareTree, MOUNT_TABLE};
    use uefi_capsule_test_helpers::must;

    #[test]
    fn test_os_release_parse() {
        let os = OsRelease::parse("NAME=\"Fedora Linux\"\nID=fedora\nID_LIKE=\"rhel centos\"\n");
        assert_eq!(os.id(), "fedora");
        assert_eq!(os.id_like, ["rhel", "centos"]);
        assert_eq!(OsRelease::parse("ID=''").id(), "unknown");
        assert_eq!(OsRelease::parse("ID='arch'").id(), "arch");
    }

    #[test]
    fn test_default_from_mounts() -> Result<()> {
        let mut tree = must(FakeFirmwareTree::new());
        let esp = must(tree.mount_esp("/efi"));
        let candidates = vec![tree.path("/boot/efi"), tree.path("/efi"), tree.path("/boot")];
        let mounts = MountTable::load(tree.path(MOUNT_TABLE))?;
        let volume = EspVolume::default_from_mounts(&mounts, &candidates)?;
        assert_eq!(volume.mount_point(), esp);
        Ok(())
    }

    #[test]
    fn test_no_esp_mounted() -> Result<()> {
        let mut tree = must(FakeFirmwareTree::new());
        must(tree.mount_efivarfs(false));
        let mounts = MountTable::load(tree.path(MOUNT_TABLE))?;
        let err = EspVolume::default_from_mounts(&mounts, &[tree.path("/boot/efi")]);
        assert!(matches!(err, Err(CapsuleError::NotFound(ref m)) if m.starts_with("no ESP mounted at any of ")));
        Ok(())
    }

    #[test]
    fn test_for_path() -> Result<()> {
        let tree = must(FakeFirmwareTree::new());
        assert!(matches!(
            EspVolume::for_path(&tree.path("/boot/efi")),
            Err(CapsuleError::NotFound(_))
        ));
        assert!(matches!(
            EspVolume::for_path(Path::new("boot/efi")),
            Err(CapsuleError::InvalidData(_))
        ));
        let volume = EspVolume::for_path(tree.root())?;
        assert_eq!(volume.mount_point(), tree.root());
        Ok(())
    }

    #[test]
    fn test_os_dir_fallbacks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let volume = EspVolume::for_path(dir.path())?;
        let os = OsRelease::parse("ID=pop\nID_LIKE=\"ubuntu debian\"\n");

        assert_eq!(volume.os_dir(&os, false), dir.path().join("EFI/pop"));
        assert_eq!(volume.os_dir(&os, true), dir.path().join("EFI/boot"));

        fs::create_dir_all(dir.path().join("EFI/debian"))?;
        assert_eq!(volume.os_dir(&os, true), dir.path().join("EFI/debian"));

        fs::create_dir_all(dir.path().join("EFI/pop"))?;
        assert_eq!(volume.os_dir(&os, true), dir.path().join("EFI/pop"));
        assert_eq!(
            volume.os_dir(&OsRelease::default(), false),
            dir.path().join("EFI/unknown")
        );
        Ok(())
    }
}
