//! Host filesystem locations read by the capsule updater.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Every filesystem root the updater touches.
///
/// Production code uses [`HostPaths::default`]. Tests and the CLI's hidden
/// overrides relocate the whole set with [`HostPaths::with_root`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPaths {
    /// sysfs firmware directory (`/sys/firmware`)
    pub sysfs_firmware: PathBuf,
    /// efivarfs mount point
    pub efivars_dir: PathBuf,
    /// efi-framebuffer platform driver instance
    pub framebuffer: PathBuf,
    /// DMI identifier directory
    pub dmi: PathBuf,
    /// Mount table
    pub mount_table: PathBuf,
    /// os-release file
    pub os_release: PathBuf,
    /// Locale tree holding pre-rendered splash images
    pub locale_dir: PathBuf,
    /// Mount points searched for a default ESP, in order
    pub esp_candidates: Vec<PathBuf>,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            sysfs_firmware: PathBuf::from("/sys/firmware"),
            efivars_dir: PathBuf::from(uefi_capsule_efivar::DEFAULT_EFIVARS_DIR),
            framebuffer: PathBuf::from(
                "/sys/bus/platform/drivers/efi-framebuffer/efi-framebuffer.0",
            ),
            dmi: PathBuf::from("/sys/class/dmi/id"),
            mount_table: PathBuf::from(uefi_capsule_efivar::DEFAULT_MOUNT_TABLE),
            os_release: PathBuf::from("/etc/os-release"),
            locale_dir: PathBuf::from("/usr/share/locale"),
            esp_candidates: ["/boot/efi", "/efi", "/boot"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
        }
    }
}

impl HostPaths {
    /// The default layout re-rooted below `root`.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let reroot = |p: &Path| root.join(p.strip_prefix("/").unwrap_or(p));
        let defaults = Self::default();
        Self {
            sysfs_firmware: reroot(&defaults.sysfs_firmware),
            efivars_dir: reroot(&defaults.efivars_dir),
            framebuffer: reroot(&defaults.framebuffer),
            dmi: reroot(&defaults.dmi),
            mount_table: reroot(&defaults.mount_table),
            os_release: reroot(&defaults.os_release),
            locale_dir: reroot(&defaults.locale_dir),
            esp_candidates: defaults.esp_candidates.iter().map(|p| reroot(p)).collect(),
        }
    }

    /// `<sysfs>/efi`, present on every UEFI boot.
    pub fn efi_dir(&self) -> PathBuf {
        self.sysfs_firmware.join("efi")
    }

    /// ESRT entry directories.
    pub fn esrt_entries(&self) -> PathBuf {
        self.sysfs_firmware.join("efi/esrt/entries")
    }

    /// efivarfs mount point.
    pub fn efivars(&self) -> PathBuf {
        self.efivars_dir.clone()
    }

    /// ACPI BGRT attribute directory.
    pub fn bgrt(&self) -> PathBuf {
        self.sysfs_firmware.join("acpi/bgrt")
    }

    /// Raw SMBIOS structure table.
    pub fn smbios_table(&self) -> PathBuf {
        self.sysfs_firmware.join("dmi/tables/DMI")
    }
}
