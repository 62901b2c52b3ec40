//! Capsule updater configuration.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uefi_capsule_errors::{CapsuleError, Result};

/// Free space the ESP needs by default, 32 MiB.
pub const DEFAULT_REQUIRE_ESP_FREE_SPACE: u64 = 32 * 1024 * 1024;

/// Settings read from the YAML configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case", deny_unknown_fields)]
pub struct CapsuleConfig {
    /// Use this ESP instead of probing the mount table
    pub override_esp_mount_point: Option<PathBuf>,
    /// Bytes that must be free on the ESP before staging a capsule
    pub require_esp_free_space: u64,
    /// Boot the loader directly rather than through shim
    pub disable_shim_for_secure_boot: bool,
    /// Stage under `EFI/boot` when no OS directory exists
    pub fallback_to_removable_path: bool,
    /// Never stage a UX capsule
    pub disable_ux_capsule: bool,
    /// Skip the SMBIOS UEFI-mode check on platforms with broken tables
    pub force_enable: bool,
}

impl Default for CapsuleConfig {
    fn default() -> Self {
        Self {
            override_esp_mount_point: None,
            require_esp_free_space: DEFAULT_REQUIRE_ESP_FREE_SPACE,
            disable_shim_for_secure_boot: false,
            fallback_to_removable_path: false,
            disable_ux_capsule: false,
            force_enable: false,
        }
    }
}

impl CapsuleConfig {
    /// Parse YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| CapsuleError::invalid_file(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`; a missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?path, "no configuration file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(CapsuleError::io(
                    format!("failed to read {}", path.display()),
                    e,
                ));
            }
        };
        Self::from_yaml(&text).map_err(|e| e.prefixed(format!("{}: ", path.display())))
    }

    /// Reject values that cannot work.
    pub fn validate(&self) -> Result<()> {
        if let Some(path) = &self.override_esp_mount_point
            && !path.is_absolute()
        {
            return Err(CapsuleError::invalid_data(format!(
                "override_esp_mount_point {} is not an absolute path",
                path.display()
            )));
        }
        Ok(())
    }

    /// Serialize as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| CapsuleError::internal(format!("failed to serialize configuration: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CapsuleConfig::default();
        assert_eq!(config.require_esp_free_space, 33_554_432);
        assert!(!config.disable_ux_capsule);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() -> Result<()> {
        let config = CapsuleConfig::from_yaml("disable_ux_capsule: true\nforce_enable: true\n")?;
        assert!(config.disable_ux_capsule);
        assert!(config.force_enable);
        assert_eq!(config.require_esp_free_space, DEFAULT_REQUIRE_ESP_FREE_SPACE);
        Ok(())
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            CapsuleConfig::from_yaml("override_esp_mount_point: boot/efi\n"),
            Err(CapsuleError::InvalidData(_))
        ));
        assert!(matches!(
            CapsuleConfig::from_yaml("no_such_key: 1\n"),
            Err(CapsuleError::InvalidFile(_))
        ));
    }

    #[test]
    fn test_load_from_path() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("uefi-capsule.yaml");
        assert_eq!(CapsuleConfig::load_from_path(&path)?, CapsuleConfig::default());

        let config = CapsuleConfig {
            override_esp_mount_point: Some(PathBuf::from("/boot/efi")),
            fallback_to_removable_path: true,
            ..CapsuleConfig::default()
        };
        fs::write(&path, config.to_yaml()?)?;
        assert_eq!(CapsuleConfig::load_from_path(&path)?, config);

        fs::write(&path, "require_esp_free_space: lots\n")?;
        let err = CapsuleConfig::load_from_path(&path);
        assert!(err.is_err_and(|e| e.message().starts_with(&path.display().to_string())));
        Ok(())
    }
}
