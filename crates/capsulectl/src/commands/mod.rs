//! Command implementations for capsulectl

pub mod device;
pub mod firmware;
pub mod system;

use std::path::Path;

use anyhow::Result;
use tracing::debug;
use uefi_capsule::prelude::*;

use crate::error::CliError;

/// Everything a command needs to open a session.
#[derive(Debug, Clone)]
pub struct Context {
    /// Print JSON instead of human output
    pub json: bool,
    /// Host filesystem locations
    pub paths: HostPaths,
    /// Loaded configuration
    pub config: CapsuleConfig,
}

impl Context {
    /// Resolve paths and load the configuration.
    pub fn new(
        json: bool,
        root: Option<&Path>,
        sysfs: Option<&Path>,
        efivars: Option<&Path>,
        mount_table: Option<&Path>,
        config_path: &Path,
    ) -> Result<Self> {
        let mut paths = root.map(HostPaths::with_root).unwrap_or_default();
        if let Some(sysfs) = sysfs {
            paths.sysfs_firmware = sysfs.to_path_buf();
            paths.efivars_dir = sysfs.join("efi/efivars");
        }
        if let Some(efivars) = efivars {
            paths.efivars_dir = efivars.to_path_buf();
        }
        if let Some(mount_table) = mount_table {
            paths.mount_table = mount_table.to_path_buf();
        }

        let config = CapsuleConfig::load_from_path(config_path)?;
        debug!(config = ?config_path, "loaded configuration");
        Ok(Self {
            json,
            paths,
            config,
        })
    }

    /// Start a session and enumerate devices.
    pub fn open_session(&self) -> Result<CapsuleSession<Efivarfs>> {
        let mut session = CapsuleSession::for_host(self.paths.clone(), self.config.clone());
        session.startup()?;
        session.coldplug()?;
        Ok(session)
    }
}

/// Resolve a device argument, reporting unknown devices as a CLI error.
pub fn find_device<S: EfivarStore>(
    session: &CapsuleSession<S>,
    query: &str,
) -> Result<DeviceHandle, CliError> {
    session
        .find_device(query)
        .map_err(|_| CliError::DeviceNotFound(query.to_string()))
}
