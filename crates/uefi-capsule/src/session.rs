//! The host-facing capsule update session
//!
//! A [`CapsuleSession`] owns everything one daemon run learns about the
//! platform: the enumerated devices, the ESP, the BGRT and the report
//! metadata. Hosts drive it call by call: `startup`, `coldplug`, then any
//! number of `update`, `unlock` and result queries.

use std::collections::BTreeMap;
use std::path::PathBuf;

use bitflags::bitflags;
use serde::Serialize;
use tracing::{debug, info, warn};
use uefi_capsule_efivar::{EfivarStore, Efivarfs, MountTable, guid, secure_boot_enabled};
use uefi_capsule_errors::{CapsuleError, ErrorKind, Result};

use crate::budget;
use crate::capsule::{self, write_capsule_file};
use crate::config::CapsuleConfig;
use crate::device::{
    DeviceDescriptor, DeviceFlags, DeviceHandle, DeviceKind, DeviceTable, FLAG_LEGACY_BOOTMGR_DESC,
    FLAG_NO_UX_CAPSULE, InternalFlags,
};
use crate::display::{self, Bgrt, Resolution};
use crate::esp::{EspVolume, OsRelease};
use crate::esrt;
use crate::paths::HostPaths;
use crate::platform::{DmiKey, HWID_LENOVO, PlatformInfo};
use crate::smbios::{self, SmbiosTable};
use crate::splash::{self, SPLASH_CATALOG, SplashLocator};
use crate::status::{self, UpdateOutcome};
use crate::update_info::{UX_CAPSULE_VARIABLE, UpdateInfoStore};

bitflags! {
    /// Conditions discovered while setting the session up.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
    #[serde(transparent)]
    pub struct SessionFlags: u32 {
        /// efivarfs is missing or read-only
        const EFIVAR_NOT_MOUNTED = 1 << 0;
        /// No ESP could be found
        const ESP_NOT_FOUND      = 1 << 1;
        /// Devices must not be offered for update
        const CLEAR_UPDATABLE    = 1 << 2;
        /// The user should be told about a platform problem
        const USER_WARNING       = 1 << 3;
    }
}

bitflags! {
    /// Caller options for [`CapsuleSession::update`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InstallFlags: u32 {
        /// Override safety checks such as a low flash budget
        const FORCE = 1 << 0;
    }
}

/// Report metadata key for NVRAM usage.
pub const REPORT_EFIVAR_NVRAM_USED: &str = "EfivarNvramUsed";
/// Report metadata key for the secure boot state.
pub const REPORT_SECURE_BOOT: &str = "SecureBoot";
/// Report metadata key for UX capsule support.
pub const REPORT_UX_CAPSULE: &str = "UEFIUXCapsule";
/// Report metadata key for the boot manager description quirk.
pub const REPORT_BOOT_MGR_DESC: &str = "BootMgrDesc";

/// Outcome of the secure boot security check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecureBootAttr {
    /// The platform has no secure boot support
    NotFound,
    /// Supported but switched off
    NotEnabled,
    /// Enabled
    Enabled,
}

/// One capsule update session.
#[derive(Debug)]
pub struct CapsuleSession<S> {
    paths: HostPaths,
    config: CapsuleConfig,
    efivars: S,
    platform: PlatformInfo,
    languages: Vec<String>,
    devices: DeviceTable,
    esp: Option<EspVolume>,
    bgrt: Option<Bgrt>,
    flags: SessionFlags,
    unavailable_reason: Option<String>,
    report: BTreeMap<String, String>,
}

impl CapsuleSession<Efivarfs> {
    /// A session over the real efivarfs found under `paths`.
    pub fn for_host(paths: HostPaths, config: CapsuleConfig) -> Self {
        let efivars = Efivarfs::new(paths.efivars());
        Self::new(paths, config, efivars)
    }
}

impl<S: EfivarStore> CapsuleSession<S> {
    /// Create a session; DMI data and languages come from the host.
    pub fn new(paths: HostPaths, config: CapsuleConfig, efivars: S) -> Self {
        let platform = PlatformInfo::load(&paths.dmi);
        Self {
            paths,
            config,
            efivars,
            platform,
            languages: splash::language_names(),
            devices: DeviceTable::new(),
            esp: None,
            bgrt: None,
            flags: SessionFlags::empty(),
            unavailable_reason: None,
            report: BTreeMap::new(),
        }
    }

    /// Replace the platform identification.
    #[must_use]
    pub fn with_platform(mut self, platform: PlatformInfo) -> Self {
        self.platform = platform;
        self
    }

    /// Replace the preferred splash languages.
    #[must_use]
    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }

    /// Host paths in use.
    pub fn paths(&self) -> &HostPaths {
        &self.paths
    }

    /// Configuration in use.
    pub fn config(&self) -> &CapsuleConfig {
        &self.config
    }

    /// The variable store.
    pub fn efivars(&self) -> &S {
        &self.efivars
    }

    /// Enumerated devices.
    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    /// Session condition flags.
    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    /// The ESP, once resolved.
    pub fn esp(&self) -> Option<&EspVolume> {
        self.esp.as_ref()
    }

    /// The BGRT, when the platform supports UX capsules.
    pub fn bgrt(&self) -> Option<&Bgrt> {
        self.bgrt.as_ref()
    }

    /// Diagnostic metadata for problem reports.
    pub fn report_metadata(&self) -> &BTreeMap<String, String> {
        &self.report
    }

    fn update_info(&self) -> UpdateInfoStore<&S> {
        UpdateInfoStore::new(
            &self.efivars,
            !self.flags.contains(SessionFlags::EFIVAR_NOT_MOUNTED),
        )
    }

    fn add_report(&mut self, key: &str, value: impl Into<String>) {
        self.report.insert(key.to_string(), value.into());
    }

    /// Decide whether capsule updates can work on this machine at all.
    pub fn startup(&mut self) -> Result<()> {
        if self.config.force_enable {
            debug!("UEFI support forced by configuration");
            return Ok(());
        }

        let uefi_mode = SmbiosTable::load(&self.paths.smbios_table()).and_then(|table| {
            smbios::check_uefi_mode(
                table
                    .find(smbios::TYPE_BIOS_INFORMATION)
                    .map(|s| s.data.as_slice()),
            )
        });
        if let Err(e) = uefi_mode {
            let efi_dir = self.paths.efi_dir();
            if efi_dir.exists() {
                warn!(
                    "SMBIOS BIOS Characteristics Extension Byte 2 is invalid -- \
                     UEFI Specification is unsupported, but {} exists: {e}",
                    efi_dir.display()
                );
                return Ok(());
            }
            return Err(e);
        }

        self.efivars.supported()?;
        let used = self.efivars.space_used()?;
        self.add_report(REPORT_EFIVAR_NVRAM_USED, format_size_long(used));

        if let Some(path) = self.config.override_esp_mount_point.clone() {
            let esp = EspVolume::for_path(&path).map_err(|e| {
                e.prefixed(format!(
                    "invalid OverrideESPMountPoint={} specified in config: ",
                    path.display()
                ))
            })?;
            self.esp = Some(esp);
        }
        Ok(())
    }

    fn mark_unavailable(&mut self, flag: SessionFlags, reason: String) {
        self.flags |= flag | SessionFlags::CLEAR_UPDATABLE | SessionFlags::USER_WARNING;
        self.unavailable_reason.get_or_insert(reason);
    }

    /// Enumerate the ESRT and build the device table.
    pub fn coldplug(&mut self) -> Result<()> {
        let entries = esrt::enumerate(&self.paths.esrt_entries())?;
        self.devices.clear();

        let mounts = MountTable::load(&self.paths.mount_table);
        let efivars_rw = mounts
            .as_ref()
            .map_err(|e| CapsuleError::not_found(e.to_string()))
            .and_then(|m| m.ensure_writable_mount(&self.paths.efivars()));
        if let Err(e) = efivars_rw {
            warn!("{e}");
            self.mark_unavailable(SessionFlags::EFIVAR_NOT_MOUNTED, e.to_string());
        }

        if self.esp.is_none() {
            let esp = mounts
                .as_ref()
                .map_err(|e| CapsuleError::not_found(e.to_string()))
                .and_then(|m| EspVolume::default_from_mounts(m, &self.paths.esp_candidates));
            match esp {
                Ok(esp) => self.esp = Some(esp),
                Err(e) => {
                    warn!("cannot find default ESP: {e}");
                    self.mark_unavailable(SessionFlags::ESP_NOT_FOUND, e.to_string());
                }
            }
        }

        for mut device in entries {
            self.coldplug_device(&mut device);
            device.flags |= DeviceFlags::UPDATABLE | DeviceFlags::USABLE_DURING_UPDATE;
            self.load_config(&mut device);
            if self.flags.contains(SessionFlags::CLEAR_UPDATABLE) {
                device.flags.remove(DeviceFlags::UPDATABLE);
                device.update_error.clone_from(&self.unavailable_reason);
            }
            debug!(id = %device.id, kind = %device.kind, "added device");
            self.devices.push(device);
        }
        self.pair_tpm_personalities()?;

        let secure_boot = match secure_boot_enabled(&self.efivars) {
            Ok(true) => "Enabled",
            _ => "Disabled",
        };
        self.add_report(REPORT_SECURE_BOOT, secure_boot);

        match Bgrt::load(&self.paths.bgrt()) {
            Ok(bgrt) => self.bgrt = Some(bgrt),
            Err(e) => debug!("BGRT setup failed: {e}"),
        }
        let ux = if self.bgrt.is_some() { "Enabled" } else { "Disabled" };
        debug!("UX Capsule support : {ux}");
        self.add_report(REPORT_UX_CAPSULE, ux);
        Ok(())
    }

    // Quirks, fallback names and vendor ids.
    fn coldplug_device(&mut self, device: &mut DeviceDescriptor) {
        device.flags |= DeviceFlags::INTERNAL | DeviceFlags::NEEDS_REBOOT;

        if device.custom_flags.is_empty() && self.platform.has_hwid(&HWID_LENOVO) {
            device
                .custom_flags
                .insert(FLAG_LEGACY_BOOTMGR_DESC.to_string());
            self.add_report(REPORT_BOOT_MGR_DESC, "legacy");
        }
        if self.config.disable_ux_capsule {
            device.custom_flags.insert(FLAG_NO_UX_CAPSULE.to_string());
        }

        if device.name.is_none() {
            // paired personalities share a kind, so the GUID tells them apart
            let name = device.kind.fallback_name().map(|name| {
                if device.kind.supports_unlock() {
                    format!("{name} {}", device.guid.hyphenated())
                } else {
                    name.to_string()
                }
            });
            device.name = name;
            if device.kind != DeviceKind::SystemFirmware {
                device.internal_flags |= InternalFlags::MD_SET_NAME_CATEGORY;
            }
        }
        if device.vendor.is_none() && device.kind == DeviceKind::SystemFirmware {
            device.vendor = self
                .platform
                .value(DmiKey::Manufacturer)
                .map(str::to_string);
        }
        if device.kind != DeviceKind::Fmp
            && let Some(bios_vendor) = self.platform.value(DmiKey::BiosVendor)
        {
            device.vendor_ids.push(format!("DMI:{bios_vendor}"));
        }
    }

    fn load_config(&self, device: &mut DeviceDescriptor) {
        let metadata = [
            (
                "RequireESPFreeSpace",
                self.config.require_esp_free_space.to_string(),
            ),
            (
                "RequireShimForSecureBoot",
                (!self.config.disable_shim_for_secure_boot).to_string(),
            ),
            (
                "FallbacktoRemovablePath",
                self.config.fallback_to_removable_path.to_string(),
            ),
        ];
        for (key, value) in metadata {
            device.metadata.insert(key.to_string(), value);
        }
    }

    // Two TPM personalities on one machine share a flash budget. The first
    // in ESRT order starts out active and the second locked, until the host
    // reports otherwise through `set_active_personality`.
    fn pair_tpm_personalities(&mut self) -> Result<()> {
        let tpms: Vec<DeviceHandle> = self
            .devices
            .iter()
            .filter(|(_, d)| d.kind.supports_unlock())
            .map(|(h, _)| h)
            .collect();
        if let [a, b] = tpms.as_slice() {
            self.pair_alternates(*a, *b)?;
        }
        Ok(())
    }

    /// Find a device by id or GUID.
    pub fn find_device(&self, query: &str) -> Result<DeviceHandle> {
        self.devices
            .find(query)
            .ok_or_else(|| CapsuleError::not_found(format!("no device matching {query}")))
    }

    /// A device by handle.
    pub fn device(&self, handle: DeviceHandle) -> Result<&DeviceDescriptor> {
        self.devices.device(handle)
    }

    /// Record the flash budget another source reported for a device.
    pub fn set_flashes_left(&mut self, handle: DeviceHandle, flashes_left: u32) -> Result<()> {
        self.devices.device_mut(handle)?.flashes_left = flashes_left;
        Ok(())
    }

    /// Pair two devices sharing one flash part; `a` stays active and `b` is locked.
    pub fn pair_alternates(&mut self, a: DeviceHandle, b: DeviceHandle) -> Result<()> {
        self.devices.link_alternates(a, b)?;
        budget::set_active(&mut self.devices, a)
    }

    /// Record which personality of a pair is live; its alternate is locked.
    pub fn set_active_personality(&mut self, handle: DeviceHandle) -> Result<()> {
        budget::set_active(&mut self.devices, handle)?;
        if !self.flags.contains(SessionFlags::CLEAR_UPDATABLE) {
            self.devices
                .device_mut(handle)?
                .flags
                .insert(DeviceFlags::UPDATABLE);
        }
        Ok(())
    }

    /// Stage `payload` for `handle`, to be applied on the next reboot.
    ///
    /// A UX capsule is staged first when possible; its failure is logged and
    /// never stops the firmware update. Returns the firmware capsule path.
    pub fn update(
        &mut self,
        handle: DeviceHandle,
        payload: &[u8],
        flags: InstallFlags,
    ) -> Result<PathBuf> {
        let device = self.devices.device(handle)?;
        if device.flags.contains(DeviceFlags::LOCKED) {
            return Err(CapsuleError::not_supported(format!(
                "{} is locked and must be unlocked before updating",
                device.display_name()
            )));
        }
        if !device.flags.contains(DeviceFlags::UPDATABLE) {
            return Err(CapsuleError::not_supported(match &device.update_error {
                Some(reason) => format!("{} is not updatable: {reason}", device.display_name()),
                None => format!("{} is not updatable", device.display_name()),
            }));
        }
        budget::check_flashes_left(device, flags.contains(InstallFlags::FORCE))?;

        if let Err(e) = self.update_splash(handle) {
            debug!("failed to upload UEFI UX capsule text: {e}");
        }
        self.write_firmware(handle, payload)
    }

    fn capsule_dir(&self) -> Result<(&EspVolume, PathBuf)> {
        let esp = self
            .esp
            .as_ref()
            .ok_or_else(|| CapsuleError::not_found("no ESP has been found"))?;
        let os = OsRelease::load(&self.paths.os_release);
        let dir = esp
            .os_dir(&os, self.config.fallback_to_removable_path)
            .join("fw");
        Ok((esp, dir))
    }

    fn write_firmware(&self, handle: DeviceHandle, payload: &[u8]) -> Result<PathBuf> {
        let device = self.devices.device(handle)?;
        let (esp, dir) = self.capsule_dir()?;
        let path = dir.join(capsule::capsule_file_name(&device.guid));
        let data = capsule::wrap_firmware_payload(payload, &device.guid, device.capsule_flags)?;
        write_capsule_file(&path, &data)?;
        self.update_info().write(
            device,
            &path,
            esp.mount_point(),
            &device.update_info_name(),
            &device.guid.hyphenated().to_string(),
        )?;
        info!(
            "staged {} for {} at {}",
            capsule::capsule_file_name(&device.guid),
            device.display_name(),
            path.display()
        );
        Ok(path)
    }

    /// Stage the boot splash capsule for `handle`.
    ///
    /// With the `no-ux-capsule` flag any previously staged splash record is
    /// removed instead.
    pub fn update_splash(&self, handle: DeviceHandle) -> Result<()> {
        let device = self.devices.device(handle)?;
        if device.has_custom_flag(FLAG_NO_UX_CAPSULE) {
            debug!("not providing UX capsule");
            return self.update_info().delete(UX_CAPSULE_VARIABLE);
        }

        let bgrt = self
            .bgrt
            .ok_or_else(|| CapsuleError::not_supported("BGRT is not supported"))?;
        let screen = display::framebuffer_size(&self.paths.framebuffer)?;
        let size = splash::select_splash_size(screen, &SPLASH_CATALOG)?;
        let image = SplashLocator::new(&self.paths.locale_dir, self.languages.clone()).load(size)?;
        self.write_splash_data(device, &image, screen, &bgrt)
    }

    fn write_splash_data(
        &self,
        device: &DeviceDescriptor,
        image: &[u8],
        screen: Resolution,
        bgrt: &Bgrt,
    ) -> Result<()> {
        let data = capsule::build_ux_capsule(image, screen, bgrt, guid::UX_CAPSULE_STR)?;
        let (esp, dir) = self.capsule_dir()?;
        let path = dir.join(capsule::capsule_file_name(&guid::UX_CAPSULE));
        write_capsule_file(&path, &data)?;
        self.update_info().write(
            device,
            &path,
            esp.mount_point(),
            UX_CAPSULE_VARIABLE,
            guid::UX_CAPSULE_STR,
        )?;
        Ok(())
    }

    /// Make `handle` the active personality of a paired device.
    pub fn unlock(&mut self, handle: DeviceHandle) -> Result<()> {
        budget::unlock(&mut self.devices, handle)
    }

    /// Decode the last attempt status of `handle` into its update state.
    pub fn get_results(&mut self, handle: DeviceHandle) -> Result<UpdateOutcome> {
        let device = self.devices.device_mut(handle)?;
        let (outcome, message) = status::decode(
            device.last_attempt_status,
            &device.last_attempt_version.to_string(),
        );
        device.update_state = Some(outcome);
        if message.is_some() {
            device.update_error = message;
        }
        Ok(outcome)
    }

    /// Reset the status of the update-info record of `handle`.
    pub fn clear_results(&self, handle: DeviceHandle) -> Result<()> {
        let device = self.devices.device(handle)?;
        self.update_info().clear_status(&device.update_info_name())
    }

    /// The secure boot security attribute.
    pub fn secure_boot_attr(&self) -> SecureBootAttr {
        match secure_boot_enabled(&self.efivars) {
            Ok(true) => SecureBootAttr::Enabled,
            Err(e) if e.kind() == ErrorKind::NotSupported => SecureBootAttr::NotFound,
            _ => SecureBootAttr::NotEnabled,
        }
    }
}

/// Format a byte count the way problem reports show it, e.g. `12.3 kB (12345 bytes)`.
pub fn format_size_long(bytes: u64) -> String {
    const UNITS: [(&str, u64); 6] = [
        ("EB", 1_000_000_000_000_000_000),
        ("PB", 1_000_000_000_000_000),
        ("TB", 1_000_000_000_000),
        ("GB", 1_000_000_000),
        ("MB", 1_000_000),
        ("kB", 1_000),
    ];
    match UNITS.iter().find(|(_, size)| bytes >= *size) {
        Some((unit, size)) => format!(
            "{:.1} {unit} ({bytes} bytes)",
            bytes as f64 / *size as f64
        ),
        None if bytes == 1 => "1 byte".to_string(),
        None => format!("{bytes} bytes"),
    }
}
