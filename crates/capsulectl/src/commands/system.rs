//! Platform diagnostics

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use uefi_capsule::prelude::*;

use crate::commands::Context;
use crate::output;

/// Session-wide diagnostics.
#[derive(Debug, Serialize)]
pub struct Report {
    /// Report metadata emitted during startup and coldplug
    pub metadata: BTreeMap<String, String>,
    /// Secure boot security attribute
    pub secure_boot: SecureBootAttr,
    /// Conditions found while setting up
    pub flags: SessionFlags,
    /// ESP mount point, when one was found
    pub esp: Option<PathBuf>,
    /// Boot logo placement, when UX capsules are supported
    pub bgrt: Option<Bgrt>,
    /// Number of enumerated devices
    pub devices: usize,
}

/// Print the diagnostic report.
pub fn report(ctx: &Context) -> Result<()> {
    let session = ctx.open_session()?;
    let report = Report {
        metadata: session.report_metadata().clone(),
        secure_boot: session.secure_boot_attr(),
        flags: session.flags(),
        esp: session.esp().map(|esp| esp.mount_point().to_path_buf()),
        bgrt: session.bgrt().copied(),
        devices: session.devices().len(),
    };
    output::print_report(&report, ctx.json);
    Ok(())
}

/// Print the splash size chosen for a `width` x `height` screen.
pub fn select_splash(width: u32, height: u32, json: bool) -> Result<()> {
    let screen = Resolution::new(width, height);
    let size = select_splash_size(screen, &SPLASH_CATALOG)?;
    output::print_splash_size(screen, size, json);
    Ok(())
}
