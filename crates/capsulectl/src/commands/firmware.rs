//! Firmware staging and update results
//!
//! - `update <device> <file>` - stage a capsule for the next reboot
//! - `get-results <device>` - decode the last attempt status
//! - `clear-results <device>` - reset the stored status

use std::fs;
use std::path::Path;

use anyhow::Result;
use tracing::info;
use uefi_capsule::prelude::*;

use crate::commands::{Context, find_device};
use crate::error::CliError;
use crate::output;

/// Stage `file` for `device`.
pub fn update(
    ctx: &Context,
    device: &str,
    file: &Path,
    force: bool,
    flashes_left: Option<u32>,
) -> Result<()> {
    let payload = fs::read(file).map_err(|source| CliError::ReadPayload {
        path: file.to_path_buf(),
        source,
    })?;
    if payload.is_empty() {
        return Err(CliError::InvalidArgument(format!("{} is empty", file.display())).into());
    }

    let mut session = ctx.open_session()?;
    let handle = find_device(&session, device)?;
    if let Some(flashes_left) = flashes_left {
        session.set_flashes_left(handle, flashes_left)?;
    }

    let flags = if force {
        InstallFlags::FORCE
    } else {
        InstallFlags::empty()
    };
    info!(size = payload.len(), "staging {}", file.display());
    let staged = session.update(handle, &payload, flags)?;
    output::print_update_staged(session.device(handle)?, &staged, ctx.json);
    Ok(())
}

/// Report the outcome of the last attempt for `device`.
pub fn get_results(ctx: &Context, device: &str) -> Result<()> {
    let mut session = ctx.open_session()?;
    let handle = find_device(&session, device)?;
    let outcome = session.get_results(handle)?;
    output::print_results(session.device(handle)?, outcome, ctx.json);
    Ok(())
}

/// Clear the stored status for `device`.
pub fn clear_results(ctx: &Context, device: &str) -> Result<()> {
    let session = ctx.open_session()?;
    let handle = find_device(&session, device)?;
    session.clear_results(handle)?;
    output::print_cleared(session.device(handle)?, ctx.json);
    Ok(())
}
