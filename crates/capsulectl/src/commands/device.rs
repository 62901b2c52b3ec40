//! Device listing and the paired-device unlock

use anyhow::Result;

use crate::commands::{Context, find_device};
use crate::output;

/// List enumerated devices.
pub fn list(ctx: &Context, detailed: bool) -> Result<()> {
    let session = ctx.open_session()?;
    output::print_device_list(session.devices(), ctx.json, detailed);
    Ok(())
}

/// Unlock `device`, spending the flash budget shared with its alternate.
pub fn unlock(
    ctx: &Context,
    device: &str,
    flashes_left: u32,
    alternate_flashes_left: u32,
) -> Result<()> {
    let mut session = ctx.open_session()?;
    let handle = find_device(&session, device)?;
    session.set_flashes_left(handle, flashes_left)?;
    if let Some(alternate) = session.device(handle)?.alternate {
        session.set_flashes_left(alternate, alternate_flashes_left)?;
    }

    session.unlock(handle)?;
    output::print_unlocked(session.device(handle)?, ctx.json);
    Ok(())
}
