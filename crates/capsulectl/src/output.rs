//! Output formatting for CLI responses

use std::path::Path;

use anyhow::Error;
use colored::*;
use serde_json::{Value, json};
use uefi_capsule::prelude::*;

use crate::commands::system::Report;
use crate::error::error_type_name;

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Failed to format output as JSON: {e}"),
    }
}

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    print_json(&json!({
        "success": false,
        "error": {
            "message": error.to_string(),
            "type": error_type_name(error)
        }
    }));
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    // Print error chain if available
    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

/// Print device list in specified format
pub fn print_device_list(devices: &DeviceTable, json: bool, detailed: bool) {
    if json {
        let devices: Vec<&DeviceDescriptor> = devices.iter().map(|(_, d)| d).collect();
        print_json(&json!({
            "success": true,
            "devices": devices
        }));
        return;
    }

    if devices.is_empty() {
        println!("{}", "No devices found".yellow());
        return;
    }

    println!("{}", "UEFI Devices:".bold());
    for (_, device) in devices.iter() {
        print_device_human(device, detailed);
    }
}

fn print_device_human(device: &DeviceDescriptor, detailed: bool) {
    let marker = if device.flags.contains(DeviceFlags::UPDATABLE) {
        "●".green()
    } else {
        "●".red()
    };
    println!(
        "  {} {} {} ({})",
        marker,
        device.display_name().bold(),
        device.version,
        device.id.dimmed()
    );
    if let Some(reason) = &device.update_error
        && !device.flags.contains(DeviceFlags::UPDATABLE)
    {
        println!("    {} {}", "Not updatable:".yellow(), reason);
    }

    if detailed {
        println!("    Kind: {}", device.kind);
        println!("    GUID: {}", device.guid.hyphenated());
        if let Some(vendor) = &device.vendor {
            println!("    Vendor: {vendor}");
        }
        if !device.vendor_ids.is_empty() {
            println!("    Vendor IDs: {}", device.vendor_ids.join(", "));
        }
        println!("    Lowest Supported: {}", device.version_lowest);
        println!("    Capsule Flags: 0x{:08x}", device.capsule_flags.bits());
        println!("    Flags: {}", format_flags(device.flags));
        println!(
            "    Last Attempt: version {} status {}",
            device.last_attempt_version,
            UefiDeviceStatus::from_raw(device.last_attempt_status)
        );
        if !device.custom_flags.is_empty() {
            let custom: Vec<&str> = device.custom_flags.iter().map(String::as_str).collect();
            println!("    Custom Flags: {}", custom.join(", "));
        }
        for (key, value) in &device.metadata {
            println!("    {key}: {value}");
        }
    }
}

/// Format device flags as a string
fn format_flags(flags: DeviceFlags) -> String {
    let names: Vec<&str> = flags
        .iter_names()
        .map(|(name, _)| match name {
            "UPDATABLE" => "updatable",
            "USABLE_DURING_UPDATE" => "usable-during-update",
            "NEEDS_REBOOT" => "needs-reboot",
            "INTERNAL" => "internal",
            "LOCKED" => "locked",
            other => other,
        })
        .collect();
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

/// Print the location of a staged capsule
pub fn print_update_staged(device: &DeviceDescriptor, staged: &Path, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "device": device.id,
            "capsule": staged,
            "needs_reboot": true
        }));
    } else {
        println!(
            "{} Staged update for {}",
            "✓".green(),
            device.display_name().bold()
        );
        println!("  Capsule: {}", staged.display());
        println!("  {}", "Reboot to apply the update".yellow());
    }
}

/// Print a device after unlocking it
pub fn print_unlocked(device: &DeviceDescriptor, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "device": device
        }));
    } else {
        println!(
            "{} Unlocked {} ({})",
            "✓".green(),
            device.display_name().bold(),
            device.id.dimmed()
        );
        println!("  Flags: {}", format_flags(device.flags));
    }
}

/// Print the decoded result of the last update attempt
pub fn print_results(device: &DeviceDescriptor, outcome: UpdateOutcome, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "device": device.id,
            "update_state": outcome,
            "update_error": device.update_error,
            "last_attempt_version": device.last_attempt_version,
            "last_attempt_status": device.last_attempt_status
        }));
        return;
    }

    let state = match outcome {
        UpdateOutcome::Success => outcome.to_string().green(),
        UpdateOutcome::Failed => outcome.to_string().red(),
        UpdateOutcome::FailedTransient => outcome.to_string().yellow(),
    };
    println!("{} {}", device.display_name().bold(), state);
    if let Some(message) = &device.update_error {
        println!("  {message}");
    }
}

/// Print confirmation that stored results were cleared
pub fn print_cleared(device: &DeviceDescriptor, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "device": device.id
        }));
    } else {
        println!(
            "{} Cleared results for {}",
            "✓".green(),
            device.display_name().bold()
        );
    }
}

/// Print the diagnostic report
pub fn print_report(report: &Report, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "report": report
        }));
        return;
    }

    println!("{}", "UEFI Capsule Report:".bold());
    for (key, value) in &report.metadata {
        println!("  {key}: {value}");
    }
    let secure_boot = match report.secure_boot {
        SecureBootAttr::Enabled => "enabled".green(),
        SecureBootAttr::NotEnabled => "not enabled".yellow(),
        SecureBootAttr::NotFound => "not found".red(),
    };
    println!("  Secure Boot: {secure_boot}");
    match &report.esp {
        Some(esp) => println!("  ESP: {}", esp.display()),
        None => println!("  ESP: {}", "not found".red()),
    }
    if let Some(bgrt) = &report.bgrt {
        println!(
            "  Boot Logo: {}x{} at ({}, {})",
            bgrt.width, bgrt.height, bgrt.x_offset, bgrt.y_offset
        );
    }
    println!("  Devices: {}", report.devices);
    if report.flags.contains(SessionFlags::USER_WARNING) {
        println!(
            "  {}",
            "Capsule updates are unavailable on this system".yellow()
        );
    }
}

/// Print the splash image chosen for a screen
pub fn print_splash_size(screen: Resolution, size: Resolution, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "screen": screen,
            "splash": size
        }));
    } else {
        println!("{size}");
    }
}
