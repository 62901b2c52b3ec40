//! Error types for capsulectl CLI

use std::path::PathBuf;

use thiserror::Error;
use uefi_capsule::{CapsuleError, ErrorKind};

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to read {}: {source}", path.display())]
    ReadPayload {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Process exit code for a failed command.
///
/// Library errors map by kind so scripts can tell a missing device from an
/// unsupported platform without parsing messages.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(cli) = err.downcast_ref::<CliError>() {
        return match cli {
            CliError::DeviceNotFound(_) => 2,
            CliError::InvalidArgument(_) => 4,
            CliError::ReadPayload { .. } => 5,
        };
    }
    match err.downcast_ref::<CapsuleError>().map(CapsuleError::kind) {
        Some(ErrorKind::NotFound) => 2,
        Some(ErrorKind::NotSupported) => 3,
        Some(ErrorKind::InvalidFile | ErrorKind::InvalidData) => 4,
        Some(ErrorKind::Io) => 5,
        Some(ErrorKind::Internal) => 6,
        None => 1,
    }
}

/// Short machine-readable name for an error.
pub fn error_type_name(err: &anyhow::Error) -> String {
    if let Some(cli) = err.downcast_ref::<CliError>() {
        return match cli {
            CliError::DeviceNotFound(_) => "device-not-found",
            CliError::InvalidArgument(_) => "invalid-argument",
            CliError::ReadPayload { .. } => "io",
        }
        .to_string();
    }
    match err.downcast_ref::<CapsuleError>() {
        Some(e) => e.kind().to_string(),
        None => "unknown".to_string(),
    }
}
