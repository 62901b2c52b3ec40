//! Last-attempt status codes and their decoding into update outcomes.

use std::fmt;

use serde::Serialize;

/// Raw `last_attempt_status` values defined by UEFI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UefiDeviceStatus {
    /// The update succeeded
    Success,
    /// Generic failure
    ErrorUnsuccessful,
    /// Firmware ran out of resources
    ErrorInsufficientResources,
    /// Version was rejected
    ErrorIncorrectVersion,
    /// Image was rejected
    ErrorInvalidFormat,
    /// Image signature was rejected
    ErrorAuthError,
    /// AC power was removed during the update
    ErrorPowerEventAc,
    /// Battery was too low for the update
    ErrorPowerEventBattery,
    /// Any other value
    Unknown(u32),
}

impl UefiDeviceStatus {
    /// Map a raw status.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Success,
            1 => Self::ErrorUnsuccessful,
            2 => Self::ErrorInsufficientResources,
            3 => Self::ErrorIncorrectVersion,
            4 => Self::ErrorInvalidFormat,
            5 => Self::ErrorAuthError,
            6 => Self::ErrorPowerEventAc,
            7 => Self::ErrorPowerEventBattery,
            other => Self::Unknown(other),
        }
    }

    /// The raw status value.
    pub fn raw(&self) -> u32 {
        match self {
            Self::Success => 0,
            Self::ErrorUnsuccessful => 1,
            Self::ErrorInsufficientResources => 2,
            Self::ErrorIncorrectVersion => 3,
            Self::ErrorInvalidFormat => 4,
            Self::ErrorAuthError => 5,
            Self::ErrorPowerEventAc => 6,
            Self::ErrorPowerEventBattery => 7,
            Self::Unknown(raw) => *raw,
        }
    }

    /// Human readable name, if the code is known.
    pub fn name(&self) -> Option<&'static str> {
        match self {
            Self::Success => Some("success"),
            Self::ErrorUnsuccessful => Some("unsuccessful"),
            Self::ErrorInsufficientResources => Some("insufficient resources"),
            Self::ErrorIncorrectVersion => Some("incorrect version"),
            Self::ErrorInvalidFormat => Some("invalid firmware format"),
            Self::ErrorAuthError => Some("authentication signing error"),
            Self::ErrorPowerEventAc => Some("AC power required"),
            Self::ErrorPowerEventBattery => Some("battery level is too low"),
            Self::Unknown(_) => None,
        }
    }
}

impl fmt::Display for UefiDeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "unknown status {}", self.raw()),
        }
    }
}

/// What the host should make of a finished update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateOutcome {
    /// The update was applied
    Success,
    /// The update failed
    Failed,
    /// The update failed for a reason that may go away, so a retry is allowed
    FailedTransient,
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::FailedTransient => "failed-transient",
        })
    }
}

/// Decode a raw status for an attempt at `version`.
pub fn decode(raw_status: u32, version: &str) -> (UpdateOutcome, Option<String>) {
    let status = UefiDeviceStatus::from_raw(raw_status);
    let outcome = match status {
        UefiDeviceStatus::Success => return (UpdateOutcome::Success, None),
        UefiDeviceStatus::ErrorPowerEventAc | UefiDeviceStatus::ErrorPowerEventBattery => {
            UpdateOutcome::FailedTransient
        }
        UefiDeviceStatus::ErrorUnsuccessful
        | UefiDeviceStatus::ErrorInsufficientResources
        | UefiDeviceStatus::ErrorIncorrectVersion
        | UefiDeviceStatus::ErrorInvalidFormat
        | UefiDeviceStatus::ErrorAuthError
        | UefiDeviceStatus::Unknown(_) => UpdateOutcome::Failed,
    };
    let message = match status.name() {
        Some(name) => format!("failed to update to {version}: {name}"),
        None => format!("failed to update to {version}"),
    };
    (outcome, Some(message))
}
