//! Convenience re-exports for hosts driving a capsule session

pub use crate::capsule::{
    CapsuleFlags, CapsuleHeader, UxCapsuleHeader, build_ux_capsule, wrap_firmware_payload,
};
pub use crate::config::CapsuleConfig;
pub use crate::device::{DeviceDescriptor, DeviceFlags, DeviceHandle, DeviceKind, DeviceTable};
pub use crate::display::{Bgrt, Resolution};
pub use crate::paths::HostPaths;
pub use crate::session::{CapsuleSession, InstallFlags, SecureBootAttr, SessionFlags};
pub use crate::splash::{SPLASH_CATALOG, select_splash_size};
pub use crate::status::{UefiDeviceStatus, UpdateOutcome, decode};
pub use uefi_capsule_efivar::{EfivarStore, Efivarfs, MemoryEfivars};
pub use uefi_capsule_errors::{CapsuleError, ErrorKind, Result, ResultExt};
