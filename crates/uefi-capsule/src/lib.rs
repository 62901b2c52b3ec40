//! Host-side UEFI capsule updates
//!
//! Platform firmware applies capsule updates on the next boot; this crate
//! does everything that has to happen before that reboot:
//!
//! - [`esrt`]: enumerate updatable firmware from the EFI System Resource Table
//! - [`capsule`]: build capsule binaries and stage them on the ESP
//! - [`splash`] and [`display`]: pick and place a boot splash for the UX capsule
//! - [`update_info`]: tell the boot loader where staged capsules are
//! - [`status`]: decode the result firmware reports after the reboot
//! - [`budget`]: guard devices with a limited number of flash cycles
//! - [`session`]: the host-facing [`CapsuleSession`] tying it together
//!
//! # Example
//!
//! ```no_run
//! use uefi_capsule::prelude::*;
//!
//! # fn example(payload: &[u8]) -> Result<()> {
//! let mut session = CapsuleSession::for_host(HostPaths::default(), CapsuleConfig::default());
//! session.startup()?;
//! session.coldplug()?;
//!
//! let handle = session.find_device("ddc0ee61-e7f0-4e7d-acc5-c070a398838e")?;
//! let staged = session.update(handle, payload, InstallFlags::empty())?;
//! println!("capsule staged at {}", staged.display());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod bitmap;
pub mod budget;
pub mod capsule;
pub mod checksum;
pub mod config;
pub mod device;
pub mod display;
pub mod esp;
pub mod esrt;
pub mod paths;
pub mod platform;
pub mod prelude;
pub mod session;
pub mod smbios;
pub mod splash;
pub mod status;
pub mod sysfs;
pub mod update_info;

pub use capsule::{CapsuleFlags, CapsuleHeader, UxCapsuleHeader};
pub use config::CapsuleConfig;
pub use device::{DeviceDescriptor, DeviceFlags, DeviceHandle, DeviceKind, DeviceTable};
pub use display::{Bgrt, Resolution};
pub use paths::HostPaths;
pub use session::{CapsuleSession, InstallFlags, SecureBootAttr, SessionFlags};
pub use status::{UefiDeviceStatus, UpdateOutcome};
pub use uefi_capsule_errors::{CapsuleError, ErrorKind, Result};
