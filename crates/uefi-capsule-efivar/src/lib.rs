//! UEFI NVRAM variable access for the capsule updater
//!
//! The capsule updater tells firmware about staged capsules through NVRAM
//! variables. This crate provides:
//!
//! - [`EfivarStore`]: the variable-store seam used by the core
//! - [`Efivarfs`]: the Linux `efivarfs` backend
//! - [`MemoryEfivars`]: an in-memory backend for tests and dry runs
//! - [`guid`]: well-known namespace GUIDs and the mixed-endian GUID codec
//! - [`mounts`]: mount-table parsing used for writability checks
//!
//! All stores are assumed atomic at the granularity of a single variable.

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod efivarfs;
pub mod guid;
pub mod memory;
pub mod mounts;
pub mod store;

pub use efivarfs::{DEFAULT_EFIVARS_DIR, Efivarfs};
pub use memory::MemoryEfivars;
pub use mounts::{DEFAULT_MOUNT_TABLE, MountEntry, MountTable};
pub use store::{EfivarStore, Variable, VariableAttributes, secure_boot_enabled};
