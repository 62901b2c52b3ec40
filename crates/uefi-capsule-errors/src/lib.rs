//! Error types for the UEFI capsule update crates
//!
//! Every fallible operation in the workspace returns a [`CapsuleError`]. The
//! variants mirror the failure classes the host daemon distinguishes:
//!
//! - `NotSupported`: the platform or feature is absent (no UEFI mode, no BGRT,
//!   flash budget exhausted, read-only variable store)
//! - `NotFound`: a directory, mount point or variable is missing
//! - `InvalidFile` / `InvalidData`: malformed bitmap, GUID string or platform
//!   identification buffer
//! - `Io`: filesystem or variable I/O failure
//! - `Internal`: firmware-visible state that cannot be interpreted
//!
//! # Example
//!
//! ```
//! use uefi_capsule_errors::prelude::*;
//!
//! fn read_budget(raw: Option<u32>) -> Result<u32> {
//!     raw.ok_or_else(|| CapsuleError::not_found("flashes-left"))
//!         .prefix_err("failed to read budget: ")
//! }
//!
//! let err = read_budget(None).unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::NotFound);
//! assert_eq!(err.message(), "failed to read budget: flashes-left");
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod common;
pub mod prelude;

pub use common::{CapsuleError, ErrorKind, ResultExt};

/// A specialized `Result` type for capsule update operations.
pub type Result<T> = std::result::Result<T, CapsuleError>;
