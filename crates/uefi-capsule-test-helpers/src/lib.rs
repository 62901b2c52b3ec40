//! Shared test utilities for the UEFI capsule crates.
//!
//! # Modules
//!
//! - [`mod@must`] - Unwrap helpers with good error messages and `#[track_caller]`
//! - [`fixtures`] - Fake sysfs/ESP trees and BMP/SMBIOS fixtures
//! - [`prelude`] - Convenience re-exports
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! uefi-capsule-test-helpers = { workspace = true }
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::unwrap_used, clippy::panic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod fixtures;
pub mod must;
pub mod prelude;

pub use must::*;
