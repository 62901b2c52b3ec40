//! Convenience re-exports for common test utilities.
//!
//! ```rust,ignore
//! use uefi_capsule_test_helpers::prelude::*;
//! ```

pub use crate::must::{must, must_err, must_some};

pub use crate::fixtures::{BgrtFixture, EsrtEntryFixture, FakeFirmwareTree, bmp, gzip};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;
