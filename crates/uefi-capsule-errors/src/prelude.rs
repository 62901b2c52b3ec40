//! Prelude module for convenient error handling imports.

pub use crate::{
    Result,
    common::{CapsuleError, ErrorKind, ResultExt},
};

/// Return early with a [`CapsuleError`] of the given kind.
///
/// # Example
///
/// ```
/// use uefi_capsule_errors::prelude::*;
/// use uefi_capsule_errors::bail_kind;
///
/// fn check(flashes_left: u32) -> Result<()> {
///     if flashes_left == 0 {
///         bail_kind!(NotSupported, "no flashes left");
///     }
///     Ok(())
/// }
///
/// assert!(check(0).is_err());
/// ```
#[macro_export]
macro_rules! bail_kind {
    ($kind:ident, $($arg:tt)+) => {
        return Err($crate::CapsuleError::$kind(format!($($arg)+)).into())
    };
}
