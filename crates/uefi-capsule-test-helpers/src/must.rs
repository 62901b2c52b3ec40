//! Unwrap helpers with good error messages.
//!
//! These helpers replace `unwrap()` and `expect()` in test code, providing
//! better error messages with `#[track_caller]` for accurate panic locations.

use std::fmt::Debug;

/// Unwrap a `Result`, panicking with context on error.
///
/// # Example
///
/// ```rust
/// use uefi_capsule_test_helpers::must;
///
/// let result: Result<i32, &str> = Ok(42);
/// let value = must(result);
/// assert_eq!(value, 42);
/// ```
///
/// # Panics
///
/// Panics if the result is `Err`, with a message including the error value.
#[track_caller]
pub fn must<T, E: Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("must: unexpected Err: {e:?}"),
    }
}

/// Unwrap an `Option`, panicking with a custom message if `None`.
///
/// # Example
///
/// ```rust
/// use uefi_capsule_test_helpers::must_some;
///
/// let option = Some(42);
/// let value = must_some(option, "expected a value");
/// assert_eq!(value, 42);
/// ```
///
/// # Panics
///
/// Panics if the option is `None`, with the provided message.
#[track_caller]
pub fn must_some<T>(option: Option<T>, msg: &str) -> T {
    match option {
        Some(v) => v,
        None => panic!("must_some: {msg}"),
    }
}

/// Unwrap the error of a `Result` that is expected to fail.
///
/// # Panics
///
/// Panics if the result is `Ok`.
#[track_caller]
pub fn must_err<T: Debug, E>(result: Result<T, E>) -> E {
    match result {
        Ok(v) => panic!("must_err: unexpected Ok: {v:?}"),
        Err(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_must_ok() {
        let result: Result<i32, &str> = Ok(42);
        assert_eq!(must(result), 42);
    }

    #[test]
    #[should_panic(expected = "must: unexpected Err")]
    fn test_must_err_panics() {
        let result: Result<i32, &str> = Err("test error");
        let _ = must(result);
    }

    #[test]
    fn test_must_some_present() {
        assert_eq!(must_some(Some(42), "expected value"), 42);
    }

    #[test]
    #[should_panic(expected = "must_some: expected value")]
    fn test_must_some_none() {
        let option: Option<i32> = None;
        let _ = must_some(option, "expected value");
    }

    #[test]
    fn test_must_err_returns_error() {
        let result: Result<i32, &str> = Err("boom");
        assert_eq!(must_err(result), "boom");
    }

    #[test]
    #[should_panic(expected = "must_err: unexpected Ok")]
    fn test_must_err_on_ok() {
        let result: Result<i32, &str> = Ok(1);
        let _ = must_err(result);
    }
}
