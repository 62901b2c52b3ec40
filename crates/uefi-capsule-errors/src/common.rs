//! The error enum, its classification and the prefix-context helpers.

use core::fmt;

/// Errors produced by capsule discovery, construction and staging.
#[derive(Debug, thiserror::Error)]
pub enum CapsuleError {
    /// Platform or feature not available
    #[error("{0}")]
    NotSupported(String),

    /// Missing directory, mount point or variable
    #[error("{0}")]
    NotFound(String),

    /// A file was readable but its contents are malformed
    #[error("{0}")]
    InvalidFile(String),

    /// An in-memory value could not be decoded
    #[error("{0}")]
    InvalidData(String),

    /// Filesystem or variable I/O failure
    #[error("{message}")]
    Io {
        /// Human readable description, usually including the path
        message: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Firmware-visible state that cannot be interpreted
    #[error("{0}")]
    Internal(String),
}

impl CapsuleError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CapsuleError::NotSupported(_) => ErrorKind::NotSupported,
            CapsuleError::NotFound(_) => ErrorKind::NotFound,
            CapsuleError::InvalidFile(_) => ErrorKind::InvalidFile,
            CapsuleError::InvalidData(_) => ErrorKind::InvalidData,
            CapsuleError::Io { .. } => ErrorKind::Io,
            CapsuleError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The message without any source chain.
    pub fn message(&self) -> &str {
        match self {
            CapsuleError::NotSupported(msg)
            | CapsuleError::NotFound(msg)
            | CapsuleError::InvalidFile(msg)
            | CapsuleError::InvalidData(msg)
            | CapsuleError::Internal(msg) => msg,
            CapsuleError::Io { message, .. } => message,
        }
    }

    /// Return the same error with `prefix` prepended to its message.
    #[must_use]
    pub fn prefixed(self, prefix: impl fmt::Display) -> Self {
        match self {
            CapsuleError::NotSupported(msg) => CapsuleError::NotSupported(format!("{prefix}{msg}")),
            CapsuleError::NotFound(msg) => CapsuleError::NotFound(format!("{prefix}{msg}")),
            CapsuleError::InvalidFile(msg) => CapsuleError::InvalidFile(format!("{prefix}{msg}")),
            CapsuleError::InvalidData(msg) => CapsuleError::InvalidData(format!("{prefix}{msg}")),
            CapsuleError::Internal(msg) => CapsuleError::Internal(format!("{prefix}{msg}")),
            CapsuleError::Io { message, source } => CapsuleError::Io {
                message: format!("{prefix}{message}"),
                source,
            },
        }
    }

    /// Create a not-supported error.
    pub fn not_supported(msg: impl Into<String>) -> Self {
        CapsuleError::NotSupported(msg.into())
    }

    /// Create a not-found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        CapsuleError::NotFound(msg.into())
    }

    /// Create an invalid-file error.
    pub fn invalid_file(msg: impl Into<String>) -> Self {
        CapsuleError::InvalidFile(msg.into())
    }

    /// Create an invalid-data error.
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        CapsuleError::InvalidData(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        CapsuleError::Internal(msg.into())
    }

    /// Wrap an I/O error with a description of what was being accessed.
    ///
    /// A `NotFound` I/O error becomes [`CapsuleError::NotFound`] so callers
    /// can match on the kind without digging into the source.
    pub fn io(what: impl fmt::Display, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return CapsuleError::NotFound(format!("{what}: {source}"));
        }
        CapsuleError::Io {
            message: format!("{what}: {source}"),
            source,
        }
    }
}

impl From<std::io::Error> for CapsuleError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            return CapsuleError::NotFound(e.to_string());
        }
        CapsuleError::Io {
            message: e.to_string(),
            source: e,
        }
    }
}

/// Error classification used for reporting and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    /// Platform or feature not available
    NotSupported = 1,
    /// Missing resource
    NotFound = 2,
    /// Malformed file contents
    InvalidFile = 3,
    /// Malformed in-memory data
    InvalidData = 4,
    /// I/O failure
    Io = 5,
    /// Uninterpretable firmware state
    Internal = 6,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NotSupported => write!(f, "not-supported"),
            ErrorKind::NotFound => write!(f, "not-found"),
            ErrorKind::InvalidFile => write!(f, "invalid-file"),
            ErrorKind::InvalidData => write!(f, "invalid-data"),
            ErrorKind::Io => write!(f, "io"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Extension trait for prefixing the message of a failed `Result`.
pub trait ResultExt<T> {
    /// Prepend `prefix` to the error message, keeping the error kind.
    fn prefix_err(self, prefix: impl fmt::Display) -> Result<T, CapsuleError>;
}

impl<T, E: Into<CapsuleError>> ResultExt<T> for std::result::Result<T, E> {
    fn prefix_err(self, prefix: impl fmt::Display) -> Result<T, CapsuleError> {
        self.map_err(|e| e.into().prefixed(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::NotSupported.to_string(), "not-supported");
        assert_eq!(ErrorKind::InvalidFile.to_string(), "invalid-file");
        assert_eq!(ErrorKind::Io.to_string(), "io");
    }

    #[test]
    fn test_prefixed_keeps_kind() {
        let err = CapsuleError::not_supported("BGRT is not supported").prefixed("splash: ");
        assert_eq!(err.kind(), ErrorKind::NotSupported);
        assert_eq!(err.to_string(), "splash: BGRT is not supported");
    }

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = CapsuleError::io("/sys/firmware/efi/esrt", source);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().starts_with("/sys/firmware/efi/esrt"));
    }

    #[test]
    fn test_io_keeps_source() {
        let source = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = CapsuleError::io("capsule", source);
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_result_ext_prefix() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::other("boom"));
        let err = result.prefix_err("failed to decompress file: ");
        assert!(matches!(err, Err(CapsuleError::Io { .. })));
        assert!(
            err.map_err(|e| e.to_string())
                .is_err_and(|msg| msg == "failed to decompress file: boom")
        );
    }
}
