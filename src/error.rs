//! Error types for the Prism conformance harness

use thiserror::Error;

/// Main error type for Prism
#[derive(Error, Debug)]
pub enum Error {
    /// Usage error - malformed parameter spec, unbound dimension, missing
    /// blend constant, duplicate dimension binding. These indicate a bug in
    /// the construction of a test, not in the device under test.
    #[error("UsageError: {message}")]
    Usage { message: String },

    /// Device operation failure - resource creation rejected, copy out of
    /// bounds, invalid object handle. Fatal to the current case only.
    #[error("DeviceError: {message}")]
    Device { message: String },

    /// Internal harness error
    #[error("InternalError: {0}")]
    Internal(String),

    /// IO error (CLI layer)
    #[error("IOError: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// Create a new usage error
    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage {
            message: message.into(),
        }
    }

    /// Create a new device error
    pub fn device(message: impl Into<String>) -> Self {
        Error::Device {
            message: message.into(),
        }
    }

    /// True if this error came from test construction rather than execution.
    pub fn is_usage(&self) -> bool {
        matches!(self, Error::Usage { .. })
    }
}

/// Result type alias for Prism
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_error_display() {
        let err = Error::usage("dimension 'topology' is not bound");
        assert_eq!(
            err.to_string(),
            "UsageError: dimension 'topology' is not bound"
        );
        assert!(err.is_usage());
    }

    #[test]
    fn test_device_error_display() {
        let err = Error::device("buffer size exceeds limit");
        assert_eq!(err.to_string(), "DeviceError: buffer size exceeds limit");
        assert!(!err.is_usage());
    }
}
