//! Error handling for ampconv
//!
//! Build-time errors are raised on the background worker and reported to the
//! configuration layer. The audio path never sees them; it only ever chooses
//! between a usable convolution state and bypass.

use thiserror::Error;

/// Result type alias for ampconv operations
pub type Result<T> = std::result::Result<T, ConvolverError>;

/// Main error type for ampconv operations
#[derive(Error, Debug)]
pub enum ConvolverError {
    // Impulse Response Errors
    #[error("Impulse response unreadable: {path}: {reason}")]
    FileUnreadable {
        path: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unsupported impulse response format: {format}")]
    UnsupportedFormat { format: String },

    // Configuration Errors
    #[error("Invalid sample rate {rate} Hz ({context})")]
    InvalidSampleRate { rate: u32, context: String },

    #[error("Invalid block size {size} (expected 1..={max})")]
    InvalidBlockSize { size: usize, max: usize },

    #[error("Invalid parameter '{param}': {value} (expected {expected})")]
    InvalidParameter {
        param: String,
        value: String,
        expected: String,
    },

    // Processing Errors
    #[error("Convolution build failed: {reason}")]
    BuildFailed { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification of a [`ConvolverError`]
///
/// Unlike the error itself this is `Copy`, so it can travel inside build
/// notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    FileUnreadable,
    InvalidSampleRate,
    InvalidBlockSize,
    BuildFailed,
    Configuration,
    Io,
}

impl ConvolverError {
    /// Shorthand for a generic build failure
    pub fn build_failed(reason: impl Into<String>) -> Self {
        ConvolverError::BuildFailed {
            reason: reason.into(),
        }
    }

    /// Get the classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvolverError::FileUnreadable { .. } | ConvolverError::UnsupportedFormat { .. } => {
                ErrorKind::FileUnreadable
            }
            ConvolverError::InvalidSampleRate { .. } => ErrorKind::InvalidSampleRate,
            ConvolverError::InvalidBlockSize { .. } => ErrorKind::InvalidBlockSize,
            ConvolverError::BuildFailed { .. } => ErrorKind::BuildFailed,
            ConvolverError::InvalidParameter { .. } | ConvolverError::Serialization(_) => {
                ErrorKind::Configuration
            }
            ConvolverError::Io(_) => ErrorKind::Io,
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            ConvolverError::FileUnreadable { .. } => "FILE_UNREADABLE",
            ConvolverError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            ConvolverError::InvalidSampleRate { .. } => "INVALID_SAMPLE_RATE",
            ConvolverError::InvalidBlockSize { .. } => "INVALID_BLOCK_SIZE",
            ConvolverError::InvalidParameter { .. } => "INVALID_PARAMETER",
            ConvolverError::BuildFailed { .. } => "BUILD_FAILED",
            ConvolverError::Io(_) => "IO_ERROR",
            ConvolverError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if the user can fix this error by changing the configuration
    ///
    /// The core never retries on its own; a retry is a fresh `start()`.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConvolverError::FileUnreadable { .. }
                | ConvolverError::UnsupportedFormat { .. }
                | ConvolverError::InvalidSampleRate { .. }
                | ConvolverError::InvalidBlockSize { .. }
                | ConvolverError::InvalidParameter { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            ConvolverError::FileUnreadable { .. } => vec![
                "Check the impulse response path is correct",
                "Verify the file is a readable WAV file",
                "Pick another entry from the favorites list",
            ],
            ConvolverError::UnsupportedFormat { .. } => vec![
                "Convert the impulse response to 16/24/32-bit PCM or 32-bit float WAV",
            ],
            ConvolverError::InvalidSampleRate { .. } => {
                vec!["Use a sample rate greater than zero"]
            }
            ConvolverError::InvalidBlockSize { .. } => vec![
                "Use a host buffer size between 1 and the configured maximum",
            ],
            ConvolverError::BuildFailed { .. } => vec![
                "Check offset and length select a non-empty part of the impulse response",
                "Make sure the impulse response contains no NaN/Inf samples",
            ],
            _ => vec![],
        }
    }
}
