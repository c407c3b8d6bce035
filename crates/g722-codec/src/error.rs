//! Error handling for the codec library.
//!
//! Every failure is a returned value; there is no unwinding path through the
//! signal processing. Numerical saturation is part of the arithmetic
//! contract and never reported here. Packet loss is an input signal, not an
//! error.

#![allow(missing_docs)]

use thiserror::Error;

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Error type for codec operations.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Unknown operating mode index.
    #[error("Unsupported mode index: {index} (supported: 0..=5)")]
    UnsupportedMode { index: u8 },

    /// Invalid input sampling rate.
    #[error("Invalid sample rate: {rate}Hz (supported: {supported:?})")]
    InvalidSampleRate { rate: u32, supported: Vec<u32> },

    /// Input frame has the wrong sample count.
    #[error("Invalid frame size: expected {expected} samples, got {actual}")]
    InvalidFrameSize { expected: usize, actual: usize },

    /// Bitstream buffer has the wrong byte count for the mode.
    #[error("Invalid payload: {details}")]
    InvalidPayload { details: String },

    /// Output buffer too small.
    #[error("Buffer too small: need {needed}, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    /// Malformed G.192 softbit stream.
    #[error("Malformed G.192 frame: {details}")]
    MalformedG192 { details: String },

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {message} (this is a bug, please report it)")]
    InternalError { message: String },
}

impl CodecError {
    /// Create a new invalid payload error.
    pub fn invalid_payload(details: impl Into<String>) -> Self {
        Self::InvalidPayload {
            details: details.into(),
        }
    }

    /// Create a new malformed G.192 error.
    pub fn malformed_g192(details: impl Into<String>) -> Self {
        Self::MalformedG192 {
            details: details.into(),
        }
    }

    /// Create a new internal error.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether the session can continue after this error.
    ///
    /// Construction/parameter errors are fatal. A malformed bitstream is
    /// recoverable: the decoder state is left unchanged and the application
    /// treats the frame as an erasure.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::UnsupportedMode { .. }
            | Self::InvalidSampleRate { .. }
            | Self::InternalError { .. } => false,

            Self::InvalidFrameSize { .. }
            | Self::InvalidPayload { .. }
            | Self::BufferTooSmall { .. }
            | Self::MalformedG192 { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CodecError::InvalidFrameSize {
            expected: 160,
            actual: 80,
        };
        let display = format!("{}", err);
        assert!(display.contains("expected 160"));
        assert!(display.contains("got 80"));
    }

    #[test]
    fn test_recoverability() {
        assert!(!CodecError::UnsupportedMode { index: 9 }.is_recoverable());
        assert!(CodecError::invalid_payload("short frame").is_recoverable());
        assert!(!CodecError::internal_error("oops").is_recoverable());
    }
}
