//! Error types for MTFS
//!
//! This module defines the error type shared by every storage backend.
//! Each variant belongs to exactly one [`ErrorKind`], which is what callers
//! match on when deciding how to react to a failed block operation.

use crate::types::BlockType;
use thiserror::Error;

/// Common result type for MTFS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for MTFS
#[derive(Debug, Error)]
pub enum Error {
    // Block addressing errors
    #[error("operation not supported for block type {0}")]
    UnsupportedBlockType(BlockType),

    #[error("object not found: {key}")]
    NotFound { key: String },

    // Staging errors
    #[error("staging I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Remote medium errors
    #[error("backend failure: {0}")]
    Backend(String),

    #[error("not supported by this backend: {0}")]
    Unsupported(String),

    // Encoding errors
    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    // Caller errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid backend state: {0}")]
    State(String),
}

/// Coarse classification of an [`Error`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The operation does not apply to the requested block type
    UnsupportedBlockType,
    /// A local staging file could not be opened, read or written
    IoFailure,
    /// The remote medium rejected or failed a transfer
    BackendFailure,
    /// The requested object is absent at the remote medium
    NotFound,
    /// The whole capability is not implemented by this backend
    Unsupported,
    /// A stored document or record is structurally invalid
    Decode,
    /// The caller passed a payload or value that cannot be stored
    InvalidArgument,
    /// Attach parameters or backend selection are invalid
    Configuration,
    /// The backend is not in a state that allows the operation
    State,
}

impl Error {
    /// Create a backend failure
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create an encode error
    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a not found error for a remote key
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Classify this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedBlockType(_) => ErrorKind::UnsupportedBlockType,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Io(_) => ErrorKind::IoFailure,
            Self::Backend(_) => ErrorKind::BackendFailure,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Decode(_) => ErrorKind::Decode,
            Self::InvalidArgument(_) | Self::Encode(_) => ErrorKind::InvalidArgument,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::State(_) => ErrorKind::State,
        }
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Self::Io(err.into())
        } else {
            Self::Decode(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(
            Error::UnsupportedBlockType(BlockType::Superblock).kind(),
            ErrorKind::UnsupportedBlockType
        );
        assert_eq!(Error::backend("503").kind(), ErrorKind::BackendFailure);
        assert_eq!(
            Error::Io(std::io::Error::other("disk")).kind(),
            ErrorKind::IoFailure
        );
        assert_eq!(Error::decode("bad").kind(), ErrorKind::Decode);
        assert_eq!(
            Error::encode("too many pools").kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn test_error_not_found() {
        assert!(Error::not_found("inodes/1").is_not_found());
        assert!(!Error::backend("timeout").is_not_found());
    }

    #[test]
    fn test_json_error_is_decode() {
        let err: Error = serde_json::from_str::<u64>("\"x\"").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
