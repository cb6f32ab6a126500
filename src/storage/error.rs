//! Storage layer error types
//!
//! All errors that can occur while touching the repository directory are
//! defined here. The layers above decide which of them are swallowed (I/O)
//! and which are surfaced (corruption, invalid names).

use thiserror::Error;

use crate::storage::fingerprint::Fingerprint;
use crate::storage::types::InvalidNameError;

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// no blob is stored under the requested key
    #[error("blob not found: {0}")]
    BlobNotFound(Fingerprint),

    /// the named reference (unit or stage) does not exist
    #[error("reference not found: {0}")]
    RefNotFound(String),

    /// repository metadata could not be read or written
    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// data integrity check failed
    #[error("corrupted data at {key}: {reason}")]
    CorruptedData { key: String, reason: String },

    /// a name could not be used as a reference key
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::BlobNotFound(_) | StorageError::RefNotFound(_)
        ) || matches!(self, StorageError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// check if this error is a plain filesystem failure
    ///
    /// these are the failures the commit engine logs and reports as `false`
    pub fn is_io(&self) -> bool {
        matches!(self, StorageError::Io(_) | StorageError::BlobNotFound(_))
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let missing = StorageError::BlobNotFound(Fingerprint::empty());
        assert!(missing.is_not_found());
        assert!(missing.is_io());

        let io = StorageError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(io.is_not_found());

        let corrupt = StorageError::CorruptedData {
            key: "abc".to_string(),
            reason: "bad header".to_string(),
        };
        assert!(!corrupt.is_not_found());
        assert!(!corrupt.is_io());
    }
}
