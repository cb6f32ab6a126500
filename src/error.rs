//! Crate level error types.
//!
//! Failures fall into three classes:
//! - `InvalidElement`: the on-disk model cannot be trusted (bad descriptor,
//!   explicit hash that contradicts real content, malformed name). Always
//!   surfaced as `Err`.
//! - I/O failures: logged where they happen and reported as `false` /
//!   `None` by store, retrieve, commit and revert.
//! - search misses: a valid "not found" answer (`None` / `false`).

use thiserror::Error;

use crate::storage::{InvalidNameError, StorageError, UnitName};

/// Result type for engine operations.
pub type HydraResult<T> = Result<T, HydraError>;

/// Errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum HydraError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Structural or semantic violation of the element model.
    #[error("invalid element: {0}")]
    InvalidElement(String),

    /// A textual Path or Step could not be parsed.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// No logical unit with this name exists in the repository.
    #[error("logical unit not found: {0}")]
    UnitNotFound(UnitName),

    /// A logical unit with this name already exists.
    #[error("logical unit already exists: {0}")]
    UnitAlreadyExists(UnitName),

    /// The logical unit exists but is not managed by the stage.
    #[error("logical unit is not managed by the stage: {0}")]
    NotManaged(UnitName),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HydraError {
    /// Create an invalid element error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidElement(reason.into())
    }

    /// Check if this error means the on-disk model is inconsistent.
    pub fn is_invalid_element(&self) -> bool {
        matches!(
            self,
            HydraError::InvalidElement(_)
                | HydraError::Storage(StorageError::CorruptedData { .. })
                | HydraError::Storage(StorageError::InvalidName(_))
        )
    }

    /// Check if this error is a plain I/O failure.
    pub fn is_io(&self) -> bool {
        matches!(self, HydraError::Storage(e) if e.is_io())
    }
}

impl From<InvalidNameError> for HydraError {
    fn from(e: InvalidNameError) -> Self {
        HydraError::InvalidElement(e.to_string())
    }
}

impl From<std::io::Error> for HydraError {
    fn from(e: std::io::Error) -> Self {
        HydraError::Storage(StorageError::Io(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let invalid = HydraError::invalid("hash mismatch");
        assert!(invalid.is_invalid_element());
        assert!(!invalid.is_io());

        let io: HydraError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(io.is_io());
        assert!(!io.is_invalid_element());

        let name: HydraError = InvalidNameError::Empty.into();
        assert!(name.is_invalid_element());
    }
}
