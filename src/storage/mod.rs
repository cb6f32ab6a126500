//! storage layer for Hydra
//!
//! this module owns everything that touches the repository directory. The
//! upper layers (elements, commit graph, committable elements) use this API
//! and never touch the repository files directly.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Repository                           │
//! │   (blob area, named references, metadata; cheap to clone)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │ fingerprint │       │  strategy   │       │    refs     │
//!  │   (keys)    │       │ (encoding)  │       │(units/stage)│
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use hydra::storage::{Fingerprint, Repository, StorageStrategy};
//!
//! let repo = Repository::open("./.hydra", StorageStrategy::Zstd)?;
//! let hash = Fingerprint::of_bytes(b"hello");
//! repo.store_blob_bytes(&hash, b"hello")?;
//! assert_eq!(repo.read_blob(&hash)?, b"hello");
//! # Ok::<(), hydra::storage::StorageError>(())
//! ```

mod error;
mod fingerprint;
mod refs;
mod repository;
mod strategy;
mod types;

// Re-export public API
pub use error::{StorageError, StorageResult};
pub use fingerprint::{Fingerprint, FINGERPRINT_LEN, NULL_LITERAL};
pub use repository::{Repository, RepositoryMetadata, RepositoryStats, FORMAT_VERSION};
pub use strategy::StorageStrategy;
pub use types::{ElementName, InvalidNameError, UnitName};

// Re-export for internal use by other modules
pub(crate) use types::FIELD_SEPARATOR;
