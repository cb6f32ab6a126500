//! Core repository handle.
//!
//! This is the central component of the storage layer. It owns the
//! repository directory and provides the blob and reference operations the
//! element and commit layers are built on:
//!
//! ```text
//! <root>/objects/<hex>     content-addressed blobs (encoded by the strategy)
//! <root>/units/<name>      logical unit references
//! <root>/stage             stage reference
//! <root>/metadata.json     repository metadata
//! ```
//!
//! The blob area is append-only. Writing a key that already exists is a
//! no-op, which is what makes identical content deduplicate for free. The
//! only sanctioned exception is [`Repository::overwrite_blob`], used for
//! identity-preserving commit rewrites.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::fingerprint::Fingerprint;
use crate::storage::refs::{write_atomically, RefManager, STAGE_REF, UNITS_DIR};
use crate::storage::strategy::StorageStrategy;
use crate::storage::types::UnitName;

const OBJECTS_DIR: &str = "objects";
const METADATA_FILE: &str = "metadata.json";

/// current on-disk layout version
pub const FORMAT_VERSION: u32 = 1;

/// Repository metadata, persisted as JSON next to the blob area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    /// encoding every blob in `objects/` was written with
    pub strategy: StorageStrategy,
}

/// The repository handle.
///
/// Clone this to share the repository between a stage and its logical
/// units - it uses Arc internally.
#[derive(Clone)]
pub struct Repository {
    inner: Arc<RepositoryInner>,
}

struct RepositoryInner {
    root: PathBuf,
    metadata: RwLock<RepositoryMetadata>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("root", &self.inner.root)
            .field("strategy", &self.strategy())
            .finish()
    }
}

impl Repository {
    /// Open a repository, initializing it if the directory is empty.
    ///
    /// `strategy` is only used for a fresh repository; an existing one keeps
    /// the strategy recorded in its metadata so older blobs stay readable.
    pub fn open(root: impl AsRef<Path>, strategy: StorageStrategy) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(OBJECTS_DIR))?;
        fs::create_dir_all(root.join(UNITS_DIR))?;

        let metadata_path = root.join(METADATA_FILE);
        let metadata = if metadata_path.exists() {
            let reader = BufReader::new(File::open(&metadata_path)?);
            let metadata: RepositoryMetadata = serde_json::from_reader(reader)?;
            if metadata.strategy != strategy {
                debug!(
                    recorded = %metadata.strategy,
                    requested = %strategy,
                    "keeping recorded storage strategy"
                );
            }
            metadata
        } else {
            let metadata = RepositoryMetadata {
                format_version: FORMAT_VERSION,
                created_at: Utc::now(),
                strategy,
            };
            write_metadata(&metadata_path, &metadata)?;
            debug!(root = %root.display(), %strategy, "initialized repository");
            metadata
        };

        Ok(Self {
            inner: Arc::new(RepositoryInner {
                root,
                metadata: RwLock::new(metadata),
            }),
        })
    }

    /// Get the repository path.
    pub fn path(&self) -> &Path {
        &self.inner.root
    }

    /// Get a copy of the repository metadata.
    pub fn metadata(&self) -> RepositoryMetadata {
        self.inner.metadata.read().clone()
    }

    /// The strategy blobs are encoded with.
    pub fn strategy(&self) -> StorageStrategy {
        self.inner.metadata.read().strategy
    }

    /// Switch the blob encoding.
    ///
    /// Blobs carry no per-blob marker, so this is only allowed while the
    /// blob area is still empty.
    pub fn set_strategy(&self, strategy: StorageStrategy) -> StorageResult<()> {
        let mut metadata = self.inner.metadata.write();
        if metadata.strategy == strategy {
            return Ok(());
        }
        if self.blob_count()? > 0 {
            return Err(StorageError::Internal(format!(
                "cannot switch storage strategy from {} to {}: blob area is not empty",
                metadata.strategy, strategy
            )));
        }
        metadata.strategy = strategy;
        write_metadata(&self.inner.root.join(METADATA_FILE), &metadata)
    }

    // ==================== Blob Operations ====================

    fn blob_path(&self, hash: &Fingerprint) -> PathBuf {
        self.inner.root.join(OBJECTS_DIR).join(hash.as_str())
    }

    /// Check if a blob is stored under `hash`.
    pub fn blob_exists(&self, hash: &Fingerprint) -> bool {
        self.blob_path(hash).is_file()
    }

    /// Encode the file at `source` into the blob area under `hash`.
    ///
    /// Returns false (and writes nothing) if the blob already exists.
    pub fn store_blob_from_file(&self, hash: &Fingerprint, source: &Path) -> StorageResult<bool> {
        if self.blob_exists(hash) {
            return Ok(false);
        }
        let reader = BufReader::new(File::open(source)?);
        self.write_blob_with(hash, |strategy, out| strategy.compress(reader, out))?;
        debug!(hash = hash.short(), source = %source.display(), "stored blob");
        Ok(true)
    }

    /// Encode an in-memory buffer into the blob area under `hash`.
    ///
    /// Returns false (and writes nothing) if the blob already exists.
    pub fn store_blob_bytes(&self, hash: &Fingerprint, data: &[u8]) -> StorageResult<bool> {
        if self.blob_exists(hash) {
            return Ok(false);
        }
        self.write_blob_with(hash, |strategy, out| strategy.compress(data, out))?;
        debug!(hash = hash.short(), len = data.len(), "stored blob");
        Ok(true)
    }

    /// Replace the blob stored under `hash`, keeping the key.
    pub fn overwrite_blob(&self, hash: &Fingerprint, data: &[u8]) -> StorageResult<()> {
        self.write_blob_with(hash, |strategy, out| strategy.compress(data, out))?;
        debug!(hash = hash.short(), "rewrote blob in place");
        Ok(())
    }

    fn write_blob_with<F>(&self, hash: &Fingerprint, encode: F) -> StorageResult<()>
    where
        F: FnOnce(StorageStrategy, &mut BufWriter<&mut NamedTempFile>) -> io::Result<()>,
    {
        let strategy = self.strategy();
        let mut tmp = NamedTempFile::new_in(self.inner.root.join(OBJECTS_DIR))?;
        {
            let mut writer = BufWriter::new(&mut tmp);
            encode(strategy, &mut writer)?;
            writer.flush()?;
        }
        tmp.persist(self.blob_path(hash))
            .map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    fn open_blob(&self, hash: &Fingerprint) -> StorageResult<File> {
        File::open(self.blob_path(hash)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StorageError::BlobNotFound(hash.clone())
            } else {
                StorageError::Io(e)
            }
        })
    }

    /// Read and decode a blob.
    pub fn read_blob(&self, hash: &Fingerprint) -> StorageResult<Vec<u8>> {
        let file = self.open_blob(hash)?;
        let mut out = Vec::new();
        self.strategy().decompress(BufReader::new(file), &mut out)?;
        Ok(out)
    }

    /// Read a blob that is expected to hold descriptor text.
    pub fn read_blob_text(&self, hash: &Fingerprint) -> StorageResult<String> {
        let bytes = self.read_blob(hash)?;
        String::from_utf8(bytes).map_err(|e| StorageError::CorruptedData {
            key: hash.to_string(),
            reason: format!("descriptor is not valid utf-8: {}", e),
        })
    }

    /// Decode a blob into a workspace file.
    ///
    /// The target is only replaced once the whole blob decoded successfully.
    pub fn retrieve_blob_to_file(&self, hash: &Fingerprint, target: &Path) -> StorageResult<()> {
        let file = self.open_blob(hash)?;
        let dir = target
            .parent()
            .ok_or_else(|| StorageError::Internal(format!("no parent for {}", target.display())))?;
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(&mut tmp);
            self.strategy().decompress(BufReader::new(file), &mut writer)?;
            writer.flush()?;
        }
        tmp.persist(target).map_err(|e| StorageError::Io(e.error))?;
        debug!(hash = hash.short(), target = %target.display(), "retrieved blob");
        Ok(())
    }

    /// Check that the bytes stored under `hash` still digest to `hash`.
    ///
    /// Only meaningful for content blobs; descriptor blobs of states are
    /// keyed by their first serialization and may since have been rewritten.
    pub fn verify_blob(&self, hash: &Fingerprint) -> StorageResult<bool> {
        let file = self.open_blob(hash)?;
        let decoder = self.strategy().decoder(BufReader::new(file))?;
        Ok(Fingerprint::of_reader(decoder)? == *hash)
    }

    /// Number of blobs in the blob area.
    pub fn blob_count(&self) -> StorageResult<usize> {
        let mut count = 0;
        for entry in fs::read_dir(self.inner.root.join(OBJECTS_DIR))? {
            let entry = entry?;
            let is_blob = entry
                .file_name()
                .to_str()
                .map(|name| Fingerprint::parse(name).is_ok())
                .unwrap_or(false);
            if is_blob {
                count += 1;
            }
        }
        Ok(count)
    }

    // ==================== Reference Operations ====================

    /// Read a logical unit's reference descriptor.
    pub fn read_ref(&self, unit: &UnitName) -> StorageResult<String> {
        RefManager::read_unit(&self.inner.root, unit)
    }

    /// Replace a logical unit's reference descriptor.
    pub fn write_ref(&self, unit: &UnitName, descriptor: &str) -> StorageResult<()> {
        RefManager::write_unit(&self.inner.root, unit, descriptor)
    }

    /// Check if a logical unit reference exists.
    pub fn ref_exists(&self, unit: &UnitName) -> bool {
        RefManager::unit_exists(&self.inner.root, unit)
    }

    /// Delete a logical unit reference.
    pub fn delete_ref(&self, unit: &UnitName) -> StorageResult<bool> {
        RefManager::delete_unit(&self.inner.root, unit)
    }

    /// List all logical unit references.
    pub fn list_refs(&self) -> StorageResult<Vec<UnitName>> {
        RefManager::list_units(&self.inner.root)
    }

    /// Read the stage reference, if present.
    pub fn read_stage_ref(&self) -> StorageResult<Option<String>> {
        RefManager::read_stage(&self.inner.root)
    }

    /// Replace the stage reference.
    pub fn write_stage_ref(&self, descriptor: &str) -> StorageResult<()> {
        RefManager::write_stage(&self.inner.root, descriptor)
    }

    // ==================== Utility Operations ====================

    /// Get statistics about the repository.
    pub fn stats(&self) -> StorageResult<RepositoryStats> {
        Ok(RepositoryStats {
            blob_count: self.blob_count()?,
            unit_count: self.list_refs()?.len(),
            has_stage: self.inner.root.join(STAGE_REF).is_file(),
            strategy: self.strategy(),
        })
    }
}

fn write_metadata(path: &Path, metadata: &RepositoryMetadata) -> StorageResult<()> {
    let bytes = serde_json::to_vec_pretty(metadata)?;
    write_atomically(path, &bytes)
}

/// Statistics about the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryStats {
    pub blob_count: usize,
    pub unit_count: usize,
    pub has_stage: bool,
    pub strategy: StorageStrategy,
}

impl std::fmt::Display for RepositoryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Repository Statistics:")?;
        writeln!(f, "  Blobs: {}", self.blob_count)?;
        writeln!(f, "  Logical Units: {}", self.unit_count)?;
        writeln!(f, "  Stage: {}", if self.has_stage { "yes" } else { "no" })?;
        writeln!(f, "  Strategy: {}", self.strategy)
    }
}
