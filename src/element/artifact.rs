//! A single versioned file.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::element::{Status, StatusCode};
use crate::error::{HydraError, HydraResult};
use crate::storage::{Fingerprint, Repository, StorageError};

/// One workspace file paired with one blob keyed by its fingerprint.
#[derive(Debug, Clone)]
pub struct Artifact {
    path: PathBuf,
    fingerprint: Fingerprint,
    repo: Repository,
}

impl Artifact {
    /// Track an existing workspace file.
    pub fn new(repo: Repository, path: impl Into<PathBuf>) -> HydraResult<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(HydraError::invalid(format!(
                "artifact requires an existing file: {}",
                path.display()
            )));
        }
        let fingerprint = Fingerprint::of_file(&path)?.ok_or_else(|| {
            HydraError::invalid(format!("file vanished while fingerprinting: {}", path.display()))
        })?;
        Ok(Self {
            path,
            fingerprint,
            repo,
        })
    }

    /// Track a file with a known fingerprint.
    ///
    /// If the file exists its content must digest to `expected`. If it does
    /// not, the fingerprint is trusted so the artifact can be retrieved
    /// later.
    pub fn with_fingerprint(
        repo: Repository,
        path: impl Into<PathBuf>,
        expected: Fingerprint,
    ) -> HydraResult<Self> {
        let path = path.into();
        if path.is_file() {
            if let Some(actual) = Fingerprint::of_file(&path)? {
                if actual != expected {
                    return Err(HydraError::invalid(format!(
                        "{} digests to {}, not {}",
                        path.display(),
                        actual.short(),
                        expected.short()
                    )));
                }
            }
        }
        Ok(Self::from_repository(repo, path, expected))
    }

    /// An artifact described by a stored container; the workspace file may
    /// hold anything until it is retrieved.
    pub(crate) fn from_repository(repo: Repository, path: PathBuf, fingerprint: Fingerprint) -> Self {
        Self {
            path,
            fingerprint,
            repo,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Copy the workspace file into the blob area.
    ///
    /// Does nothing if the blob already exists. Returns `Ok(false)` if the
    /// file is gone or no longer matches the recorded fingerprint.
    pub fn store(&mut self) -> HydraResult<bool> {
        if self.repo.blob_exists(&self.fingerprint) {
            return Ok(true);
        }
        if !self.path.is_file() {
            warn!(path = %self.path.display(), "artifact file vanished; nothing to store");
            return Ok(false);
        }
        match self.fingerprint.check_fingerprint(&self.path) {
            Ok(true) => {}
            Ok(false) => {
                warn!(path = %self.path.display(), "file changed since it was fingerprinted; not storing");
                return Ok(false);
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read file to store");
                return Ok(false);
            }
        }
        match self.repo.store_blob_from_file(&self.fingerprint, &self.path) {
            Ok(_) => Ok(true),
            Err(e) if e.is_io() => {
                warn!(path = %self.path.display(), error = %e, "failed to store artifact");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the blob back to the workspace path.
    pub fn retrieve(&self) -> HydraResult<bool> {
        match self.repo.retrieve_blob_to_file(&self.fingerprint, &self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.is_io() => {
                warn!(path = %self.path.display(), error = %e, "failed to retrieve artifact");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn status(&self, check_workspace: bool, check_repository: bool) -> Status {
        Status {
            workspace: check_workspace.then(|| self.workspace_status()),
            repository: check_repository.then(|| self.repository_status()),
        }
    }

    fn workspace_status(&self) -> StatusCode {
        if self.path.is_dir() {
            return StatusCode::Changed;
        }
        match Fingerprint::of_file(&self.path) {
            Ok(Some(actual)) if actual == self.fingerprint => StatusCode::Valid,
            Ok(Some(_)) => StatusCode::Changed,
            Ok(None) => StatusCode::Missing,
            Err(_) => StatusCode::Unknown,
        }
    }

    fn repository_status(&self) -> StatusCode {
        match self.repo.verify_blob(&self.fingerprint) {
            Ok(true) => StatusCode::Valid,
            Ok(false) => StatusCode::Changed,
            Err(StorageError::BlobNotFound(_)) => StatusCode::Missing,
            Err(_) => StatusCode::Unknown,
        }
    }

    /// Recompute the fingerprint from the workspace file.
    ///
    /// Returns true if it changed; false if it is unchanged or the file is
    /// missing.
    pub fn refresh_fingerprint(&mut self) -> bool {
        match Fingerprint::of_file(&self.path) {
            Ok(Some(actual)) if self.path.is_file() && actual != self.fingerprint => {
                debug!(path = %self.path.display(), old = self.fingerprint.short(), new = actual.short(), "artifact changed");
                self.fingerprint = actual;
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot refresh fingerprint");
                false
            }
        }
    }
}
