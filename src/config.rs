//! Process-wide configuration.
//!
//! Front ends build one [`HydraConfig`] (from flags, a file, or defaults)
//! and hand it to [`Stage::open`](crate::Stage::open).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HydraError, HydraResult};
use crate::logging::Verbosity;
use crate::storage::{StorageError, StorageStrategy, FIELD_SEPARATOR};

/// directory name of the repository inside the workspace
pub const DEFAULT_REPOSITORY_DIR: &str = ".hydra";

/// user id recorded on commits when none is configured
pub const DEFAULT_USER_ID: &str = "hydra";

/// Configuration for a Hydra workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HydraConfig {
    /// Root of the working tree.
    pub workspace_root: PathBuf,
    /// Repository location; `<workspace_root>/.hydra` when unset.
    pub repository_root: Option<PathBuf>,
    /// Identity recorded on commits.
    pub user_id: String,
    /// Blob encoding for a newly created repository.
    pub strategy: StorageStrategy,
    pub verbosity: Verbosity,
}

impl Default for HydraConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            repository_root: None,
            user_id: DEFAULT_USER_ID.to_string(),
            strategy: StorageStrategy::default(),
            verbosity: Verbosity::default(),
        }
    }
}

impl HydraConfig {
    /// Create a configuration for the given workspace.
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            ..Default::default()
        }
    }

    /// Set the repository location.
    pub fn repository_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.repository_root = Some(path.into());
        self
    }

    /// Set the user id.
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Set the storage strategy.
    pub fn strategy(mut self, strategy: StorageStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the verbosity.
    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// The repository location with the default applied.
    pub fn resolved_repository_root(&self) -> PathBuf {
        self.repository_root
            .clone()
            .unwrap_or_else(|| self.workspace_root.join(DEFAULT_REPOSITORY_DIR))
    }

    /// Reject configurations the engine cannot work with.
    pub fn validate(&self) -> HydraResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(HydraError::Internal("user id must not be empty".into()));
        }
        if self.user_id.contains(FIELD_SEPARATOR) {
            return Err(HydraError::Internal(format!("user id must not contain {:?}", FIELD_SEPARATOR)));
        }
        if self.workspace_root.as_os_str().is_empty() {
            return Err(HydraError::Internal("workspace root must not be empty".into()));
        }
        Ok(())
    }

    /// Install the stderr log subscriber at the configured verbosity.
    pub fn init_logging(&self) -> bool {
        crate::logging::init_logging(self.verbosity)
    }

    /// Read a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> HydraResult<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text).map_err(StorageError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Write this configuration as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> HydraResult<()> {
        let text = serde_json::to_string_pretty(self).map_err(StorageError::from)?;
        fs::write(path.as_ref(), text)?;
        Ok(())
    }
}
