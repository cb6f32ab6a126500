//! Hydra - a multi-headed versioning engine
//!
//! Hydra versions independently tracked *logical units* plus an umbrella
//! *stage* that is itself versioned and coordinates commits and reverts
//! across those units. Content lives in a write-once, content-addressed
//! blob area; commits form a DAG where a commit may reconcile a diverged
//! `current` with `head`.
//!
//! # Example
//!
//! ```no_run
//! use hydra::{CommittableElement, Stage, UnitName};
//!
//! let mut stage = Stage::new("./workspace")?;
//! let unit = stage.create_logical_unit(UnitName::new("cards")?)?;
//! std::fs::write(unit.root().join("a.txt"), "alpha")?;
//! unit.add_element("a.txt")?;
//! unit.commit("alice", "first card")?;
//! stage.commit_stage_and_logical_units("alice", "snapshot")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod codec;
pub mod committable;
pub mod config;
pub mod element;
pub mod error;
pub mod history;
pub mod logging;
pub mod storage;

pub use codec::{inspect, Entity};
pub use committable::{CommitKind, CommittableElement, Lineage, LogicalUnit, Stage};
pub use config::HydraConfig;
pub use element::{Artifact, Container, Element, ElementKind, Status, StatusCode};
pub use error::{HydraError, HydraResult};
pub use history::{Blacklist, HistoryCrawler, Path, State, Step};
pub use logging::{init_logging, Verbosity};
pub use storage::{ElementName, Fingerprint, Repository, StorageError, StorageStrategy, UnitName};
