//! Versioned, committable elements.
//!
//! A [`LogicalUnit`] versions one named subtree of the workspace. The
//! [`Stage`] versions the workspace root and coordinates commits and
//! reverts across the units it manages. Both keep their position in
//! history in a [`Lineage`] and expose the same operations through
//! [`CommittableElement`].

mod lineage;
mod logical_unit;
mod stage;

use std::collections::BTreeMap;
use std::path::Path as FsPath;

use tracing::warn;

pub use lineage::{CommitKind, Lineage};
pub use logical_unit::LogicalUnit;
pub use stage::Stage;

use crate::element::{Container, Element, Status};
use crate::error::HydraResult;
use crate::history::{HistoryCrawler, Path, State, Step};
use crate::storage::{Fingerprint, StorageResult, UnitName};

/// Operations shared by logical units and the stage.
///
/// Implementors provide access to their [`Lineage`] and a way to write
/// their named reference. Every mutating operation persists the reference
/// after it succeeds and reports failure if that write fails.
pub trait CommittableElement {
    fn lineage(&self) -> &Lineage;

    fn lineage_mut(&mut self) -> &mut Lineage;

    /// Reference descriptor text.
    fn describe(&self) -> String;

    /// Write the reference descriptor.
    fn write_reference(&self) -> StorageResult<()>;

    /// Unit commits to record when this element commits; only the stage
    /// has any.
    fn unit_snapshot(&self) -> Option<BTreeMap<UnitName, Fingerprint>> {
        None
    }

    /// Write the reference, logging instead of failing on I/O errors.
    fn persist(&self) -> HydraResult<bool> {
        match self.write_reference() {
            Ok(()) => Ok(true),
            Err(e) if e.is_io() => {
                warn!(error = %e, "failed to write reference");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn head(&self) -> Option<&Fingerprint> {
        self.lineage().head()
    }

    fn current(&self) -> Option<&Fingerprint> {
        self.lineage().current()
    }

    fn contents(&self) -> &Container {
        self.lineage().contents()
    }

    // ==================== Staging ====================

    /// Track a workspace file or directory, relative to the contents root.
    fn add_element(&mut self, relative: impl AsRef<FsPath>) -> HydraResult<bool>
    where
        Self: Sized,
    {
        let added = self.lineage_mut().contents_mut().add_path(relative)?;
        if added {
            self.stage_contents()?;
        }
        Ok(added)
    }

    /// Stop tracking an element, relative to the contents root.
    fn remove_element(&mut self, relative: impl AsRef<FsPath>) -> HydraResult<bool>
    where
        Self: Sized,
    {
        let removed = self.lineage_mut().contents_mut().remove_path(relative)?;
        if removed {
            self.stage_contents()?;
        }
        Ok(removed)
    }

    fn get_element(&self, relative: impl AsRef<FsPath>) -> Option<&Element>
    where
        Self: Sized,
    {
        self.lineage().contents().get_element(relative)
    }

    /// Store the live contents and record them in the reference.
    fn stage_contents(&mut self) -> HydraResult<bool> {
        if self.lineage_mut().sync_contents()?.is_none() {
            return Ok(false);
        }
        self.persist()
    }

    // ==================== Commit ====================

    fn commit(&mut self, user_id: &str, message: &str) -> HydraResult<Option<Fingerprint>> {
        self.commit_kind(user_id, message, CommitKind::Plain)
    }

    fn commit_valid_path(&mut self, user_id: &str, message: &str) -> HydraResult<Option<Fingerprint>> {
        self.commit_kind(user_id, message, CommitKind::ValidPath)
    }

    fn commit_temporary(&mut self, user_id: &str, message: &str) -> HydraResult<Option<Fingerprint>> {
        self.commit_kind(user_id, message, CommitKind::Temporary)
    }

    fn commit_kind(&mut self, user_id: &str, message: &str, kind: CommitKind) -> HydraResult<Option<Fingerprint>> {
        let units = self.unit_snapshot();
        self.commit_with_units(user_id, message, kind, units)
    }

    /// Commit, recording `units` when this is a stage state.
    ///
    /// `None` if the state or the reference could not be written.
    fn commit_with_units(
        &mut self,
        user_id: &str,
        message: &str,
        kind: CommitKind,
        units: Option<BTreeMap<UnitName, Fingerprint>>,
    ) -> HydraResult<Option<Fingerprint>> {
        let Some(hash) = self.lineage_mut().commit_state(user_id, message, kind, units)? else {
            return Ok(None);
        };
        if !self.persist()? {
            warn!(hash = hash.short(), "commit stored but not recorded in the reference");
            return Ok(None);
        }
        Ok(Some(hash))
    }

    /// Rewrite the user, message and contents of a commit in place.
    fn commit_update(&mut self, hash: &Fingerprint, user_id: &str, message: &str) -> HydraResult<bool> {
        let updated = self.lineage_mut().commit_update(hash, user_id, message)?;
        Ok(updated && self.persist()?)
    }

    /// Insert a commit with `after`'s contents as an extra parent of `before`.
    fn commit_insert(
        &mut self,
        user_id: &str,
        message: &str,
        after: &Fingerprint,
        before: &Fingerprint,
    ) -> HydraResult<Option<Fingerprint>> {
        let Some(hash) = self.lineage_mut().commit_insert(user_id, message, after, before)? else {
            return Ok(None);
        };
        if !self.persist()? {
            warn!(hash = hash.short(), "inserted commit not recorded in the reference");
            return Ok(None);
        }
        Ok(Some(hash))
    }

    // ==================== Revert ====================

    fn revert_hash(&mut self, hash: &Fingerprint, depth_first: bool) -> HydraResult<bool> {
        let reverted = self.lineage_mut().revert_hash(hash, depth_first)?;
        Ok(reverted && self.persist()?)
    }

    /// Move `distance` hops from current, starting on parent `branch`.
    fn revert_relative(&mut self, branch: usize, distance: i64) -> HydraResult<bool> {
        let reverted = self.lineage_mut().revert_relative(Step::new(branch, distance))?;
        Ok(reverted && self.persist()?)
    }

    fn revert_path(&mut self, path: &Path) -> HydraResult<bool> {
        let reverted = self.lineage_mut().revert_path(path)?;
        Ok(reverted && self.persist()?)
    }

    // ==================== History ====================

    fn crawler(&self) -> HistoryCrawler {
        self.lineage().crawler()
    }

    fn history(&self, system_path: bool) -> HydraResult<Vec<(Fingerprint, State)>> {
        self.crawler().history(system_path)
    }

    fn history_log(&self, system_path: bool) -> HydraResult<String> {
        self.crawler().history_log(system_path)
    }

    fn list_previous_commits(&self, hash: &Fingerprint) -> HydraResult<Vec<Fingerprint>> {
        self.crawler().list_previous_commits(hash)
    }

    fn list_following_commits(&self, hash: &Fingerprint) -> HydraResult<Vec<Fingerprint>> {
        self.crawler().list_following_commits(hash)
    }

    fn status(&self, check_workspace: bool, check_repository: bool) -> Status {
        self.lineage().status(check_workspace, check_repository)
    }
}
