//! Head/current bookkeeping shared by logical units and the stage.
//!
//! ```text
//!   commit:   previous = [current, head] (deduplicated)
//!             head = current = new state
//!   revert:   current = target, workspace <- target contents
//! ```

use std::collections::BTreeMap;
use std::path::Path as FsPath;

use tracing::{debug, info, warn};

use crate::element::{Container, Status};
use crate::error::HydraResult;
use crate::history::{HistoryCrawler, Path, State, Step};
use crate::storage::{Fingerprint, Repository, UnitName};

/// Which kind of commit to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    /// ordinary commit, marked invalid
    Plain,
    /// commit on the curated lineage, marked valid
    ValidPath,
    /// placeholder without contents
    Temporary,
}

/// The live contents of a committable element and its position in history.
#[derive(Debug, Clone)]
pub struct Lineage {
    repo: Repository,
    contents: Container,
    /// fingerprint of `contents` as of its last successful store
    stored_contents: Fingerprint,
    head: Option<Fingerprint>,
    current: Option<Fingerprint>,
}

impl Lineage {
    /// A lineage with no history and empty contents rooted at `root`.
    pub fn new(repo: Repository, root: impl AsRef<FsPath>) -> Self {
        let contents = Container::new(repo.clone(), root.as_ref());
        Self {
            repo,
            contents,
            stored_contents: Fingerprint::empty(),
            head: None,
            current: None,
        }
    }

    /// Rebuild a lineage from a stored reference.
    pub fn restore(
        repo: Repository,
        root: impl AsRef<FsPath>,
        head: Option<Fingerprint>,
        current: Option<Fingerprint>,
        contents: Fingerprint,
    ) -> HydraResult<Self> {
        let container = Container::load(repo.clone(), root.as_ref(), &contents)?;
        Ok(Self {
            repo,
            contents: container,
            stored_contents: contents,
            head,
            current,
        })
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn head(&self) -> Option<&Fingerprint> {
        self.head.as_ref()
    }

    pub fn current(&self) -> Option<&Fingerprint> {
        self.current.as_ref()
    }

    pub fn contents(&self) -> &Container {
        &self.contents
    }

    pub fn contents_mut(&mut self) -> &mut Container {
        &mut self.contents
    }

    /// Fingerprint to write into a reference; always backed by a blob.
    pub fn stored_contents(&self) -> &Fingerprint {
        &self.stored_contents
    }

    pub fn crawler(&self) -> HistoryCrawler {
        HistoryCrawler::new(self.repo.clone(), self.head.clone())
    }

    /// Store the live contents. `None` if any part could not be written.
    pub fn sync_contents(&mut self) -> HydraResult<Option<Fingerprint>> {
        if !self.contents.store()? {
            warn!(path = %self.contents.path().display(), "contents could not be stored");
            return Ok(None);
        }
        let fingerprint = self.contents.fingerprint();
        self.stored_contents = fingerprint.clone();
        Ok(Some(fingerprint))
    }

    // ==================== Commit ====================

    /// Create a new state on top of `current` and `head`.
    ///
    /// `units` turns the commit into a stage state. Returns `None` if the
    /// contents or the state could not be stored.
    pub fn commit_state(
        &mut self,
        user_id: &str,
        message: &str,
        kind: CommitKind,
        units: Option<BTreeMap<UnitName, Fingerprint>>,
    ) -> HydraResult<Option<Fingerprint>> {
        let contents = match kind {
            CommitKind::Temporary => None,
            CommitKind::Plain | CommitKind::ValidPath => match self.sync_contents()? {
                Some(fingerprint) => Some(fingerprint),
                None => return Ok(None),
            },
        };
        let previous = [self.current.clone(), self.head.clone()]
            .into_iter()
            .flatten()
            .collect();
        let valid_path_previous = match kind {
            CommitKind::ValidPath => self.valid_path_anchor()?,
            CommitKind::Plain | CommitKind::Temporary => self.current.clone(),
        };

        let mut state = State::new(previous, contents, user_id, message)?
            .with_validity(kind == CommitKind::ValidPath)
            .with_valid_path_previous(valid_path_previous);
        if let Some(units) = units {
            state = state.with_stage_units(units);
        }

        match state.store(&self.repo) {
            Ok(hash) => {
                info!(hash = hash.short(), ?kind, user = user_id, "committed");
                self.head = Some(hash.clone());
                self.current = Some(hash.clone());
                Ok(Some(hash))
            }
            Err(e) if e.is_io() => {
                warn!(error = %e, "failed to store commit");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The valid-path parent for a commit made from `current`.
    fn valid_path_anchor(&mut self) -> HydraResult<Option<Fingerprint>> {
        let Some(current) = self.current.clone() else {
            return Ok(None);
        };
        let mut crawler = self.crawler();
        Ok(match crawler.state(&current)? {
            Some(state) if state.is_valid() => Some(current),
            Some(state) => state.valid_path_previous().cloned(),
            None => None,
        })
    }

    /// Rewrite message, user and contents of a reachable commit in place.
    pub fn commit_update(&mut self, hash: &Fingerprint, user_id: &str, message: &str) -> HydraResult<bool> {
        let Some(mut state) = self.find_state(hash)? else {
            return Ok(false);
        };
        let Some(contents) = self.sync_contents()? else {
            return Ok(false);
        };
        state.amend(user_id, message, Some(contents))?;
        match state.rewrite(&self.repo) {
            Ok(()) => {
                info!(hash = hash.short(), "commit updated");
                Ok(true)
            }
            Err(e) if e.is_io() => {
                warn!(hash = hash.short(), error = %e, "failed to rewrite commit");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Splice a new commit carrying `after`'s contents between `after` and
    /// `before`, as an extra parent of `before`.
    pub fn commit_insert(
        &mut self,
        user_id: &str,
        message: &str,
        after: &Fingerprint,
        before: &Fingerprint,
    ) -> HydraResult<Option<Fingerprint>> {
        let (Some(after_state), Some(mut before_state)) = (self.find_state(after)?, self.find_state(before)?) else {
            return Ok(None);
        };
        if after == before || self.crawler().find_commit_hash(after, before, None, true)?.is_some() {
            warn!(after = after.short(), before = before.short(), "insert would create a cycle");
            return Ok(None);
        }

        let mut inserted = State::new(
            vec![after.clone()],
            after_state.contents().cloned(),
            user_id,
            message,
        )?
        .with_validity(after_state.is_valid())
        .with_valid_path_previous(Some(after.clone()));

        let hash = match inserted.store(&self.repo) {
            Ok(hash) => hash,
            Err(e) if e.is_io() => {
                warn!(error = %e, "failed to store inserted commit");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        before_state.add_previous(hash.clone());
        match before_state.rewrite(&self.repo) {
            Ok(()) => {}
            Err(e) if e.is_io() => {
                warn!(before = before.short(), error = %e, "failed to link inserted commit");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        if self.head.as_ref() == Some(after) {
            self.head = Some(hash.clone());
        }
        if self.current.as_ref() == Some(after) {
            self.current = Some(hash.clone());
        }
        info!(hash = hash.short(), after = after.short(), before = before.short(), "commit inserted");
        Ok(Some(hash))
    }

    /// Load a state if it is reachable from head.
    fn find_state(&mut self, hash: &Fingerprint) -> HydraResult<Option<State>> {
        let Some(head) = self.head.clone() else {
            return Ok(None);
        };
        let mut crawler = self.crawler();
        if crawler.find_commit_hash(&head, hash, None, true)?.is_none() {
            debug!(hash = hash.short(), "commit not reachable from head");
            return Ok(None);
        }
        Ok(crawler.state(hash)?.cloned())
    }

    // ==================== Revert ====================

    /// Search for `hash` from head and materialize it.
    pub fn revert_hash(&mut self, hash: &Fingerprint, depth_first: bool) -> HydraResult<bool> {
        let Some(head) = self.head.clone() else {
            return Ok(false);
        };
        let mut crawler = self.crawler();
        match crawler.find_commit_hash(&head, hash, None, depth_first)? {
            Some(found) => self.materialize(&mut crawler, &found),
            None => Ok(false),
        }
    }

    /// Move by one [`Step`] from `current`.
    pub fn revert_relative(&mut self, step: Step) -> HydraResult<bool> {
        let Some(current) = self.current.clone() else {
            return Ok(false);
        };
        let mut crawler = self.crawler();
        match crawler.find_commit_relative(&current, step, None)? {
            Some(found) => self.materialize(&mut crawler, &found),
            None => Ok(false),
        }
    }

    /// Follow `path` from head.
    pub fn revert_path(&mut self, path: &Path) -> HydraResult<bool> {
        let mut crawler = self.crawler();
        match crawler.find_commit_path(path, None)? {
            Some(found) => self.materialize(&mut crawler, &found),
            None => Ok(false),
        }
    }

    /// Make `target` current, restoring its contents into the workspace.
    fn materialize(&mut self, crawler: &mut HistoryCrawler, target: &Fingerprint) -> HydraResult<bool> {
        let Some(state) = crawler.state(target)? else {
            return Ok(false);
        };
        let Some(contents) = state.contents().cloned() else {
            debug!(target = target.short(), "temporary commit; workspace left as is");
            self.current = Some(target.clone());
            return Ok(true);
        };

        let container = match Container::load(self.repo.clone(), self.contents.path(), &contents) {
            Ok(container) => container,
            Err(e) if e.is_io() => {
                warn!(target = target.short(), error = %e, "cannot load commit contents");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if !container.retrieve()? {
            warn!(target = target.short(), "workspace only partially restored");
            return Ok(false);
        }

        info!(target = target.short(), "reverted");
        self.contents = container;
        self.stored_contents = contents;
        self.current = Some(target.clone());
        Ok(true)
    }

    // ==================== Queries ====================

    /// `?` until there is a first commit; afterwards the contents status.
    pub fn status(&self, check_workspace: bool, check_repository: bool) -> Status {
        if self.head.is_none() {
            return Status::undetermined();
        }
        self.contents.status(check_workspace, check_repository)
    }
}
