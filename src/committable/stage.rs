//! The workspace coordinator.
//!
//! The stage is itself versioned (its contents are rooted at the workspace
//! root) and manages a set of logical units. Bulk commits record every
//! unit's resulting commit in a stage state, which is what makes a whole
//! system revert possible.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::codec::{inspect, Entity, StageRecord};
use crate::committable::{CommitKind, CommittableElement, Lineage, LogicalUnit};
use crate::config::HydraConfig;
use crate::error::{HydraError, HydraResult};
use crate::storage::{Fingerprint, Repository, StorageResult, UnitName};

/// The stage of a workspace.
#[derive(Debug)]
pub struct Stage {
    config: HydraConfig,
    repo: Repository,
    lineage: Lineage,
    units: BTreeMap<UnitName, LogicalUnit>,
    focus: Option<UnitName>,
}

impl Stage {
    /// Open the stage of `workspace_root` with default settings.
    pub fn new(workspace_root: impl AsRef<Path>) -> HydraResult<Self> {
        Self::open(HydraConfig::new(workspace_root.as_ref()))
    }

    /// Open (or initialize) the stage described by `config`.
    ///
    /// Managed units whose reference has disappeared are dropped with a
    /// warning.
    pub fn open(config: HydraConfig) -> HydraResult<Self> {
        config.validate()?;
        let repo = Repository::open(config.resolved_repository_root(), config.strategy)?;
        let root = config.workspace_root.clone();

        let Some(text) = repo.read_stage_ref()? else {
            let stage = Self {
                lineage: Lineage::new(repo.clone(), &root),
                repo,
                config,
                units: BTreeMap::new(),
                focus: None,
            };
            stage.write_reference()?;
            info!(workspace = %root.display(), "initialized stage");
            return Ok(stage);
        };

        let record = StageRecord::parse(&text)?;
        let lineage = Lineage::restore(repo.clone(), &root, record.head, record.current, record.contents)?;
        let mut units = BTreeMap::new();
        let mut dropped = false;
        for name in record.managed {
            match LogicalUnit::open(repo.clone(), &root, name.clone()) {
                Ok(unit) => {
                    units.insert(name, unit);
                }
                Err(HydraError::UnitNotFound(_)) => {
                    warn!(unit = %name, "managed unit has no reference; dropping it");
                    dropped = true;
                }
                Err(e) => return Err(e),
            }
        }
        let focus = record.focus.filter(|name| units.contains_key(name));

        let stage = Self {
            config,
            repo,
            lineage,
            units,
            focus,
        };
        if dropped {
            stage.persist()?;
        }
        debug!(units = stage.units.len(), "opened stage");
        Ok(stage)
    }

    pub fn config(&self) -> &HydraConfig {
        &self.config
    }

    pub fn workspace_root(&self) -> &Path {
        &self.config.workspace_root
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn record(&self) -> StageRecord {
        StageRecord {
            head: self.lineage.head().cloned(),
            current: self.lineage.current().cloned(),
            contents: self.lineage.stored_contents().clone(),
            managed: self.units.keys().cloned().collect::<BTreeSet<_>>(),
            focus: self.focus.clone(),
        }
    }

    // ==================== Unit Management ====================

    /// Create a new unit and manage it.
    pub fn create_logical_unit(&mut self, name: UnitName) -> HydraResult<&mut LogicalUnit> {
        let unit = LogicalUnit::create(self.repo.clone(), &self.config.workspace_root, name.clone())?;
        self.units.insert(name.clone(), unit);
        self.persist()?;
        self.units
            .get_mut(&name)
            .ok_or_else(|| HydraError::Internal(format!("unit {} vanished after creation", name)))
    }

    /// Open a unit from this repository without managing it.
    pub fn open_logical_unit(&self, name: UnitName) -> HydraResult<LogicalUnit> {
        LogicalUnit::open(self.repo.clone(), &self.config.workspace_root, name)
    }

    /// Remove a unit's reference and stop managing it.
    ///
    /// Blobs and workspace files are left alone.
    pub fn delete_logical_unit(&mut self, name: &UnitName) -> HydraResult<bool> {
        let was_managed = self.forget(name);
        let deleted = match self.repo.delete_ref(name) {
            Ok(deleted) => deleted,
            Err(e) if e.is_io() => {
                warn!(unit = %name, error = %e, "failed to delete unit reference");
                false
            }
            Err(e) => return Err(e.into()),
        };
        self.persist()?;
        info!(unit = %name, "deleted logical unit");
        Ok(was_managed || deleted)
    }

    /// Start managing `unit`. False if a unit of that name is already managed.
    pub fn manage(&mut self, unit: LogicalUnit) -> HydraResult<bool> {
        if unit.lineage().repository().path() != self.repo.path() {
            return Err(HydraError::Internal(format!(
                "unit {} belongs to another repository",
                unit.name()
            )));
        }
        if self.units.contains_key(unit.name()) {
            return Ok(false);
        }
        info!(unit = %unit.name(), "managing logical unit");
        self.units.insert(unit.name().clone(), unit);
        self.persist()?;
        Ok(true)
    }

    /// Stop managing a unit; its storage is kept.
    pub fn ignore(&mut self, name: &UnitName) -> HydraResult<bool> {
        if !self.forget(name) {
            return Ok(false);
        }
        info!(unit = %name, "ignoring logical unit");
        self.persist()?;
        Ok(true)
    }

    fn forget(&mut self, name: &UnitName) -> bool {
        if self.focus.as_ref() == Some(name) {
            self.focus = None;
        }
        self.units.remove(name).is_some()
    }

    /// Focus a managed unit.
    pub fn set_focus(&mut self, name: &UnitName) -> HydraResult<()> {
        if !self.units.contains_key(name) {
            return Err(HydraError::NotManaged(name.clone()));
        }
        self.focus = Some(name.clone());
        self.persist()?;
        Ok(())
    }

    pub fn clear_focus(&mut self) -> HydraResult<()> {
        if self.focus.take().is_some() {
            self.persist()?;
        }
        Ok(())
    }

    pub fn focus(&self) -> Option<&UnitName> {
        self.focus.as_ref()
    }

    /// Names of the managed units, sorted.
    pub fn managed(&self) -> impl Iterator<Item = &UnitName> {
        self.units.keys()
    }

    pub fn logical_unit(&self, name: &UnitName) -> Option<&LogicalUnit> {
        self.units.get(name)
    }

    pub fn logical_unit_mut(&mut self, name: &UnitName) -> Option<&mut LogicalUnit> {
        self.units.get_mut(name)
    }

    pub fn focused_unit_mut(&mut self) -> Option<&mut LogicalUnit> {
        self.focus.as_ref().and_then(|name| self.units.get_mut(name))
    }

    /// Every unit with a reference in the repository, managed or not.
    pub fn list_logical_units(&self) -> HydraResult<Vec<UnitName>> {
        Ok(self.repo.list_refs()?)
    }

    // ==================== Bulk Operations ====================

    /// Commit every managed unit. Units whose commit failed are left out.
    pub fn commit_logical_units(&mut self, user_id: &str, message: &str) -> HydraResult<Vec<(UnitName, Fingerprint)>> {
        self.commit_units(user_id, message, CommitKind::Plain)
    }

    pub fn commit_valid_path_logical_units(
        &mut self,
        user_id: &str,
        message: &str,
    ) -> HydraResult<Vec<(UnitName, Fingerprint)>> {
        self.commit_units(user_id, message, CommitKind::ValidPath)
    }

    fn commit_units(
        &mut self,
        user_id: &str,
        message: &str,
        kind: CommitKind,
    ) -> HydraResult<Vec<(UnitName, Fingerprint)>> {
        let mut committed = Vec::with_capacity(self.units.len());
        for (name, unit) in self.units.iter_mut() {
            match unit.commit_kind(user_id, message, kind)? {
                Some(hash) => committed.push((name.clone(), hash)),
                None => warn!(unit = %name, "unit commit failed"),
            }
        }
        Ok(committed)
    }

    /// Commit every managed unit, then the stage as a stage state
    /// recording the unit commits just made.
    pub fn commit_stage_and_logical_units(&mut self, user_id: &str, message: &str) -> HydraResult<Option<Fingerprint>> {
        self.commit_stage_with_units(user_id, message, CommitKind::Plain)
    }

    pub fn commit_valid_path_stage_and_logical_units(
        &mut self,
        user_id: &str,
        message: &str,
    ) -> HydraResult<Option<Fingerprint>> {
        self.commit_stage_with_units(user_id, message, CommitKind::ValidPath)
    }

    fn commit_stage_with_units(
        &mut self,
        user_id: &str,
        message: &str,
        kind: CommitKind,
    ) -> HydraResult<Option<Fingerprint>> {
        // units whose commit failed are left out of the stage state
        let committed = self.commit_units(user_id, message, kind)?;
        let units = committed.into_iter().collect::<BTreeMap<_, _>>();
        self.commit_with_units(user_id, message, kind, Some(units))
    }

    /// Revert the stage to `hash`; with `full`, also revert each managed
    /// unit to the commit recorded for it.
    pub fn revert_stage(&mut self, hash: &Fingerprint, full: bool) -> HydraResult<bool> {
        if !self.revert_hash(hash, true)? {
            return Ok(false);
        }
        if !full {
            return Ok(true);
        }

        let recorded = self
            .crawler()
            .state(hash)?
            .and_then(|state| state.stage_units().cloned())
            .unwrap_or_default();
        let mut ok = true;
        for (name, unit_hash) in recorded {
            match self.units.get_mut(&name) {
                Some(unit) => {
                    if !unit.revert_hash(&unit_hash, true)? {
                        warn!(unit = %name, commit = unit_hash.short(), "unit revert failed");
                        ok = false;
                    }
                }
                None => warn!(unit = %name, "unit is no longer managed; not reverting it"),
            }
        }
        Ok(ok)
    }

    // ==================== Queries ====================

    /// The stage's status followed by one `name: status` line per unit.
    pub fn status_report(&self) -> String {
        let mut report = format!("stage: {}\n", self.status(true, true));
        for (name, unit) in &self.units {
            report.push_str(&format!("{}: {}\n", name, unit.status(true, true)));
        }
        report
    }

    /// Decode whatever is stored under `hash`.
    pub fn inspect(&self, hash: &Fingerprint) -> HydraResult<Entity> {
        inspect(&self.repo, hash)
    }
}

impl CommittableElement for Stage {
    fn lineage(&self) -> &Lineage {
        &self.lineage
    }

    fn lineage_mut(&mut self) -> &mut Lineage {
        &mut self.lineage
    }

    fn describe(&self) -> String {
        self.record().describe()
    }

    fn write_reference(&self) -> StorageResult<()> {
        self.repo.write_stage_ref(&self.describe())
    }

    /// Current head of every managed unit, for stage commits made without
    /// committing the units.
    fn unit_snapshot(&self) -> Option<BTreeMap<UnitName, Fingerprint>> {
        Some(
            self.units
                .iter()
                .filter_map(|(name, unit)| unit.head().map(|head| (name.clone(), head.clone())))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn name(s: &str) -> UnitName {
        UnitName::new(s).unwrap()
    }

    fn write_unit_file(stage: &mut Stage, unit: &str, file: &str, text: &str) {
        let unit = stage.logical_unit_mut(&name(unit)).unwrap();
        fs::write(unit.root().join(file), text).unwrap();
        unit.add_element(file).unwrap();
    }

    #[test]
    fn test_fresh_stage() {
        let dir = TempDir::new().unwrap();
        let stage = Stage::new(dir.path()).unwrap();
        assert_eq!(stage.managed().count(), 0);
        assert!(stage.head().is_none());
        assert!(stage.repository().stats().unwrap().has_stage);
        assert_eq!(stage.status_report(), "stage: ?\n");
    }

    #[test]
    fn test_unit_lifecycle() {
        let dir = TempDir::new().unwrap();
        let mut stage = Stage::new(dir.path()).unwrap();
        stage.create_logical_unit(name("one")).unwrap();
        stage.create_logical_unit(name("two")).unwrap();
        stage.set_focus(&name("two")).unwrap();
        assert!(matches!(
            stage.set_focus(&name("three")).unwrap_err(),
            HydraError::NotManaged(_)
        ));

        // ignoring the focused unit clears focus but keeps its reference
        assert!(stage.ignore(&name("two")).unwrap());
        assert!(!stage.ignore(&name("two")).unwrap());
        assert_eq!(stage.focus(), None);
        assert_eq!(stage.list_logical_units().unwrap(), vec![name("one"), name("two")]);

        let two = stage.open_logical_unit(name("two")).unwrap();
        assert!(stage.manage(two.clone()).unwrap());
        assert!(!stage.manage(two).unwrap());

        assert!(stage.delete_logical_unit(&name("one")).unwrap());
        assert_eq!(stage.list_logical_units().unwrap(), vec![name("two")]);
        assert_eq!(stage.managed().cloned().collect::<Vec<_>>(), vec![name("two")]);

        let reopened = Stage::new(dir.path()).unwrap();
        assert_eq!(reopened.describe(), stage.describe());
    }

    #[test]
    fn test_reopen_drops_missing_units() {
        let dir = TempDir::new().unwrap();
        let mut stage = Stage::new(dir.path()).unwrap();
        stage.create_logical_unit(name("one")).unwrap();
        stage.create_logical_unit(name("two")).unwrap();
        stage.set_focus(&name("two")).unwrap();
        stage.repository().delete_ref(&name("two")).unwrap();

        let reopened = Stage::new(dir.path()).unwrap();
        assert_eq!(reopened.managed().cloned().collect::<Vec<_>>(), vec![name("one")]);
        assert_eq!(reopened.focus(), None);
    }

    #[test]
    fn test_bulk_commit_and_full_revert() {
        let dir = TempDir::new().unwrap();
        let mut stage = Stage::new(dir.path()).unwrap();
        stage.create_logical_unit(name("one")).unwrap();
        stage.create_logical_unit(name("two")).unwrap();
        write_unit_file(&mut stage, "one", "a.txt", "one v1");
        write_unit_file(&mut stage, "two", "b.txt", "two v1");

        let first = stage.commit_stage_and_logical_units("alice", "first").unwrap().unwrap();
        let Entity::StageState(state) = stage.inspect(&first).unwrap() else {
            panic!("expected a stage state");
        };
        let units = state.stage_units().unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units.get(&name("one")), stage.logical_unit(&name("one")).unwrap().head());

        let one_file = dir.path().join("one/a.txt");
        fs::write(&one_file, "one v2").unwrap();
        let second = stage.commit_stage_and_logical_units("alice", "second").unwrap().unwrap();
        assert_ne!(first, second);

        assert!(stage.revert_stage(&first, true).unwrap());
        assert_eq!(fs::read_to_string(&one_file).unwrap(), "one v1");
        assert_eq!(stage.current(), Some(&first));

        assert!(stage.revert_stage(&second, false).unwrap());
        assert_eq!(fs::read_to_string(&one_file).unwrap(), "one v1");
        assert!(stage.revert_stage(&second, true).unwrap());
        assert_eq!(fs::read_to_string(&one_file).unwrap(), "one v2");
    }

    #[test]
    fn test_commit_logical_units_only() {
        let dir = TempDir::new().unwrap();
        let mut stage = Stage::new(dir.path()).unwrap();
        stage.create_logical_unit(name("one")).unwrap();
        write_unit_file(&mut stage, "one", "a.txt", "alpha");

        let committed = stage.commit_valid_path_logical_units("alice", "units").unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].0, name("one"));
        assert!(stage.head().is_none());
        assert_eq!(stage.status_report(), "stage: ?\none: v v\n");
    }

    #[test]
    fn test_focused_unit() {
        let dir = TempDir::new().unwrap();
        let mut stage = Stage::new(dir.path()).unwrap();
        assert!(stage.focused_unit_mut().is_none());
        stage.create_logical_unit(name("one")).unwrap();
        stage.set_focus(&name("one")).unwrap();
        assert_eq!(stage.focused_unit_mut().unwrap().name(), &name("one"));
        stage.clear_focus().unwrap();
        assert!(stage.focus().is_none());
    }

    #[test]
    fn test_valid_path_bulk_commit() {
        let dir = TempDir::new().unwrap();
        let mut stage = Stage::new(dir.path()).unwrap();
        stage.create_logical_unit(name("one")).unwrap();
        stage.create_logical_unit(name("two")).unwrap();
        write_unit_file(&mut stage, "one", "a.txt", "one v1");
        write_unit_file(&mut stage, "two", "b.txt", "two v1");

        let first = stage.commit_valid_path_stage_and_logical_units("alice", "first").unwrap().unwrap();
        let Entity::StageState(state) = stage.inspect(&first).unwrap() else {
            panic!("expected a stage state");
        };
        assert!(state.is_valid());
        let units = state.stage_units().unwrap();
        assert_eq!(units.len(), 2);
        for (unit_name, hash) in units {
            let unit = stage.logical_unit(unit_name).unwrap();
            assert_eq!(unit.head(), Some(hash));
            let Entity::State(unit_state) = inspect(stage.repository(), hash).unwrap() else {
                panic!("expected a unit state");
            };
            assert!(unit_state.is_valid());
        }

        fs::write(dir.path().join("one/a.txt"), "one v2").unwrap();
        let second = stage.commit_valid_path_stage_and_logical_units("alice", "second").unwrap().unwrap();
        let Entity::StageState(state) = stage.inspect(&second).unwrap() else {
            panic!("expected a stage state");
        };
        assert_eq!(state.valid_path_previous(), Some(&first));
        assert!(stage.history_log(false).unwrap().lines().all(|line| line.contains("[valid]")));
    }

    #[test]
    fn test_full_revert_skips_ignored_units() {
        let dir = TempDir::new().unwrap();
        let mut stage = Stage::new(dir.path()).unwrap();
        stage.create_logical_unit(name("one")).unwrap();
        stage.create_logical_unit(name("two")).unwrap();
        write_unit_file(&mut stage, "one", "a.txt", "one v1");
        write_unit_file(&mut stage, "two", "b.txt", "two v1");
        let first = stage.commit_stage_and_logical_units("alice", "first").unwrap().unwrap();

        fs::write(dir.path().join("one/a.txt"), "one v2").unwrap();
        fs::write(dir.path().join("two/b.txt"), "two v2").unwrap();
        stage.commit_stage_and_logical_units("alice", "second").unwrap().unwrap();
        let two_head = stage.logical_unit(&name("two")).unwrap().head().cloned();

        assert!(stage.ignore(&name("two")).unwrap());
        assert!(stage.revert_stage(&first, true).unwrap());
        assert_eq!(stage.current(), Some(&first));
        assert_eq!(fs::read_to_string(dir.path().join("one/a.txt")).unwrap(), "one v1");
        assert_eq!(fs::read_to_string(dir.path().join("two/b.txt")).unwrap(), "two v2");

        let two = stage.open_logical_unit(name("two")).unwrap();
        assert_eq!(two.current(), two_head.as_ref());
    }

    #[test]
    fn test_failed_unit_commit_left_out_of_stage_state() {
        let dir = TempDir::new().unwrap();
        let mut stage = Stage::new(dir.path()).unwrap();
        stage.create_logical_unit(name("one")).unwrap();
        stage.create_logical_unit(name("two")).unwrap();
        write_unit_file(&mut stage, "one", "a.txt", "alpha");
        write_unit_file(&mut stage, "two", "b.txt", "beta");

        let reference = stage.repository().path().join("units").join("two");
        fs::remove_file(&reference).unwrap();
        fs::create_dir_all(reference.join("blocker")).unwrap();

        let hash = stage.commit_stage_and_logical_units("alice", "snapshot").unwrap().unwrap();
        let Entity::StageState(state) = stage.inspect(&hash).unwrap() else {
            panic!("expected a stage state");
        };
        let units = state.stage_units().unwrap();
        assert_eq!(units.keys().cloned().collect::<Vec<_>>(), vec![name("one")]);
        assert_eq!(units.get(&name("one")), stage.logical_unit(&name("one")).unwrap().head());
    }
}
