//! An independently versioned, named subtree of the workspace.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::codec::UnitRecord;
use crate::committable::{CommittableElement, Lineage};
use crate::error::{HydraError, HydraResult};
use crate::storage::{Repository, StorageError, StorageResult, UnitName};

/// A logical unit: contents rooted at `<workspace>/<name>` plus a history.
///
/// Its reference lives under the unit's name in the repository.
#[derive(Debug, Clone)]
pub struct LogicalUnit {
    name: UnitName,
    lineage: Lineage,
}

impl LogicalUnit {
    /// Create a unit with no history and write its reference.
    pub fn create(repo: Repository, workspace_root: impl AsRef<Path>, name: UnitName) -> HydraResult<Self> {
        if repo.ref_exists(&name) {
            return Err(HydraError::UnitAlreadyExists(name));
        }
        let root = Self::root_for(workspace_root.as_ref(), &name);
        fs::create_dir_all(&root)?;

        let unit = Self {
            lineage: Lineage::new(repo, &root),
            name,
        };
        unit.write_reference()?;
        info!(unit = %unit.name, "created logical unit");
        Ok(unit)
    }

    /// Open an existing unit from its reference.
    pub fn open(repo: Repository, workspace_root: impl AsRef<Path>, name: UnitName) -> HydraResult<Self> {
        let text = match repo.read_ref(&name) {
            Ok(text) => text,
            Err(StorageError::RefNotFound(_)) => return Err(HydraError::UnitNotFound(name)),
            Err(e) => return Err(e.into()),
        };
        let record = UnitRecord::parse(&text)?;
        if record.name != name {
            return Err(HydraError::invalid(format!(
                "reference {} describes unit {}",
                name, record.name
            )));
        }
        let root = Self::root_for(workspace_root.as_ref(), &name);
        let lineage = Lineage::restore(repo, &root, record.head, record.current, record.contents)?;
        Ok(Self { name, lineage })
    }

    fn root_for(workspace_root: &Path, name: &UnitName) -> PathBuf {
        workspace_root.join(name.as_str())
    }

    pub fn name(&self) -> &UnitName {
        &self.name
    }

    /// Workspace directory holding this unit's contents.
    pub fn root(&self) -> &Path {
        self.lineage.contents().path()
    }

    pub fn record(&self) -> UnitRecord {
        UnitRecord {
            name: self.name.clone(),
            head: self.lineage.head().cloned(),
            current: self.lineage.current().cloned(),
            contents: self.lineage.stored_contents().clone(),
        }
    }
}

impl CommittableElement for LogicalUnit {
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
        self.lineage.repository().write_ref(&self.name, &self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::State;
    use crate::storage::StorageStrategy;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::open(dir.path().join(".hydra"), StorageStrategy::Zstd).unwrap();
        (dir, repo)
    }

    fn name(s: &str) -> UnitName {
        UnitName::new(s).unwrap()
    }

    #[test]
    fn test_create_and_open() {
        let (dir, repo) = setup();
        let unit = LogicalUnit::create(repo.clone(), dir.path(), name("cards")).unwrap();
        assert!(unit.root().is_dir());
        assert!(unit.head().is_none());
        assert_eq!(unit.status(true, true).to_string(), "?");

        let reopened = LogicalUnit::open(repo.clone(), dir.path(), name("cards")).unwrap();
        assert_eq!(reopened.describe(), unit.describe());

        let err = LogicalUnit::create(repo.clone(), dir.path(), name("cards")).unwrap_err();
        assert!(matches!(err, HydraError::UnitAlreadyExists(_)));
        let err = LogicalUnit::open(repo, dir.path(), name("other")).unwrap_err();
        assert!(matches!(err, HydraError::UnitNotFound(_)));
    }

    #[test]
    fn test_commit_persists_reference() {
        let (dir, repo) = setup();
        let mut unit = LogicalUnit::create(repo.clone(), dir.path(), name("cards")).unwrap();
        fs::write(unit.root().join("a.txt"), "alpha").unwrap();
        assert!(unit.add_element("a.txt").unwrap());
        assert!(!unit.add_element("a.txt").unwrap());

        let hash = unit.commit("alice", "first").unwrap().unwrap();
        assert!(repo.blob_exists(&hash));
        assert_eq!(unit.status(true, true).to_string(), "v v");

        let reopened = LogicalUnit::open(repo, dir.path(), name("cards")).unwrap();
        assert_eq!(reopened.describe(), unit.describe());
        assert_eq!(reopened.head(), Some(&hash));
        assert!(reopened.get_element("a.txt").is_some());
    }

    #[test]
    fn test_staging_is_recorded_before_commit() {
        let (dir, repo) = setup();
        let mut unit = LogicalUnit::create(repo.clone(), dir.path(), name("cards")).unwrap();
        fs::create_dir_all(unit.root().join("deck")).unwrap();
        fs::write(unit.root().join("deck/b.txt"), "beta").unwrap();
        assert!(unit.add_element("deck").unwrap());

        let reopened = LogicalUnit::open(repo.clone(), dir.path(), name("cards")).unwrap();
        assert!(reopened.get_element("deck/b.txt").is_some());
        assert!(reopened.head().is_none());

        assert!(unit.remove_element("deck").unwrap());
        assert!(!unit.remove_element("deck").unwrap());
        let reopened = LogicalUnit::open(repo, dir.path(), name("cards")).unwrap();
        assert!(reopened.contents().is_empty());
    }

    #[test]
    fn test_edit_shows_changed() {
        let (dir, repo) = setup();
        let mut unit = LogicalUnit::create(repo, dir.path(), name("cards")).unwrap();
        fs::write(unit.root().join("a.txt"), "alpha").unwrap();
        unit.add_element("a.txt").unwrap();
        unit.commit("alice", "first").unwrap().unwrap();

        fs::write(unit.root().join("a.txt"), "edited").unwrap();
        assert!(unit.status(true, true).to_string().starts_with('c'));
    }

    #[test]
    fn test_history_log() {
        let (dir, repo) = setup();
        let mut unit = LogicalUnit::create(repo, dir.path(), name("cards")).unwrap();
        fs::write(unit.root().join("a.txt"), "alpha").unwrap();
        unit.add_element("a.txt").unwrap();
        let first = unit.commit_valid_path("alice", "first").unwrap().unwrap();
        let second = unit.commit("alice", "second\nmore detail").unwrap().unwrap();

        let log = unit.history_log(true).unwrap();
        let lines: Vec<_> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[invalid] second"));
        assert!(lines[1].contains("[valid] first"));

        assert_eq!(unit.list_previous_commits(&second).unwrap(), vec![first.clone()]);
        assert_eq!(unit.list_following_commits(&first).unwrap(), vec![second]);
        let history = unit.history(false).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_temporary_commit_and_relative_revert() {
        let (dir, repo) = setup();
        let mut unit = LogicalUnit::create(repo.clone(), dir.path(), name("cards")).unwrap();
        let file = unit.root().join("a.txt");
        fs::write(&file, "one").unwrap();
        unit.add_element("a.txt").unwrap();
        let first = unit.commit("alice", "first").unwrap().unwrap();
        fs::write(&file, "two").unwrap();
        let second = unit.commit("alice", "second").unwrap().unwrap();
        let temp = unit.commit_temporary("alice", "wip").unwrap().unwrap();

        let state = State::load(&repo, &temp).unwrap();
        assert!(state.is_temporary());
        assert_eq!(state.previous(), &[second.clone()]);
        assert!(unit.history_log(true).unwrap().lines().next().unwrap().contains("[temporary] wip"));

        assert!(unit.revert_relative(1, 2).unwrap());
        assert_eq!(unit.current(), Some(&first));
        assert_eq!(fs::read_to_string(&file).unwrap(), "one");

        // negative distances walk back toward head
        assert!(unit.revert_relative(1, -1).unwrap());
        assert_eq!(unit.current(), Some(&second));
        assert_eq!(fs::read_to_string(&file).unwrap(), "two");
        assert!(unit.revert_relative(1, -1).unwrap());
        assert_eq!(unit.current(), Some(&temp));
        assert!(!unit.revert_relative(1, -1).unwrap());
        assert!(!unit.revert_relative(0, 1).unwrap());
        assert_eq!(unit.current(), Some(&temp));

        let reopened = LogicalUnit::open(repo, dir.path(), name("cards")).unwrap();
        assert_eq!(reopened.current(), Some(&temp));
    }

    #[test]
    fn test_rejected_user_id_leaves_history_readable() {
        let (dir, repo) = setup();
        let mut unit = LogicalUnit::create(repo, dir.path(), name("cards")).unwrap();
        fs::write(unit.root().join("a.txt"), "alpha").unwrap();
        unit.add_element("a.txt").unwrap();
        let first = unit.commit("alice", "first").unwrap().unwrap();

        assert!(unit.commit("team::>>alice", "msg").unwrap_err().is_invalid_element());
        assert_eq!(unit.head(), Some(&first));
        assert_eq!(unit.history_log(true).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_unwritable_reference_reports_failure() {
        let (dir, repo) = setup();
        let mut unit = LogicalUnit::create(repo.clone(), dir.path(), name("cards")).unwrap();
        fs::write(unit.root().join("a.txt"), "alpha").unwrap();
        unit.add_element("a.txt").unwrap();

        let reference = repo.path().join("units").join("cards");
        fs::remove_file(&reference).unwrap();
        fs::create_dir_all(reference.join("blocker")).unwrap();

        assert_eq!(unit.commit("alice", "first").unwrap(), None);
        assert!(reference.is_dir());
        let head = unit.head().cloned().unwrap();
        assert!(!unit.revert_hash(&head, true).unwrap());
        assert!(!unit.commit_update(&head, "alice", "renamed").unwrap());

        fs::remove_dir_all(&reference).unwrap();
        let second = unit.commit("alice", "second").unwrap().unwrap();
        let reopened = LogicalUnit::open(repo, dir.path(), name("cards")).unwrap();
        assert_eq!(reopened.head(), Some(&second));
        assert_eq!(reopened.list_previous_commits(&second).unwrap(), vec![head]);
    }
}
