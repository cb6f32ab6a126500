//! Named reference management.
//!
//! References are the only mutable files in a repository:
//! - `units/{unit}` holds a logical unit's head/current/contents descriptor
//! - `stage` holds the stage's descriptor
//!
//! They are plain UTF-8 text, replaced atomically (temp file + rename).
//! Concurrent writers to the same reference are not guarded; the engine
//! assumes a single process per workspace.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::UnitName;

/// directory holding one reference file per logical unit
pub(crate) const UNITS_DIR: &str = "units";

/// the stage reference file
pub(crate) const STAGE_REF: &str = "stage";

/// Manages the named-reference area of a repository.
pub struct RefManager;

impl RefManager {
    fn unit_path(root: &Path, unit: &UnitName) -> PathBuf {
        root.join(UNITS_DIR).join(unit.as_str())
    }

    /// Read a logical unit's reference descriptor.
    pub fn read_unit(root: &Path, unit: &UnitName) -> StorageResult<String> {
        fs::read_to_string(Self::unit_path(root, unit)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StorageError::RefNotFound(unit.to_string())
            } else {
                StorageError::Io(e)
            }
        })
    }

    /// Replace a logical unit's reference descriptor.
    pub fn write_unit(root: &Path, unit: &UnitName, descriptor: &str) -> StorageResult<()> {
        write_atomically(&Self::unit_path(root, unit), descriptor.as_bytes())
    }

    /// Check if a unit reference exists.
    pub fn unit_exists(root: &Path, unit: &UnitName) -> bool {
        Self::unit_path(root, unit).is_file()
    }

    /// Delete a unit reference.
    ///
    /// Returns false if there was nothing to delete.
    pub fn delete_unit(root: &Path, unit: &UnitName) -> StorageResult<bool> {
        match fs::remove_file(Self::unit_path(root, unit)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// List every unit that has a reference, sorted by name.
    ///
    /// Stray files whose names are not valid unit names (editor backups,
    /// temp files) are skipped.
    pub fn list_units(root: &Path) -> StorageResult<Vec<UnitName>> {
        let dir = root.join(UNITS_DIR);
        let mut result = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(unit) = UnitName::new(name) {
                    result.push(unit);
                }
            }
        }
        result.sort();
        Ok(result)
    }

    /// Read the stage reference, if one has been written.
    pub fn read_stage(root: &Path) -> StorageResult<Option<String>> {
        match fs::read_to_string(root.join(STAGE_REF)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Replace the stage reference.
    pub fn write_stage(root: &Path, descriptor: &str) -> StorageResult<()> {
        write_atomically(&root.join(STAGE_REF), descriptor.as_bytes())
    }
}

/// write `data` next to `target` and rename it into place
pub(crate) fn write_atomically(target: &Path, data: &[u8]) -> StorageResult<()> {
    let dir = target
        .parent()
        .ok_or_else(|| StorageError::Internal(format!("no parent for {}", target.display())))?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(target).map_err(|e| StorageError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(UNITS_DIR)).unwrap();
        dir
    }

    #[test]
    fn test_unit_ref_lifecycle() {
        let dir = setup();
        let unit = UnitName::new("aCard2").unwrap();

        assert!(!RefManager::unit_exists(dir.path(), &unit));
        assert!(matches!(
            RefManager::read_unit(dir.path(), &unit),
            Err(StorageError::RefNotFound(_))
        ));

        RefManager::write_unit(dir.path(), &unit, "first").unwrap();
        RefManager::write_unit(dir.path(), &unit, "second").unwrap();
        assert_eq!(RefManager::read_unit(dir.path(), &unit).unwrap(), "second");

        assert!(RefManager::delete_unit(dir.path(), &unit).unwrap());
        assert!(!RefManager::delete_unit(dir.path(), &unit).unwrap());
    }

    #[test]
    fn test_list_units_sorted_and_filtered() {
        let dir = setup();
        for name in ["b", "a", "c"] {
            RefManager::write_unit(dir.path(), &UnitName::new(name).unwrap(), "x").unwrap();
        }
        fs::write(dir.path().join(UNITS_DIR).join(".tmpXYZ"), "junk").unwrap();

        let names: Vec<_> = RefManager::list_units(dir.path())
            .unwrap()
            .into_iter()
            .map(UnitName::into_string)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_stage_ref() {
        let dir = setup();
        assert_eq!(RefManager::read_stage(dir.path()).unwrap(), None);
        RefManager::write_stage(dir.path(), "HYDRA_STAGE\n").unwrap();
        assert_eq!(
            RefManager::read_stage(dir.path()).unwrap().as_deref(),
            Some("HYDRA_STAGE\n")
        );
    }
}
