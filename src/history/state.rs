//! Commit graph nodes.
//!
//! A [`State`] is one node of a committable element's history DAG. Edges are
//! hash references (`previous`, `valid_path_previous`), never live pointers,
//! so a history is just an arena of states keyed by hash.
//!
//! The hash of a state is the digest of its first serialization. The ULID is
//! part of that text, so two commits of identical contents stay distinct.
//! After the first store the hash is fixed; later rewrites (commit update,
//! commit insert splicing) overwrite the blob under the same key.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use ulid::Ulid;

use crate::codec::{Descriptor, DescriptorWriter, Header, Token};
use crate::error::{HydraError, HydraResult};
use crate::storage::{Fingerprint, Repository, StorageResult, UnitName, FIELD_SEPARATOR};

/// A commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    hash: Option<Fingerprint>,
    uuid: Ulid,
    contents: Option<Fingerprint>,
    previous: Vec<Fingerprint>,
    valid_path_previous: Option<Fingerprint>,
    valid: bool,
    timestamp: DateTime<Utc>,
    user_id: String,
    message: String,
    /// present for stage states: unit name -> that unit's commit hash
    stage_units: Option<BTreeMap<UnitName, Fingerprint>>,
}

impl State {
    /// Create a new, unstored state.
    ///
    /// `contents` of `None` makes a temporary (placeholder) state. Fails if
    /// `user_id` is empty.
    pub fn new(
        previous: Vec<Fingerprint>,
        contents: Option<Fingerprint>,
        user_id: impl Into<String>,
        message: impl Into<String>,
    ) -> HydraResult<Self> {
        Self::with_uuid(previous, contents, user_id, message, Ulid::new())
    }

    /// Like [`State::new`] with an explicit uuid.
    pub fn with_uuid(
        previous: Vec<Fingerprint>,
        contents: Option<Fingerprint>,
        user_id: impl Into<String>,
        message: impl Into<String>,
        uuid: Ulid,
    ) -> HydraResult<Self> {
        let user_id = user_id.into();
        check_user_id(&user_id)?;
        if uuid.is_nil() {
            return Err(HydraError::invalid("state requires a non-nil uuid"));
        }
        let mut state = Self {
            hash: None,
            uuid,
            contents,
            previous: Vec::with_capacity(previous.len()),
            valid_path_previous: None,
            valid: false,
            timestamp: Utc::now(),
            user_id,
            message: message.into(),
            stage_units: None,
        };
        for parent in previous {
            state.add_previous(parent);
        }
        Ok(state)
    }

    /// Turn this into a stage state recording each unit's commit.
    pub fn with_stage_units(mut self, units: BTreeMap<UnitName, Fingerprint>) -> Self {
        self.stage_units = Some(units);
        self
    }

    pub fn with_validity(mut self, valid: bool) -> Self {
        self.valid = valid;
        self
    }

    pub fn with_valid_path_previous(mut self, previous: Option<Fingerprint>) -> Self {
        self.valid_path_previous = previous;
        self
    }

    // ==================== Accessors ====================

    /// Hash under which this state is stored; `None` before the first store.
    pub fn hash(&self) -> Option<&Fingerprint> {
        self.hash.as_ref()
    }

    pub fn uuid(&self) -> Ulid {
        self.uuid
    }

    pub fn contents(&self) -> Option<&Fingerprint> {
        self.contents.as_ref()
    }

    pub fn previous(&self) -> &[Fingerprint] {
        &self.previous
    }

    pub fn valid_path_previous(&self) -> Option<&Fingerprint> {
        self.valid_path_previous.as_ref()
    }

    pub fn set_valid_path_previous(&mut self, previous: Option<Fingerprint>) {
        self.valid_path_previous = previous;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// A placeholder commit with no contents.
    pub fn is_temporary(&self) -> bool {
        self.contents.is_none()
    }

    pub fn is_stage_state(&self) -> bool {
        self.stage_units.is_some()
    }

    pub fn stage_units(&self) -> Option<&BTreeMap<UnitName, Fingerprint>> {
        self.stage_units.as_ref()
    }

    /// Add a parent. Returns false if it is already one.
    pub fn add_previous(&mut self, parent: Fingerprint) -> bool {
        if self.previous.contains(&parent) {
            return false;
        }
        self.previous.push(parent);
        true
    }

    /// Remove a parent. Returns false if it was not one.
    pub fn remove_previous(&mut self, parent: &Fingerprint) -> bool {
        let before = self.previous.len();
        self.previous.retain(|p| p != parent);
        self.previous.len() != before
    }

    /// Replace the user, message and contents of an existing commit.
    pub(crate) fn amend(
        &mut self,
        user_id: impl Into<String>,
        message: impl Into<String>,
        contents: Option<Fingerprint>,
    ) -> HydraResult<()> {
        let user_id = user_id.into();
        check_user_id(&user_id)?;
        self.user_id = user_id;
        self.message = message.into();
        self.contents = contents;
        Ok(())
    }

    // ==================== Serialization ====================

    /// Canonical descriptor text.
    pub fn describe(&self) -> String {
        let header = if self.is_stage_state() {
            Header::StageState
        } else {
            Header::State
        };
        let uuid = self.uuid.to_string();
        let millis = self.timestamp.timestamp_millis().to_string();
        let valid = if self.valid { "true" } else { "false" };

        let mut writer = DescriptorWriter::new(header);
        writer
            .record(Token::Uuid, &[&uuid])
            .record(Token::Contents, &[Fingerprint::optional_to_field(self.contents.as_ref())])
            .record(Token::Meta, &[&millis, &self.user_id, valid, &self.message]);
        for parent in &self.previous {
            writer.record(Token::Previous, &[parent.as_str()]);
        }
        writer.record(
            Token::ValidPrevious,
            &[Fingerprint::optional_to_field(self.valid_path_previous.as_ref())],
        );
        if let Some(units) = &self.stage_units {
            for (name, hash) in units {
                writer.record(Token::Unit, &[name.as_str(), hash.as_str()]);
            }
        }
        writer.finish()
    }

    /// Human readable one-line summary.
    pub fn log_entry(&self) -> String {
        let hash = self.hash.as_ref().map(Fingerprint::short).unwrap_or("--------");
        let kind = if self.is_temporary() {
            "temporary"
        } else if self.valid {
            "valid"
        } else {
            "invalid"
        };
        let summary = self.message.lines().next().unwrap_or_default();
        format!(
            "{} {} {} [{}] {}",
            hash,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.user_id,
            kind,
            summary
        )
    }

    pub(crate) fn from_descriptor(descriptor: &Descriptor) -> HydraResult<Self> {
        let uuid_field = descriptor.single(Token::Uuid)?.field(0);
        let uuid = Ulid::from_string(uuid_field)
            .map_err(|e| HydraError::invalid(format!("malformed state uuid {:?}: {}", uuid_field, e)))?;

        let meta = descriptor.single(Token::Meta)?;
        let millis: i64 = meta
            .field(0)
            .parse()
            .map_err(|_| HydraError::invalid(format!("malformed state timestamp: {:?}", meta.field(0))))?;
        let timestamp = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| HydraError::invalid(format!("state timestamp out of range: {}", millis)))?;
        let valid = match meta.field(2) {
            "true" => true,
            "false" => false,
            other => return Err(HydraError::invalid(format!("malformed validity flag: {:?}", other))),
        };

        let previous = descriptor
            .records(Token::Previous)
            .map(|r| r.hash(0))
            .collect::<HydraResult<Vec<_>>>()?;

        let stage_units = if descriptor.header == Header::StageState {
            let mut units = BTreeMap::new();
            for record in descriptor.records(Token::Unit) {
                units.insert(UnitName::new(record.field(0))?, record.hash(1)?);
            }
            Some(units)
        } else {
            None
        };

        let mut state = Self::with_uuid(
            previous,
            descriptor.single(Token::Contents)?.optional_hash(0)?,
            meta.field(1),
            meta.field(3),
            uuid,
        )?;
        state.timestamp = timestamp;
        state.valid = valid;
        state.valid_path_previous = descriptor.single(Token::ValidPrevious)?.optional_hash(0)?;
        state.stage_units = stage_units;
        Ok(state)
    }

    /// Parse descriptor text stored under `hash`.
    pub fn parse(text: &str, hash: Fingerprint) -> HydraResult<Self> {
        let descriptor = Descriptor::parse(text)?;
        if !matches!(descriptor.header, Header::State | Header::StageState) {
            return Err(HydraError::invalid(format!(
                "expected a state descriptor under {}, found {}",
                hash.short(),
                descriptor.header
            )));
        }
        let mut state = Self::from_descriptor(&descriptor)?;
        state.hash = Some(hash);
        Ok(state)
    }

    pub(crate) fn assign_hash(&mut self, hash: Fingerprint) {
        self.hash = Some(hash);
    }

    // ==================== Persistence ====================

    /// Load the state stored under `hash`.
    pub fn load(repo: &Repository, hash: &Fingerprint) -> HydraResult<Self> {
        let text = repo.read_blob_text(hash)?;
        Self::parse(&text, hash.clone())
    }

    /// Store the state, fixing its hash on the first call.
    ///
    /// Later calls are no-ops; use [`State::rewrite`] to persist changes to
    /// an already stored state.
    pub fn store(&mut self, repo: &Repository) -> StorageResult<Fingerprint> {
        if let Some(hash) = &self.hash {
            return Ok(hash.clone());
        }
        let text = self.describe();
        let hash = Fingerprint::of_str(&text);
        repo.store_blob_bytes(&hash, text.as_bytes())?;
        self.hash = Some(hash.clone());
        Ok(hash)
    }

    /// Overwrite the stored blob with the current field values, keeping
    /// the hash.
    pub fn rewrite(&self, repo: &Repository) -> HydraResult<()> {
        let hash = self
            .hash
            .as_ref()
            .ok_or_else(|| HydraError::Internal("cannot rewrite a state that was never stored".into()))?;
        repo.overwrite_blob(hash, self.describe().as_bytes())?;
        Ok(())
    }
}

/// The user id is a middle field of the META record, so it may not
/// contain the field separator.
fn check_user_id(user_id: &str) -> HydraResult<()> {
    if user_id.is_empty() {
        return Err(HydraError::invalid("state requires a user id"));
    }
    if user_id.contains(FIELD_SEPARATOR) {
        return Err(HydraError::invalid(format!(
            "user id {:?} contains the reserved sequence {:?}",
            user_id, FIELD_SEPARATOR
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageStrategy;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::open(dir.path(), StorageStrategy::Zstd).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_new_state() {
        let contents = Fingerprint::of_str("c");
        let state = State::new(vec![], Some(contents.clone()), "alice", "first").unwrap();
        assert!(state.hash().is_none());
        assert!(!state.is_temporary());
        assert!(!state.is_stage_state());
        assert_eq!(state.contents(), Some(&contents));
        assert!(State::new(vec![], None, "", "msg").is_err());
        assert!(State::with_uuid(vec![], None, "a", "m", Ulid::nil()).is_err());
    }

    #[test]
    fn test_previous_is_a_set() {
        let a = Fingerprint::of_str("a");
        let b = Fingerprint::of_str("b");
        let mut state = State::new(vec![a.clone(), a.clone(), b.clone()], None, "u", "m").unwrap();
        assert_eq!(state.previous(), &[a.clone(), b.clone()]);
        assert!(!state.add_previous(b.clone()));
        assert!(state.remove_previous(&a));
        assert!(!state.remove_previous(&a));
        assert_eq!(state.previous(), &[b]);
    }

    #[test]
    fn test_identical_commits_are_distinct() {
        let (_dir, repo) = setup();
        let contents = Some(Fingerprint::of_str("same"));
        let mut one = State::new(vec![], contents.clone(), "u", "m").unwrap();
        let mut two = State::new(vec![], contents, "u", "m").unwrap();
        assert_ne!(one.store(&repo).unwrap(), two.store(&repo).unwrap());
    }

    #[test]
    fn test_store_and_load() {
        let (_dir, repo) = setup();
        let parent = Fingerprint::of_str("parent");
        let mut state = State::new(vec![parent.clone()], Some(Fingerprint::empty()), "bob", "two\nlines")
            .unwrap()
            .with_validity(true)
            .with_valid_path_previous(Some(parent.clone()));
        let hash = state.store(&repo).unwrap();
        assert_eq!(hash, Fingerprint::of_str(&state.describe()));
        // store is idempotent once the hash is fixed
        assert_eq!(state.store(&repo).unwrap(), hash);

        let loaded = State::load(&repo, &hash).unwrap();
        assert_eq!(loaded.hash(), Some(&hash));
        assert_eq!(loaded.uuid(), state.uuid());
        assert_eq!(loaded.message(), "two\nlines");
        assert_eq!(loaded.previous(), &[parent.clone()]);
        assert_eq!(loaded.valid_path_previous(), Some(&parent));
        assert!(loaded.is_valid());
        assert_eq!(loaded.timestamp().timestamp_millis(), state.timestamp().timestamp_millis());
        assert_eq!(loaded.describe(), state.describe());
    }

    #[test]
    fn test_rewrite_keeps_hash() {
        let (_dir, repo) = setup();
        let mut state = State::new(vec![], None, "u", "before").unwrap();
        let hash = state.store(&repo).unwrap();

        state.amend("v", "after", Some(Fingerprint::empty())).unwrap();
        state.rewrite(&repo).unwrap();

        let loaded = State::load(&repo, &hash).unwrap();
        assert_eq!(loaded.message(), "after");
        assert_eq!(loaded.user_id(), "v");
        assert!(!loaded.is_temporary());
        assert!(State::new(vec![], None, "u", "m").unwrap().rewrite(&repo).is_err());
    }

    #[test]
    fn test_user_id_cannot_split_meta() {
        let (_dir, repo) = setup();
        let err = State::new(vec![], None, "team::>>alice", "m").unwrap_err();
        assert!(err.is_invalid_element());

        let mut state = State::new(vec![], Some(Fingerprint::empty()), "team:alice", "a ::>> b").unwrap();
        assert!(state.amend("team::>>bob", "m", None).is_err());
        assert_eq!(state.user_id(), "team:alice");

        let hash = state.store(&repo).unwrap();
        let loaded = State::load(&repo, &hash).unwrap();
        assert_eq!(loaded.user_id(), "team:alice");
        assert_eq!(loaded.message(), "a ::>> b");

        let log = crate::history::HistoryCrawler::new(repo, Some(hash)).history_log(true).unwrap();
        assert!(log.contains("team:alice [invalid] a ::>> b"), "log was {:?}", log);
    }

    #[test]
    fn test_stage_state() {
        let (_dir, repo) = setup();
        let mut units = BTreeMap::new();
        units.insert(UnitName::new("one").unwrap(), Fingerprint::of_str("1"));
        let mut state = State::new(vec![], Some(Fingerprint::empty()), "u", "m")
            .unwrap()
            .with_stage_units(units.clone());
        assert!(state.describe().starts_with("HYDRA_STAGE_STATE\n"));
        let hash = state.store(&repo).unwrap();

        let loaded = State::load(&repo, &hash).unwrap();
        assert!(loaded.is_stage_state());
        assert_eq!(loaded.stage_units(), Some(&units));
    }

    #[test]
    fn test_log_entry() {
        let (_dir, repo) = setup();
        let mut state = State::new(vec![], None, "carol", "summary\ndetails").unwrap();
        assert!(state.log_entry().starts_with("-------- "));
        let hash = state.store(&repo).unwrap();
        let entry = state.log_entry();
        assert!(entry.starts_with(hash.short()));
        assert!(entry.ends_with("carol [temporary] summary"));
    }

    #[test]
    fn test_parse_rejects_other_entities() {
        let text = "HYDRA_CONTAINER\n";
        assert!(State::parse(text, Fingerprint::of_str(text)).is_err());
        let missing_meta = "HYDRA_STATE\nUUID::>>01ARZ3NDEKTSV4RRFFQ69G5FAV\nCONTENTS::>>null\nVALID_PREVIOUS::>>null\n";
        assert!(State::parse(missing_meta, Fingerprint::of_str(missing_meta)).is_err());
    }
}
