//! Per-entity descriptor serializers.
//!
//! [`Entity`] is the tagged union over everything that is stored as
//! descriptor text. Each variant has exactly one serializer; reading an
//! arbitrary descriptor dispatches on its header line.
//!
//! Artifacts have no descriptor of their own: their stored content is the
//! raw file bytes, and their reference data is the [`ChildRecord`] inside the
//! owning container. [`Entity::Artifact`] therefore carries the bytes.

use std::collections::BTreeSet;

use crate::codec::descriptor::{Descriptor, DescriptorWriter, Header, Record, Token};
use crate::element::ElementKind;
use crate::error::{HydraError, HydraResult};
use crate::history::State;
use crate::storage::{ElementName, Fingerprint, Repository, UnitName};

/// One member of a container.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChildRecord {
    pub name: ElementName,
    pub kind: ElementKind,
    pub hash: Fingerprint,
}

impl ChildRecord {
    fn from_record(record: &Record) -> HydraResult<Self> {
        let kind = ElementKind::from_code(record.field(0)).ok_or_else(|| {
            HydraError::invalid(format!("unknown element kind: {:?}", record.field(0)))
        })?;
        let name = ElementName::new(record.field(1))?;
        let hash = record.hash(2)?;
        Ok(Self { name, kind, hash })
    }
}

/// A container's stored content: its sorted child set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerRecord {
    pub children: Vec<ChildRecord>,
}

impl ContainerRecord {
    /// Serialize, sorting children by (name, kind) so the text (and digest)
    /// does not depend on insertion order.
    pub fn describe(&self) -> String {
        let mut children: Vec<&ChildRecord> = self.children.iter().collect();
        children.sort();
        let mut writer = DescriptorWriter::new(Header::Container);
        for child in children {
            writer.record(
                Token::Element,
                &[child.kind.code(), child.name.as_str(), child.hash.as_str()],
            );
        }
        writer.finish()
    }

    pub fn parse(text: &str) -> HydraResult<Self> {
        let descriptor = Descriptor::parse_expecting(text, Header::Container)?;
        Self::from_descriptor(&descriptor)
    }

    fn from_descriptor(descriptor: &Descriptor) -> HydraResult<Self> {
        let children = descriptor
            .records(Token::Element)
            .map(ChildRecord::from_record)
            .collect::<HydraResult<Vec<_>>>()?;
        Ok(Self { children })
    }
}

/// A logical unit's named reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRecord {
    pub name: UnitName,
    pub head: Option<Fingerprint>,
    pub current: Option<Fingerprint>,
    pub contents: Fingerprint,
}

impl UnitRecord {
    pub fn describe(&self) -> String {
        let mut writer = DescriptorWriter::new(Header::LogicalUnit);
        writer
            .record(Token::Name, &[self.name.as_str()])
            .record(Token::Head, &[Fingerprint::optional_to_field(self.head.as_ref())])
            .record(Token::Current, &[Fingerprint::optional_to_field(self.current.as_ref())])
            .record(Token::Contents, &[self.contents.as_str()]);
        writer.finish()
    }

    pub fn parse(text: &str) -> HydraResult<Self> {
        let descriptor = Descriptor::parse_expecting(text, Header::LogicalUnit)?;
        Self::from_descriptor(&descriptor)
    }

    fn from_descriptor(descriptor: &Descriptor) -> HydraResult<Self> {
        let name = UnitName::new(descriptor.single(Token::Name)?.field(0))?;
        let head = descriptor.single(Token::Head)?.optional_hash(0)?;
        let current = descriptor.single(Token::Current)?.optional_hash(0)?;
        let contents = descriptor.single(Token::Contents)?.hash(0)?;
        if head.is_none() && current.is_some() {
            return Err(HydraError::invalid(format!(
                "logical unit {} has a current commit but no head",
                name
            )));
        }
        Ok(Self {
            name,
            head,
            current,
            contents,
        })
    }
}

/// The stage's named reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    pub head: Option<Fingerprint>,
    pub current: Option<Fingerprint>,
    pub contents: Fingerprint,
    pub managed: BTreeSet<UnitName>,
    pub focus: Option<UnitName>,
}

impl StageRecord {
    pub fn describe(&self) -> String {
        let mut writer = DescriptorWriter::new(Header::Stage);
        writer
            .record(Token::Head, &[Fingerprint::optional_to_field(self.head.as_ref())])
            .record(Token::Current, &[Fingerprint::optional_to_field(self.current.as_ref())])
            .record(Token::Contents, &[self.contents.as_str()]);
        for name in &self.managed {
            writer.record(Token::Managed, &[name.as_str()]);
        }
        if let Some(focus) = &self.focus {
            writer.record(Token::Focus, &[focus.as_str()]);
        }
        writer.finish()
    }

    pub fn parse(text: &str) -> HydraResult<Self> {
        let descriptor = Descriptor::parse_expecting(text, Header::Stage)?;
        Self::from_descriptor(&descriptor)
    }

    fn from_descriptor(descriptor: &Descriptor) -> HydraResult<Self> {
        let managed = descriptor
            .records(Token::Managed)
            .map(|r| UnitName::new(r.field(0)).map_err(HydraError::from))
            .collect::<HydraResult<BTreeSet<_>>>()?;
        let focus = descriptor
            .optional(Token::Focus)?
            .map(|r| UnitName::new(r.field(0)))
            .transpose()?;
        Ok(Self {
            head: descriptor.single(Token::Head)?.optional_hash(0)?,
            current: descriptor.single(Token::Current)?.optional_hash(0)?,
            contents: descriptor.single(Token::Contents)?.hash(0)?,
            managed,
            focus,
        })
    }
}

/// Any entity stored in the blob area.
#[derive(Debug, Clone)]
pub enum Entity {
    /// raw file content
    Artifact(Vec<u8>),
    Container(ContainerRecord),
    State(State),
    StageState(State),
    LogicalUnit(UnitRecord),
    Stage(StageRecord),
}

impl Entity {
    /// Parse descriptor text, dispatching on its header.
    pub fn parse(text: &str) -> HydraResult<Self> {
        let descriptor = Descriptor::parse(text)?;
        Ok(match descriptor.header {
            Header::Container => Entity::Container(ContainerRecord::from_descriptor(&descriptor)?),
            Header::State => Entity::State(State::from_descriptor(&descriptor)?),
            Header::StageState => Entity::StageState(State::from_descriptor(&descriptor)?),
            Header::LogicalUnit => Entity::LogicalUnit(UnitRecord::from_descriptor(&descriptor)?),
            Header::Stage => Entity::Stage(StageRecord::from_descriptor(&descriptor)?),
        })
    }

    /// Serialize with the variant's own serializer.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Entity::Artifact(bytes) => bytes.clone(),
            Entity::Container(record) => record.describe().into_bytes(),
            Entity::State(state) | Entity::StageState(state) => state.describe().into_bytes(),
            Entity::LogicalUnit(record) => record.describe().into_bytes(),
            Entity::Stage(record) => record.describe().into_bytes(),
        }
    }

    /// descriptor header; `None` for artifact content
    pub fn header(&self) -> Option<Header> {
        Some(match self {
            Entity::Artifact(_) => return None,
            Entity::Container(_) => Header::Container,
            Entity::State(_) => Header::State,
            Entity::StageState(_) => Header::StageState,
            Entity::LogicalUnit(_) => Header::LogicalUnit,
            Entity::Stage(_) => Header::Stage,
        })
    }
}

/// Look at whatever is stored under `hash`.
///
/// Blobs that do not start with a known header are artifact content. Fails
/// if no blob exists.
pub fn inspect(repo: &Repository, hash: &Fingerprint) -> HydraResult<Entity> {
    let bytes = repo.read_blob(hash)?;
    let text = match std::str::from_utf8(&bytes) {
        Ok(text) if looks_like_descriptor(text) => text,
        _ => return Ok(Entity::Artifact(bytes)),
    };
    let mut entity = Entity::parse(text)?;
    if let Entity::State(state) | Entity::StageState(state) = &mut entity {
        state.assign_hash(hash.clone());
    }
    Ok(entity)
}

fn looks_like_descriptor(text: &str) -> bool {
    text.lines()
        .next()
        .map(|line| Header::parse(line.trim_end()).is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageStrategy;
    use tempfile::TempDir;

    fn child(name: &str, kind: ElementKind, content: &str) -> ChildRecord {
        ChildRecord {
            name: ElementName::new(name).unwrap(),
            kind,
            hash: Fingerprint::of_str(content),
        }
    }

    #[test]
    fn test_container_record_order_independent() {
        let a = ContainerRecord {
            children: vec![
                child("b.txt", ElementKind::Artifact, "b"),
                child("a", ElementKind::Container, "dir"),
            ],
        };
        let b = ContainerRecord {
            children: vec![
                child("a", ElementKind::Container, "dir"),
                child("b.txt", ElementKind::Artifact, "b"),
            ],
        };
        assert_eq!(a.describe(), b.describe());

        let parsed = ContainerRecord::parse(&a.describe()).unwrap();
        assert_eq!(parsed.children.len(), 2);
        assert_eq!(parsed.children[0].name.as_str(), "a");
    }

    #[test]
    fn test_container_record_rejects_bad_kind() {
        let text = format!("HYDRA_CONTAINER\nELEMENT::>>X::>>a::>>{}\n", Fingerprint::empty());
        assert!(ContainerRecord::parse(&text).is_err());
    }

    #[test]
    fn test_unit_record() {
        let record = UnitRecord {
            name: UnitName::new("aCard2").unwrap(),
            head: Some(Fingerprint::of_str("h")),
            current: Some(Fingerprint::of_str("c")),
            contents: Fingerprint::empty(),
        };
        let text = record.describe();
        assert!(text.contains("HEAD::>>"));
        assert_eq!(UnitRecord::parse(&text).unwrap(), record);

        let orphan = UnitRecord {
            head: None,
            ..record
        };
        assert!(UnitRecord::parse(&orphan.describe()).is_err());
    }

    #[test]
    fn test_stage_record() {
        let mut managed = BTreeSet::new();
        managed.insert(UnitName::new("one").unwrap());
        managed.insert(UnitName::new("two").unwrap());
        let record = StageRecord {
            head: None,
            current: None,
            contents: Fingerprint::empty(),
            managed,
            focus: Some(UnitName::new("two").unwrap()),
        };
        let text = record.describe();
        assert!(text.contains("HEAD::>>null"));
        assert_eq!(StageRecord::parse(&text).unwrap(), record);
    }

    #[test]
    fn test_entity_dispatch() {
        let record = ContainerRecord {
            children: vec![child("x", ElementKind::Artifact, "x")],
        };
        let entity = Entity::parse(&record.describe()).unwrap();
        assert_eq!(entity.header(), Some(Header::Container));
        assert_eq!(entity.to_bytes(), record.describe().into_bytes());
    }

    #[test]
    fn test_inspect_distinguishes_raw_content() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::open(dir.path(), StorageStrategy::Zstd).unwrap();

        let raw = Fingerprint::of_str("just text");
        repo.store_blob_bytes(&raw, b"just text").unwrap();
        assert!(matches!(inspect(&repo, &raw).unwrap(), Entity::Artifact(b) if b == b"just text"));

        let record = ContainerRecord {
            children: vec![child("x", ElementKind::Artifact, "x")],
        };
        let text = record.describe();
        let key = Fingerprint::of_str(&text);
        repo.store_blob_bytes(&key, text.as_bytes()).unwrap();
        assert!(matches!(inspect(&repo, &key).unwrap(), Entity::Container(_)));

        assert!(inspect(&repo, &Fingerprint::of_str("absent")).is_err());
    }
}
