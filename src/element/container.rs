//! A versioned directory.
//!
//! A container owns a set of children keyed by (name, kind). Its fingerprint
//! is never cached: it is derived from the children on demand, so a change
//! anywhere below is always reflected at the top.
//!
//! Storing is bottom-up and self-healing: children whose files or
//! directories have vanished from the workspace are dropped, the rest are
//! stored, and the container's own descriptor is written last so a stored
//! descriptor never references a missing blob.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::codec::{ChildRecord, ContainerRecord};
use crate::element::{element_name, Artifact, Element, ElementKind, Status, StatusCode, IGNORED_NAMES};
use crate::error::{HydraError, HydraResult};
use crate::storage::{ElementName, Fingerprint, Repository};

type ChildKey = (ElementName, ElementKind);

/// A workspace directory and its tracked children.
#[derive(Debug, Clone)]
pub struct Container {
    path: PathBuf,
    children: BTreeMap<ChildKey, Element>,
    repo: Repository,
}

impl Container {
    /// An empty container for `path`.
    pub fn new(repo: Repository, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            children: BTreeMap::new(),
            repo,
        }
    }

    /// Load the child set stored under `hash`.
    ///
    /// Children are not materialized; call [`Container::retrieve`] for that.
    pub fn load(repo: Repository, path: impl Into<PathBuf>, hash: &Fingerprint) -> HydraResult<Self> {
        let mut container = Self::new(repo, path);
        if *hash == Fingerprint::empty() {
            return Ok(container);
        }

        let text = container.repo.read_blob_text(hash)?;
        let record = ContainerRecord::parse(&text)?;
        for child in record.children {
            let child_path = container.path.join(child.name.as_str());
            let element: Element = match child.kind {
                ElementKind::Artifact => {
                    Artifact::from_repository(container.repo.clone(), child_path, child.hash).into()
                }
                ElementKind::Container => Self::load(container.repo.clone(), child_path, &child.hash)?.into(),
            };
            container.children.insert((child.name, child.kind), element);
        }

        let actual = container.fingerprint();
        if actual != *hash {
            return Err(HydraError::invalid(format!(
                "container {} re-digests to {}",
                hash.short(),
                actual.short()
            )));
        }
        Ok(container)
    }

    /// Build a container from what is on disk under `dir`, recursively.
    pub fn scan(repo: Repository, dir: impl Into<PathBuf>) -> HydraResult<Self> {
        let mut container = Self::new(repo, dir);
        let mut entries = fs::read_dir(&container.path)?.collect::<io::Result<Vec<_>>>()?;
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                warn!(path = %path.display(), "skipping entry with a non utf-8 name");
                continue;
            };
            if IGNORED_NAMES.contains(&name.as_str()) {
                continue;
            }
            if let Err(e) = ElementName::new(name) {
                warn!(path = %path.display(), error = %e, "skipping entry with an unusable name");
                continue;
            }
            let element: Element = if path.is_dir() {
                Self::scan(container.repo.clone(), path)?.into()
            } else if path.is_file() {
                Artifact::new(container.repo.clone(), path)?.into()
            } else {
                continue;
            };
            container.add_element(element)?;
        }
        Ok(container)
    }

    // ==================== Accessors ====================

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Children in (name, kind) order.
    pub fn children(&self) -> impl Iterator<Item = (&ElementName, &Element)> {
        self.children.iter().map(|((name, _), element)| (name, element))
    }

    /// Child records as they would be stored.
    pub fn record(&self) -> ContainerRecord {
        ContainerRecord {
            children: self
                .children
                .iter()
                .map(|((name, kind), element)| ChildRecord {
                    name: name.clone(),
                    kind: *kind,
                    hash: element.fingerprint(),
                })
                .collect(),
        }
    }

    /// Descriptor text of this container.
    pub fn describe(&self) -> String {
        self.record().describe()
    }

    /// Merkle digest of the child set; [`Fingerprint::empty`] when empty.
    pub fn fingerprint(&self) -> Fingerprint {
        if self.children.is_empty() {
            return Fingerprint::empty();
        }
        Fingerprint::of_str(&self.describe())
    }

    // ==================== Membership ====================

    /// Add a direct child. Returns false if one with the same name and kind
    /// is already present.
    pub fn add_element(&mut self, element: impl Into<Element>) -> HydraResult<bool> {
        let element = element.into();
        if element.path().parent() != Some(self.path.as_path()) {
            return Err(HydraError::invalid(format!(
                "{} is not directly inside {}",
                element.path().display(),
                self.path.display()
            )));
        }
        let key = (element_name(element.path())?, element.kind());
        if self.children.contains_key(&key) {
            return Ok(false);
        }
        self.children.insert(key, element);
        Ok(true)
    }

    /// Remove a direct child. Returns false if it was absent.
    pub fn remove_element(&mut self, name: &ElementName, kind: ElementKind) -> bool {
        self.children.remove(&(name.clone(), kind)).is_some()
    }

    /// Scan `dir` (a direct subdirectory) and add it with everything below.
    pub fn add_container_and_contents(&mut self, dir: impl AsRef<Path>) -> HydraResult<bool> {
        let scanned = Self::scan(self.repo.clone(), dir.as_ref())?;
        self.add_element(scanned)
    }

    /// Add the workspace file or directory at `relative`, creating
    /// intermediate containers as needed.
    pub fn add_path(&mut self, relative: impl AsRef<Path>) -> HydraResult<bool> {
        let segments = segments(relative.as_ref())?;
        let Some((last, parents)) = segments.split_last() else {
            return Err(HydraError::invalid("cannot add the container to itself"));
        };

        let mut container = self;
        for name in parents {
            let key = (name.clone(), ElementKind::Container);
            if !container.children.contains_key(&key) {
                let dir = container.path.join(name.as_str());
                if !dir.is_dir() {
                    return Err(HydraError::invalid(format!("{} is not a directory", dir.display())));
                }
                let child = Self::new(container.repo.clone(), dir);
                container.children.insert(key.clone(), child.into());
            }
            container = container
                .children
                .get_mut(&key)
                .and_then(Element::as_container_mut)
                .ok_or_else(|| HydraError::Internal(format!("lost container {}", name)))?;
        }

        let target = container.path.join(last.as_str());
        if target.is_dir() {
            container.add_container_and_contents(&target)
        } else if target.is_file() {
            let artifact = Artifact::new(container.repo.clone(), target)?;
            container.add_element(artifact)
        } else {
            Err(HydraError::invalid(format!("{} does not exist", target.display())))
        }
    }

    /// Remove whatever is tracked at `relative`. Returns false if nothing
    /// was.
    pub fn remove_path(&mut self, relative: impl AsRef<Path>) -> HydraResult<bool> {
        let segments = segments(relative.as_ref())?;
        let Some((last, parents)) = segments.split_last() else {
            return Err(HydraError::invalid("cannot remove the container from itself"));
        };
        let Some(parent) = self.container_mut(parents) else {
            return Ok(false);
        };
        let artifact = parent.remove_element(last, ElementKind::Artifact);
        let container = parent.remove_element(last, ElementKind::Container);
        Ok(artifact || container)
    }

    /// Resolve a nested element. `None` on any unmatched segment.
    pub fn get_element(&self, relative: impl AsRef<Path>) -> Option<&Element> {
        let segments = segments(relative.as_ref()).ok()?;
        let (last, parents) = segments.split_last()?;
        let mut container = self;
        for name in parents {
            container = container
                .children
                .get(&(name.clone(), ElementKind::Container))?
                .as_container()?;
        }
        container
            .children
            .get(&(last.clone(), ElementKind::Artifact))
            .or_else(|| container.children.get(&(last.clone(), ElementKind::Container)))
    }

    fn container_mut(&mut self, names: &[ElementName]) -> Option<&mut Container> {
        let mut container = self;
        for name in names {
            container = container
                .children
                .get_mut(&(name.clone(), ElementKind::Container))?
                .as_container_mut()?;
        }
        Some(container)
    }

    // ==================== Sync ====================

    /// Store everything below, then the own descriptor.
    ///
    /// Children whose workspace backing vanished are dropped first.
    /// Returns `Ok(false)` if any blob could not be written; the own
    /// descriptor is then not written either.
    pub fn store(&mut self) -> HydraResult<bool> {
        self.children.retain(|(name, _), child| {
            let present = match child {
                Element::Artifact(a) => a.path().is_file(),
                Element::Container(c) => c.path().is_dir(),
            };
            if !present {
                warn!(name = %name, path = %child.path().display(), "dropping vanished element");
            }
            present
        });

        let mut ok = true;
        for child in self.children.values_mut() {
            if let Element::Artifact(artifact) = child {
                artifact.refresh_fingerprint();
            }
            ok &= child.store()?;
        }
        if !ok {
            return Ok(false);
        }
        if self.children.is_empty() {
            return Ok(true);
        }

        let text = self.describe();
        let hash = Fingerprint::of_str(&text);
        match self.repo.store_blob_bytes(&hash, text.as_bytes()) {
            Ok(written) => {
                if written {
                    debug!(hash = hash.short(), path = %self.path.display(), "stored container");
                }
                Ok(true)
            }
            Err(e) if e.is_io() => {
                warn!(path = %self.path.display(), error = %e, "failed to store container");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Materialize every child into the workspace, best effort.
    pub fn retrieve(&self) -> HydraResult<bool> {
        if let Err(e) = fs::create_dir_all(&self.path) {
            warn!(path = %self.path.display(), error = %e, "cannot create directory");
            return Ok(false);
        }
        let mut ok = true;
        for child in self.children.values() {
            ok &= child.retrieve()?;
        }
        Ok(ok)
    }

    pub fn status(&self, check_workspace: bool, check_repository: bool) -> Status {
        Status {
            workspace: check_workspace.then(|| self.workspace_status()),
            repository: check_repository.then(|| self.repository_status()),
        }
    }

    fn workspace_status(&self) -> StatusCode {
        if !self.path.is_dir() {
            return StatusCode::Missing;
        }
        match self.workspace_fingerprint() {
            Ok(actual) if actual == self.fingerprint() => StatusCode::Valid,
            Ok(_) => StatusCode::Changed,
            Err(_) => StatusCode::Unknown,
        }
    }

    fn repository_status(&self) -> StatusCode {
        if self.children.is_empty() || self.repo.blob_exists(&self.fingerprint()) {
            StatusCode::Valid
        } else {
            StatusCode::Missing
        }
    }

    /// The fingerprint [`Container::store`] would produce right now.
    pub fn workspace_fingerprint(&self) -> io::Result<Fingerprint> {
        let mut record = ContainerRecord::default();
        for ((name, kind), child) in &self.children {
            let hash = match child {
                Element::Artifact(a) if a.path().is_file() => Fingerprint::of_file(a.path())?,
                Element::Container(c) if c.path().is_dir() => Some(c.workspace_fingerprint()?),
                _ => None,
            };
            if let Some(hash) = hash {
                record.children.push(ChildRecord {
                    name: name.clone(),
                    kind: *kind,
                    hash,
                });
            }
        }
        if record.children.is_empty() {
            return Ok(Fingerprint::empty());
        }
        Ok(Fingerprint::of_str(&record.describe()))
    }
}

/// Split a relative path into validated element names.
fn segments(relative: &Path) -> HydraResult<Vec<ElementName>> {
    let mut names = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| HydraError::invalid(format!("non utf-8 path: {}", relative.display())))?;
                names.push(ElementName::new(part)?);
            }
            Component::CurDir => {}
            _ => {
                return Err(HydraError::invalid(format!(
                    "element paths must be relative and normalized: {}",
                    relative.display()
                )))
            }
        }
    }
    Ok(names)
}
