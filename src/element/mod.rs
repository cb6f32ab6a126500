//! the versioned content tree
//!
//! Every workspace file is an [`Artifact`], every tracked directory a
//! [`Container`]. A container's fingerprint is the digest of its sorted
//! child records, so the tree is a Merkle tree:
//!
//! ```text
//!  Container(root) = H("HYDRA_CONTAINER\nELEMENT::>>A::>>a.txt::>>H(a)\nELEMENT::>>C::>>docs::>>H(docs)\n")
//!    ├── Artifact a.txt  = H(bytes of a.txt)
//!    └── Container docs  = H(descriptor of docs)
//!          └── Artifact b.md = H(bytes of b.md)
//! ```
//!
//! Both sync between a workspace path and the repository blob area and
//! report a two-sided [`Status`].

mod artifact;
mod container;

use std::fmt;
use std::path::Path;

pub use artifact::Artifact;
pub use container::Container;

use crate::error::{HydraError, HydraResult};
use crate::storage::{ElementName, Fingerprint};

/// Directory entries never picked up when scanning a workspace.
pub const IGNORED_NAMES: &[&str] = &[".hydra"];

/// Kind of a container member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ElementKind {
    Artifact,
    Container,
}

impl ElementKind {
    /// one-letter code used in container descriptors
    pub fn code(&self) -> &'static str {
        match self {
            ElementKind::Artifact => "A",
            ElementKind::Container => "C",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "A" => Some(ElementKind::Artifact),
            "C" => Some(ElementKind::Container),
            _ => None,
        }
    }
}

/// One side of a status comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// matches the recorded fingerprint
    Valid,
    /// differs from the recorded fingerprint
    Changed,
    /// not there
    Missing,
    /// could not be determined
    Unknown,
}

impl StatusCode {
    pub fn as_char(&self) -> char {
        match self {
            StatusCode::Valid => 'v',
            StatusCode::Changed => 'c',
            StatusCode::Missing => '-',
            StatusCode::Unknown => '?',
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Workspace and repository status of an element.
///
/// Only the requested sides are present. Displays as e.g. `"v v"`,
/// `"c"` or `"?"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    pub workspace: Option<StatusCode>,
    pub repository: Option<StatusCode>,
}

impl Status {
    /// Status of something with no baseline to compare against.
    pub fn undetermined() -> Self {
        Self {
            workspace: Some(StatusCode::Unknown),
            repository: None,
        }
    }

    /// true when every reported side is `v`
    pub fn is_clean(&self) -> bool {
        [self.workspace, self.repository]
            .iter()
            .flatten()
            .all(|code| *code == StatusCode::Valid)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.workspace, self.repository) {
            (Some(ws), Some(repo)) => write!(f, "{} {}", ws, repo),
            (Some(code), None) | (None, Some(code)) => write!(f, "{}", code),
            (None, None) => Ok(()),
        }
    }
}

/// A member of the content tree.
#[derive(Debug, Clone)]
pub enum Element {
    Artifact(Artifact),
    Container(Container),
}

impl Element {
    pub fn kind(&self) -> ElementKind {
        match self {
            Element::Artifact(_) => ElementKind::Artifact,
            Element::Container(_) => ElementKind::Container,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Element::Artifact(a) => a.path(),
            Element::Container(c) => c.path(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        match self {
            Element::Artifact(a) => a.fingerprint().clone(),
            Element::Container(c) => c.fingerprint(),
        }
    }

    /// Store into the blob area. `Ok(false)` on an I/O failure.
    pub fn store(&mut self) -> HydraResult<bool> {
        match self {
            Element::Artifact(a) => a.store(),
            Element::Container(c) => c.store(),
        }
    }

    /// Materialize into the workspace. `Ok(false)` on an I/O failure.
    pub fn retrieve(&self) -> HydraResult<bool> {
        match self {
            Element::Artifact(a) => a.retrieve(),
            Element::Container(c) => c.retrieve(),
        }
    }

    pub fn status(&self, check_workspace: bool, check_repository: bool) -> Status {
        match self {
            Element::Artifact(a) => a.status(check_workspace, check_repository),
            Element::Container(c) => c.status(check_workspace, check_repository),
        }
    }

    pub fn as_artifact(&self) -> Option<&Artifact> {
        match self {
            Element::Artifact(a) => Some(a),
            Element::Container(_) => None,
        }
    }

    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Element::Container(c) => Some(c),
            Element::Artifact(_) => None,
        }
    }

    pub fn as_container_mut(&mut self) -> Option<&mut Container> {
        match self {
            Element::Container(c) => Some(c),
            Element::Artifact(_) => None,
        }
    }
}

impl From<Artifact> for Element {
    fn from(artifact: Artifact) -> Self {
        Element::Artifact(artifact)
    }
}

impl From<Container> for Element {
    fn from(container: Container) -> Self {
        Element::Container(container)
    }
}

/// Name of the last component of `path` as an element name.
pub(crate) fn element_name(path: &Path) -> HydraResult<ElementName> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| HydraError::invalid(format!("no usable file name in {}", path.display())))?;
    Ok(ElementName::new(name)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        let both = Status {
            workspace: Some(StatusCode::Valid),
            repository: Some(StatusCode::Valid),
        };
        assert_eq!(both.to_string(), "v v");
        assert!(both.is_clean());

        let ws_only = Status {
            workspace: Some(StatusCode::Changed),
            repository: None,
        };
        assert_eq!(ws_only.to_string(), "c");
        assert!(!ws_only.is_clean());

        let repo_only = Status {
            workspace: None,
            repository: Some(StatusCode::Missing),
        };
        assert_eq!(repo_only.to_string(), "-");
        assert_eq!(Status::undetermined().to_string(), "?");
        assert_eq!(Status::default().to_string(), "");
    }

    #[test]
    fn test_kind_codes() {
        for kind in [ElementKind::Artifact, ElementKind::Container] {
            assert_eq!(ElementKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ElementKind::from_code("B"), None);
        assert!(ElementKind::Artifact < ElementKind::Container);
    }

    #[test]
    fn test_element_name() {
        assert_eq!(element_name(Path::new("a/b/c.txt")).unwrap().as_str(), "c.txt");
        assert!(element_name(Path::new("/")).is_err());
    }
}
