//! Validated names used as reference keys and container child names.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Field separator used by the descriptor format. Names may never contain it.
pub(crate) const FIELD_SEPARATOR: &str = "::>>";

/// A validated logical unit name.
///
/// Unit names double as file names in the named-reference area and as the
/// workspace sub-directory the unit is materialized into, so they follow the
/// same rules as element names plus a length limit.
///
/// Valid names:
/// - 1-128 characters
/// - no path separators, no descriptor separator, no line breaks
/// - not `.` or `..`
/// - must not start with `.` (reserved for repository internals)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitName(String);

impl UnitName {
    /// create a new UnitName, validating the input
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        validate_component(&name)?;
        if name.len() > 128 {
            return Err(InvalidNameError::TooLong(name.len()));
        }
        if name.starts_with('.') {
            return Err(InvalidNameError::Reserved(name));
        }
        Ok(Self(name))
    }

    /// get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// convert to owned String
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for UnitName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated name of a single element inside a container (one path segment).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementName(String);

impl ElementName {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        validate_component(&name)?;
        Ok(Self(name))
    }

    /// get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ElementName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// shared rules for anything that becomes a single path segment
fn validate_component(name: &str) -> Result<(), InvalidNameError> {
    if name.is_empty() {
        return Err(InvalidNameError::Empty);
    }
    if name == "." || name == ".." {
        return Err(InvalidNameError::InvalidPath(name.to_string()));
    }
    if name.contains(FIELD_SEPARATOR) {
        return Err(InvalidNameError::ContainsSeparator(name.to_string()));
    }
    for (i, c) in name.chars().enumerate() {
        if c == '/' || c == '\\' || c == '\n' || c == '\r' || c == '\0' {
            return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
        }
    }
    Ok(())
}

/// error type for invalid names (units, elements)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidCharacter { char: char, position: usize },
    ContainsSeparator(String),
    Reserved(String),
    InvalidPath(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character {:?} at position {}", char, position)
            }
            Self::ContainsSeparator(name) => {
                write!(f, "'{}' contains the reserved sequence '{}'", name, FIELD_SEPARATOR)
            }
            Self::Reserved(name) => write!(f, "'{}' is a reserved name", name),
            Self::InvalidPath(path) => write!(f, "invalid path: '{}'", path),
        }
    }
}

impl std::error::Error for InvalidNameError {}
