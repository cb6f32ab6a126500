//! Content digests.
//!
//! A [`Fingerprint`] is the key of every object in the blob area and the
//! value compared for change detection. It is a lowercase SHA-256 hex
//! string, so it can be written verbatim into descriptors and file names.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Length of a hex encoded digest.
pub const FINGERPRINT_LEN: usize = 64;

/// Descriptor literal meaning "no reference".
pub const NULL_LITERAL: &str = "null";

const READ_BUFFER: usize = 64 * 1024;

/// Immutable content digest. Equality is digest equality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Digest of raw bytes.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Digest of an explicit string.
    pub fn of_str(text: &str) -> Self {
        Self::of_bytes(text.as_bytes())
    }

    /// The canonical digest of empty content.
    ///
    /// Directories fingerprint to this value; their real digest is computed
    /// by the container that owns them.
    pub fn empty() -> Self {
        Self::of_bytes(&[])
    }

    /// Stream a reader through the digest with a fixed buffer.
    pub fn of_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; READ_BUFFER];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Digest of a file's content.
    ///
    /// A missing file yields `Ok(None)` so callers can decide what absence
    /// means; a directory yields [`Fingerprint::empty`].
    pub fn of_file(path: &Path) -> io::Result<Option<Self>> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if metadata.is_dir() {
            return Ok(Some(Self::empty()));
        }
        let file = File::open(path)?;
        Self::of_reader(file).map(Some)
    }

    /// Recompute the digest of `path` and compare it with this one.
    ///
    /// Never mutates anything; a missing file simply does not match.
    pub fn check_fingerprint(&self, path: &Path) -> io::Result<bool> {
        Ok(Self::of_file(path)?.as_ref() == Some(self))
    }

    /// Parse from a hexadecimal string.
    pub fn parse(hex_str: &str) -> Result<Self, hex::FromHexError> {
        if hex_str.len() != FINGERPRINT_LEN {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let bytes = hex::decode(hex_str)?;
        Ok(Self(hex::encode(bytes)))
    }

    /// Parse a descriptor field where the literal `null` means "absent".
    pub fn parse_optional(field: &str) -> Result<Option<Self>, hex::FromHexError> {
        if field == NULL_LITERAL {
            Ok(None)
        } else {
            Self::parse(field).map(Some)
        }
    }

    /// Render an optional fingerprint as a descriptor field.
    pub fn optional_to_field(value: Option<&Fingerprint>) -> &str {
        value.map(Fingerprint::as_str).unwrap_or(NULL_LITERAL)
    }

    /// the hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// short form of the digest for log lines
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
