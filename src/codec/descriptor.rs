//! Line-oriented descriptor text.
//!
//! Every entity's reference data is stored as UTF-8 text:
//!
//! ```text
//! HYDRA_STATE
//! UUID::>>01J9Z3K8T4W5X6Y7Z8A9B0C1D2
//! CONTENTS::>>9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08
//! META::>>1729270000000::>>alice::>>false::>>first commit
//! PREVIOUS::>>...
//! VALID_PREVIOUS::>>null
//! ```
//!
//! The first line is a fixed per-type header. Each following line is one
//! record: a token and a fixed number of fields joined by `::>>`. The last
//! field is taken verbatim after splitting, so free text may contain the
//! separator. Line breaks and backslashes inside fields are escaped.
//!
//! Unknown tokens are logged and skipped so older readers survive newer
//! writers. A wrong header or a malformed known record is an invalid
//! element.

use std::fmt;

use tracing::warn;

use crate::error::{HydraError, HydraResult};
use crate::storage::{Fingerprint, FIELD_SEPARATOR};

/// Fixed first line of each descriptor type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Header {
    Container,
    State,
    StageState,
    LogicalUnit,
    Stage,
}

impl Header {
    pub fn as_str(&self) -> &'static str {
        match self {
            Header::Container => "HYDRA_CONTAINER",
            Header::State => "HYDRA_STATE",
            Header::StageState => "HYDRA_STAGE_STATE",
            Header::LogicalUnit => "HYDRA_LOGICAL_UNIT",
            Header::Stage => "HYDRA_STAGE",
        }
    }

    pub(crate) fn parse(line: &str) -> Option<Self> {
        match line {
            "HYDRA_CONTAINER" => Some(Header::Container),
            "HYDRA_STATE" => Some(Header::State),
            "HYDRA_STAGE_STATE" => Some(Header::StageState),
            "HYDRA_LOGICAL_UNIT" => Some(Header::LogicalUnit),
            "HYDRA_STAGE" => Some(Header::Stage),
            _ => None,
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    /// container membership: kind, name, hash
    Element,
    Uuid,
    Contents,
    /// timestamp, user, valid, message
    Meta,
    Previous,
    ValidPrevious,
    /// stage state membership: unit name, unit commit hash
    Unit,
    Name,
    Head,
    Current,
    Managed,
    Focus,
}

impl Token {
    pub fn as_str(&self) -> &'static str {
        match self {
            Token::Element => "ELEMENT",
            Token::Uuid => "UUID",
            Token::Contents => "CONTENTS",
            Token::Meta => "META",
            Token::Previous => "PREVIOUS",
            Token::ValidPrevious => "VALID_PREVIOUS",
            Token::Unit => "UNIT",
            Token::Name => "NAME",
            Token::Head => "HEAD",
            Token::Current => "CURRENT",
            Token::Managed => "MANAGED",
            Token::Focus => "FOCUS",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "ELEMENT" => Token::Element,
            "UUID" => Token::Uuid,
            "CONTENTS" => Token::Contents,
            "META" => Token::Meta,
            "PREVIOUS" => Token::Previous,
            "VALID_PREVIOUS" => Token::ValidPrevious,
            "UNIT" => Token::Unit,
            "NAME" => Token::Name,
            "HEAD" => Token::Head,
            "CURRENT" => Token::Current,
            "MANAGED" => Token::Managed,
            "FOCUS" => Token::Focus,
            _ => return None,
        })
    }

    /// number of fields following the token
    pub fn arity(&self) -> usize {
        match self {
            Token::Element => 3,
            Token::Meta => 4,
            Token::Unit => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed record line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub token: Token,
    pub fields: Vec<String>,
}

impl Record {
    /// field `i`; arity was validated at parse time
    pub fn field(&self, i: usize) -> &str {
        self.fields.get(i).map(String::as_str).unwrap_or_default()
    }

    /// parse field `i` as a mandatory hash
    pub fn hash(&self, i: usize) -> HydraResult<Fingerprint> {
        parse_hash(self.token, self.field(i))
    }

    /// parse field `i` as a hash that may be `null`
    pub fn optional_hash(&self, i: usize) -> HydraResult<Option<Fingerprint>> {
        Fingerprint::parse_optional(self.field(i)).map_err(|e| {
            HydraError::invalid(format!("{} record has a malformed hash: {}", self.token, e))
        })
    }
}

fn parse_hash(token: Token, field: &str) -> HydraResult<Fingerprint> {
    Fingerprint::parse(field)
        .map_err(|e| HydraError::invalid(format!("{} record has a malformed hash: {}", token, e)))
}

/// Builds descriptor text.
#[derive(Debug, Clone)]
pub struct DescriptorWriter {
    text: String,
}

impl DescriptorWriter {
    pub fn new(header: Header) -> Self {
        let mut text = String::with_capacity(256);
        text.push_str(header.as_str());
        text.push('\n');
        Self { text }
    }

    /// Append one record. `fields.len()` must equal the token's arity.
    pub fn record(&mut self, token: Token, fields: &[&str]) -> &mut Self {
        debug_assert_eq!(fields.len(), token.arity(), "wrong arity for {}", token);
        self.text.push_str(token.as_str());
        for field in fields {
            self.text.push_str(FIELD_SEPARATOR);
            escape_into(field, &mut self.text);
        }
        self.text.push('\n');
        self
    }

    pub fn finish(self) -> String {
        self.text
    }
}

/// A parsed descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub header: Header,
    pub records: Vec<Record>,
}

impl Descriptor {
    /// Parse descriptor text.
    pub fn parse(text: &str) -> HydraResult<Self> {
        let mut lines = text.lines();
        let first = lines
            .next()
            .ok_or_else(|| HydraError::invalid("empty descriptor"))?;
        let header = Header::parse(first.trim_end())
            .ok_or_else(|| HydraError::invalid(format!("unknown descriptor header: {:?}", first)))?;

        let mut records = Vec::new();
        for (number, line) in lines.enumerate() {
            if line.is_empty() {
                continue;
            }
            let (token_text, rest) = match line.split_once(FIELD_SEPARATOR) {
                Some((t, r)) => (t, Some(r)),
                None => (line, None),
            };
            let Some(token) = Token::parse(token_text) else {
                warn!(%header, line = number + 2, token = token_text, "skipping unrecognized descriptor line");
                continue;
            };
            let rest = rest.ok_or_else(|| {
                HydraError::invalid(format!("{} record on line {} has no fields", token, number + 2))
            })?;
            let raw: Vec<&str> = rest.splitn(token.arity(), FIELD_SEPARATOR).collect();
            if raw.len() != token.arity() {
                return Err(HydraError::invalid(format!(
                    "{} record on line {} has {} fields, expected {}",
                    token,
                    number + 2,
                    raw.len(),
                    token.arity()
                )));
            }
            let fields = raw.into_iter().map(unescape).collect::<HydraResult<Vec<_>>>()?;
            records.push(Record { token, fields });
        }

        Ok(Self { header, records })
    }

    /// Parse and require a specific header.
    pub fn parse_expecting(text: &str, expected: Header) -> HydraResult<Self> {
        let descriptor = Self::parse(text)?;
        if descriptor.header != expected {
            return Err(HydraError::invalid(format!(
                "expected {} descriptor, found {}",
                expected, descriptor.header
            )));
        }
        Ok(descriptor)
    }

    /// all records with `token`, in file order
    pub fn records(&self, token: Token) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(move |r| r.token == token)
    }

    /// the record with `token`, if present; more than one is invalid
    pub fn optional(&self, token: Token) -> HydraResult<Option<&Record>> {
        let mut matches = self.records(token);
        let first = matches.next();
        if matches.next().is_some() {
            return Err(HydraError::invalid(format!(
                "{} descriptor has more than one {} record",
                self.header, token
            )));
        }
        Ok(first)
    }

    /// exactly one record with `token`
    pub fn single(&self, token: Token) -> HydraResult<&Record> {
        self.optional(token)?.ok_or_else(|| {
            HydraError::invalid(format!("{} descriptor is missing its {} record", self.header, token))
        })
    }
}

fn escape_into(field: &str, out: &mut String) {
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
}

fn unescape(field: &str) -> HydraResult<String> {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            other => {
                return Err(HydraError::invalid(format!(
                    "invalid escape sequence in descriptor field: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}
