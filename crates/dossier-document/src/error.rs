//! Error types for document ingestion
//!
//! Provides error handling for:
//! - Input rejection (absent, empty or non-UTF-8 input)
//! - Recoverable structural issues found while parsing
//! - Recoverable template violations found while validating

use serde::{Deserialize, Serialize};
use std::fmt;

/// Malformed or absent input. Parsing stops immediately, no document is produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum InputError {
    /// Input is empty or whitespace only
    #[error("input is empty")]
    Empty,

    /// Input bytes are not valid UTF-8
    #[error("input is not valid UTF-8: {0}")]
    NotUtf8(String),
}

/// Classification of a parse issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParseIssueKind {
    /// Input rejected before any structure was read
    Input,
    /// Heading level jumps more than one level below its open parent
    LevelJump,
    /// Line inside a property block is not `:KEY: value`
    MalformedProperty,
    /// Property block never closed with `:END:`
    UnterminatedPropertyBlock,
    /// Tag contains characters outside the allowed set
    InvalidTag,
    /// Changelog line looks like an entry but does not match `- vN (date): text`
    MalformedChangelogEntry,
    /// Error budget exhausted; parsing stopped early
    TooManyErrors,
}

impl ParseIssueKind {
    /// Whether parsing produced no document at all
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Input)
    }
}

/// A single issue reported by the parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseIssue {
    /// Issue classification
    pub kind: ParseIssueKind,
    /// Human-readable description
    pub message: String,
    /// 1-based source line, when known
    pub line: Option<usize>,
}

impl ParseIssue {
    /// Create an issue at a source line
    #[inline]
    pub fn at(kind: ParseIssueKind, line: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: Some(line),
        }
    }

    /// Create an issue for rejected input
    #[inline]
    #[must_use]
    pub fn input(error: &InputError) -> Self {
        Self {
            kind: ParseIssueKind::Input,
            message: error.to_string(),
            line: None,
        }
    }

    /// Create the terminal "too many errors" issue
    #[inline]
    #[must_use]
    pub fn too_many(limit: usize, line: Option<usize>) -> Self {
        Self {
            kind: ParseIssueKind::TooManyErrors,
            message: format!("too many errors (limit {limit}); parsing stopped"),
            line,
        }
    }
}

impl fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {line}: {:?}: {}", self.kind, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

/// Classification of a validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationKind {
    /// Required top-level section absent (error)
    MissingSection,
    /// Required subsection absent (error)
    MissingSubsection,
    /// Optional top-level section absent (warning)
    MissingOptionalSection,
    /// Placeholder text left in a heading or body (warning)
    Placeholder,
    /// Leaf requirement without exactly one categorical tag (warning)
    TagCount,
    /// Subsection not named by the template (warning)
    UnexpectedSubsection,
    /// Top-level section appears out of template order (warning)
    OutOfOrder,
}

/// Where a validation finding applies
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Location {
    /// Heading path from the top level, e.g. `["Requirements", "Functional Requirements"]`
    pub path: Vec<String>,
    /// 1-based source line, when the section exists
    pub line: Option<usize>,
}

impl Location {
    /// Document-level location
    #[inline]
    #[must_use]
    pub fn document() -> Self {
        Self::default()
    }

    /// Location of an existing section
    #[inline]
    #[must_use]
    pub fn section(path: Vec<String>, line: usize) -> Self {
        Self {
            path,
            line: Some(line),
        }
    }

    /// Location of a section that should exist but does not
    #[inline]
    #[must_use]
    pub fn missing(path: Vec<String>) -> Self {
        Self { path, line: None }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "<document>")?;
        } else {
            write!(f, "{}", self.path.join(" > "))?;
        }
        if let Some(line) = self.line {
            write!(f, " (line {line})")?;
        }
        Ok(())
    }
}

/// A single validation finding (error or warning)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Finding classification
    pub kind: ValidationKind,
    /// Human-readable description
    pub message: String,
    /// Where it applies
    pub location: Location,
}

impl ValidationIssue {
    /// Create new finding
    #[inline]
    pub fn new(kind: ValidationKind, message: impl Into<String>, location: Location) -> Self {
        Self {
            kind,
            message: message.into(),
            location,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}
