//! Dossier Document Layer
//!
//! Ingestion boundary for structured project documents.
//!
//! # Core Operations
//!
//! - **Parse**: Org-style text into an immutable [`Document`] tree plus
//!   recoverable [`ParseIssue`]s
//! - **Validate**: compare the tree against the project [`Template`]
//! - **Extract**: pull requirements, stories, ideas and Q&A records
//! - **Serialize**: render a tree back to text that re-parses identically
//!
//! # Architecture
//!
//! ```text
//! text → DocumentParser → Document → DocumentValidator → ValidationResult
//!                             │
//!                             └────→ extract → ExtractedData
//! ```
//!
//! # Example
//!
//! ```rust
//! use dossier_document::{extract, DocumentParser, DocumentValidator};
//!
//! let outcome = DocumentParser::new().parse("* Requirements\n** Functional Requirements\n*** Login :must:\n");
//! let document = outcome.document.expect("non-empty input");
//! let report = DocumentValidator::new().validate(&document);
//! assert!(!report.is_valid);
//! assert_eq!(extract(&document).requirements.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod changelog;
pub mod error;
pub mod extractor;
pub mod model;
pub mod parser;
pub mod serialize;
pub mod template;
pub mod validator;

pub use changelog::compare_versions;
pub use error::{InputError, Location, ParseIssue, ParseIssueKind, ValidationIssue, ValidationKind};
pub use extractor::{
    extract, ExtractedData, Idea, QuestionAnswer, Requirement, RequirementKind, UserStory,
};
pub use model::{is_reserved_tag, ChangeEntry, Document, Section, SectionRef, RESERVED_TAGS};
pub use parser::{DocumentParser, ParseOutcome, ParserConfig};
pub use serialize::serialize;
pub use template::Template;
pub use validator::{DocumentValidator, ValidationResult};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
