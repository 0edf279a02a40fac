//! Template validation
//!
//! Compares a parsed [`Document`] against a [`Template`]:
//! - Missing required sections and subsections are errors
//! - Missing optional sections, placeholders, categorical tag counts,
//!   unexpected subsections and ordering are warnings
//!
//! Validation is read-only and never fails.

use crate::error::{Location, ValidationIssue, ValidationKind};
use crate::model::{Document, Section, SectionRef};
use crate::template::{self, SectionSpec, Template};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Points deducted per error
pub const ERROR_PENALTY: u32 = 10;
/// Points deducted per warning
pub const WARNING_PENALTY: u32 = 2;

/// Outcome of validating one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// No errors were found
    pub is_valid: bool,
    /// Blocking findings
    pub errors: Vec<ValidationIssue>,
    /// Advisory findings
    pub warnings: Vec<ValidationIssue>,
    /// Quality score in `0..=100`
    pub score: u8,
}

impl ValidationResult {
    fn from_findings(errors: Vec<ValidationIssue>, warnings: Vec<ValidationIssue>) -> Self {
        let score = score(errors.len(), warnings.len());
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            score,
        }
    }

    /// Errors and warnings together
    pub fn issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.errors.iter().chain(self.warnings.iter())
    }

    /// Findings of one kind
    pub fn of_kind(&self, kind: ValidationKind) -> impl Iterator<Item = &ValidationIssue> {
        self.issues().filter(move |i| i.kind == kind)
    }
}

/// `max(0, 100 - 10 * errors - 2 * warnings)`
#[must_use]
pub fn score(errors: usize, warnings: usize) -> u8 {
    let penalty = u32::try_from(errors)
        .unwrap_or(u32::MAX)
        .saturating_mul(ERROR_PENALTY)
        .saturating_add(
            u32::try_from(warnings)
                .unwrap_or(u32::MAX)
                .saturating_mul(WARNING_PENALTY),
        );
    u8::try_from(100u32.saturating_sub(penalty)).unwrap_or(0)
}

/// Validates documents against a template
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentValidator {
    template: Template,
}

impl DocumentValidator {
    /// Validator for the standard template
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validator for an explicit template
    #[inline]
    #[must_use]
    pub fn with_template(template: Template) -> Self {
        Self { template }
    }

    /// Validate a document
    #[must_use]
    pub fn validate(&self, document: &Document) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for expected in self.template.sections() {
            match document.find_top_level(expected.name) {
                Some(section) => check_subsections(expected, section, &mut errors, &mut warnings),
                None if expected.required => errors.push(ValidationIssue::new(
                    ValidationKind::MissingSection,
                    format!("required section '{}' is missing", expected.name),
                    Location::missing(vec![expected.name.to_string()]),
                )),
                None => warnings.push(ValidationIssue::new(
                    ValidationKind::MissingOptionalSection,
                    format!("optional section '{}' is missing", expected.name),
                    Location::missing(vec![expected.name.to_string()]),
                )),
            }
        }

        self.check_order(document, &mut warnings);
        check_placeholders(document, &mut warnings);
        check_requirement_tags(document, &mut warnings);

        let result = ValidationResult::from_findings(errors, warnings);
        tracing::debug!(
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            score = result.score,
            "validated document"
        );
        result
    }

    fn check_order(&self, document: &Document, warnings: &mut Vec<ValidationIssue>) {
        let mut seen: IndexSet<usize> = IndexSet::new();
        let mut highest: Option<usize> = None;

        for section in document.sections() {
            let Some(pos) = self.template.position(section.heading()) else {
                continue;
            };
            if !seen.insert(pos) {
                continue;
            }
            match highest {
                Some(h) if pos < h => warnings.push(ValidationIssue::new(
                    ValidationKind::OutOfOrder,
                    format!(
                        "section '{}' should appear before '{}'",
                        section.heading(),
                        self.template.sections()[h].name
                    ),
                    Location::section(vec![section.heading().to_string()], section.source_line()),
                )),
                _ => highest = Some(pos),
            }
        }
    }
}

fn check_subsections(
    expected: &SectionSpec,
    section: &Section,
    errors: &mut Vec<ValidationIssue>,
    warnings: &mut Vec<ValidationIssue>,
) {
    if expected.subsections.is_empty() {
        return;
    }

    for name in expected.subsections {
        if section.child(name).is_none() {
            errors.push(ValidationIssue::new(
                ValidationKind::MissingSubsection,
                format!("required subsection '{name}' is missing under '{}'", expected.name),
                Location::missing(vec![section.heading().to_string(), (*name).to_string()]),
            ));
        }
    }

    for child in section.children() {
        let known = expected.subsections.iter().any(|n| child.is_named(n));
        if !known {
            warnings.push(ValidationIssue::new(
                ValidationKind::UnexpectedSubsection,
                format!("unexpected subsection '{}' under '{}'", child.heading(), expected.name),
                Location::section(
                    vec![section.heading().to_string(), child.heading().to_string()],
                    child.source_line(),
                ),
            ));
        }
    }
}

fn check_placeholders(document: &Document, warnings: &mut Vec<ValidationIssue>) {
    for entry in document.flatten() {
        let section = entry.section;
        let found = template::find_placeholder(section.heading())
            .or_else(|| template::find_placeholder(section.body()));
        if let Some(marker) = found {
            warnings.push(ValidationIssue::new(
                ValidationKind::Placeholder,
                format!("placeholder text '{marker}' in '{}'", section.heading()),
                Location::section(entry.owned_path(), section.source_line()),
            ));
        }
    }
}

fn check_requirement_tags(document: &Document, warnings: &mut Vec<ValidationIssue>) {
    for entry in requirement_leaves(document) {
        let count = entry
            .effective_tags
            .iter()
            .filter(|t| template::CATEGORY_TAGS.iter().any(|c| c.eq_ignore_ascii_case(t)))
            .count();
        if count != 1 {
            warnings.push(ValidationIssue::new(
                ValidationKind::TagCount,
                format!(
                    "requirement '{}' has {count} categorical tags, expected exactly one of {}",
                    entry.section.heading(),
                    template::CATEGORY_TAGS.join("/")
                ),
                Location::section(entry.owned_path(), entry.section.source_line()),
            ));
        }
    }
}

/// Leaf sections below the first `Requirements` section
///
/// Leaves named after the requirement subsections are containers without
/// entries, not requirements.
pub(crate) fn requirement_leaves(document: &Document) -> Vec<SectionRef<'_>> {
    document
        .find_top_level(template::REQUIREMENTS)
        .map(|root| {
            root.flatten()
                .into_iter()
                .filter(|e| e.path.len() > 1 && e.section.is_leaf())
                .filter(|e| !is_subsection_name(e.section.heading()))
                .collect()
        })
        .unwrap_or_default()
}

fn is_subsection_name(heading: &str) -> bool {
    [template::FUNCTIONAL, template::NON_FUNCTIONAL]
        .iter()
        .any(|n| heading.trim().eq_ignore_ascii_case(n))
}
