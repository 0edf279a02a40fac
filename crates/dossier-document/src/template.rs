//! Required document structure

/// `Overview` top-level section
pub const OVERVIEW: &str = "Overview";
/// `Goals` top-level section
pub const GOALS: &str = "Goals";
/// `Requirements` top-level section
pub const REQUIREMENTS: &str = "Requirements";
/// `User Stories` top-level section
pub const USER_STORIES: &str = "User Stories";
/// `Ideas` top-level section
pub const IDEAS: &str = "Ideas";
/// `Q&A` top-level section
pub const QA: &str = "Q&A";
/// `Changelog` top-level section
pub const CHANGELOG: &str = "Changelog";

/// `Functional Requirements` subsection
pub const FUNCTIONAL: &str = "Functional Requirements";
/// `Non-Functional Requirements` subsection
pub const NON_FUNCTIONAL: &str = "Non-Functional Requirements";

/// Categorical tags for leaf requirements
pub const CATEGORY_TAGS: &[&str] = &["must", "should", "could", "wont"];

/// Placeholder markers, matched case-insensitively
pub const PLACEHOLDERS: &[&str] = &["todo", "tbd", "fixme", "lorem ipsum", "[placeholder]"];

/// One expected top-level section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionSpec {
    /// Heading text
    pub name: &'static str,
    /// Absence is an error rather than a warning
    pub required: bool,
    /// Subsections that must be present
    pub subsections: &'static [&'static str],
}

/// Ordered document template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Template {
    sections: &'static [SectionSpec],
}

const STANDARD: &[SectionSpec] = &[
    SectionSpec {
        name: OVERVIEW,
        required: true,
        subsections: &["Purpose", "Scope"],
    },
    SectionSpec {
        name: GOALS,
        required: false,
        subsections: &[],
    },
    SectionSpec {
        name: REQUIREMENTS,
        required: true,
        subsections: &[FUNCTIONAL, NON_FUNCTIONAL],
    },
    SectionSpec {
        name: USER_STORIES,
        required: true,
        subsections: &[],
    },
    SectionSpec {
        name: IDEAS,
        required: false,
        subsections: &[],
    },
    SectionSpec {
        name: QA,
        required: false,
        subsections: &[],
    },
    SectionSpec {
        name: CHANGELOG,
        required: false,
        subsections: &[],
    },
];

impl Template {
    /// The project-document template
    #[inline]
    #[must_use]
    pub const fn standard() -> Self {
        Self { sections: STANDARD }
    }

    /// Expected sections in order
    #[inline]
    #[must_use]
    pub fn sections(&self) -> &'static [SectionSpec] {
        self.sections
    }

    /// Position of a top-level name in the template, case-insensitive
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.sections
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
    }
}

impl Default for Template {
    fn default() -> Self {
        Self::standard()
    }
}

/// Placeholder marker contained in the text, if any
#[must_use]
pub fn find_placeholder(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    PLACEHOLDERS.iter().copied().find(|p| contains_marker(&lower, p))
}

// Word markers must stand alone so "todos" or "stbd" do not match
fn contains_marker(haystack: &str, marker: &str) -> bool {
    let bracketed = !marker.chars().all(|c| c.is_alphanumeric() || c == ' ');
    haystack.match_indices(marker).any(|(idx, _)| {
        if bracketed {
            return true;
        }
        let before = haystack[..idx].chars().next_back();
        let after = haystack[idx + marker.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
