//! Parsed document tree
//!
//! [`Document`] and [`Section`] are produced only by the parser and expose
//! read-only accessors, so a parsed tree cannot change underneath consumers.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// Marker tags that apply to their own section only and are never inherited
pub const RESERVED_TAGS: &[&str] = &["changelog", "noexport", "archive"];

/// Check whether a tag is a reserved marker (case-insensitive)
#[inline]
#[must_use]
pub fn is_reserved_tag(tag: &str) -> bool {
    RESERVED_TAGS.iter().any(|r| r.eq_ignore_ascii_case(tag))
}

/// One heading-delimited node of the document tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub(crate) level: usize,
    pub(crate) heading: String,
    pub(crate) body: String,
    pub(crate) tags: IndexSet<String>,
    pub(crate) properties: IndexMap<String, String>,
    pub(crate) children: Vec<Section>,
    pub(crate) source_line: usize,
}

impl Section {
    pub(crate) fn new(level: usize, heading: String, tags: IndexSet<String>, line: usize) -> Self {
        Self {
            level,
            heading,
            body: String::new(),
            tags,
            properties: IndexMap::new(),
            children: Vec::new(),
            source_line: line,
        }
    }

    /// Heading depth (number of leading markers, starting at 1)
    #[inline]
    #[must_use]
    pub fn level(&self) -> usize {
        self.level
    }

    /// Heading text without markers or tag block
    #[inline]
    #[must_use]
    pub fn heading(&self) -> &str {
        &self.heading
    }

    /// Body text between this heading and the next, property drawer excluded
    #[inline]
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Own tags, in source order
    #[inline]
    #[must_use]
    pub fn tags(&self) -> &IndexSet<String> {
        &self.tags
    }

    /// Own properties; keys are upper-cased
    #[inline]
    #[must_use]
    pub fn properties(&self) -> &IndexMap<String, String> {
        &self.properties
    }

    /// Property lookup, case-insensitive on the key
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .get(&key.to_ascii_uppercase())
            .map(String::as_str)
    }

    /// Direct subsections, in source order
    #[inline]
    #[must_use]
    pub fn children(&self) -> &[Section] {
        &self.children
    }

    /// 1-based line of the heading
    #[inline]
    #[must_use]
    pub fn source_line(&self) -> usize {
        self.source_line
    }

    /// Whether the section has no subsections
    #[inline]
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Own tag check, case-insensitive
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Heading comparison, case-insensitive and whitespace-trimmed
    #[must_use]
    pub fn is_named(&self, name: &str) -> bool {
        self.heading.trim().eq_ignore_ascii_case(name.trim())
    }

    /// First direct child with the given heading
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Section> {
        self.children.iter().find(|c| c.is_named(name))
    }

    /// Effective tags given the tags inherited from ancestors
    ///
    /// Inherited tags come first, followed by own tags (reserved ones included).
    #[must_use]
    pub fn effective_tags(&self, inherited: &IndexSet<String>) -> IndexSet<String> {
        let mut tags = inherited.clone();
        tags.extend(self.tags.iter().cloned());
        tags
    }

    /// This section and its descendants in document order, treating it as a root
    #[must_use]
    pub fn flatten(&self) -> Vec<SectionRef<'_>> {
        let mut out = Vec::new();
        flatten_into(self, &IndexSet::new(), &mut Vec::new(), &mut out);
        out
    }

    /// Tags this section passes on to its children
    #[must_use]
    pub fn inheritable_tags(&self, inherited: &IndexSet<String>) -> IndexSet<String> {
        let mut tags = inherited.clone();
        tags.extend(self.tags.iter().filter(|t| !is_reserved_tag(t)).cloned());
        tags
    }
}

/// One changelog entry: `- vN (date): summary` plus indented sub-items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Version label without the leading `v`
    pub version: String,
    /// Date text as written
    pub date: String,
    /// Entry description
    pub summary: String,
    /// Indented sub-items
    pub changes: Vec<String>,
}

/// Section paired with its position in the tree and its effective tags
#[derive(Debug, Clone)]
pub struct SectionRef<'a> {
    /// The section itself
    pub section: &'a Section,
    /// Headings from the top level down to this section (inclusive)
    pub path: Vec<&'a str>,
    /// Own tags plus non-reserved ancestor tags
    pub effective_tags: IndexSet<String>,
}

impl SectionRef<'_> {
    /// Owned copy of the heading path
    #[must_use]
    pub fn owned_path(&self) -> Vec<String> {
        self.path.iter().map(|s| (*s).to_string()).collect()
    }
}

/// Parsed structured document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub(crate) title: Option<String>,
    pub(crate) metadata: IndexMap<String, String>,
    pub(crate) sections: Vec<Section>,
    pub(crate) version: String,
    pub(crate) change_history: Vec<ChangeEntry>,
}

impl Document {
    /// Title from `#+TITLE`
    #[inline]
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Metadata from `#+KEY: value` lines and document-level property drawers
    #[inline]
    #[must_use]
    pub fn metadata(&self) -> &IndexMap<String, String> {
        &self.metadata
    }

    /// Metadata lookup, case-insensitive on the key
    #[must_use]
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(&key.to_ascii_uppercase())
            .map(String::as_str)
    }

    /// Top-level sections
    #[inline]
    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Resolved document version
    #[inline]
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Changelog entries in source order
    #[inline]
    #[must_use]
    pub fn change_history(&self) -> &[ChangeEntry] {
        &self.change_history
    }

    /// First top-level section with the given heading
    #[must_use]
    pub fn find_top_level(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.is_named(name))
    }

    /// Every section in document order, with path and effective tags
    #[must_use]
    pub fn flatten(&self) -> Vec<SectionRef<'_>> {
        let mut out = Vec::new();
        let root = IndexSet::new();
        for section in &self.sections {
            flatten_into(section, &root, &mut Vec::new(), &mut out);
        }
        out
    }

    /// Total number of sections at every depth
    #[must_use]
    pub fn section_count(&self) -> usize {
        fn count(sections: &[Section]) -> usize {
            sections.iter().map(|s| 1 + count(&s.children)).sum()
        }
        count(&self.sections)
    }
}

fn flatten_into<'a>(
    section: &'a Section,
    inherited: &IndexSet<String>,
    path: &mut Vec<&'a str>,
    out: &mut Vec<SectionRef<'a>>,
) {
    path.push(section.heading.as_str());
    out.push(SectionRef {
        section,
        path: path.clone(),
        effective_tags: section.effective_tags(inherited),
    });

    let passed = section.inheritable_tags(inherited);
    for child in &section.children {
        flatten_into(child, &passed, path, out);
    }
    path.pop();
}
