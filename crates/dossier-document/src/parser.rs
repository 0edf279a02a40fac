//! Structured document parser
//!
//! Line-oriented parser for Org-style project documents:
//!
//! ```text
//! #+TITLE: Example
//! * Requirements
//! ** Functional Requirements
//! *** Login                                  :auth:must:
//! :PROPERTIES:
//! :ID: REQ-1
//! :END:
//! Users sign in with email.
//! ```
//!
//! Parsing is best-effort: structural problems are collected as
//! [`ParseIssue`]s next to the partial [`Document`]. Only unusable input
//! (empty, non-UTF-8) produces no document.

use crate::changelog;
use crate::error::{InputError, ParseIssue, ParseIssueKind};
use crate::model::{ChangeEntry, Document, Section};
use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use std::sync::OnceLock;

/// Default error budget before parsing stops
pub const DEFAULT_MAX_ERRORS: usize = 50;

/// Parser configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserConfig {
    /// Issues collected before parsing stops with `TooManyErrors`
    pub max_errors: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_errors: DEFAULT_MAX_ERRORS,
        }
    }
}

impl ParserConfig {
    /// With error budget
    #[inline]
    #[must_use]
    pub fn with_max_errors(mut self, max_errors: usize) -> Self {
        self.max_errors = max_errors.max(1);
        self
    }
}

/// Result of a parse: best-effort document plus every issue found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    /// Parsed document; `None` only when input was rejected
    pub document: Option<Document>,
    /// Issues in the order they were found
    pub issues: Vec<ParseIssue>,
}

impl ParseOutcome {
    fn rejected(error: &InputError) -> Self {
        Self {
            document: None,
            issues: vec![ParseIssue::input(error)],
        }
    }

    /// Input was rejected outright
    #[inline]
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.document.is_none()
    }

    /// Parsing hit the error budget
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.kind == ParseIssueKind::TooManyErrors)
    }

    /// Issues of one kind
    pub fn issues_of(&self, kind: ParseIssueKind) -> impl Iterator<Item = &ParseIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }
}

/// Document parser
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentParser {
    config: ParserConfig,
}

impl DocumentParser {
    /// Create parser with default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create parser with explicit configuration
    #[inline]
    #[must_use]
    pub fn with_config(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Parser configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Parse raw bytes, rejecting non-UTF-8 input
    #[must_use]
    pub fn parse_bytes(&self, input: &[u8]) -> ParseOutcome {
        match std::str::from_utf8(input) {
            Ok(text) => self.parse(text),
            Err(e) => ParseOutcome::rejected(&InputError::NotUtf8(e.to_string())),
        }
    }

    /// Parse document text
    #[must_use]
    pub fn parse(&self, text: &str) -> ParseOutcome {
        if text.trim().is_empty() {
            return ParseOutcome::rejected(&InputError::Empty);
        }

        let mut state = ParseState::new(self.config.max_errors);
        for (idx, raw) in text.lines().enumerate() {
            if state.stopped {
                break;
            }
            state.line(idx + 1, raw);
        }
        let (document, issues) = state.finish();

        tracing::debug!(
            sections = document.section_count(),
            issues = issues.len(),
            version = %document.version,
            "parsed document"
        );

        ParseOutcome {
            document: Some(document),
            issues,
        }
    }
}

/// Error sink honouring the error budget
struct IssueSink {
    issues: Vec<ParseIssue>,
    max: usize,
}

impl IssueSink {
    /// Record an issue; returns `false` once the budget is exhausted
    fn push(&mut self, issue: ParseIssue) -> bool {
        if self.exhausted() {
            return false;
        }
        let line = issue.line;
        self.issues.push(issue);
        if self.issues.len() >= self.max {
            self.issues.push(ParseIssue::too_many(self.max, line));
            return false;
        }
        true
    }

    fn exhausted(&self) -> bool {
        self.issues.len() > self.max
            || self
                .issues
                .last()
                .is_some_and(|i| i.kind == ParseIssueKind::TooManyErrors)
    }
}

struct OpenSection {
    section: Section,
    body: Vec<String>,
}

enum DrawerTarget {
    Document,
    Section,
}

struct Drawer {
    target: DrawerTarget,
    start_line: usize,
}

struct ParseState {
    metadata: IndexMap<String, String>,
    roots: Vec<Section>,
    stack: Vec<OpenSection>,
    drawer: Option<Drawer>,
    sink: IssueSink,
    stopped: bool,
}

impl ParseState {
    fn new(max_errors: usize) -> Self {
        Self {
            metadata: IndexMap::new(),
            roots: Vec::new(),
            stack: Vec::new(),
            drawer: None,
            sink: IssueSink {
                issues: Vec::new(),
                max: max_errors.max(1),
            },
            stopped: false,
        }
    }

    fn issue(&mut self, issue: ParseIssue) {
        if !self.sink.push(issue) {
            self.stopped = true;
        }
    }

    fn seen_heading(&self) -> bool {
        !self.stack.is_empty() || !self.roots.is_empty()
    }

    fn line(&mut self, number: usize, raw: &str) {
        let line = raw.trim_end();

        if let Some(heading) = parse_heading(line) {
            if let Some(drawer) = self.drawer.take() {
                self.issue(ParseIssue::at(
                    ParseIssueKind::UnterminatedPropertyBlock,
                    drawer.start_line,
                    "property block not closed before next heading",
                ));
                if self.stopped {
                    return;
                }
            }
            self.open_heading(number, heading);
            return;
        }

        if self.drawer.is_some() {
            self.drawer_line(number, line);
            return;
        }

        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case(":PROPERTIES:") {
            let target = if self.stack.is_empty() {
                DrawerTarget::Document
            } else {
                DrawerTarget::Section
            };
            self.drawer = Some(Drawer {
                target,
                start_line: number,
            });
            return;
        }

        if !self.seen_heading() {
            if let Some((key, value)) = parse_metadata(line) {
                self.metadata.insert(key, value);
            }
            return;
        }

        if let Some(open) = self.stack.last_mut() {
            open.body.push(line.to_string());
        }
    }

    fn drawer_line(&mut self, number: usize, line: &str) {
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case(":END:") {
            self.drawer = None;
            return;
        }
        if trimmed.is_empty() {
            return;
        }

        match parse_property(trimmed) {
            Some((key, value)) => {
                let target = self.drawer.as_ref().map(|d| &d.target);
                match (target, self.stack.last_mut()) {
                    (Some(DrawerTarget::Section), Some(open)) => {
                        open.section.properties.insert(key, value);
                    }
                    _ => {
                        self.metadata.insert(key, value);
                    }
                }
            }
            None => self.issue(ParseIssue::at(
                ParseIssueKind::MalformedProperty,
                number,
                format!("expected ':KEY: value' in property block, found '{trimmed}'"),
            )),
        }
    }

    fn open_heading(&mut self, number: usize, heading: HeadingLine<'_>) {
        let level = heading.level;
        while self.stack.last().is_some_and(|o| o.section.level >= level) {
            self.close_top();
        }

        if let Some(parent) = self.stack.last() {
            let parent_level = parent.section.level;
            if level > parent_level + 1 {
                let parent_heading = parent.section.heading.clone();
                self.issue(ParseIssue::at(
                    ParseIssueKind::LevelJump,
                    number,
                    format!(
                        "heading '{}' at level {level} jumps from level {parent_level} ('{parent_heading}')",
                        heading.text
                    ),
                ));
            }
        }

        let mut tags = IndexSet::new();
        for tag in heading.tags {
            if !is_valid_tag(tag) {
                self.issue(ParseIssue::at(
                    ParseIssueKind::InvalidTag,
                    number,
                    format!("tag '{tag}' contains disallowed characters"),
                ));
            }
            tags.insert(tag.to_string());
        }

        self.stack.push(OpenSection {
            section: Section::new(level, heading.text.to_string(), tags, number),
            body: Vec::new(),
        });
    }

    fn close_top(&mut self) {
        let Some(open) = self.stack.pop() else {
            return;
        };
        let mut section = open.section;
        section.body = finish_body(&open.body);

        match self.stack.last_mut() {
            Some(parent) => parent.section.children.push(section),
            None => self.roots.push(section),
        }
    }

    fn finish(mut self) -> (Document, Vec<ParseIssue>) {
        if let Some(drawer) = self.drawer.take() {
            if !self.stopped {
                self.issue(ParseIssue::at(
                    ParseIssueKind::UnterminatedPropertyBlock,
                    drawer.start_line,
                    "property block not closed before end of input",
                ));
            }
        }
        while !self.stack.is_empty() {
            self.close_top();
        }

        let mut change_history: Vec<ChangeEntry> = Vec::new();
        for section in &self.roots {
            collect_changelog(section, &mut change_history, &mut self.sink);
        }

        let version = resolve_version(&self.metadata, &change_history);
        let title = self.metadata.get("TITLE").cloned();

        let document = Document {
            title,
            metadata: self.metadata,
            sections: self.roots,
            version,
            change_history,
        };
        (document, self.sink.issues)
    }
}

fn collect_changelog(section: &Section, out: &mut Vec<ChangeEntry>, sink: &mut IssueSink) {
    if section.has_tag("changelog") {
        let parsed = changelog::parse_entries(&section.body);
        out.extend(parsed.entries);
        for bad in parsed.malformed {
            sink.push(ParseIssue::at(
                ParseIssueKind::MalformedChangelogEntry,
                section.source_line,
                format!("malformed changelog entry '{bad}'"),
            ));
        }
    }
    for child in &section.children {
        collect_changelog(child, out, sink);
    }
}

fn resolve_version(metadata: &IndexMap<String, String>, history: &[ChangeEntry]) -> String {
    if let Some(explicit) = metadata.get("VERSION") {
        let v = explicit.trim().trim_start_matches(['v', 'V']);
        if !v.is_empty() {
            return v.to_string();
        }
    }
    history
        .iter()
        .map(|e| e.version.as_str())
        .max_by(|a, b| changelog::compare_versions(a, b))
        .map_or_else(|| "1".to_string(), str::to_string)
}

/// Trim blank lines at both ends, keep interior lines verbatim
fn finish_body(lines: &[String]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(s), Some(e)) => lines[s..=e].join("\n"),
        _ => String::new(),
    }
}

/// Allowed tag characters: alphanumerics plus `_ @ # % -`
#[must_use]
pub fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '@' | '#' | '%' | '-'))
}

struct HeadingLine<'a> {
    level: usize,
    text: &'a str,
    tags: Vec<&'a str>,
}

fn heading_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\*+)(?:\s+(.*))?$").expect("static heading pattern"))
}

fn tag_block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:(.*?)\s+)?(:\S+:)$").expect("static tag block pattern")
    })
}

fn parse_heading(line: &str) -> Option<HeadingLine<'_>> {
    let caps = heading_pattern().captures(line)?;
    let stars = caps.get(1)?.as_str();
    let rest = caps.get(2).map_or("", |m| m.as_str()).trim();

    // `*` alone is a heading with empty text; `*bold*` is body text
    if caps.get(2).is_none() && line.len() != stars.len() {
        return None;
    }

    let (text, tags) = match tag_block_pattern().captures(rest) {
        Some(tc) => {
            let text = tc.get(1).map_or("", |m| m.as_str()).trim();
            let block = tc.get(2).map_or("", |m| m.as_str());
            let tags = block.split(':').filter(|t| !t.is_empty()).collect();
            (text, tags)
        }
        None => (rest, Vec::new()),
    };

    Some(HeadingLine {
        level: stars.len(),
        text,
        tags,
    })
}

fn parse_metadata(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("#+")?;
    let (key, value) = rest.split_once(':')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_ascii_uppercase(), value.trim().to_string()))
}

fn parse_property(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix(':')?;
    let (key, value) = rest.split_once(':')?;
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_ascii_uppercase(), value.trim().to_string()))
}
