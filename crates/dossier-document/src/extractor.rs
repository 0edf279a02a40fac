//! Domain record extraction
//!
//! Pulls requirements, user stories, ideas and Q&A entries out of a parsed
//! [`Document`]. Extraction is read-only and tolerant: missing sections yield
//! empty lists.

use crate::model::{Document, Section, SectionRef};
use crate::template;
use crate::validator::requirement_leaves;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// Requirement classification from the enclosing subsection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequirementKind {
    /// Under `Functional Requirements`
    Functional,
    /// Under `Non-Functional Requirements`
    NonFunctional,
    /// Anywhere else under `Requirements`
    Other,
}

/// One leaf requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// `ID` property or generated `REQ-<n>`
    pub id: String,
    /// Heading text
    pub title: String,
    /// Body text
    pub description: String,
    /// Enclosing subsection classification
    pub kind: RequirementKind,
    /// Effective tags
    pub tags: IndexSet<String>,
    /// Tags on the requirement's own heading
    #[serde(default)]
    pub own_tags: IndexSet<String>,
    /// Own properties
    pub properties: IndexMap<String, String>,
    /// Ids listed in `DEPENDS_ON`
    pub depends_on: Vec<String>,
    /// Heading line
    pub source_line: usize,
}

impl Requirement {
    /// Effective tag check, case-insensitive
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// One user story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStory {
    /// `ID` property or generated `US-<n>`
    pub id: String,
    /// Heading text
    pub title: String,
    /// Body text
    pub narrative: String,
    /// Body lines starting with `- `
    pub acceptance_criteria: Vec<String>,
    /// Effective tags
    pub tags: IndexSet<String>,
    /// Heading line
    pub source_line: usize,
}

/// One idea
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Idea {
    /// Heading text
    pub title: String,
    /// Body text
    pub description: String,
    /// Effective tags
    pub tags: IndexSet<String>,
}

/// One question with its answer, if given
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    /// Heading text
    pub question: String,
    /// Body text; `None` when the body is empty
    pub answer: Option<String>,
}

impl QuestionAnswer {
    /// Whether the question still lacks an answer
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.answer.is_none()
    }
}

/// Everything extracted from one document
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractedData {
    /// Leaf requirements in document order
    pub requirements: Vec<Requirement>,
    /// User stories in document order
    pub stories: Vec<UserStory>,
    /// Ideas in document order
    pub ideas: Vec<Idea>,
    /// Q&A entries in document order
    pub questions: Vec<QuestionAnswer>,
}

/// Extract domain records from a document
#[must_use]
pub fn extract(document: &Document) -> ExtractedData {
    let data = ExtractedData {
        requirements: extract_requirements(document),
        stories: extract_stories(document),
        ideas: children_of(document, template::IDEAS)
            .into_iter()
            .map(|e| Idea {
                title: e.section.heading().to_string(),
                description: e.section.body().to_string(),
                tags: e.effective_tags,
            })
            .collect(),
        questions: children_of(document, template::QA)
            .into_iter()
            .map(|e| QuestionAnswer {
                question: e.section.heading().to_string(),
                answer: Some(e.section.body().trim())
                    .filter(|b| !b.is_empty())
                    .map(str::to_string),
            })
            .collect(),
    };

    tracing::debug!(
        requirements = data.requirements.len(),
        stories = data.stories.len(),
        ideas = data.ideas.len(),
        questions = data.questions.len(),
        "extracted document data"
    );
    data
}

fn extract_requirements(document: &Document) -> Vec<Requirement> {
    requirement_leaves(document)
        .into_iter()
        .enumerate()
        .map(|(idx, entry)| {
            let section = entry.section;
            let kind = match entry.path.get(1) {
                Some(sub) if sub.trim().eq_ignore_ascii_case(template::FUNCTIONAL) => {
                    RequirementKind::Functional
                }
                Some(sub) if sub.trim().eq_ignore_ascii_case(template::NON_FUNCTIONAL) => {
                    RequirementKind::NonFunctional
                }
                _ => RequirementKind::Other,
            };
            Requirement {
                id: id_or(section, "REQ", idx),
                title: section.heading().to_string(),
                description: section.body().to_string(),
                kind,
                tags: entry.effective_tags,
                own_tags: section.tags().clone(),
                properties: section.properties().clone(),
                depends_on: section
                    .property("DEPENDS_ON")
                    .map(split_ids)
                    .unwrap_or_default(),
                source_line: section.source_line(),
            }
        })
        .collect()
}

fn extract_stories(document: &Document) -> Vec<UserStory> {
    children_of(document, template::USER_STORIES)
        .into_iter()
        .enumerate()
        .map(|(idx, entry)| {
            let section = entry.section;
            UserStory {
                id: id_or(section, "US", idx),
                title: section.heading().to_string(),
                narrative: section.body().to_string(),
                acceptance_criteria: section
                    .body()
                    .lines()
                    .filter_map(|l| l.trim_start().strip_prefix("- "))
                    .map(|l| l.trim().to_string())
                    .collect(),
                tags: entry.effective_tags,
                source_line: section.source_line(),
            }
        })
        .collect()
}

/// Direct children of the first top-level section with the given name
fn children_of<'a>(document: &'a Document, name: &str) -> Vec<SectionRef<'a>> {
    document
        .find_top_level(name)
        .map(|root| {
            root.flatten()
                .into_iter()
                .filter(|e| e.path.len() == 2)
                .collect()
        })
        .unwrap_or_default()
}

fn id_or(section: &Section, prefix: &str, idx: usize) -> String {
    section
        .property("ID")
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map_or_else(|| format!("{prefix}-{}", idx + 1), str::to_string)
}

fn split_ids(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::DocumentParser;
    use pretty_assertions::assert_eq;

    const DOC: &str = "\
* Requirements :core:
** Functional Requirements
*** Sign in :must:
:PROPERTIES:
:ID: AUTH-1
:END:
Email and password.
*** Sign out :should:
:PROPERTIES:
:DEPENDS_ON: AUTH-1, REQ-9  REQ-10
:END:
** Non-Functional Requirements
*** Latency under 200ms :must:
** Misc
*** Audit log :could:
* User Stories
** Pay invoice
As a customer I pay.
- card accepted
  - receipt emailed
** Refund
:PROPERTIES:
:ID: STORY-7
:END:
* Ideas
** Dark mode :ui:
* Q&A
** Who owns billing?
Finance.
** When do we ship?
";

    fn data() -> ExtractedData {
        let doc = DocumentParser::new().parse(DOC).document.expect("document");
        extract(&doc)
    }

    #[test]
    fn requirements_ids_kinds_and_tags() {
        let reqs = data().requirements;
        let ids: Vec<_> = reqs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["AUTH-1", "REQ-2", "REQ-3", "REQ-4"]);

        let kinds: Vec<_> = reqs.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RequirementKind::Functional,
                RequirementKind::Functional,
                RequirementKind::NonFunctional,
                RequirementKind::Other
            ]
        );

        assert!(reqs[0].has_tag("core"));
        assert!(reqs[0].has_tag("MUST"));
        assert!(reqs[0].own_tags.contains("must"));
        assert!(!reqs[0].own_tags.contains("core"));
        assert_eq!(reqs[0].description, "Email and password.");
    }

    #[test]
    fn depends_on_split() {
        let reqs = data().requirements;
        assert_eq!(reqs[1].depends_on, vec!["AUTH-1", "REQ-9", "REQ-10"]);
        assert!(reqs[0].depends_on.is_empty());
    }

    #[test]
    fn stories_with_acceptance_criteria() {
        let stories = data().stories;
        assert_eq!(stories.len(), 2);
        assert_eq!(stories[0].id, "US-1");
        assert_eq!(
            stories[0].acceptance_criteria,
            vec!["card accepted", "receipt emailed"]
        );
        assert_eq!(stories[1].id, "STORY-7");
    }

    #[test]
    fn ideas_and_questions() {
        let d = data();
        assert_eq!(d.ideas.len(), 1);
        assert!(d.ideas[0].tags.contains("ui"));
        assert_eq!(d.questions.len(), 2);
        assert_eq!(d.questions[0].answer.as_deref(), Some("Finance."));
        assert!(d.questions[1].is_open());
    }

    #[test]
    fn missing_sections_yield_empty() {
        let doc = DocumentParser::new().parse("* Overview\n").document.expect("document");
        assert_eq!(extract(&doc), ExtractedData::default());
    }
}
