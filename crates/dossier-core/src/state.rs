//! Analysis pipeline state
//!
//! Every field is a channel with a fixed merge rule. Stages return an
//! [`AnalysisUpdate`] and the engine folds it in through
//! [`GraphState::apply`]. The error list and change log only grow.

use dossier_bridge::TopicResearch;
use dossier_document::{Idea, QuestionAnswer, Requirement, UserStory, ValidationResult};
use dossier_graph::{AppendList, AppendSet, Channel, GraphState, Replace, StageError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// MoSCoW priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Must have
    Must,
    /// Should have
    Should,
    /// Could have
    Could,
    /// Won't have this time
    Wont,
}

impl Priority {
    /// All priorities, highest first
    pub const ALL: [Self; 4] = [Self::Must, Self::Should, Self::Could, Self::Wont];

    /// Parse a tag or model answer (`must`, `Won't`, `won't have`...)
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let word = text
            .trim()
            .split_whitespace()
            .next()?
            .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
            .to_ascii_lowercase()
            .replace('\'', "");
        match word.as_str() {
            "must" => Some(Self::Must),
            "should" => Some(Self::Should),
            "could" => Some(Self::Could),
            "wont" => Some(Self::Wont),
            _ => None,
        }
    }

    /// Tag spelling
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Must => "must",
            Self::Should => "should",
            Self::Could => "could",
            Self::Wont => "wont",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Horizon {
    /// Current iteration
    Now,
    /// Following iteration
    Next,
    /// Eventually, or never
    Later,
}

impl Horizon {
    /// All horizons, soonest first
    pub const ALL: [Self; 3] = [Self::Now, Self::Next, Self::Later];

    /// Parse a property value or model answer
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "now" | "current" => Some(Self::Now),
            "next" | "soon" => Some(Self::Next),
            "later" | "future" => Some(Self::Later),
            _ => None,
        }
    }

    /// Default horizon for a priority
    #[must_use]
    pub fn for_priority(priority: Priority) -> Self {
        match priority {
            Priority::Must => Self::Now,
            Priority::Should => Self::Next,
            Priority::Could | Priority::Wont => Self::Later,
        }
    }
}

/// Requirement ids grouped by MoSCoW priority
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoscowBuckets {
    /// Must have
    pub must: Vec<String>,
    /// Should have
    pub should: Vec<String>,
    /// Could have
    pub could: Vec<String>,
    /// Won't have
    pub wont: Vec<String>,
}

impl MoscowBuckets {
    /// Add an id to a bucket
    pub fn push(&mut self, priority: Priority, id: impl Into<String>) {
        let bucket = match priority {
            Priority::Must => &mut self.must,
            Priority::Should => &mut self.should,
            Priority::Could => &mut self.could,
            Priority::Wont => &mut self.wont,
        };
        bucket.push(id.into());
    }

    /// Priority assigned to an id
    #[must_use]
    pub fn priority_of(&self, id: &str) -> Option<Priority> {
        Priority::ALL
            .into_iter()
            .find(|p| self.bucket(*p).iter().any(|i| i == id))
    }

    /// Ids with a priority
    #[must_use]
    pub fn bucket(&self, priority: Priority) -> &[String] {
        match priority {
            Priority::Must => &self.must,
            Priority::Should => &self.should,
            Priority::Could => &self.could,
            Priority::Wont => &self.wont,
        }
    }

    /// Categorized ids
    #[must_use]
    pub fn len(&self) -> usize {
        self.must.len() + self.should.len() + self.could.len() + self.wont.len()
    }

    /// Whether nothing is categorized
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Requirement ids grouped by horizon
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HorizonBuckets {
    /// Now
    pub now: Vec<String>,
    /// Next
    pub next: Vec<String>,
    /// Later
    pub later: Vec<String>,
}

impl HorizonBuckets {
    /// Add an id to a bucket
    pub fn push(&mut self, horizon: Horizon, id: impl Into<String>) {
        let bucket = match horizon {
            Horizon::Now => &mut self.now,
            Horizon::Next => &mut self.next,
            Horizon::Later => &mut self.later,
        };
        bucket.push(id.into());
    }

    /// Ids in a bucket
    #[must_use]
    pub fn bucket(&self, horizon: Horizon) -> &[String] {
        match horizon {
            Horizon::Now => &self.now,
            Horizon::Next => &self.next,
            Horizon::Later => &self.later,
        }
    }

    /// Horizon assigned to an id
    #[must_use]
    pub fn horizon_of(&self, id: &str) -> Option<Horizon> {
        Horizon::ALL
            .into_iter()
            .find(|h| self.bucket(*h).iter().any(|i| i == id))
    }
}

/// `from` depends on `to`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    /// Dependent requirement
    pub from: String,
    /// Prerequisite requirement
    pub to: String,
}

impl Dependency {
    /// Edge `from` → `to`
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Review finding kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    /// Something is missing; triggers refinement
    Gap,
    /// Something may go wrong
    Risk,
    /// Informational
    Note,
}

/// One review finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    /// Review pass that produced it, starting at 1
    pub pass: u32,
    /// Kind
    pub kind: FeedbackKind,
    /// Description
    pub message: String,
}

/// Change-log entry appended by a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNote {
    /// Stage name
    pub stage: String,
    /// What changed
    pub summary: String,
}

impl ChangeNote {
    /// Note from `stage`
    pub fn new(stage: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            summary: summary.into(),
        }
    }
}

/// Review decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Analysis is complete
    Approve,
    /// Run categorization again with review feedback
    Refine,
}

/// Condensed validation outcome carried in state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    /// No validation errors
    pub is_valid: bool,
    /// Quality score
    pub score: u8,
    /// Error count
    pub errors: usize,
    /// Warning count
    pub warnings: usize,
}

impl From<&ValidationResult> for ValidationSummary {
    fn from(result: &ValidationResult) -> Self {
        Self {
            is_valid: result.is_valid,
            score: result.score,
            errors: result.errors.len(),
            warnings: result.warnings.len(),
        }
    }
}

/// Pipeline state threaded through the analysis graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisState {
    /// Document text as given
    pub raw_input: Replace<String>,
    /// Document title
    pub title: Replace<Option<String>>,
    /// Validation outcome
    pub validation: Replace<Option<ValidationSummary>>,
    /// Extracted requirements
    pub requirements: AppendList<Requirement>,
    /// Extracted user stories
    pub stories: AppendList<UserStory>,
    /// Extracted ideas
    pub ideas: AppendList<Idea>,
    /// Extracted Q&A
    pub questions: AppendList<QuestionAnswer>,
    /// MoSCoW categorization
    pub moscow: Replace<MoscowBuckets>,
    /// Horizon categorization
    pub horizons: Replace<HorizonBuckets>,
    /// Requirement dependencies
    pub dependencies: AppendSet<Dependency>,
    /// Research topics
    pub topics: AppendSet<String>,
    /// Enrichment per topic
    pub enrichment: AppendList<TopicResearch>,
    /// Review findings
    pub feedback: AppendList<Feedback>,
    /// Stage change log
    pub change_log: AppendList<ChangeNote>,
    /// Completed review passes
    pub refinement_passes: Replace<u32>,
    /// Latest review decision
    pub verdict: Replace<Option<Verdict>>,
    /// Stage errors
    pub errors: AppendList<StageError>,
}

/// Partial update returned by analysis stages
#[derive(Debug, Default)]
pub struct AnalysisUpdate {
    /// Replace raw input
    pub raw_input: Option<String>,
    /// Replace title
    pub title: Option<Option<String>>,
    /// Replace validation summary
    pub validation: Option<Option<ValidationSummary>>,
    /// Append requirements
    pub requirements: Vec<Requirement>,
    /// Append stories
    pub stories: Vec<UserStory>,
    /// Append ideas
    pub ideas: Vec<Idea>,
    /// Append Q&A
    pub questions: Vec<QuestionAnswer>,
    /// Replace MoSCoW buckets
    pub moscow: Option<MoscowBuckets>,
    /// Replace horizon buckets
    pub horizons: Option<HorizonBuckets>,
    /// Add dependencies
    pub dependencies: Vec<Dependency>,
    /// Add topics
    pub topics: Vec<String>,
    /// Append enrichment
    pub enrichment: Vec<TopicResearch>,
    /// Append feedback
    pub feedback: Vec<Feedback>,
    /// Append change notes
    pub change_log: Vec<ChangeNote>,
    /// Replace pass counter
    pub refinement_passes: Option<u32>,
    /// Replace verdict
    pub verdict: Option<Option<Verdict>>,
}

impl AnalysisUpdate {
    /// Update carrying one change note
    pub fn noted(stage: &str, summary: impl Into<String>) -> Self {
        Self {
            change_log: vec![ChangeNote::new(stage, summary)],
            ..Self::default()
        }
    }
}

impl GraphState for AnalysisState {
    type Update = AnalysisUpdate;

    fn apply(&mut self, update: AnalysisUpdate) {
        self.raw_input.merge(update.raw_input);
        self.title.merge(update.title);
        self.validation.merge(update.validation);
        self.requirements.merge(update.requirements);
        self.stories.merge(update.stories);
        self.ideas.merge(update.ideas);
        self.questions.merge(update.questions);
        self.moscow.merge(update.moscow);
        self.horizons.merge(update.horizons);
        self.dependencies.merge(update.dependencies);
        self.topics.merge(update.topics);
        self.enrichment.merge(update.enrichment);
        self.feedback.merge(update.feedback);
        self.change_log.merge(update.change_log);
        self.refinement_passes.merge(update.refinement_passes);
        self.verdict.merge(update.verdict);
    }

    fn record_error(&mut self, error: StageError) {
        self.errors.merge(vec![error]);
    }
}

impl AnalysisState {
    /// Requirement by id
    #[must_use]
    pub fn requirement(&self, id: &str) -> Option<&Requirement> {
        self.requirements.iter().find(|r| r.id == id)
    }

    /// Topics that already have enrichment
    pub fn researched_topics(&self) -> impl Iterator<Item = &str> {
        self.enrichment.iter().map(|r| r.topic.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_parsing() {
        assert_eq!(Priority::parse("must"), Some(Priority::Must));
        assert_eq!(Priority::parse("Won't have"), Some(Priority::Wont));
        assert_eq!(Priority::parse(" WONT "), Some(Priority::Wont));
        assert_eq!(Priority::parse("could."), Some(Priority::Could));
        assert_eq!(Priority::parse("maybe"), None);
        assert_eq!(Priority::parse(""), None);
    }

    #[test]
    fn buckets_lookup() {
        let mut m = MoscowBuckets::default();
        m.push(Priority::Must, "REQ-1");
        m.push(Priority::Wont, "REQ-2");
        assert_eq!(m.priority_of("REQ-2"), Some(Priority::Wont));
        assert_eq!(m.priority_of("REQ-9"), None);
        assert_eq!(m.len(), 2);

        let mut h = HorizonBuckets::default();
        h.push(Horizon::for_priority(Priority::Must), "REQ-1");
        assert_eq!(h.horizon_of("REQ-1"), Some(Horizon::Now));
    }

    #[test]
    fn merge_rules_per_field() {
        let mut state = AnalysisState::default();
        state.apply(AnalysisUpdate {
            topics: vec!["a".into(), "b".into()],
            change_log: vec![ChangeNote::new("x", "one")],
            refinement_passes: Some(1),
            ..AnalysisUpdate::default()
        });
        state.apply(AnalysisUpdate {
            topics: vec!["b".into(), "c".into()],
            change_log: vec![ChangeNote::new("x", "two")],
            refinement_passes: Some(2),
            ..AnalysisUpdate::default()
        });
        state.record_error(StageError::recoverable("e"));

        let topics: Vec<_> = state.topics.iter().cloned().collect();
        assert_eq!(topics, vec!["a", "b", "c"]);
        assert_eq!(state.change_log.len(), 2);
        assert_eq!(*state.refinement_passes, 2);
        assert_eq!(state.errors.len(), 1);
    }

    #[test]
    fn state_serializes_for_checkpoints() {
        let mut state = AnalysisState::default();
        state.apply(AnalysisUpdate {
            title: Some(Some("Plan".into())),
            dependencies: vec![Dependency::new("REQ-2", "REQ-1")],
            ..AnalysisUpdate::default()
        });
        let json = serde_json::to_string(&state).expect("json");
        let back: AnalysisState = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, state);
    }
}
