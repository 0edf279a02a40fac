//! Analysis stages
//!
//! Stage order:
//!
//! ```text
//! categorize → prioritize → dependencies → topics → research → review
//!     ▲                                                          │
//!     └──────────────────────── refine ──────────────────────────┤
//!                                                                └─ finish → end
//! ```
//!
//! Stages that consult the language model fall back to tag and property
//! heuristics when no model is configured or the call fails; a failed call
//! is recorded as a recoverable stage error.

mod categorize;
mod dependencies;
mod research;
mod review;
mod topics;

pub use categorize::{CategorizeStage, PrioritizeStage};
pub use dependencies::DependencyStage;
pub use research::ResearchStage;
pub use review::{ReviewRoute, ReviewStage};
pub use topics::TopicStage;

use crate::model::{LanguageModel, ModelRequest, ModelTask};
use crate::state::{AnalysisState, FeedbackKind};
use dossier_graph::StageError;
use std::fmt::Write as _;
use std::sync::Arc;

/// Stage name
pub const CATEGORIZE: &str = "categorize";
/// Stage name
pub const PRIORITIZE: &str = "prioritize";
/// Stage name
pub const DEPENDENCIES: &str = "dependencies";
/// Stage name
pub const TOPICS: &str = "topics";
/// Stage name
pub const RESEARCH: &str = "research";
/// Stage name
pub const REVIEW: &str = "review";

/// Shared handle to an optional model
pub type SharedModel = Option<Arc<dyn LanguageModel>>;

/// Ask the model, if any
///
/// `Ok(None)` when no model is configured or the answer is blank; a failed
/// call becomes a recoverable error so the caller can fall back.
pub(crate) async fn consult(
    model: &SharedModel,
    task: ModelTask,
    prompt: String,
) -> Result<Option<String>, StageError> {
    let Some(model) = model else {
        return Ok(None);
    };
    match model.complete(ModelRequest { task, prompt }).await {
        Ok(response) if response.text.trim().is_empty() => Ok(None),
        Ok(response) => Ok(Some(response.text)),
        Err(e) => {
            tracing::warn!(task = ?task, error = %e, "model call failed, using heuristics");
            Err(StageError::recoverable(format!(
                "model call failed ({e}); heuristics used"
            )))
        }
    }
}

/// Requirement listing shared by model prompts
pub(crate) fn requirement_listing(state: &AnalysisState) -> String {
    let mut out = String::new();
    for r in state.requirements.iter() {
        let tags: Vec<&str> = r.tags.iter().map(String::as_str).collect();
        let _ = writeln!(out, "{}: {} [tags: {}]", r.id, r.title, tags.join(", "));
    }
    out
}

/// Latest review gaps, appended to prompts on refinement passes
pub(crate) fn feedback_block(state: &AnalysisState) -> String {
    let pass = *state.refinement_passes.get();
    let gaps: Vec<&str> = state
        .feedback
        .iter()
        .filter(|f| f.pass == pass && f.kind == FeedbackKind::Gap)
        .map(|f| f.message.as_str())
        .collect();
    if gaps.is_empty() {
        return String::new();
    }
    let mut out = String::from("\nReviewer feedback to address:\n");
    for gap in gaps {
        let _ = writeln!(out, "- {gap}");
    }
    out
}
