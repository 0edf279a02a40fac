use super::{consult, feedback_block, requirement_listing, SharedModel, CATEGORIZE, PRIORITIZE};
use crate::model::{parse_assignments, ModelTask};
use crate::state::{
    AnalysisState, AnalysisUpdate, ChangeNote, Horizon, HorizonBuckets, MoscowBuckets, Priority,
};
use dossier_document::Requirement;
use dossier_graph::{Stage, StageError, StageOutput};
use std::collections::HashMap;

/// MoSCoW categorization
///
/// Model answers win; otherwise the requirement's own priority tag, then an
/// inherited one, then the `PRIORITY` property. Requirements matching none stay
/// uncategorized and are flagged by review.
pub struct CategorizeStage {
    model: SharedModel,
}

impl CategorizeStage {
    /// Stage using `model` when present
    #[must_use]
    pub fn new(model: SharedModel) -> Self {
        Self { model }
    }
}

fn priority_tag<'a>(tags: impl IntoIterator<Item = &'a String>) -> Option<Priority> {
    tags.into_iter().find_map(|t| Priority::parse(t))
}

fn tagged_priority(requirement: &Requirement) -> Option<Priority> {
    priority_tag(&requirement.own_tags)
        .or_else(|| priority_tag(&requirement.tags))
        .or_else(|| requirement.properties.get("PRIORITY").and_then(|p| Priority::parse(p)))
}

/// Model answers restricted to known ids
fn answers_for<T>(
    state: &AnalysisState,
    answer: Option<&str>,
    parse: impl Fn(&str) -> Option<T>,
) -> HashMap<String, T> {
    let Some(answer) = answer else {
        return HashMap::new();
    };
    parse_assignments(answer)
        .into_iter()
        .filter(|(id, _)| state.requirement(id).is_some())
        .filter_map(|(id, value)| parse(&value).map(|v| (id, v)))
        .collect()
}

#[async_trait::async_trait]
impl Stage<AnalysisState> for CategorizeStage {
    async fn run(&self, state: &AnalysisState) -> Result<StageOutput<AnalysisUpdate>, StageError> {
        let prompt = format!(
            "Assign a MoSCoW priority (must, should, could, wont) to each requirement.\n\
             Answer one line per requirement as `ID: priority`.\n\n{}{}",
            requirement_listing(state),
            feedback_block(state)
        );
        let (answer, error) = match consult(&self.model, ModelTask::Categorize, prompt).await {
            Ok(answer) => (answer, None),
            Err(e) => (None, Some(e)),
        };
        let assigned = answers_for(state, answer.as_deref(), Priority::parse);

        let mut buckets = MoscowBuckets::default();
        let mut uncategorized = 0usize;
        for requirement in state.requirements.iter() {
            match assigned
                .get(&requirement.id)
                .copied()
                .or_else(|| tagged_priority(requirement))
            {
                Some(priority) => buckets.push(priority, requirement.id.as_str()),
                None => uncategorized += 1,
            }
        }

        let summary = format!(
            "categorized {} of {} requirements ({} from model; must {}, should {}, could {}, wont {})",
            buckets.len(),
            state.requirements.len(),
            assigned.len(),
            buckets.must.len(),
            buckets.should.len(),
            buckets.could.len(),
            buckets.wont.len(),
        );
        tracing::debug!(categorized = buckets.len(), uncategorized, "categorize finished");

        let output = StageOutput::new(AnalysisUpdate {
            moscow: Some(buckets),
            change_log: vec![ChangeNote::new(CATEGORIZE, summary)],
            ..AnalysisUpdate::default()
        });
        Ok(output.with_errors(error))
    }
}

/// Horizon categorization
///
/// Model answers win; otherwise the `HORIZON` property, then the horizon
/// implied by the MoSCoW priority, then `next`.
pub struct PrioritizeStage {
    model: SharedModel,
}

impl PrioritizeStage {
    /// Stage using `model` when present
    #[must_use]
    pub fn new(model: SharedModel) -> Self {
        Self { model }
    }
}

#[async_trait::async_trait]
impl Stage<AnalysisState> for PrioritizeStage {
    async fn run(&self, state: &AnalysisState) -> Result<StageOutput<AnalysisUpdate>, StageError> {
        let prompt = format!(
            "Place each requirement on a delivery horizon (now, next, later).\n\
             Answer one line per requirement as `ID: horizon`.\n\n{}{}",
            requirement_listing(state),
            feedback_block(state)
        );
        let (answer, error) = match consult(&self.model, ModelTask::Prioritize, prompt).await {
            Ok(answer) => (answer, None),
            Err(e) => (None, Some(e)),
        };
        let assigned = answers_for(state, answer.as_deref(), Horizon::parse);

        let mut buckets = HorizonBuckets::default();
        for requirement in state.requirements.iter() {
            let horizon = assigned
                .get(&requirement.id)
                .copied()
                .or_else(|| {
                    requirement
                        .properties
                        .get("HORIZON")
                        .and_then(|h| Horizon::parse(h))
                })
                .or_else(|| state.moscow.priority_of(&requirement.id).map(Horizon::for_priority))
                .unwrap_or(Horizon::Next);
            buckets.push(horizon, requirement.id.as_str());
        }

        let summary = format!(
            "placed {} requirements: now {}, next {}, later {}",
            state.requirements.len(),
            buckets.now.len(),
            buckets.next.len(),
            buckets.later.len()
        );
        let output = StageOutput::new(AnalysisUpdate {
            horizons: Some(buckets),
            change_log: vec![ChangeNote::new(PRIORITIZE, summary)],
            ..AnalysisUpdate::default()
        });
        Ok(output.with_errors(error))
    }
}
