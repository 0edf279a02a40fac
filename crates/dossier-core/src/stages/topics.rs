use super::{consult, feedback_block, requirement_listing, SharedModel, TOPICS};
use crate::model::{parse_list, ModelTask};
use crate::state::{AnalysisState, AnalysisUpdate, ChangeNote, Horizon};
use dossier_graph::{Stage, StageError, StageOutput};
use std::collections::HashSet;

/// Research topic selection
///
/// The model proposes topics; without one, requirement titles are taken in
/// horizon order followed by idea titles. Topics are deduplicated
/// case-insensitively and capped at `max_topics` across all passes.
pub struct TopicStage {
    model: SharedModel,
    max_topics: usize,
}

impl TopicStage {
    /// Stage using `model` when present
    #[must_use]
    pub fn new(model: SharedModel, max_topics: usize) -> Self {
        Self { model, max_topics }
    }

    fn heuristic(state: &AnalysisState) -> Vec<String> {
        let mut candidates = Vec::new();
        for horizon in Horizon::ALL {
            for id in state.horizons.bucket(horizon) {
                if let Some(r) = state.requirement(id) {
                    candidates.push(r.title.clone());
                }
            }
        }
        candidates.extend(state.ideas.iter().map(|i| i.title.clone()));
        candidates
    }
}

#[async_trait::async_trait]
impl Stage<AnalysisState> for TopicStage {
    async fn run(&self, state: &AnalysisState) -> Result<StageOutput<AnalysisUpdate>, StageError> {
        let room = self.max_topics.saturating_sub(state.topics.len());
        if room == 0 {
            return Ok(StageOutput::new(AnalysisUpdate::noted(
                TOPICS,
                "topic limit reached; no new topics",
            )));
        }

        let prompt = format!(
            "Suggest up to {room} short research topics for this project, one per line.\n\n{}{}",
            requirement_listing(state),
            feedback_block(state)
        );
        let (candidates, source, error) =
            match consult(&self.model, ModelTask::Topics, prompt).await {
                Ok(Some(answer)) => (parse_list(&answer), "model", None),
                Ok(None) => (Self::heuristic(state), "requirements", None),
                Err(e) => (Self::heuristic(state), "requirements", Some(e)),
            };

        let mut seen: HashSet<String> = state.topics.iter().map(|t| t.to_lowercase()).collect();
        let topics: Vec<String> = candidates
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
            .take(room)
            .collect();

        let summary = format!("selected {} topics from {source}", topics.len());
        Ok(StageOutput::new(AnalysisUpdate {
            topics,
            change_log: vec![ChangeNote::new(TOPICS, summary)],
            ..AnalysisUpdate::default()
        })
        .with_errors(error))
    }
}
