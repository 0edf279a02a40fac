use super::RESEARCH;
use crate::state::{AnalysisState, AnalysisUpdate, ChangeNote};
use dossier_bridge::ResilienceBridge;
use dossier_graph::{Stage, StageError, StageOutput};
use std::collections::HashSet;
use std::sync::Arc;

/// Enrichment through the resilience bridge
///
/// Only topics without enrichment are researched, so refinement passes do
/// not repeat calls. Bridge failures arrive as fallback results, never as
/// stage errors. Calls are made and tracked under the analysis session.
pub struct ResearchStage {
    bridge: Option<Arc<ResilienceBridge>>,
    session_id: String,
}

impl ResearchStage {
    /// Stage calling `bridge` for `session_id`; `None` skips research
    #[must_use]
    pub fn new(bridge: Option<Arc<ResilienceBridge>>, session_id: impl Into<String>) -> Self {
        Self {
            bridge,
            session_id: session_id.into(),
        }
    }
}

#[async_trait::async_trait]
impl Stage<AnalysisState> for ResearchStage {
    async fn run(&self, state: &AnalysisState) -> Result<StageOutput<AnalysisUpdate>, StageError> {
        let Some(bridge) = &self.bridge else {
            return Ok(StageOutput::new(AnalysisUpdate::noted(
                RESEARCH,
                "research disabled",
            )));
        };

        let done: HashSet<&str> = state.researched_topics().collect();
        let pending: Vec<String> = state
            .topics
            .iter()
            .filter(|t| !done.contains(t.as_str()))
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(StageOutput::new(AnalysisUpdate::noted(
                RESEARCH,
                "no new topics to research",
            )));
        }

        let results = bridge.research_topics(&self.session_id, &pending).await;
        let fallbacks = results.iter().filter(|r| r.fallback).count();
        let items: usize = results.iter().map(|r| r.items.len()).sum();
        tracing::info!(
            session_id = %self.session_id,
            topics = results.len(),
            fallbacks,
            items,
            "research finished"
        );

        Ok(StageOutput::new(AnalysisUpdate {
            change_log: vec![ChangeNote::new(
                RESEARCH,
                format!(
                    "researched {} topics: {items} items, {fallbacks} fallback results",
                    results.len()
                ),
            )],
            enrichment: results,
            ..AnalysisUpdate::default()
        }))
    }
}
