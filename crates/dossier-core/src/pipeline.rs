//! Analysis pipeline
//!
//! Ties the layers together:
//!
//! ```text
//! text → parse → validate → extract → AnalysisState
//!                                          │
//!                     stage graph run ◄────┘ (checkpointed per session)
//!                                          │
//!                                   AnalysisReport
//! ```

use crate::config::DossierConfig;
use crate::error::DossierError;
use crate::model::LanguageModel;
use crate::stages::{
    CategorizeStage, DependencyStage, PrioritizeStage, ResearchStage, ReviewRoute, ReviewStage,
    SharedModel, TopicStage, CATEGORIZE, DEPENDENCIES, PRIORITIZE, RESEARCH, REVIEW, TOPICS,
};
use crate::state::{AnalysisState, AnalysisUpdate, ChangeNote, ValidationSummary};
use dossier_bridge::{ResilienceBridge, SessionMetrics};
use dossier_document::{
    extract, Document, DocumentParser, DocumentValidator, InputError, ParseIssue, ParserConfig,
    ValidationResult,
};
use dossier_graph::{
    CheckpointStore, CompiledGraph, GraphState, JsonFileCheckpointStore, MemoryCheckpointStore,
    RouteTarget, RunStatus, SessionId, SessionManager, SessionOptions, StageGraph,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Parsed, validated and extracted document ready for analysis
#[derive(Debug, Clone)]
pub struct Prepared {
    /// Parsed document
    pub document: Document,
    /// Recoverable parse issues
    pub parse_issues: Vec<ParseIssue>,
    /// Template validation
    pub validation: ValidationResult,
    /// Initial analysis state
    pub state: AnalysisState,
}

/// Final result of an analysis run
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    /// Session the run was checkpointed under
    pub session_id: SessionId,
    /// Whether the run continued from a checkpoint
    pub resumed: bool,
    /// How the run ended
    pub status: RunStatus,
    /// Stages executed, in order
    pub visited: Vec<String>,
    /// Final state
    pub state: AnalysisState,
    /// Parse issues; empty when resumed from a checkpoint
    pub parse_issues: Vec<ParseIssue>,
    /// Validation; `None` when resumed from a checkpoint
    pub validation: Option<ValidationResult>,
    /// Bridge metrics for the session
    #[serde(skip)]
    pub metrics: Option<SessionMetrics>,
}

impl AnalysisReport {
    /// Whether the graph ran to its end
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Document-analysis pipeline
pub struct Pipeline {
    config: DossierConfig,
    model: SharedModel,
    bridge: Option<Arc<ResilienceBridge>>,
    sessions: Arc<SessionManager<AnalysisState>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("model", &self.model.is_some())
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Pipeline with checkpoints in `config.checkpoint_dir` or memory
    #[must_use]
    pub fn new(config: DossierConfig) -> Self {
        let store: Arc<dyn CheckpointStore<AnalysisState>> = match &config.checkpoint_dir {
            Some(dir) => Arc::new(JsonFileCheckpointStore::new(dir.clone())),
            None => Arc::new(MemoryCheckpointStore::new()),
        };
        Self {
            config,
            model: None,
            bridge: None,
            sessions: Arc::new(SessionManager::new(store)),
            cancel: CancellationToken::new(),
        }
    }

    /// Pipeline with an HTTP bridge to `config.bridge.base_url` when
    /// research is enabled
    ///
    /// # Errors
    /// [`DossierError::Bridge`] when the bridge cannot be built.
    pub fn from_config(config: DossierConfig) -> Result<Self, DossierError> {
        let bridge = if config.research_enabled {
            Some(Arc::new(ResilienceBridge::http(config.bridge.clone())?))
        } else {
            None
        };
        let mut pipeline = Self::new(config);
        pipeline.bridge = bridge;
        Ok(pipeline)
    }

    /// With a language model
    #[must_use]
    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// With an enrichment bridge
    #[must_use]
    pub fn with_bridge(mut self, bridge: Arc<ResilienceBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// With a custom checkpoint store
    #[must_use]
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore<AnalysisState>>) -> Self {
        self.sessions = Arc::new(SessionManager::new(store));
        self
    }

    /// Cancel runs when `token` fires
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &DossierConfig {
        &self.config
    }

    /// Session manager
    #[inline]
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager<AnalysisState>> {
        &self.sessions
    }

    /// Parse, validate and extract raw bytes
    ///
    /// # Errors
    /// [`DossierError::Input`] for empty or non-UTF-8 input.
    pub fn prepare_bytes(&self, input: &[u8]) -> Result<Prepared, DossierError> {
        let text = std::str::from_utf8(input).map_err(|e| InputError::NotUtf8(e.to_string()))?;
        self.prepare(text)
    }

    /// Parse, validate and extract
    ///
    /// # Errors
    /// [`DossierError::Input`] for empty input.
    pub fn prepare(&self, text: &str) -> Result<Prepared, DossierError> {
        let parser = DocumentParser::with_config(
            ParserConfig::default().with_max_errors(self.config.max_parse_errors),
        );
        let outcome = parser.parse(text);
        let Some(document) = outcome.document else {
            return Err(InputError::Empty.into());
        };

        let validation = DocumentValidator::new().validate(&document);
        let data = extract(&document);
        tracing::info!(
            title = ?document.title(),
            sections = document.section_count(),
            parse_issues = outcome.issues.len(),
            score = validation.score,
            requirements = data.requirements.len(),
            "document prepared"
        );

        let mut state = AnalysisState::default();
        state.apply(AnalysisUpdate {
            raw_input: Some(text.to_string()),
            title: Some(document.title().map(str::to_string)),
            validation: Some(Some(ValidationSummary::from(&validation))),
            change_log: vec![ChangeNote::new(
                "prepare",
                format!(
                    "extracted {} requirements, {} stories, {} ideas, {} questions",
                    data.requirements.len(),
                    data.stories.len(),
                    data.ideas.len(),
                    data.questions.len()
                ),
            )],
            requirements: data.requirements,
            stories: data.stories,
            ideas: data.ideas,
            questions: data.questions,
            ..AnalysisUpdate::default()
        });

        Ok(Prepared {
            document,
            parse_issues: outcome.issues,
            validation,
            state,
        })
    }

    /// Build the analysis graph for one session
    ///
    /// Enrichment calls are sent and tracked under `session_id`.
    ///
    /// # Errors
    /// [`DossierError::Graph`] if the wiring is inconsistent.
    pub fn build_graph(
        &self,
        session_id: &SessionId,
    ) -> Result<CompiledGraph<AnalysisState>, DossierError> {
        let max_passes = self.config.run.max_refinement_passes;
        let mut graph = StageGraph::new();
        graph
            .register(CATEGORIZE, CategorizeStage::new(self.model.clone()))?
            .register(PRIORITIZE, PrioritizeStage::new(self.model.clone()))?
            .register(DEPENDENCIES, DependencyStage::new(self.model.clone()))?
            .register(
                TOPICS,
                TopicStage::new(self.model.clone(), self.config.run.max_topics),
            )?
            .register(
                RESEARCH,
                ResearchStage::new(self.bridge.clone(), session_id.as_str()),
            )?
            .register(REVIEW, ReviewStage::new(self.model.clone(), max_passes))?;
        graph
            .add_edge(CATEGORIZE, PRIORITIZE)?
            .add_edge(PRIORITIZE, DEPENDENCIES)?
            .add_edge(DEPENDENCIES, TOPICS)?
            .add_edge(TOPICS, RESEARCH)?
            .add_edge(RESEARCH, REVIEW)?
            .add_conditional_edge(
                REVIEW,
                move |state: &AnalysisState| ReviewRoute::decide(state, max_passes),
                [
                    (ReviewRoute::Refine, RouteTarget::from(CATEGORIZE)),
                    (ReviewRoute::Finish, RouteTarget::End),
                ],
            )?;
        graph.set_entry(CATEGORIZE);
        Ok(graph.compile()?.with_config(self.config.run.run_config()))
    }

    /// Analyse a document under the session derived from `identity`
    ///
    /// A pending checkpoint for the session is resumed instead of starting
    /// over; pass `force_new` to ignore it.
    ///
    /// # Errors
    /// Input rejection, graph wiring or checkpoint store failures.
    pub async fn analyze(
        &self,
        identity: &str,
        text: &str,
        options: SessionOptions,
    ) -> Result<AnalysisReport, DossierError> {
        let session = self.sessions.get_or_create(identity, options).await?;
        let graph = self
            .build_graph(&session.id)?
            .with_checkpointer(self.sessions.clone(), session.id.clone())
            .with_cancellation(self.cancel.clone());

        if session.resumed && !options.force_new {
            if let Some(checkpoint) = self.sessions.load(&session.id).await? {
                if checkpoint.has_pending() {
                    tracing::info!(session = %session.id, "resuming analysis from checkpoint");
                    let outcome = graph.resume(checkpoint).await?;
                    return Ok(self.report(session.id, true, outcome, Vec::new(), None));
                }
            }
        }

        let prepared = self.prepare(text)?;
        let outcome = graph.run(prepared.state).await;
        Ok(self.report(
            session.id,
            false,
            outcome,
            prepared.parse_issues,
            Some(prepared.validation),
        ))
    }

    /// Cancel in-flight runs and bridge calls
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(bridge) = &self.bridge {
            bridge.shutdown();
        }
    }

    fn report(
        &self,
        session_id: SessionId,
        resumed: bool,
        outcome: dossier_graph::RunOutcome<AnalysisState>,
        parse_issues: Vec<ParseIssue>,
        validation: Option<ValidationResult>,
    ) -> AnalysisReport {
        let metrics = self
            .bridge
            .as_ref()
            .and_then(|b| b.metrics(session_id.as_str()));
        AnalysisReport {
            session_id,
            resumed,
            status: outcome.status,
            visited: outcome.cursor.visited,
            state: outcome.state,
            parse_issues,
            validation,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_compiles_with_expected_entry() {
        let graph = Pipeline::new(DossierConfig::default())
            .build_graph(&SessionId::new("graph-test"))
            .expect("graph");
        assert_eq!(graph.entry(), CATEGORIZE);
        let names: Vec<_> = graph.stage_names().collect();
        assert_eq!(
            names,
            vec![CATEGORIZE, PRIORITIZE, DEPENDENCIES, TOPICS, RESEARCH, REVIEW]
        );
    }

    #[test]
    fn empty_input_is_rejected() {
        let pipeline = Pipeline::new(DossierConfig::default());
        assert!(matches!(
            pipeline.prepare("  \n"),
            Err(DossierError::Input(InputError::Empty))
        ));
        assert!(matches!(
            pipeline.prepare_bytes(&[0xff, 0xfe]),
            Err(DossierError::Input(InputError::NotUtf8(_)))
        ));
    }
}
