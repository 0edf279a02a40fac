//! Stage graph execution
//!
//! The engine runs one stage at a time:
//! 1. Invoke the current stage with a read-only view of the state
//! 2. Merge the returned update and record any stage errors
//! 3. Resolve the next stage from the stage's outgoing rule
//!
//! The run ends at a terminal stage, a route to `End`, a fatal error or halt,
//! cancellation, or the step limit. Control flow lives in the [`Cursor`],
//! never in the user state.

use crate::channel::GraphState;
use crate::checkpoint::{Checkpoint, CheckpointStore, SessionId};
use crate::graph::GraphError;
use crate::route::{RouteTarget, Rule};
use crate::stage::{Stage, StageError, StageOutput};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default bound on executed stages per run
pub const DEFAULT_MAX_STEPS: usize = 100;

/// Execution limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Stages executed before the run stops with `StepLimitReached`
    pub max_steps: usize,
    /// Optional per-stage timeout
    pub stage_timeout: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            stage_timeout: None,
        }
    }
}

impl RunConfig {
    /// With step limit
    #[inline]
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// With per-stage timeout
    #[inline]
    #[must_use]
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }
}

/// Engine-owned control state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Stage most recently started
    pub current: Option<String>,
    /// Stage to run next; `None` once the run is over
    pub next: Option<String>,
    /// Stages completed so far
    pub step: usize,
    /// Completed stages in execution order
    pub visited: Vec<String>,
}

impl Cursor {
    /// Cursor positioned at an entry stage
    pub fn start(entry: impl Into<String>) -> Self {
        Self {
            current: None,
            next: Some(entry.into()),
            step: 0,
            visited: Vec::new(),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Reached a terminal stage or a route to `End`
    Completed,
    /// A stage returned a fatal error or asked to halt
    Halted,
    /// The cancellation token fired
    Cancelled,
    /// The step limit was hit before the run finished
    StepLimitReached,
}

/// Result of a run
#[derive(Debug, Clone)]
pub struct RunOutcome<S> {
    /// Final merged state
    pub state: S,
    /// Final cursor; `visited` lists completed stages in order
    pub cursor: Cursor,
    /// How the run ended
    pub status: RunStatus,
}

impl<S> RunOutcome<S> {
    /// Completed stages in execution order
    #[inline]
    #[must_use]
    pub fn visited(&self) -> &[String] {
        &self.cursor.visited
    }

    /// Whether the run reached the end of the graph
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

struct Checkpointing<S> {
    store: Arc<dyn CheckpointStore<S>>,
    session_id: SessionId,
}

/// Validated, executable stage graph
pub struct CompiledGraph<S: GraphState> {
    stages: IndexMap<String, Arc<dyn Stage<S>>>,
    rules: IndexMap<String, Rule<S>>,
    entry: String,
    config: RunConfig,
    checkpointing: Option<Checkpointing<S>>,
    cancel: CancellationToken,
}

enum Step<U> {
    Finished(Result<StageOutput<U>, StageError>),
    Cancelled,
}

impl<S: GraphState> CompiledGraph<S> {
    pub(crate) fn new(
        stages: IndexMap<String, Arc<dyn Stage<S>>>,
        rules: IndexMap<String, Rule<S>>,
        entry: String,
    ) -> Self {
        Self {
            stages,
            rules,
            entry,
            config: RunConfig::default(),
            checkpointing: None,
            cancel: CancellationToken::new(),
        }
    }

    /// With execution limits
    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Save a checkpoint after every stage
    #[must_use]
    pub fn with_checkpointer(
        mut self,
        store: Arc<dyn CheckpointStore<S>>,
        session_id: SessionId,
    ) -> Self {
        self.checkpointing = Some(Checkpointing { store, session_id });
        self
    }

    /// Cancel runs when `token` fires
    #[inline]
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Entry stage name
    #[inline]
    #[must_use]
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Registered stage names in registration order
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.keys().map(String::as_str)
    }

    /// Execution limits
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run from the entry stage
    pub async fn run(&self, initial: S) -> RunOutcome<S> {
        tracing::info!(entry = %self.entry, max_steps = self.config.max_steps, "run started");
        self.drive(initial, Cursor::start(self.entry.clone())).await
    }

    /// Continue a run from a saved checkpoint
    ///
    /// # Errors
    /// [`GraphError::UnknownStage`] when the checkpoint points at a stage
    /// this graph does not have.
    pub async fn resume(&self, checkpoint: Checkpoint<S>) -> Result<RunOutcome<S>, GraphError> {
        if let Some(next) = &checkpoint.cursor.next {
            if !self.stages.contains_key(next) {
                return Err(GraphError::UnknownStage {
                    stage: next.clone(),
                    referenced_by: format!("checkpoint of session {}", checkpoint.session_id),
                });
            }
        }
        tracing::info!(
            session = %checkpoint.session_id,
            step = checkpoint.cursor.step,
            next = ?checkpoint.cursor.next,
            "resuming run"
        );
        Ok(self.drive(checkpoint.state, checkpoint.cursor).await)
    }

    async fn drive(&self, mut state: S, mut cursor: Cursor) -> RunOutcome<S> {
        let status = loop {
            let Some(name) = cursor.next.clone() else {
                break RunStatus::Completed;
            };
            if self.cancel.is_cancelled() {
                break RunStatus::Cancelled;
            }
            if cursor.step >= self.config.max_steps {
                state.record_error(
                    StageError::recoverable(format!(
                        "step limit of {} reached before running '{name}'",
                        self.config.max_steps
                    ))
                    .in_stage(name.as_str()),
                );
                tracing::warn!(stage = %name, max_steps = self.config.max_steps, "step limit reached");
                break RunStatus::StepLimitReached;
            }
            let Some(stage) = self.stages.get(&name) else {
                // compile() and resume() rule this out
                state.record_error(StageError::fatal("stage is not registered").in_stage(name.as_str()));
                break RunStatus::Halted;
            };

            cursor.current = Some(name.clone());
            tracing::debug!(stage = %name, step = cursor.step, "stage started");

            let outcome = match self.invoke(stage.as_ref(), &state, &name).await {
                Step::Cancelled => {
                    tracing::info!(stage = %name, "run cancelled during stage");
                    break RunStatus::Cancelled;
                }
                Step::Finished(outcome) => outcome,
            };

            let halted = match outcome {
                Ok(output) => {
                    let halted = output.stops_run();
                    let error_count = output.errors.len();
                    state.apply(output.update);
                    for error in output.errors {
                        state.record_error(error.attribute(&name));
                    }
                    tracing::debug!(stage = %name, errors = error_count, halted, "stage finished");
                    halted
                }
                Err(error) => {
                    let fatal = error.fatal;
                    tracing::warn!(stage = %name, fatal, error = %error.message, "stage failed");
                    state.record_error(error.attribute(&name));
                    fatal
                }
            };

            cursor.step += 1;
            cursor.visited.push(name.clone());
            cursor.next = if halted { None } else { self.next_stage(&name, &state) };

            self.checkpoint(&state, &cursor).await;

            if halted {
                break RunStatus::Halted;
            }
        };

        tracing::info!(
            status = ?status,
            steps = cursor.step,
            visited = ?cursor.visited,
            "run finished"
        );
        RunOutcome {
            state,
            cursor,
            status,
        }
    }

    async fn invoke(&self, stage: &dyn Stage<S>, state: &S, name: &str) -> Step<S::Update> {
        let run = async {
            match self.config.stage_timeout {
                Some(limit) => match tokio::time::timeout(limit, stage.run(state)).await {
                    Ok(result) => result,
                    Err(_) => Err(StageError::recoverable(format!(
                        "timed out after {}ms",
                        limit.as_millis()
                    ))
                    .in_stage(name)),
                },
                None => stage.run(state).await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Step::Cancelled,
            result = run => Step::Finished(result),
        }
    }

    fn next_stage(&self, from: &str, state: &S) -> Option<String> {
        let target = match self.rules.get(from)? {
            Rule::Direct(target) => Some(target.clone()),
            Rule::Conditional(route) => route.resolve(state),
        };
        match target {
            Some(RouteTarget::Stage(next)) => Some(next),
            Some(RouteTarget::End) | None => None,
        }
    }

    async fn checkpoint(&self, state: &S, cursor: &Cursor) {
        let Some(cp) = &self.checkpointing else {
            return;
        };
        let checkpoint = Checkpoint::new(cp.session_id.clone(), cursor.clone(), state.clone());
        if let Err(e) = cp.store.save(&checkpoint).await {
            tracing::warn!(session = %cp.session_id, error = %e, "checkpoint save failed");
        }
    }
}
