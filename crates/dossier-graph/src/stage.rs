//! Stage contract
//!
//! A stage reads the current state and returns a partial update. Errors are
//! data: they are recorded in the state's error list and the run continues,
//! unless the error is fatal or the stage asks to halt.

use crate::channel::GraphState;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Error raised by or on behalf of a stage
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("stage '{stage}': {message}")]
pub struct StageError {
    /// Stage that produced the error; filled in by the engine when empty
    pub stage: String,
    /// Human-readable description
    pub message: String,
    /// Fatal errors halt the run after the failing stage
    pub fatal: bool,
}

impl StageError {
    /// Non-fatal error; the run continues along the stage's outgoing rule
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            stage: String::new(),
            message: message.into(),
            fatal: false,
        }
    }

    /// Fatal error; the run halts after this stage
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            stage: String::new(),
            message: message.into(),
            fatal: true,
        }
    }

    /// With stage name
    #[inline]
    #[must_use]
    pub fn in_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = stage.into();
        self
    }

    pub(crate) fn attribute(mut self, stage: &str) -> Self {
        if self.stage.is_empty() {
            self.stage = stage.to_string();
        }
        self
    }
}

/// Partial update returned by a stage
#[derive(Debug)]
pub struct StageOutput<U> {
    /// Update merged into the state
    pub update: U,
    /// Errors recorded alongside the update
    pub errors: Vec<StageError>,
    /// Stop the run after merging this output
    pub halt: bool,
}

impl<U: Default> Default for StageOutput<U> {
    fn default() -> Self {
        Self::new(U::default())
    }
}

impl<U> StageOutput<U> {
    /// Output carrying an update
    #[inline]
    pub fn new(update: U) -> Self {
        Self {
            update,
            errors: Vec::new(),
            halt: false,
        }
    }

    /// With a recorded error
    #[inline]
    #[must_use]
    pub fn with_error(mut self, error: StageError) -> Self {
        self.errors.push(error);
        self
    }

    /// With several recorded errors
    #[inline]
    #[must_use]
    pub fn with_errors(mut self, errors: impl IntoIterator<Item = StageError>) -> Self {
        self.errors.extend(errors);
        self
    }

    /// Request a halt after this stage
    #[inline]
    #[must_use]
    pub fn halt(mut self) -> Self {
        self.halt = true;
        self
    }

    /// Whether the run stops after this output
    #[must_use]
    pub fn stops_run(&self) -> bool {
        self.halt || self.errors.iter().any(|e| e.fatal)
    }
}

/// One named unit of work in a stage graph
#[async_trait::async_trait]
pub trait Stage<S: GraphState>: Send + Sync {
    /// Read the state and produce a partial update
    async fn run(&self, state: &S) -> Result<StageOutput<S::Update>, StageError>;
}

/// Synchronous closure adapter, see [`stage_fn`]
pub struct FnStage<S, F> {
    f: F,
    _state: PhantomData<fn(&S)>,
}

/// Wrap a synchronous closure as a [`Stage`]
pub fn stage_fn<S, F>(f: F) -> FnStage<S, F>
where
    S: GraphState,
    F: Fn(&S) -> Result<StageOutput<S::Update>, StageError> + Send + Sync,
{
    FnStage {
        f,
        _state: PhantomData,
    }
}

#[async_trait::async_trait]
impl<S, F> Stage<S> for FnStage<S, F>
where
    S: GraphState,
    F: Fn(&S) -> Result<StageOutput<S::Update>, StageError> + Send + Sync,
{
    async fn run(&self, state: &S) -> Result<StageOutput<S::Update>, StageError> {
        (self.f)(state)
    }
}
