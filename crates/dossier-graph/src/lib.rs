//! Dossier Stage Graph
//!
//! Directed-graph execution over typed pipeline state.
//!
//! # Core Concepts
//!
//! - **Channels**: state fields with declared merge rules ([`Replace`],
//!   [`AppendList`], [`AppendSet`])
//! - **Stages**: async units of work returning partial updates
//! - **Routes**: one outgoing rule per stage, unconditional or label-based
//! - **Checkpoints**: cursor plus state snapshots keyed by session id
//!
//! # Example
//!
//! ```rust,ignore
//! let mut graph = StageGraph::new();
//! graph.register("parse", ParseStage)?;
//! graph.register("review", ReviewStage)?;
//! graph.add_edge("parse", "review")?;
//! graph.add_conditional_edge("review", route_review, [
//!     (Review::Again, "parse".into()),
//!     (Review::Done, RouteTarget::End),
//! ])?;
//!
//! let outcome = graph.compile()?.run(initial_state).await;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod channel;
pub mod checkpoint;
pub mod engine;
pub mod graph;
pub mod route;
pub mod stage;

pub use channel::{AppendList, AppendSet, Channel, GraphState, MergeStrategy, Replace};
pub use checkpoint::{
    generate_id, Checkpoint, CheckpointError, CheckpointStore, JsonFileCheckpointStore,
    MemoryCheckpointStore, SessionId, SessionInfo, SessionManager, SessionOptions,
};
pub use engine::{CompiledGraph, Cursor, RunConfig, RunOutcome, RunStatus, DEFAULT_MAX_STEPS};
pub use graph::{GraphError, StageGraph};
pub use route::{RouteLabel, RouteTarget};
pub use stage::{stage_fn, Stage, StageError, StageOutput};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
