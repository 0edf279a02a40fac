//! Dossier Core
//!
//! Document-analysis orchestration over the document, graph and bridge
//! layers.
//!
//! # Core Concepts
//!
//! - **Analysis state**: typed channels for extracted records,
//!   categorizations, topics, enrichment, feedback and errors
//! - **Stages**: categorize, prioritize, dependencies, topics, research and
//!   review, looping back for refinement when review asks for it
//! - **Pipeline**: parse → validate → extract → checkpointed graph run
//!
//! # Example
//!
//! ```rust,ignore
//! dossier_core::init_tracing(LogFormat::Pretty);
//! let config = DossierConfig::from_file("dossier.toml")?;
//! let pipeline = Pipeline::from_config(config)?.with_model(model);
//! let report = pipeline
//!     .analyze("plans/roadmap.org", &text, SessionOptions::default())
//!     .await?;
//! println!("{:?}: {} must-haves", report.status, report.state.moscow.must.len());
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod stages;
pub mod state;
pub mod telemetry;

pub use config::{DossierConfig, RunSettings};
pub use error::{ConfigError, DossierError, ModelError};
pub use model::{LanguageModel, ModelRequest, ModelResponse, ModelTask};
pub use pipeline::{AnalysisReport, Pipeline, Prepared};
pub use stages::ReviewRoute;
pub use state::{
    AnalysisState, AnalysisUpdate, ChangeNote, Dependency, Feedback, FeedbackKind, Horizon,
    HorizonBuckets, MoscowBuckets, Priority, ValidationSummary, Verdict,
};
pub use telemetry::{init_tracing, LogFormat};

pub use dossier_graph::SessionOptions;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
