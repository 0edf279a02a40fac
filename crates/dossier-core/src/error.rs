//! Error types for the analysis pipeline
//!
//! Provides error handling for:
//! - Configuration loading
//! - Language-model calls made by stages
//! - Pipeline setup and run failures, wrapping the lower layers

use dossier_bridge::BridgeError;
use dossier_document::InputError;
use dossier_graph::{CheckpointError, GraphError};
use std::path::PathBuf;
use std::time::Duration;

/// Main pipeline error type
#[derive(Debug, thiserror::Error)]
pub enum DossierError {
    /// Document rejected before parsing
    #[error("document rejected: {0}")]
    Input(#[from] InputError),

    /// Stage graph failed to compile or resume
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    /// Checkpoint store failure
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Resilience bridge could not be built
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// TOML is malformed or has the wrong shape
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Environment override has an unusable value
    #[error("invalid value for {key}: {value:?}")]
    InvalidOverride {
        /// Variable name
        key: String,
        /// Offending value
        value: String,
    },
}

/// Language-model call failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Model could not be reached
    #[error("model unavailable: {0}")]
    Unavailable(String),

    /// No answer in time
    #[error("model timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Answer could not be used
    #[error("unusable model response: {0}")]
    InvalidResponse(String),
}
