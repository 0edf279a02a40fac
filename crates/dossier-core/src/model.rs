//! Language-model seam
//!
//! The model is an opaque request/response capability. Stages send a task
//! plus a prompt and expect line-oriented answers such as `REQ-1: must` or
//! `REQ-2 -> REQ-1`. Anything unparseable is ignored and the stage falls back
//! to heuristics.

use crate::error::ModelError;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// What a stage is asking the model for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTask {
    /// MoSCoW priority per requirement
    Categorize,
    /// Delivery horizon per requirement
    Prioritize,
    /// Dependency edges between requirements
    Dependencies,
    /// Research topics
    Topics,
    /// Approve or request refinement
    Review,
}

/// Model request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Task
    pub task: ModelTask,
    /// Prompt text
    pub prompt: String,
}

/// Model response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Answer text
    pub text: String,
}

impl ModelResponse {
    /// Response carrying `text`
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Opaque completion capability used by analysis stages
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Answer one request
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;
}

fn assignment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:[-*]\s+)?([A-Za-z][\w.-]*)\s*[:=]\s*(.+?)\s*$")
            .expect("static assignment pattern")
    })
}

fn edge_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:[-*]\s+)?([A-Za-z][\w.-]*)\s*(?:->|→|depends on)\s*([A-Za-z][\w.-]*)\s*$")
            .expect("static edge pattern")
    })
}

/// `KEY: value` lines, in order
#[must_use]
pub fn parse_assignments(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| assignment_re().captures(line))
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

/// `A -> B` lines, read as "A depends on B"
#[must_use]
pub fn parse_edges(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| edge_re().captures(line))
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

/// Non-empty lines with list markers stripped
#[must_use]
pub fn parse_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| l.trim().trim_start_matches(['-', '*']).trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
