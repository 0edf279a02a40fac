//! Pipeline configuration
//!
//! Loaded from TOML with every field optional, then adjusted by environment
//! overrides:
//! - `DOSSIER_BRIDGE_BASE_URL` replaces `bridge.base_url`
//! - `DOSSIER_MAX_STEPS` replaces `run.max_steps`

use crate::error::ConfigError;
use dossier_bridge::BridgeConfig;
use dossier_document::parser::DEFAULT_MAX_ERRORS;
use dossier_graph::{RunConfig, DEFAULT_MAX_STEPS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Override for the enrichment service URL
pub const ENV_BRIDGE_BASE_URL: &str = "DOSSIER_BRIDGE_BASE_URL";
/// Override for the engine step limit
pub const ENV_MAX_STEPS: &str = "DOSSIER_MAX_STEPS";

/// Engine and review-loop limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Stage invocations before the run stops
    pub max_steps: usize,
    /// Per-stage timeout; `None` waits indefinitely
    pub stage_timeout_ms: Option<u64>,
    /// Times review may send the analysis back for refinement
    pub max_refinement_passes: u32,
    /// Topics handed to the research stage
    pub max_topics: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            stage_timeout_ms: None,
            max_refinement_passes: 1,
            max_topics: 8,
        }
    }
}

impl RunSettings {
    /// Engine configuration
    #[must_use]
    pub fn run_config(&self) -> RunConfig {
        let config = RunConfig::default().with_max_steps(self.max_steps);
        match self.stage_timeout_ms {
            Some(ms) => config.with_stage_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DossierConfig {
    /// Parser error budget
    pub max_parse_errors: usize,
    /// Engine limits
    pub run: RunSettings,
    /// Enrichment bridge
    pub bridge: BridgeConfig,
    /// Call the enrichment bridge during analysis
    pub research_enabled: bool,
    /// Directory for durable checkpoints; `None` keeps them in memory
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for DossierConfig {
    fn default() -> Self {
        Self {
            max_parse_errors: DEFAULT_MAX_ERRORS,
            run: RunSettings::default(),
            bridge: BridgeConfig::default(),
            research_enabled: true,
            checkpoint_dir: None,
        }
    }
}

impl DossierConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML; missing fields take defaults
    ///
    /// # Errors
    /// [`ConfigError::Parse`] for malformed TOML.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read TOML from a file and apply environment overrides
    ///
    /// # Errors
    /// Read, parse or override failures.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Apply overrides from the process environment
    ///
    /// # Errors
    /// [`ConfigError::InvalidOverride`] for an unparseable value.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`
    ///
    /// # Errors
    /// [`ConfigError::InvalidOverride`] for an unparseable value.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup(ENV_BRIDGE_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.bridge.base_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_MAX_STEPS) {
            self.run.max_steps = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidOverride {
                    key: ENV_MAX_STEPS.to_string(),
                    value: raw,
                })?;
        }
        Ok(())
    }

    /// With bridge configuration
    #[inline]
    #[must_use]
    pub fn with_bridge(mut self, bridge: BridgeConfig) -> Self {
        self.bridge = bridge;
        self
    }

    /// With run limits
    #[inline]
    #[must_use]
    pub fn with_run(mut self, run: RunSettings) -> Self {
        self.run = run;
        self
    }

    /// With research toggled
    #[inline]
    #[must_use]
    pub fn with_research(mut self, enabled: bool) -> Self {
        self.research_enabled = enabled;
        self
    }

    /// With durable checkpoints under `dir`
    #[inline]
    #[must_use]
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn toml_fills_defaults() {
        let config = DossierConfig::from_toml_str(
            r#"
            research_enabled = false

            [run]
            max_steps = 40

            [bridge]
            base_url = "http://enrich:9000"
            batch_size = 2

            [bridge.retry]
            max_retries = 4
            "#,
        )
        .expect("config");

        assert!(!config.research_enabled);
        assert_eq!(config.run.max_steps, 40);
        assert_eq!(config.run.max_refinement_passes, 1);
        assert_eq!(config.bridge.base_url, "http://enrich:9000");
        assert_eq!(config.bridge.batch_size, 2);
        assert_eq!(config.bridge.retry.max_retries, 4);
        assert_eq!(config.bridge.retry.base_delay_ms, 500);
        assert_eq!(config.max_parse_errors, DEFAULT_MAX_ERRORS);
    }

    #[test]
    fn malformed_toml_is_rejected() {
        assert!(matches!(
            DossierConfig::from_toml_str("[run\nmax_steps = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn overrides_apply() {
        let env: HashMap<&str, &str> = [
            (ENV_BRIDGE_BASE_URL, " http://override:1 "),
            (ENV_MAX_STEPS, "12"),
        ]
        .into_iter()
        .collect();
        let mut config = DossierConfig::new();
        config
            .apply_overrides(|k| env.get(k).map(|v| (*v).to_string()))
            .expect("overrides");
        assert_eq!(config.bridge.base_url, "http://override:1");
        assert_eq!(config.run.max_steps, 12);
        assert_eq!(config.run.run_config().max_steps, 12);
    }

    #[test]
    fn bad_step_override_is_an_error() {
        let mut config = DossierConfig::new();
        let err = config
            .apply_overrides(|k| (k == ENV_MAX_STEPS).then(|| "0".to_string()))
            .expect_err("zero steps");
        assert!(matches!(err, ConfigError::InvalidOverride { .. }));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dossier.toml");
        std::fs::write(&path, "max_parse_errors = 7\n").expect("write");
        let config = DossierConfig::from_file(&path).expect("config");
        assert_eq!(config.max_parse_errors, 7);

        let missing = DossierConfig::from_file(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
