//! Game-level configuration.
//!
//! Everything here has a default; `TownConfig::from_env` overlays the
//! `TOWN_*` variables. The API key is not read here: it is only needed
//! once a live backend is built, and `TownConfig::backend` reads it then.

use crate::agent::{AgentConfig, ContextStrategy};
use openai::{OpenAi, ReasoningEffort};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const MODEL_VAR: &str = "TOWN_MODEL";
pub const INTELLIGENCE_VAR: &str = "TOWN_SUSPECT_INTELLIGENCE";
pub const REASONING_EFFORT_VAR: &str = "TOWN_REASONING_EFFORT";
pub const PROMPTS_DIR_VAR: &str = "TOWN_PROMPTS_DIR";
pub const DETECTIVE_NAME_VAR: &str = "TOWN_DETECTIVE_NAME";
pub const REQUEST_TIMEOUT_VAR: &str = "TOWN_REQUEST_TIMEOUT_SECS";

pub const DEFAULT_DETECTIVE_NAME: &str = "Detective";
pub const DEFAULT_PROMPTS_DIR: &str = "prompts";

/// Errors from reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}'")]
    InvalidValue { var: &'static str, value: String },

    #[error("Could not create model backend: {0}")]
    Backend(#[from] openai::Error),
}

/// Pick the model for a suspect intelligence level.
///
/// Level 1 and below use the smallest model, 3 and above the largest.
pub fn model_for_intelligence(level: u8) -> &'static str {
    match level {
        0 | 1 => "gpt-5-nano-2025-08-07",
        2 => "gpt-5-mini-2025-08-07",
        _ => "gpt-5-2025-08-07",
    }
}

/// Configuration for one game.
#[derive(Debug, Clone)]
pub struct TownConfig {
    /// Model every suspect uses.
    pub model: String,

    pub reasoning_effort: ReasoningEffort,

    /// Directory holding templates and the shared prompt files.
    pub prompts_dir: PathBuf,

    /// Sender name for messages routed through the coordinator.
    pub detective_name: String,

    pub context: ContextStrategy,

    /// Per-request timeout applied by the worker.
    pub request_timeout: Option<Duration>,
}

impl Default for TownConfig {
    fn default() -> Self {
        Self {
            model: model_for_intelligence(1).to_string(),
            reasoning_effort: ReasoningEffort::Low,
            prompts_dir: PathBuf::from(DEFAULT_PROMPTS_DIR),
            detective_name: DEFAULT_DETECTIVE_NAME.to_string(),
            context: ContextStrategy::default(),
            request_timeout: None,
        }
    }
}

impl TownConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(level) = get(INTELLIGENCE_VAR) {
            let parsed = level
                .trim()
                .parse::<u8>()
                .map_err(|_| ConfigError::InvalidValue {
                    var: INTELLIGENCE_VAR,
                    value: level.clone(),
                })?;
            config.model = model_for_intelligence(parsed).to_string();
        }
        // An explicit model beats the intelligence level.
        if let Some(model) = get(MODEL_VAR) {
            config.model = model.trim().to_string();
        }
        if let Some(effort) = get(REASONING_EFFORT_VAR) {
            config.reasoning_effort =
                effort
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        var: REASONING_EFFORT_VAR,
                        value: effort.clone(),
                    })?;
        }
        if let Some(dir) = get(PROMPTS_DIR_VAR) {
            config.prompts_dir = PathBuf::from(dir);
        }
        if let Some(name) = get(DETECTIVE_NAME_VAR) {
            config.detective_name = name.trim().to_string();
        }
        if let Some(secs) = get(REQUEST_TIMEOUT_VAR) {
            let secs = secs
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue {
                    var: REQUEST_TIMEOUT_VAR,
                    value: secs.clone(),
                })?;
            config.request_timeout = Some(Duration::from_secs(secs));
        }
        Ok(config)
    }

    /// Set the model from an intelligence level.
    pub fn with_intelligence(mut self, level: u8) -> Self {
        self.model = model_for_intelligence(level).to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = effort;
        self
    }

    pub fn with_prompts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompts_dir = dir.into();
        self
    }

    pub fn with_detective_name(mut self, name: impl Into<String>) -> Self {
        self.detective_name = name.into();
        self
    }

    pub fn with_context(mut self, context: ContextStrategy) -> Self {
        self.context = context;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Session settings derived from this configuration.
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig::default()
            .with_model(self.model.clone())
            .with_reasoning_effort(self.reasoning_effort)
            .with_context(self.context)
    }

    /// Build a live client. Fails if `OPENAI_API_KEY` is not set.
    pub fn backend(&self) -> Result<OpenAi, ConfigError> {
        Ok(OpenAi::from_env()?.with_model(self.model.clone()))
    }
}
