//! Tool dispatch into the game world.

use crate::tools::Parameters;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors an executor may report. The session turns every one of these
/// into an unsuccessful invocation; none reach the caller.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Unsupported action: '{0}'")]
    Unsupported(String),

    #[error("The string valued parameter '{0}' is required.")]
    MissingParameter(String),

    #[error("World rejected the action: {0}")]
    World(String),

    #[error("World is no longer listening")]
    Disconnected,

    #[error("Tool arguments could not be decoded: {0}")]
    Arguments(String),

    #[error("Executor panicked")]
    Panicked,
}

/// Record of one attempted action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInvocation {
    pub name: String,
    pub parameters: Parameters,
    /// Text fed back to the model as the function call output.
    pub output: String,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActionInvocation {
    pub fn succeeded(
        name: impl Into<String>,
        parameters: Parameters,
        output: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            parameters,
            output: output.into(),
            success: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(
        name: impl Into<String>,
        parameters: Parameters,
        output: impl Into<String>,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            name: name.into(),
            parameters,
            output: output.into(),
            success: false,
            error: Some(error.to_string()),
            timestamp: Utc::now(),
        }
    }

    /// Character-voiced text carried by the call arguments.
    ///
    /// `reason` wins over `response` when both are present.
    pub fn override_text(&self) -> Option<String> {
        self.parameters
            .text("reason")
            .or_else(|| self.parameters.text("response"))
            .filter(|text| !text.trim().is_empty())
    }
}

impl fmt::Display for ActionInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = if self.success {
            "Action Performed."
        } else {
            "Action Failed."
        };
        write!(f, "{} [{}]:\t{}", outcome, self.name, self.output)
    }
}

/// Executes tool calls on behalf of one NPC.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Perform `action` with the decoded arguments.
    ///
    /// Returning `Ok` with an unsuccessful invocation is how an executor
    /// reports an in-world refusal; `Err` is reserved for faults.
    async fn perform(
        &self,
        action: &str,
        parameters: &Parameters,
    ) -> Result<ActionInvocation, ActionError>;
}
