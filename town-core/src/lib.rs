//! Conversation core for a murder-mystery town of LLM-driven suspects.
//!
//! This crate provides:
//! - Prompt templates resolved per NPC role and culprit flag
//! - One model session per NPC with a tool-use loop and streaming replies
//! - A coordinator that picks the culprit and routes the detective's messages
//! - Evidence injection, a world hand-off executor and transcript persistence
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use town_core::{
//!     world_channel, ConversationCoordinator, CulpritPolicy, NpcActions, NpcProfile,
//!     PromptStore, SharedBackend, TownConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TownConfig::from_env()?;
//!     let prompts = PromptStore::load(&config.prompts_dir)?;
//!     let (world, mut inbox) = world_channel(16);
//!
//!     let factory = SharedBackend::new(Arc::new(config.backend()?), |npc, town| {
//!         Arc::new(NpcActions::new(npc.clone(), town.to_vec(), world.clone())) as _
//!     })
//!     .with_config(config.agent_config());
//!
//!     let town = vec![
//!         NpcProfile::new("Hans", "farmer", "a rope"),
//!         NpcProfile::new("Mara", "innkeeper", "a ledger"),
//!     ];
//!     let mut coordinator =
//!         ConversationCoordinator::start(town, &prompts, &CulpritPolicy::default(), &factory)?;
//!
//!     let reply = coordinator.talk_to("Mara", "Where were you last night?").await?;
//!     println!("{reply}");
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod agent;
pub mod backend;
pub mod config;
pub mod coordinator;
pub mod evidence;
pub mod persist;
pub mod profile;
pub mod prompts;
pub mod testing;
pub mod tools;
pub mod transcript;
pub mod worker;
pub mod world;

// Re-export for convenience
pub use openai::Tool as ToolDescriptor;
pub use town_macros::Tool;

// Primary public API
pub use action::{ActionError, ActionExecutor, ActionInvocation};
pub use agent::{
    AgentConfig, AgentError, AgentSession, ContextStrategy, FollowUp, StreamChunk,
    TOOL_FAILURE_EXCUSE,
};
pub use backend::{ModelBackend, ModelRequest};
pub use config::{model_for_intelligence, ConfigError, TownConfig};
pub use coordinator::{
    ConversationCoordinator, CoordinatorError, CulpritPolicy, SessionFactory, SharedBackend,
};
pub use evidence::{EvidenceBoard, EvidenceError, EvidenceItem, InventoryOracle};
pub use persist::{load_conversation, save_conversation, PersistError, SavedConversation};
pub use profile::NpcProfile;
pub use prompts::{PromptError, PromptStore, PromptTemplate};
pub use testing::{MockBackend, MockResponse, ScriptedExecutor, StaticInventory, TestHarness};
pub use tools::{parse_parameters, NpcAction, ParamValue, Parameters, ToolError, ToolRegistry};
pub use transcript::{ConversationTurn, Reply, Transcript};
pub use worker::{fallback_message, spawn_worker, Worker, WorkerRequest, WorkerResponse};
pub use world::{world_channel, NpcActions, WorldCommand, WorldHandle, WorldInbox, WorldRequest};

#[cfg(test)]
mod tests {
    use super::*;

    /// Point at something suspicious.
    #[derive(Tool)]
    #[tool(name = "point_at")]
    struct PointAt {
        /// Who to point at
        suspect: String,
        /// Optional accusation
        accusation: Option<String>,
    }

    #[test]
    fn test_tool_derive() {
        assert_eq!(PointAt::tool_name(), "point_at");
        assert_eq!(PointAt::tool_description(), "Point at something suspicious.");
    }

    #[test]
    fn test_tool_schema() {
        let schema = PointAt::parameters_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["suspect"]["type"], "string");
        assert_eq!(
            schema["properties"]["accusation"]["type"],
            serde_json::json!(["string", "null"])
        );

        // Strict mode: every property is required, optional ones are nullable.
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "suspect"));
        assert!(required.iter().any(|v| v == "accusation"));
    }

    #[test]
    fn test_tool_as_tool() {
        let tool = PointAt::as_tool();
        assert_eq!(tool.name, "point_at");
        assert!(tool.strict);
        assert!(!tool.description.is_empty());
    }
}
