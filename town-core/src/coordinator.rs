//! The town: one session per NPC, a culprit, and the detective's focus.

use crate::action::ActionExecutor;
use crate::agent::{AgentConfig, AgentError, AgentSession, StreamChunk};
use crate::backend::ModelBackend;
use crate::config::DEFAULT_DETECTIVE_NAME;
use crate::evidence::{inject_evidence, EvidenceError, InventoryOracle};
use crate::profile::{normalize_role, NpcProfile};
use crate::prompts::{PromptError, PromptStore};
use crate::transcript::{Reply, Transcript};
use futures::Stream;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from setting up or driving the town.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("A town needs at least one NPC")]
    NoProfiles,

    #[error("Two NPCs are named '{0}'")]
    DuplicateNpc(String),

    #[error("No NPC can be the culprit under {0}")]
    NoEligibleCulprit(String),

    #[error("No NPC named '{0}'")]
    UnknownNpc(String),

    #[error("NPC index {index} out of range (town has {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Saved culprit '{saved}' does not match the marked NPC '{marked}'")]
    CulpritMismatch { saved: String, marked: String },

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Evidence(#[from] EvidenceError),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// How the culprit is chosen at start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CulpritPolicy {
    /// The first NPC with this role.
    FixedRole(String),
    /// A seeded random pick among NPCs without this role.
    ExcludeRole { role: String, seed: u64 },
    /// The NPC with this name.
    Named(String),
}

impl Default for CulpritPolicy {
    fn default() -> Self {
        CulpritPolicy::FixedRole("innkeeper".to_string())
    }
}

impl std::fmt::Display for CulpritPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CulpritPolicy::FixedRole(role) => write!(f, "role '{role}'"),
            CulpritPolicy::ExcludeRole { role, seed } => {
                write!(f, "anyone but role '{role}' (seed {seed})")
            }
            CulpritPolicy::Named(name) => write!(f, "name '{name}'"),
        }
    }
}

impl CulpritPolicy {
    /// Index of the culprit in `profiles`. Deterministic for a given input.
    pub fn select(&self, profiles: &[NpcProfile]) -> Result<usize, CoordinatorError> {
        let no_match = || CoordinatorError::NoEligibleCulprit(self.to_string());
        match self {
            CulpritPolicy::FixedRole(role) => {
                profiles.iter().position(|p| p.has_role(role)).ok_or_else(no_match)
            }
            CulpritPolicy::ExcludeRole { role, seed } => {
                let role = normalize_role(role);
                let eligible: Vec<usize> = profiles
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.role != role)
                    .map(|(i, _)| i)
                    .collect();
                if eligible.is_empty() {
                    return Err(no_match());
                }
                let mut rng = StdRng::seed_from_u64(*seed);
                Ok(eligible[rng.gen_range(0..eligible.len())])
            }
            CulpritPolicy::Named(name) => profiles
                .iter()
                .position(|p| p.name == *name)
                .ok_or_else(no_match),
        }
    }
}

/// Builds the session for each NPC at start.
pub trait SessionFactory {
    /// `town` is every profile, culprit already marked.
    fn create_session(
        &self,
        profile: &NpcProfile,
        instructions: String,
        town: &[NpcProfile],
    ) -> AgentSession;
}

/// All NPCs share one backend and config; executors are built per NPC.
pub struct SharedBackend<F> {
    backend: Arc<dyn ModelBackend>,
    config: AgentConfig,
    executors: F,
}

impl<F> SharedBackend<F>
where
    F: Fn(&NpcProfile, &[NpcProfile]) -> Arc<dyn ActionExecutor>,
{
    pub fn new(backend: Arc<dyn ModelBackend>, executors: F) -> Self {
        Self {
            backend,
            config: AgentConfig::default(),
            executors,
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }
}

impl<F> SessionFactory for SharedBackend<F>
where
    F: Fn(&NpcProfile, &[NpcProfile]) -> Arc<dyn ActionExecutor>,
{
    fn create_session(
        &self,
        profile: &NpcProfile,
        instructions: String,
        town: &[NpcProfile],
    ) -> AgentSession {
        AgentSession::new(
            profile.clone(),
            instructions,
            self.backend.clone(),
            (self.executors)(profile, town),
        )
        .with_config(self.config.clone())
    }
}

/// Owns every NPC session and routes the detective's messages.
pub struct ConversationCoordinator {
    sessions: Vec<AgentSession>,
    active: usize,
    culprit: usize,
    detective_name: String,
    inventory: Option<Arc<dyn InventoryOracle>>,
}

impl ConversationCoordinator {
    /// Pick the culprit, resolve every NPC's instructions and build sessions.
    ///
    /// The first profile starts active.
    pub fn start(
        mut profiles: Vec<NpcProfile>,
        prompts: &PromptStore,
        policy: &CulpritPolicy,
        factory: &dyn SessionFactory,
    ) -> Result<Self, CoordinatorError> {
        if profiles.is_empty() {
            return Err(CoordinatorError::NoProfiles);
        }
        let mut seen = HashSet::new();
        for profile in &profiles {
            if !seen.insert(profile.name.as_str()) {
                return Err(CoordinatorError::DuplicateNpc(profile.name.clone()));
            }
        }

        let culprit = policy.select(&profiles)?;
        for (i, profile) in profiles.iter_mut().enumerate() {
            profile.is_culprit = i == culprit;
        }

        let mut sessions = Vec::with_capacity(profiles.len());
        for profile in &profiles {
            let instructions = prompts.resolve(profile)?;
            sessions.push(factory.create_session(profile, instructions, &profiles));
        }

        info!(
            npcs = sessions.len(),
            culprit = %profiles[culprit].name,
            "Conversation started"
        );
        Ok(Self {
            sessions,
            active: 0,
            culprit,
            detective_name: DEFAULT_DETECTIVE_NAME.to_string(),
            inventory: None,
        })
    }

    /// Rebuild a town from sessions that already exist.
    ///
    /// Exactly one session must be marked as the culprit.
    pub fn from_sessions(sessions: Vec<AgentSession>) -> Result<Self, CoordinatorError> {
        if sessions.is_empty() {
            return Err(CoordinatorError::NoProfiles);
        }
        let mut culprits = sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.profile().is_culprit)
            .map(|(i, _)| i);
        let (Some(culprit), None) = (culprits.next(), culprits.next()) else {
            return Err(CoordinatorError::NoEligibleCulprit(
                "a restored town".to_string(),
            ));
        };
        Ok(Self {
            sessions,
            active: 0,
            culprit,
            detective_name: DEFAULT_DETECTIVE_NAME.to_string(),
            inventory: None,
        })
    }

    pub fn with_detective_name(mut self, name: impl Into<String>) -> Self {
        self.detective_name = name.into();
        self
    }

    /// Evidence source for instruction updates.
    pub fn with_inventory(mut self, inventory: Arc<dyn InventoryOracle>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn detective_name(&self) -> &str {
        &self.detective_name
    }

    /// Name of the culprit. Fixed for the lifetime of the coordinator.
    pub fn who_is_culprit(&self) -> &str {
        self.sessions[self.culprit].name()
    }

    pub fn sessions(&self) -> &[AgentSession] {
        &self.sessions
    }

    pub fn session(&self, name: &str) -> Option<&AgentSession> {
        self.sessions.iter().find(|s| s.name() == name)
    }

    /// Transcript of one NPC.
    pub fn history(&self, name: &str) -> Option<&Transcript> {
        self.session(name).map(AgentSession::transcript)
    }

    pub fn active(&self) -> &AgentSession {
        &self.sessions[self.active]
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    /// Make the named NPC the one the detective is talking to.
    pub fn switch_to(&mut self, name: &str) -> Result<(), CoordinatorError> {
        let index = self
            .sessions
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| CoordinatorError::UnknownNpc(name.to_string()))?;
        self.switch_to_index(index)
    }

    pub fn switch_to_index(&mut self, index: usize) -> Result<(), CoordinatorError> {
        if index >= self.sessions.len() {
            return Err(CoordinatorError::IndexOutOfRange {
                index,
                len: self.sessions.len(),
            });
        }
        if index != self.active {
            debug!(npc = %self.sessions[index].name(), "Switched active NPC");
        }
        self.active = index;
        Ok(())
    }

    /// Refresh the active NPC's evidence section from the inventory.
    ///
    /// Returns whether the instructions changed.
    pub fn update_instructions_if_necessary(&mut self) -> Result<bool, EvidenceError> {
        let items = self
            .inventory
            .as_ref()
            .map(|inventory| inventory.current_evidence())
            .unwrap_or_default();
        let session = &mut self.sessions[self.active];
        match inject_evidence(session.instructions(), &items)? {
            Some(updated) => {
                debug!(npc = %session.name(), items = items.len(), "Updated collected evidence");
                session.set_instructions(updated);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Send the detective's message to the active NPC.
    pub async fn send_to_active(&mut self, text: &str) -> Result<Reply, CoordinatorError> {
        self.update_instructions_if_necessary()?;
        let session = &mut self.sessions[self.active];
        Ok(session.send(&self.detective_name, text).await?)
    }

    /// Streaming form of `send_to_active`.
    pub fn send_to_active_streaming<'a>(
        &'a mut self,
        text: &'a str,
    ) -> Result<impl Stream<Item = Result<StreamChunk, AgentError>> + Send + 'a, CoordinatorError>
    {
        self.update_instructions_if_necessary()?;
        let Self {
            sessions,
            active,
            detective_name,
            ..
        } = self;
        Ok(sessions[*active].send_streaming(detective_name.as_str(), text))
    }

    /// Switch to `name` and send.
    pub async fn talk_to(&mut self, name: &str, text: &str) -> Result<Reply, CoordinatorError> {
        self.switch_to(name)?;
        self.send_to_active(text).await
    }

    /// Switch to `name` and stream.
    pub fn talk_to_streaming<'a>(
        &'a mut self,
        name: &str,
        text: &'a str,
    ) -> Result<impl Stream<Item = Result<StreamChunk, AgentError>> + Send + 'a, CoordinatorError>
    {
        self.switch_to(name)?;
        self.send_to_active_streaming(text)
    }
}
