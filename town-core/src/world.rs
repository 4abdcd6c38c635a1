//! Reference executor: NPC actions handed off to a game loop.
//!
//! `NpcActions` validates a tool call, posts a `WorldCommand` on a bounded
//! channel and waits for the game loop to acknowledge it. The game loop
//! drains its `WorldInbox` at its own pace, typically once per frame with
//! `try_next`, and completes each request once the effect has happened.

use crate::action::{ActionError, ActionExecutor, ActionInvocation};
use crate::profile::NpcProfile;
use crate::tools::{NpcAction, Parameters};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

/// A side effect the game must carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldCommand {
    /// Walk `npc` to stand next to `target`.
    MoveNextTo { npc: String, target: String },
    /// `npc` hands `item` to the detective.
    GiveItem { npc: String, item: String },
    /// `npc` arrests `suspect`; the game's ending.
    Arrest { npc: String, suspect: String },
}

/// A command awaiting completion by the game loop.
#[derive(Debug)]
pub struct WorldRequest {
    command: WorldCommand,
    reply: oneshot::Sender<Result<(), String>>,
}

impl WorldRequest {
    pub fn command(&self) -> &WorldCommand {
        &self.command
    }

    /// Report the outcome back to the waiting executor.
    pub fn complete(self, result: Result<(), String>) {
        // The executor may have been dropped; nothing to report to then.
        let _ = self.reply.send(result);
    }
}

/// Sending side, held by executors.
#[derive(Debug, Clone)]
pub struct WorldHandle {
    tx: mpsc::Sender<WorldRequest>,
}

impl WorldHandle {
    /// Post a command and wait until the game loop completes it.
    pub async fn submit(&self, command: WorldCommand) -> Result<(), ActionError> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(WorldRequest { command, reply })
            .await
            .map_err(|_| ActionError::Disconnected)?;
        done.await
            .map_err(|_| ActionError::Disconnected)?
            .map_err(ActionError::World)
    }
}

/// Receiving side, owned by the game loop.
#[derive(Debug)]
pub struct WorldInbox {
    rx: mpsc::Receiver<WorldRequest>,
}

impl WorldInbox {
    /// Next pending request, if any, without waiting.
    pub fn try_next(&mut self) -> Option<WorldRequest> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next request. `None` once every handle is dropped.
    pub async fn next(&mut self) -> Option<WorldRequest> {
        self.rx.recv().await
    }
}

/// Create a connected handle and inbox.
pub fn world_channel(capacity: usize) -> (WorldHandle, WorldInbox) {
    let (tx, rx) = mpsc::channel(capacity);
    (WorldHandle { tx }, WorldInbox { rx })
}

/// The standard NPC actions, performed through the world hand-off.
pub struct NpcActions {
    profile: NpcProfile,
    town: Vec<NpcProfile>,
    world: WorldHandle,
}

impl NpcActions {
    pub fn new(profile: NpcProfile, town: Vec<NpcProfile>, world: WorldHandle) -> Self {
        Self {
            profile,
            town,
            world,
        }
    }

    /// Find an NPC whose name or role appears in `name_or_role`.
    ///
    /// Matching is case-insensitive substring containment, so "Mara the
    /// innkeeper" and "the innkeeper" both find Mara.
    pub fn find_npc(&self, name_or_role: &str) -> Option<&NpcProfile> {
        let wanted = name_or_role.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }
        self.town.iter().find(|npc| {
            let name = npc.name.trim().to_lowercase();
            (!name.is_empty() && wanted.contains(&name))
                || (!npc.role.is_empty() && wanted.contains(&npc.role))
        })
    }

    async fn go_to(&self, parameters: &Parameters) -> ActionInvocation {
        let name = NpcAction::GoToNpc.name();
        let Some(target) = required(parameters, "npc_name") else {
            return missing(name, parameters, "npc_name");
        };
        match self.move_next_to(&target).await {
            Ok(_) => ActionInvocation::succeeded(
                name,
                parameters.clone(),
                format!("You are now standing next to {target}. Don't talk to him yet."),
            ),
            Err(e) => ActionInvocation::failed(
                name,
                parameters.clone(),
                format!("You cannot visit '{target}' right now."),
                e,
            ),
        }
    }

    async fn hand_over(&self, parameters: &Parameters) -> ActionInvocation {
        let name = NpcAction::HandoverItem.name();
        let Some(item) = required(parameters, "item_name") else {
            return missing(name, parameters, "item_name");
        };
        // The NPC has already agreed; a world failure does not retract that.
        if let Err(e) = self
            .world
            .submit(WorldCommand::GiveItem {
                npc: self.profile.name.clone(),
                item: item.clone(),
            })
            .await
        {
            error!(npc = %self.profile.name, %item, "Unable to add item to inventory: {e}");
        }
        ActionInvocation::succeeded(
            name,
            parameters.clone(),
            format!("{} handed over the {item}", self.profile.name),
        )
    }

    fn refuse(&self, parameters: &Parameters) -> ActionInvocation {
        let name = NpcAction::RefuseHandover.name();
        let Some(item) = required(parameters, "item_name") else {
            return missing(name, parameters, "item_name");
        };
        let Some(reason) = required(parameters, "reason") else {
            return missing(name, parameters, "reason");
        };
        ActionInvocation::succeeded(
            name,
            parameters.clone(),
            format!(
                "{} refused to hand over the {item}. Reason: {reason}",
                self.profile.name
            ),
        )
    }

    async fn arrest(&self, parameters: &Parameters) -> ActionInvocation {
        let name = NpcAction::ArrestSuspect.name();
        let Some(suspect) = required(parameters, "suspect_npc_name") else {
            return missing(name, parameters, "suspect_npc_name");
        };
        let outcome = async {
            let target = self.move_next_to(&suspect).await?;
            self.world
                .submit(WorldCommand::Arrest {
                    npc: self.profile.name.clone(),
                    suspect: target,
                })
                .await
        }
        .await;
        match outcome {
            Ok(()) => ActionInvocation::succeeded(
                name,
                parameters.clone(),
                format!(
                    "You are now standing next to {suspect} to arrest him. Don't talk to him yet."
                ),
            ),
            Err(e) => ActionInvocation::failed(
                name,
                parameters.clone(),
                format!("You cannot arrest '{suspect}' right now."),
                e,
            ),
        }
    }

    /// Move next to the NPC matching `name_or_role`; returns its name.
    async fn move_next_to(&self, name_or_role: &str) -> Result<String, ActionError> {
        let target = self
            .find_npc(name_or_role)
            .ok_or_else(|| ActionError::World(format!("There is no NPC by that name: {name_or_role}")))?
            .name
            .clone();
        self.world
            .submit(WorldCommand::MoveNextTo {
                npc: self.profile.name.clone(),
                target: target.clone(),
            })
            .await?;
        Ok(target)
    }
}

#[async_trait]
impl ActionExecutor for NpcActions {
    async fn perform(
        &self,
        action: &str,
        parameters: &Parameters,
    ) -> Result<ActionInvocation, ActionError> {
        let invocation = match action.parse::<NpcAction>() {
            Ok(NpcAction::GoToNpc) => self.go_to(parameters).await,
            Ok(NpcAction::HandoverItem) => self.hand_over(parameters).await,
            Ok(NpcAction::RefuseHandover) => self.refuse(parameters),
            Ok(NpcAction::ArrestSuspect) => self.arrest(parameters).await,
            Err(_) => {
                let unsupported = ActionError::Unsupported(action.to_lowercase());
                ActionInvocation::failed(
                    action.to_lowercase(),
                    parameters.clone(),
                    unsupported.to_string(),
                    unsupported,
                )
            }
        };
        info!(npc = %self.profile.name, "{invocation}");
        Ok(invocation)
    }
}

fn required(parameters: &Parameters, name: &str) -> Option<String> {
    parameters.text(name).filter(|v| !v.trim().is_empty())
}

fn missing(action: &str, parameters: &Parameters, name: &str) -> ActionInvocation {
    let error = ActionError::MissingParameter(name.to_string());
    ActionInvocation::failed(action, parameters.clone(), error.to_string(), error)
}
