//! Saving and resuming an interrogation.
//!
//! A save holds every NPC's profile, current instructions and transcript,
//! so a restored town keeps its culprit and the evidence each NPC last saw.

use crate::coordinator::{ConversationCoordinator, CoordinatorError, SessionFactory};
use crate::profile::NpcProfile;
use crate::transcript::Transcript;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::info;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current save file version.
const SAVE_VERSION: u32 = 1;

/// A saved town.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedConversation {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub detective_name: String,
    pub culprit: String,
    /// NPC the detective was talking to.
    pub active: String,
    pub npcs: Vec<SavedNpc>,
}

/// One NPC in a save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedNpc {
    pub profile: NpcProfile,
    pub instructions: String,
    pub transcript: Transcript,
}

impl SavedConversation {
    /// Snapshot a running town.
    pub fn capture(coordinator: &ConversationCoordinator) -> Self {
        Self {
            version: SAVE_VERSION,
            saved_at: Utc::now(),
            detective_name: coordinator.detective_name().to_string(),
            culprit: coordinator.who_is_culprit().to_string(),
            active: coordinator.active().name().to_string(),
            npcs: coordinator
                .sessions()
                .iter()
                .map(|session| SavedNpc {
                    profile: session.profile().clone(),
                    instructions: session.instructions().to_string(),
                    transcript: session.transcript().clone(),
                })
                .collect(),
        }
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        let saved: Self = serde_json::from_str(&content)?;

        if saved.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }

        Ok(saved)
    }

    /// Rebuild a coordinator, with fresh sessions continuing each transcript.
    ///
    /// The saved culprit name must agree with the profile flags.
    pub fn restore(
        self,
        factory: &dyn SessionFactory,
    ) -> Result<ConversationCoordinator, CoordinatorError> {
        let profiles: Vec<NpcProfile> = self.npcs.iter().map(|npc| npc.profile.clone()).collect();
        let sessions = self
            .npcs
            .into_iter()
            .map(|npc| {
                factory
                    .create_session(&npc.profile, npc.instructions, &profiles)
                    .with_transcript(npc.transcript)
            })
            .collect();

        let mut coordinator = ConversationCoordinator::from_sessions(sessions)?
            .with_detective_name(self.detective_name);
        if coordinator.who_is_culprit() != self.culprit {
            return Err(CoordinatorError::CulpritMismatch {
                saved: self.culprit,
                marked: coordinator.who_is_culprit().to_string(),
            });
        }
        coordinator.switch_to(&self.active)?;
        Ok(coordinator)
    }
}

/// Save every NPC's transcript to `path`.
pub async fn save_conversation(
    coordinator: &ConversationCoordinator,
    path: impl AsRef<Path>,
) -> Result<(), PersistError> {
    let path = path.as_ref();
    SavedConversation::capture(coordinator).save_json(path).await?;
    info!(path = %path.display(), "Saved conversation");
    Ok(())
}

/// Load a save written by `save_conversation`.
pub async fn load_conversation(path: impl AsRef<Path>) -> Result<SavedConversation, PersistError> {
    SavedConversation::load_json(path).await
}

/// File name for a save taken now.
pub fn save_path(base_dir: impl AsRef<Path>, detective_name: &str) -> PathBuf {
    let sanitized = detective_name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>();
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    base_dir
        .as_ref()
        .join(format!("{sanitized}_{timestamp}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionExecutor;
    use crate::coordinator::SharedBackend;
    use crate::testing::{MockBackend, ScriptedExecutor};
    use std::sync::Arc;

    fn saved_npc(name: &str, role: &str, is_culprit: bool) -> SavedNpc {
        let mut profile = NpcProfile::new(name, role, "");
        profile.is_culprit = is_culprit;
        SavedNpc {
            profile,
            instructions: format!("You are {name}."),
            transcript: Transcript::new(),
        }
    }

    #[test]
    fn test_restore_rejects_mismatched_culprit() {
        let saved = SavedConversation {
            version: SAVE_VERSION,
            saved_at: Utc::now(),
            detective_name: "Detective".into(),
            culprit: "Hans".into(),
            active: "Hans".into(),
            npcs: vec![
                saved_npc("Hans", "farmer", false),
                saved_npc("Mara", "innkeeper", true),
            ],
        };
        let factory = SharedBackend::new(
            Arc::new(MockBackend::new(Vec::new())),
            |_: &NpcProfile, _: &[NpcProfile]| {
                Arc::new(ScriptedExecutor::succeeding()) as Arc<dyn ActionExecutor>
            },
        );

        let result = saved.clone().restore(&factory);
        assert!(matches!(
            result,
            Err(CoordinatorError::CulpritMismatch { ref saved, ref marked })
                if saved == "Hans" && marked == "Mara"
        ));

        let agreeing = SavedConversation {
            culprit: "Mara".into(),
            ..saved
        };
        let restored = agreeing.restore(&factory).unwrap();
        assert_eq!(restored.who_is_culprit(), "Mara");
        assert_eq!(restored.active().name(), "Hans");
    }

    #[test]
    fn test_save_path() {
        let path = save_path("/saves", "Inspector Gadget");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("Inspector_Gadget_"));
        assert!(name.ends_with(".json"));
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.json");
        let saved = SavedConversation {
            version: 0,
            saved_at: Utc::now(),
            detective_name: "Detective".into(),
            culprit: "Mara".into(),
            active: "Mara".into(),
            npcs: Vec::new(),
        };
        saved.save_json(&path).await.unwrap();

        assert!(matches!(
            load_conversation(&path).await,
            Err(PersistError::VersionMismatch {
                expected: 1,
                found: 0
            })
        ));
    }
}
