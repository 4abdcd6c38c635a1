//! NPC identity: who a suspect is and what they carry.

use serde::{Deserialize, Serialize};

/// Static description of one NPC.
///
/// The role is stored trimmed and lowercased, since it is only ever used as a
/// lookup key for prompt templates and culprit selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpcProfile {
    /// Display name, unique within a town.
    pub name: String,
    /// Normalized occupation, e.g. "innkeeper".
    pub role: String,
    /// Free-text list of what the NPC is carrying.
    pub possessions: String,
    /// Set once by the coordinator at start.
    #[serde(default)]
    pub is_culprit: bool,
}

impl NpcProfile {
    /// Create a profile. The role is normalized.
    pub fn new(
        name: impl Into<String>,
        role: impl AsRef<str>,
        possessions: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role: normalize_role(role.as_ref()),
            possessions: possessions.into(),
            is_culprit: false,
        }
    }

    /// Check whether this NPC has the given role, ignoring case and padding.
    pub fn has_role(&self, role: &str) -> bool {
        self.role == normalize_role(role)
    }
}

/// Normalize a role for matching.
pub fn normalize_role(role: &str) -> String {
    role.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_is_normalized() {
        let profile = NpcProfile::new("Mara", "  InnKeeper ", "a ledger");
        assert_eq!(profile.role, "innkeeper");
        assert!(profile.has_role("INNKEEPER"));
        assert!(!profile.is_culprit);
    }
}
