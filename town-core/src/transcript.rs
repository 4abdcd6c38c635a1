//! Per-NPC conversation records.

use crate::action::ActionInvocation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One line of an NPC's transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub timestamp: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub message: String,
    /// Set when this turn records a tool invocation rather than speech.
    pub activity: Option<ActionInvocation>,
}

impl ConversationTurn {
    pub fn message(
        from: impl Into<String>,
        to: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            from: from.into(),
            to: to.into(),
            message: message.into(),
            activity: None,
        }
    }

    /// Turn recording an action performed by `npc` while talking to `to`.
    pub fn activity(npc: impl Into<String>, to: impl Into<String>, invocation: ActionInvocation) -> Self {
        let npc = npc.into();
        Self {
            timestamp: invocation.timestamp,
            message: format!("{npc} performed the activity: '{}'.", invocation.name),
            from: npc,
            to: to.into(),
            activity: Some(invocation),
        }
    }

    pub fn is_activity(&self) -> bool {
        self.activity.is_some()
    }
}

impl fmt::Display for ConversationTurn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]\t[{} -> {}]:\t{}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.from,
            self.to,
            self.message
        )?;
        if let Some(activity) = &self.activity {
            write!(f, "\n\t{activity}")?;
        }
        Ok(())
    }
}

/// Append-only list of turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<ConversationTurn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// Turns that carry an action record.
    pub fn activities(&self) -> impl Iterator<Item = &ActionInvocation> {
        self.turns.iter().filter_map(|t| t.activity.as_ref())
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a ConversationTurn;
    type IntoIter = std::slice::Iter<'a, ConversationTurn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}

/// The NPC's answer to one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub from: String,
    pub to: String,
    pub message: String,
    /// Every action performed while producing this reply, in order.
    pub activities: Vec<ActionInvocation>,
    pub timestamp: DateTime<Utc>,
    pub response_id: Option<String>,
    /// Last raw response body, for debugging.
    #[serde(skip)]
    pub raw: Option<String>,
}

impl Reply {
    /// The last action performed, if any.
    pub fn activity(&self) -> Option<&ActionInvocation> {
        self.activities.last()
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} -> {}]:\t{}", self.from, self.to, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Parameters;

    #[test]
    fn test_turn_display() {
        let mut turn = ConversationTurn::message("Detective", "Hans", "[Detective says]: Hello");
        turn.timestamp = DateTime::parse_from_rfc3339("2024-05-01T10:20:30Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            turn.to_string(),
            "[2024-05-01 10:20:30]\t[Detective -> Hans]:\t[Detective says]: Hello"
        );
    }

    #[test]
    fn test_activity_turn() {
        let invocation = ActionInvocation::succeeded("go_to_npc", Parameters::new(), "Moved.");
        let turn = ConversationTurn::activity("Hans", "Detective", invocation);
        assert!(turn.is_activity());
        assert_eq!(turn.message, "Hans performed the activity: 'go_to_npc'.");
        assert!(turn.to_string().ends_with("Action Performed. [go_to_npc]:\tMoved."));
    }

    #[test]
    fn test_transcript_serializes_as_list() {
        let mut transcript = Transcript::new();
        transcript.push(ConversationTurn::message("a", "b", "hi"));
        let json = serde_json::to_value(&transcript).unwrap();
        assert!(json.is_array());
        let back: Transcript = serde_json::from_value(json).unwrap();
        assert_eq!(back, transcript);
    }
}
