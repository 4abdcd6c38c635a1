//! Collected evidence and its injection into NPC instructions.
//!
//! Instructions may contain a delimited evidence section:
//!
//! ```text
//! [COLLECTED EVIDENCE]
//! - rope: A frayed length of hemp.
//! [END COLLECTED EVIDENCE]
//! ```
//!
//! Before an NPC answers, the span between the markers is replaced with the
//! detective's current inventory. Text outside the markers is never touched.

use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use thiserror::Error;

pub const EVIDENCE_OPEN: &str = "[COLLECTED EVIDENCE]";
pub const EVIDENCE_CLOSE: &str = "[END COLLECTED EVIDENCE]";

/// Marker problems in a set of instructions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvidenceError {
    #[error("Instructions open an evidence section but never close it")]
    UnclosedMarker,
}

/// One item the detective is carrying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub name: String,
    pub description: String,
}

impl EvidenceItem {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Read-only view of the detective's inventory.
pub trait InventoryOracle: Send + Sync {
    fn current_evidence(&self) -> Vec<EvidenceItem>;
}

/// A shared, mutable evidence list the game can add to as items change hands.
#[derive(Debug, Default)]
pub struct EvidenceBoard {
    items: RwLock<Vec<EvidenceItem>>,
}

impl EvidenceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item unless one with the same name is already held.
    pub fn collect(&self, item: EvidenceItem) -> bool {
        let mut items = match self.items.write() {
            Ok(items) => items,
            Err(poisoned) => poisoned.into_inner(),
        };
        if items.iter().any(|i| i.name == item.name) {
            return false;
        }
        items.push(item);
        true
    }
}

impl InventoryOracle for EvidenceBoard {
    fn current_evidence(&self) -> Vec<EvidenceItem> {
        match self.items.read() {
            Ok(items) => items.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Render the body placed between the markers.
///
/// Always starts and ends with a newline so the markers stay on their own
/// lines. An empty inventory renders as `- (none)`.
pub fn render_evidence(items: &[EvidenceItem]) -> String {
    let mut body = String::from("\n");
    if items.is_empty() {
        body.push_str("- (none)\n");
    }
    for item in items {
        if item.description.trim().is_empty() {
            body.push_str(&format!("- {}\n", item.name));
        } else {
            body.push_str(&format!("- {}: {}\n", item.name, item.description));
        }
    }
    body
}

/// Replace the evidence section of `instructions` with `items`.
///
/// Returns `Ok(None)` when the instructions have no opening marker or when
/// the section already holds exactly this content. An opening marker with
/// no closing marker after it is an error.
pub fn inject_evidence(
    instructions: &str,
    items: &[EvidenceItem],
) -> Result<Option<String>, EvidenceError> {
    let Some(open) = instructions.find(EVIDENCE_OPEN) else {
        return Ok(None);
    };
    let body_start = open + EVIDENCE_OPEN.len();

    // A closing marker that only appears before the opening one does not count.
    let Some(close) = instructions[body_start..].find(EVIDENCE_CLOSE) else {
        return Err(EvidenceError::UnclosedMarker);
    };
    let body_end = body_start + close;

    let body = render_evidence(items);
    if instructions[body_start..body_end] == body {
        return Ok(None);
    }

    let mut updated = String::with_capacity(instructions.len() + body.len());
    updated.push_str(&instructions[..body_start]);
    updated.push_str(&body);
    updated.push_str(&instructions[body_end..]);
    Ok(Some(updated))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instructions(body: &str) -> String {
        format!("You are Hans.\n{EVIDENCE_OPEN}{body}{EVIDENCE_CLOSE}\nBe terse.")
    }

    #[test]
    fn test_inject_replaces_only_the_section() {
        let items = vec![
            EvidenceItem::new("rope", "A frayed length of hemp."),
            EvidenceItem::new("key", ""),
        ];
        let updated = inject_evidence(&instructions("\nstale\n"), &items)
            .unwrap()
            .unwrap();
        assert_eq!(
            updated,
            "You are Hans.\n[COLLECTED EVIDENCE]\n- rope: A frayed length of hemp.\n- key\n[END COLLECTED EVIDENCE]\nBe terse."
        );
    }

    #[test]
    fn test_empty_inventory_renders_none() {
        let updated = inject_evidence(&instructions(""), &[]).unwrap().unwrap();
        assert!(updated.contains("[COLLECTED EVIDENCE]\n- (none)\n[END COLLECTED EVIDENCE]"));
    }

    #[test]
    fn test_unchanged_section_is_not_rewritten() {
        let items = vec![EvidenceItem::new("rope", "hemp")];
        let once = inject_evidence(&instructions(""), &items).unwrap().unwrap();
        assert_eq!(inject_evidence(&once, &items).unwrap(), None);
    }

    #[test]
    fn test_no_markers_is_a_no_op() {
        assert_eq!(inject_evidence("Plain instructions.", &[]).unwrap(), None);
    }

    #[test]
    fn test_marker_errors() {
        let unclosed = format!("x {EVIDENCE_OPEN} y");
        assert_eq!(
            inject_evidence(&unclosed, &[]),
            Err(EvidenceError::UnclosedMarker)
        );

        let reversed = format!("{EVIDENCE_CLOSE} x {EVIDENCE_OPEN}");
        assert_eq!(
            inject_evidence(&reversed, &[]),
            Err(EvidenceError::UnclosedMarker)
        );

        let close_only = format!("x {EVIDENCE_CLOSE}");
        assert_eq!(inject_evidence(&close_only, &[]), Ok(None));
    }

    #[test]
    fn test_board_deduplicates() {
        let board = EvidenceBoard::new();
        assert!(board.collect(EvidenceItem::new("rope", "")));
        assert!(!board.collect(EvidenceItem::new("rope", "again")));
        assert_eq!(board.current_evidence().len(), 1);
    }
}
