//! Tools an NPC can invoke, and decoding of the model's call arguments.
//!
//! The four standard actions are declared as parameter structs; the
//! `Tool` derive turns their doc comments into the descriptions the model
//! sees and emits a closed schema for strict mode.

use openai::Tool as ToolDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use town_macros::Tool;

/// Go to another NPC in the game map.
#[derive(Debug, Tool)]
#[tool(name = "go_to_npc")]
pub struct GoToNpc {
    /// Name of the other NPC. Only the names from the instructions are valid.
    pub npc_name: String,
}

/// Handover an item to detective.
#[derive(Debug, Tool)]
#[tool(name = "handover_item_to_detective")]
pub struct HandoverItemToDetective {
    /// Name of the item to handover. Only Items you currently have in the instructions are valid.
    pub item_name: String,
    /// Short acknowledgement phrase.
    pub response: String,
}

/// Refuse handing over the item to detective.
/// If you do not have asked item, do not call this method, just respond and tell you don't have it.
#[derive(Debug, Tool)]
#[tool(name = "refuse_handover_item_to_detective")]
pub struct RefuseHandoverItemToDetective {
    /// Name of the item you refused to handover.
    pub item_name: String,
    /// Your reason to refuse.
    pub reason: String,
}

/// Arrest the suspected NPC. Only mayor is allowed to call this function.
#[derive(Debug, Tool)]
#[tool(name = "arrest_suspect")]
pub struct ArrestSuspect {
    /// Name of the suspected NPC to arrest. Only the names from the instructions are valid
    pub suspect_npc_name: String,
    /// A short excited text about the action, similar to 'let's go get him!'.
    pub response: String,
}

/// The closed set of standard NPC actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NpcAction {
    GoToNpc,
    HandoverItem,
    RefuseHandover,
    ArrestSuspect,
}

impl NpcAction {
    pub const ALL: [NpcAction; 4] = [
        NpcAction::GoToNpc,
        NpcAction::HandoverItem,
        NpcAction::RefuseHandover,
        NpcAction::ArrestSuspect,
    ];

    /// Tool name as declared to the model.
    pub fn name(&self) -> &'static str {
        match self {
            NpcAction::GoToNpc => GoToNpc::tool_name(),
            NpcAction::HandoverItem => HandoverItemToDetective::tool_name(),
            NpcAction::RefuseHandover => RefuseHandoverItemToDetective::tool_name(),
            NpcAction::ArrestSuspect => ArrestSuspect::tool_name(),
        }
    }

    /// Declaration sent to the model.
    pub fn descriptor(&self) -> ToolDescriptor {
        match self {
            NpcAction::GoToNpc => GoToNpc::as_tool(),
            NpcAction::HandoverItem => HandoverItemToDetective::as_tool(),
            NpcAction::RefuseHandover => RefuseHandoverItemToDetective::as_tool(),
            NpcAction::ArrestSuspect => ArrestSuspect::as_tool(),
        }
    }
}

impl fmt::Display for NpcAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NpcAction {
    type Err = ToolError;

    /// Case-insensitive lookup by tool name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|action| action.name() == wanted)
            .ok_or_else(|| ToolError::UnknownTool(s.to_string()))
    }
}

/// The tools offered to every NPC session.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    /// Registry from arbitrary descriptors.
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self { tools }
    }

    /// The four standard NPC actions.
    pub fn standard() -> Self {
        Self::new(NpcAction::ALL.iter().map(NpcAction::descriptor).collect())
    }

    pub fn list_tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Find a tool by exact name.
    pub fn find_tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Declarations in the shape a request carries them.
    pub fn declarations(&self) -> Vec<ToolDescriptor> {
        self.tools.clone()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Errors from tool lookup and argument decoding.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool arguments are not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Tool arguments must be a JSON object")]
    NotAnObject,
}

/// A decoded scalar argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl ParamValue {
    /// Text form of the value, `None` for null.
    pub fn as_text(&self) -> Option<String> {
        match self {
            ParamValue::Null => None,
            ParamValue::Bool(b) => Some(b.to_string()),
            ParamValue::Number(n) => Some(n.to_string()),
            ParamValue::String(s) => Some(s.clone()),
        }
    }
}

/// Named arguments of a tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, ParamValue>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.0.insert(name.into(), value);
    }

    /// Builder-style insert of a string argument.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, ParamValue::String(value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Text value of an argument. Null and missing both yield `None`.
    pub fn text(&self, name: &str) -> Option<String> {
        self.0.get(name).and_then(ParamValue::as_text)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }
}

/// Decode the JSON argument text of a function call.
///
/// Scalars map to their `ParamValue`. Nested objects are kept as their JSON
/// text. Arrays are dropped.
pub fn parse_parameters(arguments: &str) -> Result<Parameters, ToolError> {
    if arguments.trim().is_empty() {
        return Ok(Parameters::new());
    }

    let Value::Object(map) = serde_json::from_str::<Value>(arguments)? else {
        return Err(ToolError::NotAnObject);
    };

    let mut parameters = Parameters::new();
    for (name, value) in map {
        let value = match value {
            Value::Null => ParamValue::Null,
            Value::Bool(b) => ParamValue::Bool(b),
            Value::Number(n) => match n.as_f64() {
                Some(n) => ParamValue::Number(n),
                None => continue,
            },
            Value::String(s) => ParamValue::String(s),
            Value::Object(_) => ParamValue::String(value.to_string()),
            Value::Array(_) => continue,
        };
        parameters.insert(name, value);
    }
    Ok(parameters)
}
