//! Testing utilities for the town.
//!
//! This module provides tools for integration testing:
//! - `MockBackend` for deterministic model responses without API calls
//! - `ScriptedExecutor` and `StaticInventory` as stand-in game hooks
//! - `TestHarness` for scripted interrogations
//! - Assertion helpers for transcripts and replies

use crate::action::{ActionError, ActionExecutor, ActionInvocation};
use crate::backend::{ModelBackend, ModelRequest};
use crate::coordinator::{
    ConversationCoordinator, CoordinatorError, CulpritPolicy, SharedBackend,
};
use crate::evidence::{EvidenceBoard, EvidenceItem, InventoryOracle};
use crate::profile::NpcProfile;
use crate::prompts::{PromptStore, PromptTemplate};
use crate::tools::Parameters;
use crate::transcript::Reply;
use async_trait::async_trait;
use futures::StreamExt;
use openai::{
    ContentPart, EventStream, Item, Response, ResponseStatus, Role, StreamEvent, Usage,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A scripted model response.
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    /// Assistant text, emitted before any tool calls.
    pub text: Option<String>,
    /// Tool calls as (name, JSON arguments).
    pub tool_calls: Vec<(String, String)>,
}

impl MockResponse {
    /// A plain text answer.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    /// A single tool call with no text.
    pub fn tool_call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self::default().with_tool_call(name, arguments)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_tool_call(mut self, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        self.tool_calls.push((name.into(), arguments.into()));
        self
    }

    /// Build the response with id `resp_{n}`.
    pub fn into_response(self, n: usize) -> Response {
        let id = format!("resp_{n}");
        let mut output = Vec::new();
        if let Some(text) = self.text {
            output.push(Item::Message {
                id: Some(format!("msg_{n}")),
                role: Role::Assistant,
                content: vec![ContentPart::OutputText { text }],
            });
        }
        for (i, (name, arguments)) in self.tool_calls.into_iter().enumerate() {
            output.push(Item::FunctionCall {
                id: Some(format!("fc_{n}_{i}")),
                call_id: format!("call_{n}_{i}"),
                name,
                arguments,
            });
        }
        Response {
            raw: serde_json::json!({ "id": id, "object": "response", "mock": true }),
            id,
            model: "mock".to_string(),
            status: ResponseStatus::Completed,
            output,
            usage: Usage::default(),
        }
    }
}

/// Break a response into the events a streaming request would deliver.
pub fn stream_events(response: &Response) -> Vec<StreamEvent> {
    let mut events = vec![StreamEvent::Created {
        id: response.id.clone(),
    }];
    for (output_index, item) in response.output.iter().enumerate() {
        match item {
            Item::Message { id, role, .. } => {
                events.push(StreamEvent::OutputItemAdded {
                    output_index,
                    item: Item::Message {
                        id: id.clone(),
                        role: *role,
                        content: Vec::new(),
                    },
                });
                let text = item.output_text().unwrap_or_default();
                for word in text.split_inclusive(' ') {
                    events.push(StreamEvent::TextDelta {
                        output_index,
                        delta: word.to_string(),
                    });
                }
            }
            Item::FunctionCall {
                id,
                call_id,
                name,
                arguments,
            } => {
                events.push(StreamEvent::OutputItemAdded {
                    output_index,
                    item: Item::FunctionCall {
                        id: id.clone(),
                        call_id: call_id.clone(),
                        name: name.clone(),
                        arguments: String::new(),
                    },
                });
                events.push(StreamEvent::FunctionCallArgumentsDelta {
                    output_index,
                    delta: arguments.clone(),
                });
                events.push(StreamEvent::FunctionCallArgumentsDone {
                    output_index,
                    arguments: arguments.clone(),
                });
            }
            _ => {}
        }
        events.push(StreamEvent::OutputItemDone {
            output_index,
            item: item.clone(),
        });
    }
    events.push(StreamEvent::Completed {
        response: response.clone(),
    });
    events
}

/// A model backend that replays scripted responses in order.
///
/// Every request is recorded for later inspection.
#[derive(Debug, Default)]
pub struct MockBackend {
    script: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<ModelRequest>>,
    served: AtomicUsize,
    offline: bool,
}

impl MockBackend {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    /// A backend whose every request fails with a network error.
    pub fn failing() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    /// Queue another response.
    pub fn push(&self, response: MockResponse) {
        lock(&self.script).push_back(response);
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        lock(&self.requests).clone()
    }

    /// Number of scripted responses not yet served.
    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }

    fn next(&self, request: ModelRequest) -> Result<Response, openai::Error> {
        lock(&self.requests).push(request);
        if self.offline {
            return Err(openai::Error::Network("mock backend is offline".to_string()));
        }
        let scripted = lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| MockResponse::text("I have nothing more to say."));
        let n = self.served.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(scripted.into_response(n))
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn create_response(&self, request: ModelRequest) -> Result<Response, openai::Error> {
        self.next(request)
    }

    async fn stream_response(&self, request: ModelRequest) -> Result<EventStream, openai::Error> {
        let response = self.next(request)?;
        let events = stream_events(&response);
        Ok(futures::stream::iter(events.into_iter().map(Ok)).boxed())
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Succeed,
    Refuse(String),
    Fail(String),
}

/// An executor with a fixed outcome that records every call.
#[derive(Debug)]
pub struct ScriptedExecutor {
    outcome: Outcome,
    calls: Mutex<Vec<(String, Parameters)>>,
}

impl ScriptedExecutor {
    fn with_outcome(outcome: Outcome) -> Self {
        Self {
            outcome,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every action succeeds with output `<action> done`.
    pub fn succeeding() -> Self {
        Self::with_outcome(Outcome::Succeed)
    }

    /// Every action comes back as an in-world refusal with this output.
    pub fn refusing(output: impl Into<String>) -> Self {
        Self::with_outcome(Outcome::Refuse(output.into()))
    }

    /// Every action errors.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_outcome(Outcome::Fail(message.into()))
    }

    /// Actions performed so far.
    pub fn calls(&self) -> Vec<(String, Parameters)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ActionExecutor for ScriptedExecutor {
    async fn perform(
        &self,
        action: &str,
        parameters: &Parameters,
    ) -> Result<ActionInvocation, ActionError> {
        lock(&self.calls).push((action.to_string(), parameters.clone()));
        match &self.outcome {
            Outcome::Succeed => Ok(ActionInvocation::succeeded(
                action,
                parameters.clone(),
                format!("{action} done"),
            )),
            Outcome::Refuse(output) => Ok(ActionInvocation::failed(
                action,
                parameters.clone(),
                output.clone(),
                "refused",
            )),
            Outcome::Fail(message) => Err(ActionError::World(message.clone())),
        }
    }
}

/// A fixed inventory.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory(pub Vec<EvidenceItem>);

impl InventoryOracle for StaticInventory {
    fn current_evidence(&self) -> Vec<EvidenceItem> {
        self.0.clone()
    }
}

/// Hans the farmer, Mara the innkeeper and Otto the mayor.
pub fn sample_town() -> Vec<NpcProfile> {
    vec![
        NpcProfile::new("Hans", "Farmer", "a pitchfork, a rope"),
        NpcProfile::new("Mara", "Innkeeper", "a ledger, a cellar key"),
        NpcProfile::new("Otto", "Mayor", "the town seal"),
    ]
}

fn sample_template(role: &str, is_culprit: bool) -> PromptTemplate {
    let secret = if is_culprit {
        "You poisoned the well. Never admit it."
    } else {
        "You did not poison the well."
    };
    let text = format!(
        "You are {{name}}, the {role}. You carry {{possessions}}.\n{secret}\n\n\
         What the town knows:\n{{TOWN COLLECTIVE MEMORY}}\n\n\
         Rules:\n{{general_rules}}\n\n\
         [COLLECTED EVIDENCE]\n[END COLLECTED EVIDENCE]\n"
    );
    PromptTemplate::new(role, is_culprit, text).expect("sample templates are not blank")
}

/// Templates for every sample role, culprit and regular.
pub fn sample_prompts() -> PromptStore {
    let mut templates = Vec::new();
    for role in ["farmer", "innkeeper", "mayor"] {
        templates.push(sample_template(role, false));
        templates.push(sample_template(role, true));
    }
    PromptStore::new(
        templates,
        "The village well was poisoned two nights ago.",
        "Stay in character. Answer in one or two sentences.",
    )
}

/// A scripted town for integration tests.
pub struct TestHarness {
    pub coordinator: ConversationCoordinator,
    backend: Arc<MockBackend>,
    executor: Arc<ScriptedExecutor>,
    evidence: Arc<EvidenceBoard>,
}

impl TestHarness {
    /// Sample town, default culprit policy, succeeding executor.
    pub fn new() -> Self {
        Self::with_executor(CulpritPolicy::default(), ScriptedExecutor::succeeding())
            .expect("sample town starts")
    }

    /// Sample town with a chosen policy and executor.
    pub fn with_executor(
        policy: CulpritPolicy,
        executor: ScriptedExecutor,
    ) -> Result<Self, CoordinatorError> {
        let backend = Arc::new(MockBackend::new(Vec::new()));
        let executor = Arc::new(executor);
        let evidence = Arc::new(EvidenceBoard::new());

        let shared_executor = executor.clone();
        let factory = SharedBackend::new(backend.clone(), move |_: &NpcProfile, _: &[NpcProfile]| {
            shared_executor.clone() as Arc<dyn ActionExecutor>
        });
        let coordinator =
            ConversationCoordinator::start(sample_town(), &sample_prompts(), &policy, &factory)?
                .with_inventory(evidence.clone());

        Ok(Self {
            coordinator,
            backend,
            executor,
            evidence,
        })
    }

    /// Queue a plain text answer.
    pub fn expect_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.backend.push(MockResponse::text(text));
        self
    }

    /// Queue a scripted response.
    pub fn expect_response(&mut self, response: MockResponse) -> &mut Self {
        self.backend.push(response);
        self
    }

    /// Hand the detective a piece of evidence.
    pub fn collect(&self, name: &str, description: &str) {
        self.evidence.collect(EvidenceItem::new(name, description));
    }

    /// Talk to an NPC through the coordinator.
    pub async fn talk(&mut self, npc: &str, text: &str) -> Result<Reply, CoordinatorError> {
        self.coordinator.talk_to(npc, text).await
    }

    pub fn backend(&self) -> &MockBackend {
        &self.backend
    }

    pub fn executor(&self) -> &ScriptedExecutor {
        &self.executor
    }

    /// Number of transcript turns for an NPC.
    pub fn turn_count(&self, npc: &str) -> usize {
        self.coordinator.history(npc).map_or(0, |t| t.len())
    }

    pub fn last_message(&self, npc: &str) -> Option<&str> {
        self.coordinator
            .history(npc)
            .and_then(|t| t.last())
            .map(|turn| turn.message.as_str())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion helpers
// ============================================================================

/// Assert the culprit's name.
#[track_caller]
pub fn assert_culprit(harness: &TestHarness, name: &str) {
    assert_eq!(
        harness.coordinator.who_is_culprit(),
        name,
        "Expected '{name}' to be the culprit"
    );
}

/// Assert an NPC's transcript length.
#[track_caller]
pub fn assert_turns(harness: &TestHarness, npc: &str, count: usize) {
    let actual = harness.turn_count(npc);
    assert_eq!(
        actual, count,
        "Expected {count} turns for '{npc}', got {actual}"
    );
}

/// Assert the last line of an NPC's transcript.
#[track_caller]
pub fn assert_last_message(harness: &TestHarness, npc: &str, message: &str) {
    assert_eq!(
        harness.last_message(npc),
        Some(message),
        "Unexpected last message for '{npc}'"
    );
}

/// Assert a reply's text and that it carries no failed action.
#[track_caller]
pub fn assert_clean_reply(reply: &Reply, message: &str) {
    assert_eq!(reply.message, message);
    assert!(
        reply.activities.iter().all(|a| a.success),
        "Expected every action to succeed: {:?}",
        reply.activities
    );
}
