//! One NPC's conversation with the model.
//!
//! An `AgentSession` owns the NPC's instructions, the request history sent to
//! the model and the human-readable transcript. Each `send` runs a tool-use
//! loop: the model's function calls are dispatched to the NPC's executor and
//! their outputs fed back, and a call whose arguments carry a `reason` or
//! `response` supplies the NPC's spoken reply directly.

use crate::action::{ActionError, ActionExecutor, ActionInvocation};
use crate::backend::{ModelBackend, ModelRequest};
use crate::profile::NpcProfile;
use crate::tools::{parse_parameters, Parameters, ToolRegistry};
use crate::transcript::{ConversationTurn, Reply, Transcript};
use async_stream::try_stream;
use chrono::Utc;
use futures::{FutureExt, Stream, StreamExt};
use openai::{FunctionCall, Item, ReasoningEffort, Response, StreamEvent};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Output fed back to the model whenever a tool call cannot be carried out.
pub const TOOL_FAILURE_EXCUSE: &str =
    "You cannot perform the required task due to personal excuses at the moment.";

/// Spoken when an action succeeded but the model said nothing.
pub const ACTION_ACKNOWLEDGEMENT: &str = "Very well.";

/// Errors from a session turn. Tool failures never surface here.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Model backend error: {0}")]
    Backend(#[from] openai::Error),

    #[error("Response stream ended before the response completed")]
    IncompleteStream,
}

/// How conversation context reaches the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextStrategy {
    /// Resend the whole request history every time.
    FullTranscript,
    /// Send only new items and chain on the previous response id.
    #[default]
    PreviousResponse,
}

/// Whether to ask the model again after it calls tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FollowUp {
    /// One model round per message.
    #[default]
    Never,
    /// Ask again while a round produced tool calls but no text.
    UntilText,
}

/// Settings for a session.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model override; the backend's default is used when unset.
    pub model: Option<String>,

    pub reasoning_effort: ReasoningEffort,

    pub context: ContextStrategy,

    pub follow_up: FollowUp,

    /// Upper bound on follow-up rounds within one turn.
    pub max_tool_rounds: usize,

    pub max_output_tokens: Option<u32>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: None,
            reasoning_effort: ReasoningEffort::Low,
            context: ContextStrategy::default(),
            follow_up: FollowUp::default(),
            max_tool_rounds: 4,
            max_output_tokens: None,
        }
    }
}

impl AgentConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = effort;
        self
    }

    pub fn with_context(mut self, context: ContextStrategy) -> Self {
        self.context = context;
        self
    }

    pub fn with_follow_up(mut self, follow_up: FollowUp) -> Self {
        self.follow_up = follow_up;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }
}

/// A piece of a streamed reply.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Text as the model produces it.
    Text(String),
    /// The model started a tool call; its arguments are still arriving.
    Processing,
    /// A tool call was dispatched.
    Action(ActionInvocation),
    /// The finished reply, already recorded in the transcript.
    Done(Reply),
}

/// State accumulated over the rounds of one turn.
struct Turn {
    from: String,
    activities: Vec<ActionInvocation>,
    override_text: Option<String>,
    text: String,
    follow_ups: usize,
    response_id: Option<String>,
    raw: Option<String>,
}

impl Turn {
    fn new(from: &str) -> Self {
        Self {
            from: from.to_string(),
            activities: Vec::new(),
            override_text: None,
            text: String::new(),
            follow_ups: 0,
            response_id: None,
            raw: None,
        }
    }
}

/// The conversation state of one NPC.
pub struct AgentSession {
    profile: NpcProfile,
    instructions: String,
    backend: Arc<dyn ModelBackend>,
    executor: Arc<dyn ActionExecutor>,
    tools: ToolRegistry,
    config: AgentConfig,
    transcript: Transcript,
    /// Items in request order; input, output and tool results.
    history: Vec<Item>,
    /// Items before this index have already reached the server.
    submitted: usize,
    previous_response_id: Option<String>,
}

impl AgentSession {
    /// Create an idle session with the standard tools.
    pub fn new(
        profile: NpcProfile,
        instructions: impl Into<String>,
        backend: Arc<dyn ModelBackend>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            profile,
            instructions: instructions.into(),
            backend,
            executor,
            tools: ToolRegistry::standard(),
            config: AgentConfig::default(),
            transcript: Transcript::new(),
            history: Vec::new(),
            submitted: 0,
            previous_response_id: None,
        }
    }

    /// Continue from a saved transcript.
    ///
    /// Spoken turns are replayed into the request history so the model sees
    /// the earlier conversation on the next send. Tool turns are not replayed.
    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        for turn in transcript.iter().filter(|t| !t.is_activity()) {
            if turn.from == self.profile.name {
                self.history.push(Item::assistant_text(&turn.message));
            } else {
                self.history.push(Item::user_text(&turn.message));
            }
        }
        self.transcript = transcript;
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn profile(&self) -> &NpcProfile {
        &self.profile
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn set_instructions(&mut self, instructions: impl Into<String>) {
        self.instructions = instructions.into();
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Items exchanged with the model so far.
    pub fn history(&self) -> &[Item] {
        &self.history
    }

    pub fn previous_response_id(&self) -> Option<&str> {
        self.previous_response_id.as_deref()
    }

    /// Send a message and wait for the NPC's reply.
    pub async fn send(&mut self, from: &str, text: &str) -> Result<Reply, AgentError> {
        let mut turn = self.begin_turn(from, text);
        loop {
            let request = self.build_request();
            let response = self.backend.create_response(request).await?;
            let (_, follow_up) = self.complete_round(&mut turn, response).await;
            if !follow_up {
                break;
            }
        }
        Ok(self.finish_turn(turn))
    }

    /// Send a message and stream the NPC's reply as it is produced.
    ///
    /// The stream ends with `StreamChunk::Done`. Dropping it early leaves the
    /// user message in the transcript without a reply.
    pub fn send_streaming<'a>(
        &'a mut self,
        from: &'a str,
        text: &'a str,
    ) -> impl Stream<Item = Result<StreamChunk, AgentError>> + Send + 'a {
        try_stream! {
            let mut turn = self.begin_turn(from, text);
            loop {
                let request = self.build_request();
                let mut events = self.backend.stream_response(request).await?;
                let mut completed = None;

                while let Some(event) = events.next().await {
                    match event? {
                        StreamEvent::TextDelta { delta, .. } => {
                            yield StreamChunk::Text(delta);
                        }
                        StreamEvent::OutputItemAdded { item: Item::FunctionCall { .. }, .. } => {
                            yield StreamChunk::Processing;
                        }
                        StreamEvent::Completed { response } => {
                            completed = Some(response);
                            break;
                        }
                        StreamEvent::Error { message } => {
                            Err(AgentError::Backend(openai::Error::Failed(message)))?;
                        }
                        _ => {}
                    }
                }

                let response = completed.ok_or(AgentError::IncompleteStream)?;
                let (invocations, follow_up) = self.complete_round(&mut turn, response).await;
                for invocation in invocations {
                    yield StreamChunk::Action(invocation);
                }
                if !follow_up {
                    break;
                }
            }
            yield StreamChunk::Done(self.finish_turn(turn));
        }
    }

    fn begin_turn(&mut self, from: &str, text: &str) -> Turn {
        let framed = frame_message(from, text);
        debug!(npc = %self.profile.name, from, "Sending message");
        self.transcript
            .push(ConversationTurn::message(from, &self.profile.name, &framed));
        self.history.push(Item::user_text(framed));
        Turn::new(from)
    }

    fn build_request(&self) -> ModelRequest {
        let (input, previous) = match self.config.context {
            ContextStrategy::FullTranscript => (self.history.clone(), None),
            ContextStrategy::PreviousResponse => (
                self.history[self.submitted..].to_vec(),
                self.previous_response_id.clone(),
            ),
        };

        let mut request = ModelRequest::new(input)
            .with_instructions(self.instructions.clone())
            .with_tools(self.tools.declarations())
            .with_reasoning_effort(self.config.reasoning_effort);
        if let Some(model) = &self.config.model {
            request = request.with_model(model.clone());
        }
        if let Some(id) = previous {
            request = request.with_previous_response_id(id);
        }
        if let Some(tokens) = self.config.max_output_tokens {
            request = request.with_max_output_tokens(tokens);
        }
        request
    }

    /// Record a model response, dispatch its tool calls and decide whether
    /// another round is needed.
    async fn complete_round(
        &mut self,
        turn: &mut Turn,
        response: Response,
    ) -> (Vec<ActionInvocation>, bool) {
        let calls = response.function_calls();
        let text = response.text();

        let mut outputs = Vec::with_capacity(calls.len());
        let mut invocations = Vec::with_capacity(calls.len());
        for call in &calls {
            let invocation = self.dispatch(call).await;
            outputs.push(Item::function_call_output(
                call.call_id.clone(),
                invocation.output.clone(),
            ));
            if let Some(text) = invocation.override_text() {
                turn.override_text = Some(text);
            }
            self.transcript.push(ConversationTurn::activity(
                &self.profile.name,
                &turn.from,
                invocation.clone(),
            ));
            invocations.push(invocation);
        }

        // Nothing from this response is recorded until every call has its
        // output, so a turn cancelled mid-dispatch leaves no unanswered call.
        self.history.extend(response.output.iter().cloned());
        self.submitted = self.history.len();
        self.history.extend(outputs);
        self.previous_response_id = Some(response.id.clone());
        turn.response_id = Some(response.id.clone());
        turn.raw = serde_json::to_string(&response.raw).ok();
        turn.activities.extend(invocations.iter().cloned());

        let round_has_text = !text.trim().is_empty();
        if round_has_text {
            turn.text = text;
        }

        let follow_up = self.config.follow_up == FollowUp::UntilText
            && !calls.is_empty()
            && !round_has_text
            && turn.follow_ups < self.config.max_tool_rounds;
        if follow_up {
            turn.follow_ups += 1;
        }
        (invocations, follow_up)
    }

    /// Run one tool call. Every failure becomes an unsuccessful invocation.
    async fn dispatch(&self, call: &FunctionCall) -> ActionInvocation {
        if self.tools.find_tool(&call.name).is_none() {
            warn!(npc = %self.profile.name, tool = %call.name, "Model called an undeclared tool");
            return ActionInvocation::failed(
                &call.name,
                Parameters::new(),
                TOOL_FAILURE_EXCUSE,
                ActionError::Unsupported(call.name.clone()),
            );
        }

        let parameters = match parse_parameters(&call.arguments) {
            Ok(parameters) => parameters,
            Err(e) => {
                warn!(npc = %self.profile.name, tool = %call.name, "Undecodable tool arguments: {e}");
                return ActionInvocation::failed(
                    &call.name,
                    Parameters::new(),
                    TOOL_FAILURE_EXCUSE,
                    ActionError::Arguments(e.to_string()),
                );
            }
        };

        info!(npc = %self.profile.name, tool = %call.name, "Dispatching tool call");
        let outcome = AssertUnwindSafe(self.executor.perform(&call.name, &parameters))
            .catch_unwind()
            .await
            .unwrap_or(Err(ActionError::Panicked));

        match outcome {
            Ok(invocation) => {
                if !invocation.success {
                    warn!(npc = %self.profile.name, "{invocation}");
                }
                invocation
            }
            Err(e) => {
                warn!(npc = %self.profile.name, tool = %call.name, "Tool call failed: {e}");
                // The model's arguments are dropped so its `response` or
                // `reason` cannot speak over the excuse.
                ActionInvocation::failed(&call.name, Parameters::new(), TOOL_FAILURE_EXCUSE, e)
            }
        }
    }

    fn finish_turn(&mut self, turn: Turn) -> Reply {
        // Spoken text: argument override, then model text. A silent tool
        // call is acknowledged, or answered with its failure output.
        let message = turn
            .override_text
            .or_else(|| (!turn.text.trim().is_empty()).then(|| turn.text.clone()))
            .or_else(|| {
                turn.activities.last().map(|a| {
                    if a.success {
                        ACTION_ACKNOWLEDGEMENT.to_string()
                    } else {
                        a.output.clone()
                    }
                })
            })
            .unwrap_or_default();

        self.transcript.push(ConversationTurn::message(
            &self.profile.name,
            &turn.from,
            &message,
        ));

        Reply {
            from: self.profile.name.clone(),
            to: turn.from,
            message,
            activities: turn.activities,
            timestamp: Utc::now(),
            response_id: turn.response_id,
            raw: turn.raw,
        }
    }
}

/// Frame an incoming message with its speaker.
pub fn frame_message(from: &str, text: &str) -> String {
    format!("[{from} says]: {text}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, MockResponse, ScriptedExecutor};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::time::Duration;

    /// Takes far longer than any test is willing to wait.
    struct SlowExecutor;

    #[async_trait]
    impl ActionExecutor for SlowExecutor {
        async fn perform(
            &self,
            action: &str,
            parameters: &Parameters,
        ) -> Result<ActionInvocation, ActionError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(ActionInvocation::succeeded(action, parameters.clone(), "arrived"))
        }
    }

    fn session(backend: Arc<MockBackend>, executor: Arc<ScriptedExecutor>) -> AgentSession {
        AgentSession::new(
            NpcProfile::new("Hans", "farmer", "a pitchfork"),
            "You are Hans.",
            backend,
            executor,
        )
    }

    #[test]
    fn test_frame_message() {
        assert_eq!(frame_message("Detective", "Hi"), "[Detective says]: Hi");
    }

    #[tokio::test]
    async fn test_plain_reply() {
        let backend = Arc::new(MockBackend::new(vec![MockResponse::text("Good morning.")]));
        let mut session = session(backend.clone(), Arc::new(ScriptedExecutor::succeeding()));

        let reply = session.send("Detective", "Hello").await.unwrap();
        assert_eq!(reply.message, "Good morning.");
        assert_eq!(reply.from, "Hans");
        assert_eq!(reply.to, "Detective");
        assert!(reply.activities.is_empty());

        let turns = session.transcript().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].message, "[Detective says]: Hello");
        assert_eq!(turns[1].message, "Good morning.");

        let request = &backend.requests()[0];
        assert_eq!(request.instructions.as_deref(), Some("You are Hans."));
        assert_eq!(request.tools.as_ref().map(Vec::len), Some(4));
        assert_eq!(request.reasoning_effort, Some(ReasoningEffort::Low));
    }

    #[tokio::test]
    async fn test_response_argument_overrides_text() {
        let backend = Arc::new(MockBackend::new(vec![MockResponse::tool_call(
            "handover_item_to_detective",
            r#"{"item_name":"rope","response":"Take it, then."}"#,
        )
        .with_text("Let me think.")]));
        let executor = Arc::new(ScriptedExecutor::succeeding());
        let mut session = session(backend, executor.clone());

        let reply = session.send("Detective", "Give me the rope").await.unwrap();
        assert_eq!(reply.message, "Take it, then.");
        assert_eq!(reply.activities.len(), 1);
        assert!(reply.activities[0].success);
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_executor_error_becomes_excuse() {
        let backend = Arc::new(MockBackend::new(vec![MockResponse::tool_call(
            "go_to_npc",
            r#"{"npc_name":"Mara"}"#,
        )]));
        let mut session = session(backend, Arc::new(ScriptedExecutor::failing("road blocked")));

        let reply = session.send("Detective", "Take me to Mara").await.unwrap();
        let activity = reply.activity().unwrap();
        assert!(!activity.success);
        assert_eq!(activity.output, TOOL_FAILURE_EXCUSE);
        assert_eq!(reply.message, TOOL_FAILURE_EXCUSE);
        assert_eq!(session.transcript().activities().count(), 1);
    }

    #[tokio::test]
    async fn test_failed_handover_does_not_speak_the_response_argument() {
        let backend = Arc::new(MockBackend::new(vec![MockResponse::tool_call(
            "handover_item_to_detective",
            r#"{"item_name":"rope","response":"Take it, then."}"#,
        )]));
        let mut session = session(backend, Arc::new(ScriptedExecutor::failing("no inventory")));

        let reply = session.send("Detective", "Give me the rope").await.unwrap();
        assert!(!reply.activities[0].success);
        assert!(reply.activities[0].parameters.is_empty());
        assert_eq!(reply.message, TOOL_FAILURE_EXCUSE);
    }

    #[tokio::test]
    async fn test_silent_successful_action_is_acknowledged() {
        let backend = Arc::new(MockBackend::new(vec![MockResponse::tool_call(
            "go_to_npc",
            r#"{"npc_name":"Mara"}"#,
        )]));
        let mut session = session(backend, Arc::new(ScriptedExecutor::succeeding()));

        let reply = session.send("Detective", "Take me to Mara").await.unwrap();
        assert!(reply.activities[0].success);
        assert_eq!(reply.message, ACTION_ACKNOWLEDGEMENT);
    }

    #[tokio::test]
    async fn test_cancelled_turn_leaves_no_unanswered_call() {
        let backend = Arc::new(MockBackend::new(vec![
            MockResponse::tool_call("go_to_npc", r#"{"npc_name":"Mara"}"#),
            MockResponse::text("Where was I?"),
        ]));
        let mut session = AgentSession::new(
            NpcProfile::new("Hans", "farmer", "a pitchfork"),
            "You are Hans.",
            backend.clone(),
            Arc::new(SlowExecutor),
        );

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            session.send("Detective", "Go to Mara"),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(session.previous_response_id(), None);
        assert!(!session
            .history()
            .iter()
            .any(|item| matches!(item, Item::FunctionCall { .. })));

        let reply = session.send("Detective", "Still there?").await.unwrap();
        assert_eq!(reply.message, "Where was I?");

        let second = &backend.requests()[1];
        assert_eq!(second.previous_response_id, None);
        assert_eq!(
            second.input,
            vec![
                Item::user_text("[Detective says]: Go to Mara"),
                Item::user_text("[Detective says]: Still there?"),
            ]
        );
    }

    #[tokio::test]
    async fn test_undeclared_tool_is_not_dispatched() {
        let backend = Arc::new(MockBackend::new(vec![
            MockResponse::tool_call("fly_away", "{}").with_text("Whoosh.")
        ]));
        let executor = Arc::new(ScriptedExecutor::succeeding());
        let mut session = session(backend, executor.clone());

        let reply = session.send("Detective", "Leave").await.unwrap();
        assert_eq!(reply.message, "Whoosh.");
        assert!(!reply.activities[0].success);
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_follow_up_until_text() {
        let backend = Arc::new(MockBackend::new(vec![
            MockResponse::tool_call("go_to_npc", r#"{"npc_name":"Mara"}"#),
            MockResponse::text("I'm next to Mara now."),
        ]));
        let mut session = session(backend.clone(), Arc::new(ScriptedExecutor::succeeding()))
            .with_config(AgentConfig::default().with_follow_up(FollowUp::UntilText));

        let reply = session.send("Detective", "Go to Mara").await.unwrap();
        assert_eq!(reply.message, "I'm next to Mara now.");

        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        // The follow-up carries only the tool output, chained on the first response.
        assert_eq!(requests[1].previous_response_id.as_deref(), Some("resp_1"));
        assert!(matches!(
            requests[1].input.as_slice(),
            [Item::FunctionCallOutput { .. }]
        ));
    }

    #[tokio::test]
    async fn test_follow_up_is_bounded() {
        let backend = Arc::new(MockBackend::new(vec![
            MockResponse::tool_call("go_to_npc", r#"{"npc_name":"Mara"}"#),
            MockResponse::tool_call("go_to_npc", r#"{"npc_name":"Mara"}"#),
            MockResponse::tool_call("go_to_npc", r#"{"npc_name":"Mara"}"#),
        ]));
        let config = AgentConfig::default()
            .with_follow_up(FollowUp::UntilText)
            .with_max_tool_rounds(1);
        let mut session = session(backend.clone(), Arc::new(ScriptedExecutor::succeeding()))
            .with_config(config);

        let reply = session.send("Detective", "Go").await.unwrap();
        assert_eq!(backend.requests().len(), 2);
        assert_eq!(reply.activities.len(), 2);
    }

    #[tokio::test]
    async fn test_pending_tool_output_sent_with_next_message() {
        let backend = Arc::new(MockBackend::new(vec![
            MockResponse::tool_call("go_to_npc", r#"{"npc_name":"Mara"}"#),
            MockResponse::text("Yes?"),
        ]));
        let mut session = session(backend.clone(), Arc::new(ScriptedExecutor::succeeding()));

        session.send("Detective", "Go to Mara").await.unwrap();
        session.send("Detective", "Well?").await.unwrap();

        let second = &backend.requests()[1];
        assert_eq!(second.previous_response_id.as_deref(), Some("resp_1"));
        assert_eq!(second.input.len(), 2);
        assert!(matches!(second.input[0], Item::FunctionCallOutput { .. }));
        assert_eq!(second.input[1], Item::user_text("[Detective says]: Well?"));
    }

    #[tokio::test]
    async fn test_full_transcript_resends_history() {
        let backend = Arc::new(MockBackend::new(vec![
            MockResponse::text("One."),
            MockResponse::text("Two."),
        ]));
        let mut session = session(backend.clone(), Arc::new(ScriptedExecutor::succeeding()))
            .with_config(AgentConfig::default().with_context(ContextStrategy::FullTranscript));

        session.send("Detective", "First").await.unwrap();
        session.send("Detective", "Second").await.unwrap();

        let second = &backend.requests()[1];
        assert_eq!(second.previous_response_id, None);
        assert_eq!(second.input.len(), 3);
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let backend = Arc::new(MockBackend::failing());
        let mut session = session(backend, Arc::new(ScriptedExecutor::succeeding()));

        let result = session.send("Detective", "Hello").await;
        assert!(matches!(result, Err(AgentError::Backend(_))));
    }

    #[tokio::test]
    async fn test_streaming_reply() {
        let backend = Arc::new(MockBackend::new(vec![MockResponse::text(
            "I was in the fields all day.",
        )]));
        let mut session = session(backend, Arc::new(ScriptedExecutor::succeeding()));

        let chunks: Vec<_> = session
            .send_streaming("Detective", "Where were you?")
            .collect()
            .await;
        let chunks: Vec<_> = chunks.into_iter().map(Result::unwrap).collect();

        let streamed: String = chunks
            .iter()
            .filter_map(|c| match c {
                StreamChunk::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(streamed, "I was in the fields all day.");

        let Some(StreamChunk::Done(reply)) = chunks.last() else {
            panic!("stream did not finish with a reply");
        };
        assert_eq!(reply.message, "I was in the fields all day.");
        assert_eq!(session.transcript().len(), 2);
    }

    #[tokio::test]
    async fn test_streaming_tool_call() {
        let backend = Arc::new(MockBackend::new(vec![MockResponse::tool_call(
            "refuse_handover_item_to_detective",
            r#"{"item_name":"key","reason":"That key stays with me."}"#,
        )]));
        let mut session = session(backend, Arc::new(ScriptedExecutor::succeeding()));

        let chunks: Vec<_> = session
            .send_streaming("Detective", "Hand me the key")
            .map(Result::unwrap)
            .collect()
            .await;

        assert!(matches!(chunks[0], StreamChunk::Processing));
        assert!(chunks.iter().any(|c| matches!(c, StreamChunk::Action(_))));
        let Some(StreamChunk::Done(reply)) = chunks.last() else {
            panic!("stream did not finish with a reply");
        };
        assert_eq!(reply.message, "That key stays with me.");
    }

    #[tokio::test]
    async fn test_restore_replays_spoken_turns() {
        let backend = Arc::new(MockBackend::new(vec![MockResponse::text("Hello.")]));
        let mut original = session(backend, Arc::new(ScriptedExecutor::succeeding()));
        original.send("Detective", "Hi").await.unwrap();

        let backend = Arc::new(MockBackend::new(vec![MockResponse::text("Again?")]));
        let mut restored = AgentSession::new(
            original.profile().clone(),
            original.instructions(),
            backend.clone(),
            Arc::new(ScriptedExecutor::succeeding()),
        )
        .with_transcript(original.transcript().clone());
        restored.send("Detective", "Hi again").await.unwrap();

        let request = &backend.requests()[0];
        assert_eq!(request.previous_response_id, None);
        assert_eq!(request.input.len(), 3);
        assert_eq!(request.input[1], Item::assistant_text("Hello."));
    }
}
