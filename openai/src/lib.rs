//! Minimal OpenAI Responses API client.
//!
//! This crate provides a focused client for the `/v1/responses` endpoint with:
//! - Non-streaming and streaming responses
//! - Function tool declarations (strict mode)
//! - Stateless (full input) and threaded (`previous_response_id`) conversations
//! - Buffered SSE parsing for streaming responses

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use thiserror::Error;
use tokio_stream::Stream;

const API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-5-nano-2025-08-07";

/// Errors that can occur when using the OpenAI client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Response failed: {0}")]
    Failed(String),
}

/// Boxed stream of server-sent events from a streaming response.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send>>;

/// Responses API client.
#[derive(Clone)]
pub struct OpenAi {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAi {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: API_BASE.to_string(),
        }
    }

    /// Create a client from the OPENAI_API_KEY environment variable.
    ///
    /// An unset or blank key is an error; there is no empty-key fallback.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| Error::NoApiKey)?;
        if api_key.trim().is_empty() {
            return Err(Error::NoApiKey);
        }
        Ok(Self::new(api_key))
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a different API base (proxies, local gateways).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// The model used when a request does not name one.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a request and return the full response.
    pub async fn create(&self, request: Request) -> Result<Response, Error> {
        let api_request = self.build_api_request(&request, false);
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(format!("{}/responses", self.base_url))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        let parsed = parse_response(raw)?;
        if parsed.status == ResponseStatus::Failed {
            return Err(Error::Failed(
                parsed.raw["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown failure")
                    .to_string(),
            ));
        }
        Ok(parsed)
    }

    /// Send a request and stream the response events.
    pub async fn stream(&self, request: Request) -> Result<EventStream, Error> {
        let api_request = self.build_api_request(&request, true);
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(format!("{}/responses", self.base_url))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        // Buffer raw bytes across chunks; only complete lines are decoded, so a
        // character split between chunks is never mangled.
        let stream = response
            .bytes_stream()
            .scan(Vec::new(), |buffer: &mut Vec<u8>, result| {
                let events = match result {
                    Ok(bytes) => {
                        buffer.extend_from_slice(&bytes);
                        parse_sse_events_buffered(buffer)
                    }
                    Err(e) => vec![Err(Error::Network(e.to_string()))],
                };
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(stream))
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }

    fn build_api_request(&self, request: &Request, stream: bool) -> ApiRequest {
        let tools: Option<Vec<ApiTool>> = request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| ApiTool {
                    r#type: "function",
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                    strict: t.strict,
                })
                .collect()
        });

        ApiRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            instructions: request.instructions.clone(),
            input: request.input.iter().map(Item::to_json).collect(),
            tools,
            reasoning: request.reasoning_effort.map(|effort| ApiReasoning {
                effort: effort.as_str(),
            }),
            previous_response_id: request.previous_response_id.clone(),
            max_output_tokens: request.max_output_tokens,
            store: request.store,
            stream,
        }
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A request to the Responses API.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub model: Option<String>,
    pub instructions: Option<String>,
    pub input: Vec<Item>,
    pub tools: Option<Vec<Tool>>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub previous_response_id: Option<String>,
    pub max_output_tokens: Option<u32>,
    pub store: Option<bool>,
}

impl Request {
    /// Create a new request with the given input items.
    pub fn new(input: Vec<Item>) -> Self {
        Self {
            input,
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    pub fn with_previous_response_id(mut self, id: impl Into<String>) -> Self {
        self.previous_response_id = Some(id.into());
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn with_store(mut self, store: bool) -> Self {
        self.store = Some(store);
        self
    }
}

/// How much reasoning a reasoning model spends before answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    #[default]
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl FromStr for ReasoningEffort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(ReasoningEffort::Minimal),
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            other => Err(Error::Config(format!("Unknown reasoning effort: {other}"))),
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    System,
    Developer,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Developer => "developer",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "user" => Role::User,
            "system" => Role::System,
            "developer" => Role::Developer,
            _ => Role::Assistant,
        }
    }
}

/// A part of a message's content.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    InputText { text: String },
    OutputText { text: String },
    Refusal { refusal: String },
}

/// A conversation item, used both as request input and response output.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Message {
        id: Option<String>,
        role: Role,
        content: Vec<ContentPart>,
    },
    FunctionCall {
        id: Option<String>,
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
    /// Reasoning items are opaque; they are echoed back verbatim.
    Reasoning {
        id: String,
        raw: Value,
    },
}

impl Item {
    /// A user message with a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Item::Message {
            id: None,
            role: Role::User,
            content: vec![ContentPart::InputText { text: text.into() }],
        }
    }

    /// An assistant message with a single text part.
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Item::Message {
            id: None,
            role: Role::Assistant,
            content: vec![ContentPart::OutputText { text: text.into() }],
        }
    }

    /// The result of a function call, fed back to the model.
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Item::FunctionCallOutput {
            call_id: call_id.into(),
            output: output.into(),
        }
    }

    /// View this item as a function call, if it is one.
    pub fn as_function_call(&self) -> Option<FunctionCall> {
        if let Item::FunctionCall {
            id,
            call_id,
            name,
            arguments,
        } = self
        {
            Some(FunctionCall {
                id: id.clone(),
                call_id: call_id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            })
        } else {
            None
        }
    }

    /// Concatenated output text of an assistant message.
    pub fn output_text(&self) -> Option<String> {
        if let Item::Message { content, .. } = self {
            let text: String = content
                .iter()
                .filter_map(|part| match part {
                    ContentPart::OutputText { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect();
            Some(text)
        } else {
            None
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Item::Message { id, role, content } => {
                let parts: Vec<Value> = content
                    .iter()
                    .map(|part| match part {
                        ContentPart::InputText { text } => {
                            json!({"type": "input_text", "text": text})
                        }
                        ContentPart::OutputText { text } => {
                            json!({"type": "output_text", "text": text, "annotations": []})
                        }
                        ContentPart::Refusal { refusal } => {
                            json!({"type": "refusal", "refusal": refusal})
                        }
                    })
                    .collect();
                let mut value = json!({
                    "type": "message",
                    "role": role.as_str(),
                    "content": parts,
                });
                if let Some(id) = id {
                    value["id"] = json!(id);
                }
                value
            }
            Item::FunctionCall {
                id,
                call_id,
                name,
                arguments,
            } => {
                let mut value = json!({
                    "type": "function_call",
                    "call_id": call_id,
                    "name": name,
                    "arguments": arguments,
                });
                if let Some(id) = id {
                    value["id"] = json!(id);
                }
                value
            }
            Item::FunctionCallOutput { call_id, output } => json!({
                "type": "function_call_output",
                "call_id": call_id,
                "output": output,
            }),
            Item::Reasoning { raw, .. } => raw.clone(),
        }
    }
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub id: Option<String>,
    pub call_id: String,
    pub name: String,
    /// JSON-encoded arguments, exactly as produced by the model.
    pub arguments: String,
}

/// A function tool declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub strict: bool,
}

/// Lifecycle status of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Completed,
    Incomplete,
    InProgress,
    Failed,
    Other,
}

/// A response from the Responses API.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub status: ResponseStatus,
    pub output: Vec<Item>,
    pub usage: Usage,
    /// The response body as received.
    pub raw: Value,
}

impl Response {
    /// Get all assistant output text concatenated.
    pub fn text(&self) -> String {
        self.output
            .iter()
            .filter_map(Item::output_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// All function calls in output order.
    pub fn function_calls(&self) -> Vec<FunctionCall> {
        self.output
            .iter()
            .filter_map(Item::as_function_call)
            .collect()
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

// ============================================================================
// Streaming types
// ============================================================================

/// Events from a streaming response.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Created {
        id: String,
    },
    OutputItemAdded {
        output_index: usize,
        item: Item,
    },
    TextDelta {
        output_index: usize,
        delta: String,
    },
    FunctionCallArgumentsDelta {
        output_index: usize,
        delta: String,
    },
    FunctionCallArgumentsDone {
        output_index: usize,
        arguments: String,
    },
    OutputItemDone {
        output_index: usize,
        item: Item,
    },
    Completed {
        response: Response,
    },
    Error {
        message: String,
    },
    /// Events this client does not interpret (reasoning deltas, content parts, ...).
    Other,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    input: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ApiReasoning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_response_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    store: Option<bool>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    r#type: &'static str,
    name: String,
    description: String,
    parameters: Value,
    strict: bool,
}

#[derive(Debug, Serialize)]
struct ApiReasoning {
    effort: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Vec<Value>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: usize,
    output_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ApiMessageItem {
    #[serde(default)]
    id: Option<String>,
    role: String,
    #[serde(default)]
    content: Vec<ApiContentPart>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentPart {
    OutputText {
        text: String,
    },
    InputText {
        text: String,
    },
    Refusal {
        refusal: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ApiFunctionCallItem {
    #[serde(default)]
    id: Option<String>,
    call_id: String,
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ApiStreamEvent {
    #[serde(rename = "response.created")]
    Created { response: ApiResponseHeader },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { output_index: usize, item: Value },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { output_index: usize, delta: String },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta { output_index: usize, delta: String },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        output_index: usize,
        arguments: String,
    },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone { output_index: usize, item: Value },
    #[serde(rename = "response.completed")]
    Completed { response: Value },
    #[serde(rename = "response.incomplete")]
    Incomplete { response: Value },
    #[serde(rename = "response.failed")]
    Failed { response: Value },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiResponseHeader {
    id: String,
}

fn parse_status(status: Option<&str>) -> ResponseStatus {
    match status {
        Some("completed") | None => ResponseStatus::Completed,
        Some("incomplete") => ResponseStatus::Incomplete,
        Some("in_progress") | Some("queued") => ResponseStatus::InProgress,
        Some("failed") | Some("cancelled") => ResponseStatus::Failed,
        Some(_) => ResponseStatus::Other,
    }
}

/// Parse a full response body, keeping the raw JSON alongside.
fn parse_response(raw: Value) -> Result<Response, Error> {
    let api: ApiResponse =
        serde_json::from_value(raw.clone()).map_err(|e| Error::Parse(e.to_string()))?;

    Ok(Response {
        id: api.id,
        model: api.model,
        status: parse_status(api.status.as_deref()),
        output: api.output.into_iter().filter_map(parse_output_item).collect(),
        usage: api
            .usage
            .map(|u| Usage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            })
            .unwrap_or_default(),
        raw,
    })
}

/// Convert one output item. Item kinds this client does not model are skipped.
fn parse_output_item(value: Value) -> Option<Item> {
    match value["type"].as_str()? {
        "message" => {
            let message: ApiMessageItem = serde_json::from_value(value).ok()?;
            Some(Item::Message {
                id: message.id,
                role: Role::parse(&message.role),
                content: message
                    .content
                    .into_iter()
                    .filter_map(|part| match part {
                        ApiContentPart::OutputText { text } => {
                            Some(ContentPart::OutputText { text })
                        }
                        ApiContentPart::InputText { text } => Some(ContentPart::InputText { text }),
                        ApiContentPart::Refusal { refusal } => {
                            Some(ContentPart::Refusal { refusal })
                        }
                        ApiContentPart::Unknown => None,
                    })
                    .collect(),
            })
        }
        "function_call" => {
            let call: ApiFunctionCallItem = serde_json::from_value(value).ok()?;
            Some(Item::FunctionCall {
                id: call.id,
                call_id: call.call_id,
                name: call.name,
                arguments: call.arguments,
            })
        }
        "reasoning" => {
            let id = value["id"].as_str()?.to_string();
            Some(Item::Reasoning { id, raw: value })
        }
        _ => None,
    }
}

/// Parse SSE events from a buffer, consuming complete events and leaving incomplete data.
///
/// Lines are consumed one at a time; a `data:` line whose JSON is cut off
/// mid-object stays in the buffer until the next chunk completes it.
fn parse_sse_events_buffered(buffer: &mut Vec<u8>) -> Vec<Result<StreamEvent, Error>> {
    let mut events = Vec::new();

    loop {
        let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') else {
            break;
        };

        let line = String::from_utf8_lossy(&buffer[..newline_pos])
            .trim_end_matches('\r')
            .to_string();

        if let Some(json_str) = line.strip_prefix("data:") {
            let json_str = json_str.trim_start();
            if json_str == "[DONE]" {
                // Not sent by the Responses API, but harmless to accept.
            } else if !json_str.is_empty() {
                match serde_json::from_str::<ApiStreamEvent>(json_str) {
                    Ok(event) => events.push(convert_stream_event(event)),
                    Err(e) => {
                        if e.is_eof() {
                            break;
                        }
                        events.push(Err(Error::Parse(format!("SSE parse error: {e}"))));
                    }
                }
            }
        }
        // Skip event: lines, comments, and blank separators

        buffer.drain(..=newline_pos);
    }

    events
}

fn convert_stream_event(event: ApiStreamEvent) -> Result<StreamEvent, Error> {
    Ok(match event {
        ApiStreamEvent::Created { response } => StreamEvent::Created { id: response.id },
        ApiStreamEvent::OutputItemAdded { output_index, item } => match parse_output_item(item) {
            Some(item) => StreamEvent::OutputItemAdded { output_index, item },
            None => StreamEvent::Other,
        },
        ApiStreamEvent::OutputTextDelta {
            output_index,
            delta,
        } => StreamEvent::TextDelta {
            output_index,
            delta,
        },
        ApiStreamEvent::FunctionCallArgumentsDelta {
            output_index,
            delta,
        } => StreamEvent::FunctionCallArgumentsDelta {
            output_index,
            delta,
        },
        ApiStreamEvent::FunctionCallArgumentsDone {
            output_index,
            arguments,
        } => StreamEvent::FunctionCallArgumentsDone {
            output_index,
            arguments,
        },
        ApiStreamEvent::OutputItemDone { output_index, item } => match parse_output_item(item) {
            Some(item) => StreamEvent::OutputItemDone { output_index, item },
            None => StreamEvent::Other,
        },
        ApiStreamEvent::Completed { response } | ApiStreamEvent::Incomplete { response } => {
            StreamEvent::Completed {
                response: parse_response(response)?,
            }
        }
        ApiStreamEvent::Failed { response } => StreamEvent::Error {
            message: response["error"]["message"]
                .as_str()
                .unwrap_or("response failed")
                .to_string(),
        },
        ApiStreamEvent::Error { message } => StreamEvent::Error { message },
        ApiStreamEvent::Other => StreamEvent::Other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OpenAi::new("test-key");
        assert_eq!(client.model, DEFAULT_MODEL);
        assert_eq!(client.base_url, API_BASE);
    }

    #[test]
    fn test_client_with_model_and_base() {
        let client = OpenAi::new("test-key")
            .with_model("gpt-5-mini-2025-08-07")
            .with_base_url("http://localhost:8080/v1/");
        assert_eq!(client.model(), "gpt-5-mini-2025-08-07");
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn test_request_builder() {
        let request = Request::new(vec![Item::user_text("Hello")])
            .with_instructions("You are the innkeeper")
            .with_reasoning_effort(ReasoningEffort::Low)
            .with_previous_response_id("resp_1");

        assert_eq!(request.input.len(), 1);
        assert!(request.instructions.is_some());
        assert_eq!(request.previous_response_id.as_deref(), Some("resp_1"));
    }

    #[test]
    fn test_api_request_shape() {
        let client = OpenAi::new("test-key");
        let request = Request::new(vec![Item::user_text("Hi")])
            .with_instructions("Be terse")
            .with_reasoning_effort(ReasoningEffort::Low)
            .with_tools(vec![Tool {
                name: "go_to_npc".to_string(),
                description: "Go somewhere".to_string(),
                parameters: json!({"type": "object"}),
                strict: true,
            }]);

        let body = serde_json::to_value(client.build_api_request(&request, true)).unwrap();
        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["instructions"], "Be terse");
        assert_eq!(body["reasoning"]["effort"], "low");
        assert_eq!(body["stream"], true);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["strict"], true);
        assert_eq!(body["input"][0]["content"][0]["type"], "input_text");
        assert!(body.get("previous_response_id").is_none());
    }

    #[test]
    fn test_reasoning_effort_parse() {
        assert_eq!("LOW".parse::<ReasoningEffort>().unwrap(), ReasoningEffort::Low);
        assert_eq!("high".parse::<ReasoningEffort>().unwrap(), ReasoningEffort::High);
        assert!("extreme".parse::<ReasoningEffort>().is_err());
    }

    #[test]
    fn test_parse_response_with_function_call() {
        let raw = json!({
            "id": "resp_123",
            "model": "gpt-5-nano",
            "status": "completed",
            "output": [
                {"type": "reasoning", "id": "rs_1", "summary": []},
                {"type": "function_call", "id": "fc_1", "call_id": "call_1",
                 "name": "go_to_npc", "arguments": "{\"npc_name\":\"Mara\"}"},
                {"type": "message", "id": "msg_1", "role": "assistant",
                 "content": [{"type": "output_text", "text": "On my way.", "annotations": []}]},
                {"type": "web_search_call", "id": "ws_1"}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });

        let response = parse_response(raw).unwrap();
        assert_eq!(response.id, "resp_123");
        assert_eq!(response.status, ResponseStatus::Completed);
        assert_eq!(response.output.len(), 3);
        assert_eq!(response.text(), "On my way.");

        let calls = response.function_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "go_to_npc");
        assert_eq!(calls[0].call_id, "call_1");
    }

    #[test]
    fn test_reasoning_item_echoed_verbatim() {
        let raw = json!({"type": "reasoning", "id": "rs_9", "summary": [], "encrypted_content": null});
        let item = parse_output_item(raw.clone()).unwrap();
        assert_eq!(item.to_json(), raw);
    }

    #[test]
    fn test_sse_buffering_across_chunks() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(b"event: response.output_text.delta\n");
        buffer.extend_from_slice(b"data: {\"type\":\"response.output_text.delta\",\"output_index\":0,\"del");

        let events = parse_sse_events_buffered(&mut buffer);
        assert!(events.is_empty());

        buffer.extend_from_slice(b"ta\":\"Hel\"}\n\n");
        let events = parse_sse_events_buffered(&mut buffer);
        assert_eq!(events.len(), 1);
        match events[0].as_ref().unwrap() {
            StreamEvent::TextDelta { delta, .. } => assert_eq!(delta, "Hel"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_sse_character_split_across_chunks() {
        let line = "data: {\"type\":\"response.output_text.delta\",\"output_index\":0,\"delta\":\"M\u{fc}ller\"}\n\n";
        let bytes = line.as_bytes();
        let split = line.find('\u{fc}').unwrap() + 1;

        let mut buffer = bytes[..split].to_vec();
        assert!(parse_sse_events_buffered(&mut buffer).is_empty());

        buffer.extend_from_slice(&bytes[split..]);
        let events = parse_sse_events_buffered(&mut buffer);
        match events[0].as_ref().unwrap() {
            StreamEvent::TextDelta { delta, .. } => assert_eq!(delta, "M\u{fc}ller"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_sse_unknown_event_is_other() {
        let mut buffer =
            b"data: {\"type\":\"response.reasoning_summary_text.delta\",\"delta\":\"x\"}\n".to_vec();
        let events = parse_sse_events_buffered(&mut buffer);
        assert!(matches!(events[0], Ok(StreamEvent::Other)));
    }

    #[test]
    fn test_sse_function_call_lifecycle() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(b"data: {\"type\":\"response.output_item.added\",\"output_index\":1,\"item\":{\"type\":\"function_call\",\"id\":\"fc_1\",\"call_id\":\"call_1\",\"name\":\"arrest_suspect\",\"arguments\":\"\"}}\n\n");
        buffer.extend_from_slice(b"data: {\"type\":\"response.function_call_arguments.done\",\"output_index\":1,\"item_id\":\"fc_1\",\"arguments\":\"{}\"}\n\n");

        let events = parse_sse_events_buffered(&mut buffer);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::OutputItemAdded { output_index: 1, item: Item::FunctionCall { .. } }
        ));
        assert!(matches!(
            events[1].as_ref().unwrap(),
            StreamEvent::FunctionCallArgumentsDone { output_index: 1, .. }
        ));
    }
}
