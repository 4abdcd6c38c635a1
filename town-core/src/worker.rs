//! Background worker that owns the coordinator.
//!
//! A front end sends `WorkerRequest`s and polls `WorkerResponse`s, so it
//! never waits on the model. Streaming chunks are forwarded as they arrive.

use crate::action::ActionInvocation;
use crate::agent::{AgentError, StreamChunk};
use crate::coordinator::{ConversationCoordinator, CoordinatorError};
use crate::persist;
use crate::transcript::Reply;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;

/// What the player sees when an NPC cannot answer.
pub const FALLBACK_MESSAGE: &str = "Sorry, I'm having trouble thinking right now...";

/// What the player sees when a message names no known NPC.
pub const UNKNOWN_NPC_MESSAGE: &str = "Sorry, I'm not sure who you are talking to.";

/// Log `err` and return the in-character text to show instead.
pub fn fallback_message(err: &CoordinatorError) -> &'static str {
    error!("NPC could not answer: {err}");
    match err {
        CoordinatorError::UnknownNpc(_) | CoordinatorError::IndexOutOfRange { .. } => {
            UNKNOWN_NPC_MESSAGE
        }
        _ => FALLBACK_MESSAGE,
    }
}

/// Requests from the front end.
#[derive(Debug)]
pub enum WorkerRequest {
    /// Talk to an NPC and wait for the full reply.
    Talk { npc: String, text: String },
    /// Talk to an NPC and stream the reply.
    TalkStreaming { npc: String, text: String },
    /// Ask who the culprit is.
    RevealCulprit,
    /// Save every transcript to a file.
    Save(PathBuf),
    Shutdown,
}

/// Responses to the front end.
#[derive(Debug, Clone)]
pub enum WorkerResponse {
    StreamChunk { npc: String, text: String },
    /// The NPC is performing an action.
    Processing { npc: String },
    Action { npc: String, invocation: ActionInvocation },
    Complete(Reply),
    /// The request failed; `message` is safe to show the player.
    Failed { npc: String, message: String },
    Culprit(String),
    SaveComplete(Result<PathBuf, String>),
}

/// Channel ends and task handle of a running worker.
pub struct Worker {
    pub requests: mpsc::Sender<WorkerRequest>,
    pub responses: mpsc::Receiver<WorkerResponse>,
    /// Yields the coordinator back after shutdown.
    pub task: JoinHandle<ConversationCoordinator>,
}

/// Move the coordinator onto a tokio task.
///
/// Must be called from within a tokio runtime. `timeout` bounds each talk
/// request; an expired request is reported with the fallback message.
pub fn spawn_worker(coordinator: ConversationCoordinator, timeout: Option<Duration>) -> Worker {
    let (request_tx, request_rx) = mpsc::channel(8);
    let (response_tx, response_rx) = mpsc::channel(64);

    let task = tokio::spawn(worker_loop(coordinator, request_rx, response_tx, timeout));

    Worker {
        requests: request_tx,
        responses: response_rx,
        task,
    }
}

async fn worker_loop(
    mut coordinator: ConversationCoordinator,
    mut request_rx: mpsc::Receiver<WorkerRequest>,
    response_tx: mpsc::Sender<WorkerResponse>,
    timeout: Option<Duration>,
) -> ConversationCoordinator {
    loop {
        match request_rx.recv().await {
            Some(WorkerRequest::Talk { npc, text }) => {
                let talk = coordinator.talk_to(&npc, &text);
                let response = match with_timeout(timeout, talk).await {
                    Some(Ok(reply)) => WorkerResponse::Complete(reply),
                    Some(Err(e)) => WorkerResponse::Failed {
                        message: fallback_message(&e).to_string(),
                        npc,
                    },
                    None => timed_out(npc),
                };
                let _ = response_tx.send(response).await;
            }
            Some(WorkerRequest::TalkStreaming { npc, text }) => {
                let talk = stream_talk(&mut coordinator, &npc, &text, &response_tx);
                let response = match with_timeout(timeout, talk).await {
                    Some(Ok(reply)) => WorkerResponse::Complete(reply),
                    Some(Err(e)) => WorkerResponse::Failed {
                        message: fallback_message(&e).to_string(),
                        npc,
                    },
                    None => timed_out(npc),
                };
                let _ = response_tx.send(response).await;
            }
            Some(WorkerRequest::RevealCulprit) => {
                let culprit = coordinator.who_is_culprit().to_string();
                let _ = response_tx.send(WorkerResponse::Culprit(culprit)).await;
            }
            Some(WorkerRequest::Save(path)) => {
                let result = persist::save_conversation(&coordinator, &path).await;
                let response = match result {
                    Ok(()) => WorkerResponse::SaveComplete(Ok(path)),
                    Err(e) => WorkerResponse::SaveComplete(Err(e.to_string())),
                };
                let _ = response_tx.send(response).await;
            }
            Some(WorkerRequest::Shutdown) | None => break,
        }
    }
    coordinator
}

/// Drive a streaming talk, forwarding chunks; returns the finished reply.
async fn stream_talk(
    coordinator: &mut ConversationCoordinator,
    npc: &str,
    text: &str,
    response_tx: &mpsc::Sender<WorkerResponse>,
) -> Result<Reply, CoordinatorError> {
    let stream = coordinator.talk_to_streaming(npc, text)?;
    futures::pin_mut!(stream);

    while let Some(chunk) = stream.next().await {
        let forward = match chunk? {
            StreamChunk::Text(text) => WorkerResponse::StreamChunk {
                npc: npc.to_string(),
                text,
            },
            StreamChunk::Processing => WorkerResponse::Processing {
                npc: npc.to_string(),
            },
            StreamChunk::Action(invocation) => WorkerResponse::Action {
                npc: npc.to_string(),
                invocation,
            },
            StreamChunk::Done(reply) => return Ok(reply),
        };
        let _ = response_tx.send(forward).await;
    }
    Err(CoordinatorError::Agent(AgentError::IncompleteStream))
}

async fn with_timeout<F: std::future::Future>(
    timeout: Option<Duration>,
    future: F,
) -> Option<F::Output> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, future).await.ok(),
        None => Some(future.await),
    }
}

fn timed_out(npc: String) -> WorkerResponse {
    error!(%npc, "NPC timed out");
    WorkerResponse::Failed {
        npc,
        message: FALLBACK_MESSAGE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_messages() {
        let backend = CoordinatorError::Agent(AgentError::Backend(openai::Error::Network(
            "connection reset".into(),
        )));
        assert_eq!(fallback_message(&backend), FALLBACK_MESSAGE);

        let unknown = CoordinatorError::UnknownNpc("Bob".into());
        assert_eq!(fallback_message(&unknown), UNKNOWN_NPC_MESSAGE);
    }
}
