//! The seam between sessions and the model provider.

use async_trait::async_trait;
use openai::{EventStream, OpenAi, Request, Response};

/// Requests are built directly in the client's shape.
pub type ModelRequest = Request;

/// Something that can answer Responses API requests.
///
/// `OpenAi` is the production implementation; tests script one.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Send a request and wait for the whole response.
    async fn create_response(&self, request: ModelRequest) -> Result<Response, openai::Error>;

    /// Send a request and receive its events as they arrive.
    async fn stream_response(&self, request: ModelRequest) -> Result<EventStream, openai::Error>;
}

#[async_trait]
impl ModelBackend for OpenAi {
    async fn create_response(&self, request: ModelRequest) -> Result<Response, openai::Error> {
        self.create(request).await
    }

    async fn stream_response(&self, request: ModelRequest) -> Result<EventStream, openai::Error> {
        self.stream(request).await
    }
}
