//! Backend request/response surface consumed by the conversation core.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::BackendError;

/// Typed message on the backend event stream.
///
/// The stream delivers reply fragments and lifecycle notifications for one
/// session, in wire order.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// A TTS-ready text fragment of the current reply.
    Message { message: String },
    /// End of the current reply stream.
    Eos,
    /// End of conversation.
    Eoc,
}

/// Payload for creating a backend session.
#[derive(Debug, Clone)]
pub struct NewSessionRequest {
    pub user_id: String,
    pub name: String,
    pub conversation_id: String,
    pub communication_id: Option<String>,
    /// Arbitrary environment info forwarded to the backend.
    pub kwargs: Value,
}

/// Result of `/session_v2`.
#[derive(Debug, Clone)]
pub struct BackendSession {
    pub session_id: String,
    pub greeting: Option<String>,
}

/// Result of `/session/{id}/commit`.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    /// Full reply text when the backend runs in non-streaming mode.
    pub response: Option<String>,
    /// Set when the response carried `metadata.SESSION_ENDS`.
    pub session_ends: bool,
}

/// Request/response operations against the conversational backend.
///
/// One implementation wraps the HTTP API; tests substitute scripted mocks.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Startup probe.
    async fn capabilities(&self) -> Result<Value, BackendError>;

    async fn create_session(
        &self,
        request: NewSessionRequest,
    ) -> Result<BackendSession, BackendError>;

    /// Begin speculative generation for a partial transcription.
    async fn start(&self, session_id: &str, message: &str) -> Result<Value, BackendError>;

    /// Confirm the most recent speculative start.
    async fn commit(&self, session_id: &str) -> Result<CommitOutcome, BackendError>;

    /// Cancel the most recent speculative start.
    async fn rollback(&self, session_id: &str) -> Result<Value, BackendError>;

    /// Synthesize `text` to a WAV blob.
    async fn synthesize(&self, session_id: &str, text: &str) -> Result<Bytes, BackendError>;

    /// Transcribe a mono 16-bit WAV blob.
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, BackendError>;

    /// Report the call outcome. Best-effort; callers log failures.
    async fn close_session(&self, session_id: &str, status: &str) -> Result<(), BackendError>;
}
