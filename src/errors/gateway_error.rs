//! Error types shared across the gateway core.

use thiserror::Error;

/// Errors raised while talking to the conversational backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport-level failure (connect, DNS, timeout, body read).
    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend rejected the bearer token. Not retried by the core.
    #[error("backend permission denied: {0}")]
    Permission(String),

    /// Any non-2xx response other than 403.
    #[error("backend responded with status {status}: {body}")]
    Response { status: u16, body: String },

    /// The response body could not be decoded as the expected shape.
    #[error("backend response malformed: {0}")]
    Malformed(String),
}

impl BackendError {
    pub fn is_permission(&self) -> bool {
        matches!(self, BackendError::Permission(_))
    }
}

/// Errors surfaced by the SIP collaborator through the port traits.
#[derive(Debug, Error)]
pub enum SipError {
    /// No driver has been attached to the gateway yet.
    #[error("sip not initialized")]
    NotInitialized,

    /// The call has no active media (not confirmed, or already torn down).
    #[error("call media unavailable: {0}")]
    MediaUnavailable(String),

    /// The underlying SIP stack reported a failure.
    #[error("sip operation failed: {0}")]
    Driver(String),
}

/// Errors from VAD model loading and inference.
#[derive(Debug, Error)]
pub enum VadError {
    #[error("VAD model file missing: {0}")]
    ModelMissing(String),

    #[error("VAD model download failed: {0}")]
    Download(String),

    #[error("VAD inference failed: {0}")]
    Inference(String),
}
