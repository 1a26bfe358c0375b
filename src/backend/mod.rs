//! Conversational backend integration: request/response client and the
//! streaming event channel.

pub mod api;
pub mod client;
pub mod stream;

pub use api::{BackendApi, BackendSession, CommitOutcome, NewSessionRequest, StreamEvent};
pub use client::BackendClient;
pub use stream::{EventStream, StreamHandler};
