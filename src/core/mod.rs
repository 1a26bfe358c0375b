//! Per-call realtime pipeline: audio plumbing, voice activity detection,
//! TTS production, and the conversation controller that coordinates them.

pub mod audio;
pub mod conversation;
pub mod tts;
pub mod vad;

pub use conversation::{Conversation, ConversationState};
