//! Backend event-stream message handling.
//!
//! The stream carries typed JSON messages in wire order: `message` (a
//! TTS-ready reply fragment), `eos` (end of the current reply), and `eoc`
//! (end of conversation). Anything else is logged and ignored.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde_json::Value;
use tracing::{debug, info};

use crate::backend::StreamEvent;
use crate::utils::remove_emojis;

use super::{Conversation, ConversationState};

impl Conversation {
    pub(super) fn handle_stream_event(self: &Arc<Self>, message: Value) {
        match serde_json::from_value::<StreamEvent>(message.clone()) {
            Ok(StreamEvent::Message { message }) => self.handle_stream_message(&message),
            Ok(StreamEvent::Eos) => self.handle_stream_eos(),
            Ok(StreamEvent::Eoc) => self.handle_stream_eoc(),
            Err(_) => {
                debug!(
                    message_type = message.get("type").and_then(|v| v.as_str()).unwrap_or(""),
                    session_id = ?self.session_id(),
                    "Unhandled stream message type"
                );
            }
        }
    }

    fn handle_stream_message(self: &Arc<Self>, raw: &str) {
        {
            let mut generation = self.generation.lock();
            if let Some(started) = generation.start_reply_generation.take() {
                let elapsed = started.elapsed().as_secs_f64();
                self.metrics.observe_response_time("generate", elapsed);
                info!(
                    elapsed_sec = elapsed,
                    session_id = ?self.session_id(),
                    "Generation completed"
                );
            }
        }

        let text = remove_emojis(raw);
        debug!(
            time_sec = self.elapsed_sec(),
            text,
            session_id = ?self.session_id(),
            "Stream message received"
        );
        if text.trim().is_empty() {
            return;
        }
        if !self.config.is_streaming {
            debug!("Streaming disabled, fragment ignored");
            return;
        }
        if self.user_speaking.load(Ordering::Acquire) {
            debug!(
                time_sec = self.elapsed_sec(),
                session_id = ?self.session_id(),
                "Fragment discarded, user speaking"
            );
            return;
        }

        if let Some(tts) = self.tts() {
            tts.enqueue(text, 0.0);
        }
    }

    fn handle_stream_eos(self: &Arc<Self>) {
        debug!(
            time_sec = self.elapsed_sec(),
            session_id = ?self.session_id(),
            "End of stream received"
        );
        self.try_play_tts();
        if self.state.is_finished() {
            let conversation = Arc::clone(self);
            self.runtime.spawn(async move {
                conversation.hangup_if_quiescent().await;
            });
        }
    }

    fn handle_stream_eoc(self: &Arc<Self>) {
        debug!(
            time_sec = self.elapsed_sec(),
            session_id = ?self.session_id(),
            "End of conversation received"
        );
        if self.config.sip_early_eoc && self.state() != ConversationState::SpeculativeGenerate {
            self.set_state(ConversationState::Finished);
            self.try_play_tts();
            let conversation = Arc::clone(self);
            self.runtime.spawn(async move {
                conversation.hangup_if_quiescent().await;
            });
        }
    }
}
