//! Audio ingress and VAD event handling.
//!
//! `handle_audio_frame` runs on the frame-port worker thread; classification
//! is synchronous, heavy work (transcription, backend RPCs) is dispatched to
//! the runtime.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{debug, warn};

use crate::core::vad::VadEvent;

use super::{Conversation, ConversationState};

impl Conversation {
    /// One captured PCM frame from the call leg.
    pub(super) fn handle_audio_frame(self: &Arc<Self>, samples: Vec<i16>) {
        if samples.is_empty() || !self.media_active.load(Ordering::Acquire) {
            return;
        }
        if self.state.is_finished() {
            return;
        }
        // With interruptions disabled, user audio is ignored while the AI
        // is speaking or a commit is producing the next reply.
        if !self.config.interruptions_are_allowed
            && (self.is_active_ai_speech() || self.generation.lock().commit_in_flight)
        {
            return;
        }

        let Some(vad) = self.vad() else { return };
        let events = vad.lock().process_samples(&samples);
        for event in events {
            self.dispatch_vad_event(event);
        }
    }

    pub(super) fn dispatch_vad_event(self: &Arc<Self>, event: VadEvent) {
        match event {
            VadEvent::SpeechStart { start, duration, .. } => {
                self.on_speech_start(start, duration);
            }
            VadEvent::SpeechEnd { start, duration, .. } => {
                self.on_speech_end(start, duration);
            }
            VadEvent::ShortPause {
                audio,
                start,
                duration,
            } => {
                self.on_short_pause(audio, start, duration);
            }
            VadEvent::LongPause {
                audio,
                start,
                duration,
            } => {
                self.on_long_pause(audio, start, duration);
            }
            VadEvent::UserSilenceTimeout { at } => {
                self.on_user_silence_timeout(at);
            }
        }
    }

    /// The user started speaking: stop AI output and roll back any live
    /// speculation.
    fn on_speech_start(self: &Arc<Self>, start: f64, duration: f64) {
        debug!(
            time_sec = self.elapsed_sec(),
            speech_start_sec = start + duration,
            session_id = ?self.session_id(),
            "User speech started"
        );
        self.user_speaking.store(true, Ordering::Release);

        if let Some(player) = self.player() {
            player.interrupt();
        }
        if let Some(tts) = self.tts() {
            tts.cancel();
        }
        if let Some(vad) = self.vad() {
            vad.lock().cancel_user_silence();
        }
        self.set_state(ConversationState::WaitForUser);

        let needs_rollback = {
            let mut generation = self.generation.lock();
            generation.short_pause_handled = false;
            generation.long_pause_handled = false;
            generation.last_unstable_transcription = None;
            let rollback = generation.spec_active && !generation.commit_in_flight;
            if rollback {
                generation.spec_active = false;
            }
            rollback
        };

        if needs_rollback {
            let conversation = Arc::clone(self);
            self.runtime.spawn(async move {
                conversation.rollback_speculation().await;
            });
        }
    }

    fn on_speech_end(&self, start: f64, duration: f64) {
        debug!(
            time_sec = self.elapsed_sec(),
            speech_end_sec = start + duration,
            duration_sec = duration,
            session_id = ?self.session_id(),
            "User speech ended"
        );
        self.user_speaking.store(false, Ordering::Release);
    }

    /// Short pause: reserve the speculative-start slot and transcribe.
    fn on_short_pause(self: &Arc<Self>, audio: Vec<f32>, start: f64, duration: f64) {
        if audio.is_empty() {
            return;
        }
        debug!(
            time_sec = self.elapsed_sec(),
            start_sec = start,
            duration_sec = duration,
            buffer_len = audio.len(),
            session_id = ?self.session_id(),
            "Short pause detected"
        );

        if duration < self.config.min_speech_duration_sec {
            debug!(
                duration_sec = duration,
                "Speech too short, waiting for long pause"
            );
            return;
        }

        {
            let mut generation = self.generation.lock();
            if generation.start_in_flight
                || generation.commit_in_flight
                || generation.short_pause_handled
                || generation.long_pause_handled
            {
                debug!(
                    session_id = ?self.session_id(),
                    "Skipping speculation, generation already in progress"
                );
                return;
            }
            generation.start_in_flight = true;
            generation.start_response_generation = Some(Instant::now());
        }

        let conversation = Arc::clone(self);
        self.runtime.spawn(async move {
            conversation.run_short_pause(audio).await;
        });
    }

    /// Long pause: reserve the commit slot and suspend further long pauses.
    fn on_long_pause(self: &Arc<Self>, audio: Vec<f32>, start: f64, duration: f64) {
        if audio.is_empty() {
            return;
        }
        debug!(
            time_sec = self.elapsed_sec(),
            start_sec = start,
            duration_sec = duration,
            buffer_len = audio.len(),
            session_id = ?self.session_id(),
            "Long pause detected"
        );

        {
            let mut generation = self.generation.lock();
            if generation.commit_in_flight {
                return;
            }
            generation.commit_in_flight = true;
        }
        if let Some(vad) = self.vad() {
            vad.lock().set_long_pause_suspended(true);
        }

        let conversation = Arc::clone(self);
        self.runtime.spawn(async move {
            conversation.run_long_pause(audio).await;
        });
    }

    /// No user speech for the configured window: finish and hang up.
    fn on_user_silence_timeout(self: &Arc<Self>, at: f64) {
        warn!(
            time_sec = self.elapsed_sec(),
            timeout_sec = at,
            session_id = ?self.session_id(),
            "User silence timeout, finishing"
        );
        self.set_state(ConversationState::Finished);
        let conversation = Arc::clone(self);
        self.runtime.spawn(async move {
            conversation.hangup_if_quiescent().await;
        });
    }
}
