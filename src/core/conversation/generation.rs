//! Speculative start, commit, rollback, and transcription.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::core::audio::encode_wav;
use crate::errors::BackendError;

use super::{Conversation, ConversationState};

/// Bounded wait for an outstanding speculative start: 200 steps of 10 ms.
const START_SETTLE_STEPS: u32 = 200;
const START_SETTLE_STEP: Duration = Duration::from_millis(10);

impl Conversation {
    /// Short-pause body: roll back stale speculation, transcribe, and start
    /// generating against the partial transcription. The `start_in_flight`
    /// slot is always released, whatever happens.
    pub(super) async fn run_short_pause(self: &Arc<Self>, audio: Vec<f32>) {
        let outcome = self.run_short_pause_inner(&audio).await;
        if let Err(err) = outcome {
            error!(
                error = %err,
                session_id = ?self.session_id(),
                "Speculative generation failed"
            );
        }
        self.generation.lock().start_in_flight = false;
    }

    async fn run_short_pause_inner(self: &Arc<Self>, audio: &[f32]) -> anyhow::Result<()> {
        if !self.media_active.load(Ordering::Acquire) {
            return Ok(());
        }

        let needs_rollback = self.generation.lock().spec_active;
        if needs_rollback {
            self.rollback_speculation().await;
        }

        let text = self.transcribe(audio).await?;
        if !self.media_active.load(Ordering::Acquire) {
            return Ok(());
        }
        if text.is_empty() {
            debug!(time_sec = self.elapsed_sec(), "Empty transcription");
            return Ok(());
        }
        if self.is_same_unstable_text(&text) {
            debug!(
                time_sec = self.elapsed_sec(),
                "Unstable transcription unchanged"
            );
            return Ok(());
        }

        self.start_generation(&text).await?;
        self.generation.lock().short_pause_handled = true;
        Ok(())
    }

    /// Long-pause body: wait for any outstanding start, make sure a
    /// speculation exists, then commit it. Releases `commit_in_flight` and
    /// re-enables long-pause events on every path.
    pub(super) async fn run_long_pause(self: &Arc<Self>, audio: Vec<f32>) {
        if self.config.record_audio_parts {
            self.record_audio_part(&audio).await;
        }

        let outcome = self.run_long_pause_inner(&audio).await;
        if let Err(err) = outcome {
            error!(
                error = %err,
                session_id = ?self.session_id(),
                "Commit generation failed"
            );
            self.set_state(ConversationState::WaitForUser);
        }

        {
            let mut generation = self.generation.lock();
            generation.spec_active = false;
            generation.long_pause_handled = true;
            generation.commit_in_flight = false;
        }
        if let Some(vad) = self.vad() {
            vad.lock().set_long_pause_suspended(false);
        }

        // Only after the commit slot is released: a commit in flight counts
        // as active AI speech and would block the quiescence check.
        if self.state.is_finished() {
            self.hangup_if_quiescent().await;
        }
    }

    async fn run_long_pause_inner(self: &Arc<Self>, audio: &[f32]) -> anyhow::Result<()> {
        if self.state.is_finished() {
            return Ok(());
        }

        // Let an in-progress speculative start settle before deciding
        // whether a fresh transcription is needed.
        for _ in 0..START_SETTLE_STEPS {
            if !self.generation.lock().start_in_flight {
                break;
            }
            tokio::time::sleep(START_SETTLE_STEP).await;
        }

        if self.generation.lock().spec_active {
            debug!(
                time_sec = self.elapsed_sec(),
                text = ?self.generation.lock().last_unstable_transcription,
                "Committing existing speculation"
            );
        } else {
            debug!(
                time_sec = self.elapsed_sec(),
                "No speculative start live, transcribing for commit"
            );
            let text = self.transcribe(audio).await?;
            if text.is_empty() {
                debug!(
                    time_sec = self.elapsed_sec(),
                    "Empty transcription, aborting commit"
                );
                return Ok(());
            }
            self.start_generation(&text).await?;
        }

        if !self.media_active.load(Ordering::Acquire) {
            return Ok(());
        }

        self.set_state(ConversationState::CommitGenerate);
        self.user_speaking.store(false, Ordering::Release);

        let session_id = self
            .session_id()
            .ok_or_else(|| anyhow::anyhow!("commit without session"))?;
        let outcome = self.backend.commit(&session_id).await?;
        debug!(
            time_sec = self.elapsed_sec(),
            has_response = outcome.response.is_some(),
            session_ends = outcome.session_ends,
            "Commit response received"
        );

        if let Some(response) = outcome.response {
            if !self.config.is_streaming && !response.is_empty() {
                if let Some(tts) = self.tts() {
                    tts.enqueue(crate::utils::remove_emojis(&response), 0.0);
                }
            }
        }

        if outcome.session_ends {
            debug!(time_sec = self.elapsed_sec(), "Received SESSION_ENDS");
            self.set_state(ConversationState::Finished);
        } else {
            self.set_state(ConversationState::WaitForUser);
        }

        self.try_play_tts();
        Ok(())
    }

    /// Send `start` for a (partial) transcription and mark the speculation
    /// live.
    pub(super) async fn start_generation(self: &Arc<Self>, text: &str) -> anyhow::Result<()> {
        debug!(
            time_sec = self.elapsed_sec(),
            text,
            session_id = ?self.session_id(),
            "Starting response generation"
        );
        let session_id = self
            .session_id()
            .ok_or_else(|| anyhow::anyhow!("start without session"))?;
        {
            let mut generation = self.generation.lock();
            generation.last_unstable_transcription = Some(text.to_string());
            generation.start_reply_generation = Some(Instant::now());
        }
        self.backend.start(&session_id, text).await?;
        self.set_state(ConversationState::SpeculativeGenerate);
        self.generation.lock().spec_active = true;
        Ok(())
    }

    /// Roll back the live speculative session. Failures are warnings only.
    pub(super) async fn rollback_speculation(self: &Arc<Self>) {
        let Some(session_id) = self.session_id() else {
            return;
        };
        debug!(
            time_sec = self.elapsed_sec(),
            session_id, "Rolling back speculative start"
        );
        match self.backend.rollback(&session_id).await {
            Ok(_) => {
                self.generation.lock().spec_active = false;
                debug!(time_sec = self.elapsed_sec(), "Rollback completed");
            }
            Err(err) => {
                warn!(
                    time_sec = self.elapsed_sec(),
                    error = %err,
                    "Rollback failed"
                );
            }
        }
    }

    /// Encode captured float PCM as WAV and transcribe it via the backend.
    pub(super) async fn transcribe(&self, audio: &[f32]) -> Result<String, BackendError> {
        if audio.is_empty() {
            return Ok(String::new());
        }
        debug!(
            time_sec = self.elapsed_sec(),
            duration_sec = audio.len() as f64 / self.config.vad_sampling_rate as f64,
            session_id = ?self.session_id(),
            "Transcribing audio"
        );
        let wav = encode_wav(audio, self.config.vad_sampling_rate)
            .map_err(|e| BackendError::Malformed(e.to_string()))?;

        let started = Instant::now();
        let text = self.backend.transcribe(wav).await?;
        let elapsed = started.elapsed().as_secs_f64();
        self.metrics.observe_response_time("transcribe", elapsed);
        info!(
            text,
            elapsed_sec = elapsed,
            session_id = ?self.session_id(),
            "Transcription completed"
        );
        Ok(text)
    }

    /// Persist the long-pause utterance when part recording is enabled.
    async fn record_audio_part(&self, audio: &[f32]) {
        let Some(session_id) = self.session_id() else {
            return;
        };
        let dir = self.config.sip_audio_dir.join(&session_id);
        let path = dir.join(format!("part-{}.wav", uuid::Uuid::new_v4()));
        let encoded = match encode_wav(audio, self.config.vad_sampling_rate) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "Audio part encode failed");
                return;
            }
        };
        if let Err(err) = tokio::fs::create_dir_all(&dir).await {
            warn!(error = %err, "Audio part directory create failed");
            return;
        }
        if let Err(err) = tokio::fs::write(&path, encoded).await {
            warn!(error = %err, path = %path.display(), "Audio part write failed");
        }
    }
}
