//! TTS production, ordered playback, soft hangup, and transfer.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::core::tts::{SynthFn, TtsPipeline};

use super::Conversation;

/// Synthesized blobs below this size are header-only and dropped.
const MIN_TTS_BLOB_BYTES: usize = 364;

/// Quiescence re-check delay before the actual hangup.
const SOFT_HANGUP_DELAY: Duration = Duration::from_millis(300);

impl Conversation {
    /// Build the per-call TTS pipeline wired back into this conversation.
    pub(super) fn build_tts_pipeline(self: &Arc<Self>) -> Arc<TtsPipeline> {
        let synth: SynthFn = {
            let weak = Arc::downgrade(self);
            Arc::new(move |text, canceled| {
                let weak = weak.clone();
                Box::pin(async move {
                    match weak.upgrade() {
                        Some(conversation) => {
                            conversation.synthesize_tts_text(&text, canceled).await
                        }
                        None => None,
                    }
                })
            })
        };

        let ready = {
            let weak = Arc::downgrade(self);
            Arc::new(move |path: PathBuf, text: String| {
                if let Some(conversation) = weak.upgrade() {
                    conversation.handle_tts_ready(&path, &text);
                }
            })
        };

        let ready_signal = {
            let weak = Arc::downgrade(self);
            Arc::new(move || {
                if let Some(conversation) = weak.upgrade() {
                    conversation.try_play_tts();
                }
            })
        };

        TtsPipeline::new(self.config.tts_max_inflight, synth, ready, ready_signal)
    }

    /// Synthesize one text to a transient WAV file.
    ///
    /// Returns `None` (discarded) when the task was cancelled, the call is
    /// tearing down, the backend failed, or the blob is header-only.
    pub(super) async fn synthesize_tts_text(
        self: &Arc<Self>,
        text: &str,
        canceled: Arc<AtomicBool>,
    ) -> Option<PathBuf> {
        if !self.media_active.load(Ordering::Acquire) {
            return None;
        }
        let session_id = self.session_id()?;

        let started = Instant::now();
        let blob = match self.backend.synthesize(&session_id, text).await {
            Ok(blob) => blob,
            Err(err) => {
                warn!(error = %err, text, session_id, "Synthesis failed");
                return None;
            }
        };
        let elapsed = started.elapsed().as_secs_f64();
        self.metrics.observe_response_time("synthesize", elapsed);
        info!(
            text,
            elapsed_sec = elapsed,
            blob_len = blob.len(),
            session_id,
            "Synthesize finished"
        );

        if canceled.load(Ordering::Acquire) {
            debug!(text, "Synthesis result discarded after cancellation");
            return None;
        }
        if blob.len() < MIN_TTS_BLOB_BYTES {
            info!(blob_len = blob.len(), session_id, "Audio too short, dropped");
            return None;
        }

        let path = self.make_tts_path();
        if let Some(parent) = path.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                warn!(error = %err, "TTS directory create failed");
                return None;
            }
        }
        if let Err(err) = tokio::fs::write(&path, &blob).await {
            warn!(error = %err, path = %path.display(), "TTS file write failed");
            return None;
        }

        if !self.media_active.load(Ordering::Acquire) {
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }
        Some(path)
    }

    /// Ordered delivery: hand the file to the player and disarm the
    /// user-silence timer while the AI speaks.
    pub(super) fn handle_tts_ready(self: &Arc<Self>, path: &std::path::Path, text: &str) {
        {
            let mut generation = self.generation.lock();
            if let Some(started) = generation.start_response_generation.take() {
                let elapsed = started.elapsed().as_secs_f64();
                self.metrics.observe_response_time("play_queue", elapsed);
                self.metrics.observe_response_summary("play_queue", elapsed);
                debug!(
                    elapsed_sec = elapsed,
                    session_id = ?self.session_id(),
                    "Response ready"
                );
            }
        }

        debug!(
            path = %path.display(),
            text,
            session_id = ?self.session_id(),
            "WAV handed to player"
        );
        if let Some(player) = self.player() {
            player.enqueue(path, true);
            player.play();
        }
        if let Some(vad) = self.vad() {
            vad.lock().reset_user_silence();
        }
    }

    /// Drain the ready prefix of the TTS queue when the AI may speak.
    pub(super) fn try_play_tts(&self) {
        let can_play = !self.user_speaking.load(Ordering::Acquire) && self.ai_can_speak();
        if let Some(tts) = self.tts() {
            tts.try_play(can_play);
        }
    }

    /// Player went idle: either re-arm the user-silence timer or, once
    /// finished, head for hangup.
    pub(super) async fn handle_playback_finished(self: &Arc<Self>) {
        if !self.state.is_finished() {
            if let Some(vad) = self.vad() {
                vad.lock().start_user_silence();
            }
            return;
        }
        debug!(
            session_id = ?self.session_id(),
            "Playback finished in terminal state, checking for hangup"
        );
        self.hangup_if_quiescent().await;
    }

    /// Soft-hangup entry: only proceeds when nothing is audible or queued.
    pub(super) async fn hangup_if_quiescent(self: &Arc<Self>) {
        if self.is_active_ai_speech() {
            return;
        }
        self.soft_hangup().await;
    }

    /// Delayed hangup that lets a final playback or transfer settle.
    async fn soft_hangup(self: &Arc<Self>) {
        if self.soft_hangup_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        tokio::time::sleep(SOFT_HANGUP_DELAY).await;
        debug!(
            time_sec = self.elapsed_sec(),
            session_id = ?self.session_id(),
            "Soft hangup initiated"
        );

        if self.is_active_ai_speech() {
            // Something new was queued during the grace period.
            self.soft_hangup_pending.store(false, Ordering::Release);
            return;
        }

        if self.start_transfer().await {
            return;
        }
        if let Err(err) = self.actions.hangup(200) {
            warn!(error = %err, "Hangup failed");
        }
    }

    /// Begin the pending transfer, if any. Returns true when a transfer is
    /// (already) underway and the caller must not hang up.
    async fn start_transfer(self: &Arc<Self>) -> bool {
        let (target, delay_sec) = {
            let mut transfer = self.transfer.lock();
            if transfer.started {
                return true;
            }
            let Some(target) = transfer.target.clone() else {
                return false;
            };
            transfer.started = true;
            (target, transfer.delay_sec)
        };

        info!(
            time_sec = self.elapsed_sec(),
            to_uri = target,
            session_id = ?self.session_id(),
            "Transferring call"
        );
        *self.close_status.lock() = Some("transferred");

        if let Some(digits) = target.strip_prefix("dtmf:") {
            if let Err(err) = self.actions.dial_dtmf(digits) {
                warn!(error = %err, "DTMF dial failed");
            }
            tokio::time::sleep(Duration::from_secs_f64(delay_sec)).await;
            debug!(session_id = ?self.session_id(), "Closing after DTMF transfer");
            if let Err(err) = self.actions.hangup(200) {
                warn!(error = %err, "Hangup after DTMF transfer failed");
            }
        } else if let Err(err) = self.actions.transfer(&target) {
            warn!(error = %err, to_uri = target, "Transfer failed");
        }
        true
    }
}
