//! Media open/close and disconnect handling.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::core::audio::{FramePort, SmartPlayer};
use crate::core::vad::{CorrectionConfig, DynamicCorrection, StreamingVad, VadTuning};
use crate::sip::close_status_for;

use super::{Conversation, MediaBundle};

impl Conversation {
    /// Acquire the call's media and wire up the per-call pipeline.
    ///
    /// Order matters: capture is attached before the player exists, but
    /// audio ingress early-returns until `media_active` flips at the end.
    pub(super) fn open_media(self: &Arc<Self>) {
        if self.bundle.lock().is_some() {
            debug!(session_id = ?self.session_id(), "Media already open");
            return;
        }

        let media = match self.actions.media() {
            Ok(media) => media,
            Err(err) => {
                error!(error = %err, session_id = ?self.session_id(), "Failed to acquire call media");
                return;
            }
        };

        let frame_port = FramePort::new();
        {
            let weak = Arc::downgrade(self);
            frame_port.set_on_frame_received(Arc::new(move |samples| {
                if let Some(conversation) = weak.upgrade() {
                    conversation.handle_audio_frame(samples);
                }
            }));
        }
        if let Err(err) = media.attach_capture(Arc::clone(&frame_port)) {
            error!(error = %err, "Failed to attach capture port");
            frame_port.shutdown();
            return;
        }

        if self.config.record_audio_parts {
            let owner = self
                .session_id()
                .unwrap_or_else(|| format!("call{}", self.call_id));
            let recording_path = self.config.sip_audio_dir.join(format!("{owner}.wav"));
            if let Some(parent) = recording_path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(err) = media.start_recording(&recording_path) {
                // Recording is an optional extra; the call continues.
                warn!(error = %err, path = %recording_path.display(), "Call recording failed to start");
            }
        }

        let player = {
            let weak = Arc::downgrade(self);
            SmartPlayer::new(
                Arc::clone(&media),
                Box::new(move || {
                    if let Some(conversation) = weak.upgrade() {
                        let inner = Arc::clone(&conversation);
                        conversation.runtime.spawn(async move {
                            inner.handle_playback_finished().await;
                        });
                    }
                }),
            )
        };

        let correction = self.config.vad_use_dynamic_corrections.then(|| {
            DynamicCorrection::new(CorrectionConfig {
                debug: self.config.vad_correction_debug,
                enter_thres: self.config.vad_correction_enter_thres,
                exit_thres: self.config.vad_correction_exit_thres,
                ..CorrectionConfig::default()
            })
        });
        let vad = Arc::new(Mutex::new(StreamingVad::new(
            Arc::clone(&self.vad_model),
            VadTuning {
                threshold: self.config.vad_threshold,
                min_speech_duration_ms: self.config.vad_min_speech_duration_ms,
                min_silence_duration_ms: self.config.vad_min_silence_duration_ms,
                speech_pad_ms: self.config.vad_speech_pad_ms,
                short_pause_offset_ms: self.config.short_pause_offset_ms,
                long_pause_offset_ms: self.config.long_pause_offset_ms,
                user_silence_timeout_ms: self.config.user_silence_timeout_ms,
                speech_prob_window: self.config.vad_speech_prob_window,
            },
            correction,
        )));

        let tts = self.build_tts_pipeline();

        *self.bundle.lock() = Some(Arc::new(MediaBundle {
            media,
            frame_port,
            player,
            vad,
            tts: Arc::clone(&tts),
        }));
        self.media_active.store(true, Ordering::Release);

        info!(
            call_id = self.call_id,
            session_id = ?self.session_id(),
            sample_rate = self.config.vad_sampling_rate,
            frame_time_usec = self.config.frame_time_usec,
            "Call media opened"
        );

        let greeting = self.greeting.lock().take();
        if let Some(greeting) = greeting {
            tts.enqueue(greeting, self.config.greeting_delay_sec);
        }
    }

    /// Tear down media-bound resources. Idempotent.
    pub(super) fn close_media(&self) {
        self.media_active.store(false, Ordering::Release);
        let bundle = self.bundle.lock().take();
        let Some(bundle) = bundle else {
            debug!(session_id = ?self.session_id(), "close_media: already closed");
            return;
        };

        bundle.tts.cancel();
        bundle.player.interrupt();
        bundle.media.stop_recording();
        bundle.media.detach_capture();
        // Flush any open utterance; the call is over, so events are dropped.
        let _ = bundle.vad.lock().finalize();
        bundle.frame_port.shutdown();
        debug!(session_id = ?self.session_id(), "Call media closed");
    }

    /// Disconnect: classify the outcome and report it to the backend.
    pub(super) fn handle_disconnected(self: &Arc<Self>, last_status_code: u16) {
        self.close_media();
        self.state.set(super::ConversationState::Finished);
        self.event_stream.stop();

        let status = self
            .close_status
            .lock()
            .take()
            .unwrap_or_else(|| close_status_for(last_status_code));
        debug!(
            status,
            last_status_code,
            session_id = ?self.session_id(),
            "Call disconnected"
        );

        if let Some(session_id) = self.session_id() {
            let backend = Arc::clone(&self.backend);
            self.runtime.spawn(async move {
                if let Err(err) = backend.close_session(&session_id, status).await {
                    error!(error = %err, session_id, "close_session failed");
                }
            });
        }
    }
}
