//! Per-call conversation controller.
//!
//! One `Conversation` binds to exactly one SIP call leg. It owns the
//! call's streaming VAD, smart player, TTS pipeline and frame port, talks to
//! the backend over the request channel (`start`/`commit`/`rollback`/
//! `transcribe`/`synthesize`/`close`) and its event stream, and drives the
//! call state machine from voice-activity events.

mod audio;
mod generation;
mod media;
mod playback;
mod state;
mod stream_events;


pub use state::{ConversationState, StateCell};

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::backend::{BackendApi, EventStream};
use crate::config::GatewayConfig;
use crate::core::audio::{FramePort, SmartPlayer};
use crate::core::tts::TtsPipeline;
use crate::core::vad::{SpeechModel, StreamingVad};
use crate::metrics::Metrics;
use crate::sip::{CallActions, CallId, CallLifecycle, CallMedia};
use crate::utils::normalize_text;

/// In-flight generation bookkeeping, all under one lock.
///
/// The invariant maintained here: at most one of {start, commit} is ever
/// outstanding, and a commit forbids rollback until it settles.
#[derive(Default)]
struct GenerationState {
    /// Speculative start request in progress.
    start_in_flight: bool,
    /// Commit request in progress.
    commit_in_flight: bool,
    /// A speculative session is live on the backend.
    spec_active: bool,
    /// Short pause already processed for this utterance.
    short_pause_handled: bool,
    /// Long pause already processed for this utterance.
    long_pause_handled: bool,
    last_unstable_transcription: Option<String>,
    /// Set when a reply generation starts; cleared by the first stream token.
    start_reply_generation: Option<Instant>,
    /// Set at short-pause reservation; cleared when audio reaches the player.
    start_response_generation: Option<Instant>,
}

#[derive(Default)]
struct TransferState {
    target: Option<String>,
    delay_sec: f64,
    started: bool,
}

/// Media-bound resources, created on confirm and torn down on disconnect.
struct MediaBundle {
    media: Arc<dyn CallMedia>,
    frame_port: Arc<FramePort>,
    player: Arc<SmartPlayer>,
    vad: Arc<Mutex<StreamingVad>>,
    tts: Arc<TtsPipeline>,
}

pub struct Conversation {
    call_id: CallId,
    actions: Arc<dyn CallActions>,
    backend: Arc<dyn BackendApi>,
    metrics: Arc<Metrics>,
    config: Arc<GatewayConfig>,
    vad_model: Arc<dyn SpeechModel>,

    session_id: RwLock<Option<String>>,
    greeting: Mutex<Option<String>>,
    event_stream: EventStream,

    state: StateCell,
    generation: Mutex<GenerationState>,
    transfer: Mutex<TransferState>,
    close_status: Mutex<Option<&'static str>>,

    media_active: AtomicBool,
    user_speaking: AtomicBool,
    soft_hangup_pending: AtomicBool,

    bundle: Mutex<Option<Arc<MediaBundle>>>,
    tts_seq: AtomicU64,
    started_at: Instant,
    runtime: tokio::runtime::Handle,
}

impl Conversation {
    pub fn new(
        call_id: CallId,
        actions: Arc<dyn CallActions>,
        backend: Arc<dyn BackendApi>,
        metrics: Arc<Metrics>,
        config: Arc<GatewayConfig>,
        vad_model: Arc<dyn SpeechModel>,
    ) -> Arc<Self> {
        let event_stream = EventStream::new(&config.backend_url);
        Arc::new(Self {
            call_id,
            actions,
            backend,
            metrics,
            vad_model,
            session_id: RwLock::new(None),
            greeting: Mutex::new(None),
            event_stream,
            state: StateCell::new(),
            generation: Mutex::new(GenerationState::default()),
            transfer: Mutex::new(TransferState::default()),
            close_status: Mutex::new(None),
            media_active: AtomicBool::new(false),
            user_speaking: AtomicBool::new(false),
            soft_hangup_pending: AtomicBool::new(false),
            bundle: Mutex::new(None),
            tts_seq: AtomicU64::new(0),
            started_at: Instant::now(),
            runtime: tokio::runtime::Handle::current(),
            config,
        })
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn bind_session(&self, session_id: &str) {
        *self.session_id.write() = Some(session_id.to_string());
    }

    pub fn set_greeting(&self, greeting: Option<String>) {
        *self.greeting.lock() = greeting;
    }

    pub fn lifecycle(&self) -> Result<CallLifecycle, crate::errors::SipError> {
        self.actions.lifecycle()
    }

    pub fn make_call(&self, to_uri: &str) -> Result<(), crate::errors::SipError> {
        self.actions.make_call(to_uri)
    }

    /// Store a pending warm-transfer target; consumed at soft-hangup time.
    pub fn set_transfer_target(&self, to_uri: &str, delay_sec: f64) {
        let mut transfer = self.transfer.lock();
        transfer.target = Some(to_uri.to_string());
        transfer.delay_sec = delay_sec;
        debug!(
            session_id = ?self.session_id(),
            to_uri,
            delay_sec,
            "Transfer target set"
        );
    }

    /// Subscribe to the backend event stream for the bound session.
    pub fn connect_stream(self: &Arc<Self>) {
        let Some(session_id) = self.session_id() else {
            warn!("Event stream connect skipped: session_id is not set");
            return;
        };
        let weak = Arc::downgrade(self);
        self.event_stream.connect(
            &session_id,
            Arc::new(move |message| {
                if let Some(conversation) = weak.upgrade() {
                    conversation.handle_stream_event(message);
                }
            }),
        );
    }

    pub fn stop_stream(&self) {
        self.event_stream.stop();
    }

    /// Call lifecycle event from the SIP collaborator.
    pub fn on_call_state(self: &Arc<Self>, lifecycle: CallLifecycle, last_status_code: u16) {
        debug!(
            call_id = self.call_id,
            ?lifecycle,
            last_status_code,
            session_id = ?self.session_id(),
            "Call state changed"
        );
        match lifecycle {
            CallLifecycle::Confirmed => self.open_media(),
            CallLifecycle::Disconnected => self.handle_disconnected(last_status_code),
            _ => {}
        }
    }

    /// Media-state notification; media acquisition happens on confirm.
    pub fn on_call_media_state(&self) {
        debug!(session_id = ?self.session_id(), "Call media state changed");
    }

    /// REFER progress from the SIP collaborator.
    pub fn on_transfer_status(&self, status_code: u16, is_final: bool, reason: &str) {
        debug!(
            status_code,
            is_final,
            reason,
            session_id = ?self.session_id(),
            "Transfer status"
        );
        if is_final && (200..300).contains(&status_code) {
            if let Err(err) = self.actions.hangup(200) {
                warn!(error = %err, "Hangup after transfer notify failed");
            }
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state.get()
    }

    fn set_state(&self, next: ConversationState) {
        self.state.set(next);
    }

    fn bundle(&self) -> Option<Arc<MediaBundle>> {
        self.bundle.lock().clone()
    }

    fn player(&self) -> Option<Arc<SmartPlayer>> {
        self.bundle().map(|b| Arc::clone(&b.player))
    }

    fn vad(&self) -> Option<Arc<Mutex<StreamingVad>>> {
        self.bundle().map(|b| Arc::clone(&b.vad))
    }

    fn tts(&self) -> Option<Arc<TtsPipeline>> {
        self.bundle().map(|b| Arc::clone(&b.tts))
    }

    /// The AI may produce audible output in these states.
    fn ai_can_speak(&self) -> bool {
        matches!(
            self.state(),
            ConversationState::WaitForUser
                | ConversationState::CommitGenerate
                | ConversationState::Finished
        )
    }

    /// Whether the AI is speaking or about to speak. A commit in flight
    /// counts even with an empty TTS queue, so barge-in gating stays closed
    /// while the reply is being produced.
    fn is_active_ai_speech(&self) -> bool {
        let player_active = self.player().map(|p| p.is_active()).unwrap_or(false);
        let tts_waiting = self
            .tts()
            .map(|t| t.has_queue() && self.ai_can_speak())
            .unwrap_or(false);
        player_active || tts_waiting || self.generation.lock().commit_in_flight
    }

    fn is_same_unstable_text(&self, text: &str) -> bool {
        let generation = self.generation.lock();
        match &generation.last_unstable_transcription {
            Some(last) => normalize_text(last) == normalize_text(text),
            None => false,
        }
    }

    fn elapsed_sec(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    fn make_tts_path(&self) -> PathBuf {
        let owner = self
            .session_id()
            .unwrap_or_else(|| format!("call{}", self.call_id));
        let seq = self.tts_seq.fetch_add(1, Ordering::Relaxed);
        let micros = self.started_at.elapsed().as_micros();
        self.config
            .tmp_audio_dir
            .join(format!("tts-{owner}-{micros}-{seq}.wav"))
    }
}
