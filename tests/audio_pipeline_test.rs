//! End-to-end audio path: PCM frames pushed through the capture port drive
//! the scripted VAD into a speculative start and a commit.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Value, json};

use voxlink::backend::{BackendApi, BackendSession, CommitOutcome, NewSessionRequest};
use voxlink::config::{GatewayConfig, SipSettings};
use voxlink::core::Conversation;
use voxlink::core::audio::FramePort;
use voxlink::core::vad::SpeechModel;
use voxlink::errors::{BackendError, SipError, VadError};
use voxlink::sip::{CallActions, CallId, CallLifecycle, CallMedia};
use voxlink::{ConversationState, Metrics};

/// Model that replays a scripted probability sequence, one per window.
struct ScriptedModel {
    probs: Mutex<VecDeque<f32>>,
}

impl ScriptedModel {
    fn new(probs: Vec<f32>) -> Arc<Self> {
        Arc::new(Self {
            probs: Mutex::new(probs.into()),
        })
    }
}

impl SpeechModel for ScriptedModel {
    fn sampling_rate(&self) -> u32 {
        16_000
    }
    fn initialize_state(&self) -> Vec<f32> {
        Vec::new()
    }
    fn get_speech_prob(&self, _audio: &[f32], _state: &mut Vec<f32>) -> Result<f32, VadError> {
        Ok(self.probs.lock().pop_front().unwrap_or(0.0))
    }
}

#[derive(Default)]
struct RecordingBackend {
    ops: Mutex<Vec<String>>,
}

#[async_trait]
impl BackendApi for RecordingBackend {
    async fn capabilities(&self) -> Result<Value, BackendError> {
        Ok(json!({}))
    }
    async fn create_session(
        &self,
        _request: NewSessionRequest,
    ) -> Result<BackendSession, BackendError> {
        Ok(BackendSession {
            session_id: "sess-e2e".into(),
            greeting: None,
        })
    }
    async fn start(&self, _s: &str, message: &str) -> Result<Value, BackendError> {
        self.ops.lock().push(format!("start:{message}"));
        Ok(json!({}))
    }
    async fn commit(&self, _s: &str) -> Result<CommitOutcome, BackendError> {
        self.ops.lock().push("commit".into());
        Ok(CommitOutcome::default())
    }
    async fn rollback(&self, _s: &str) -> Result<Value, BackendError> {
        self.ops.lock().push("rollback".into());
        Ok(json!({}))
    }
    async fn synthesize(&self, _s: &str, _t: &str) -> Result<Bytes, BackendError> {
        Ok(Bytes::from(vec![0u8; 1000]))
    }
    async fn transcribe(&self, _wav: Vec<u8>) -> Result<String, BackendError> {
        self.ops.lock().push("transcribe".into());
        Ok("what I said".into())
    }
    async fn close_session(&self, _s: &str, _status: &str) -> Result<(), BackendError> {
        self.ops.lock().push("close".into());
        Ok(())
    }
}

#[derive(Default)]
struct CaptureMedia {
    attached: Mutex<Option<Arc<FramePort>>>,
    played: AtomicUsize,
}

impl CallMedia for CaptureMedia {
    fn attach_capture(&self, port: Arc<FramePort>) -> Result<(), SipError> {
        *self.attached.lock() = Some(port);
        Ok(())
    }
    fn detach_capture(&self) {
        *self.attached.lock() = None;
    }
    fn play_file(&self, _path: &Path, _on_eof: Box<dyn FnOnce() + Send>) -> Result<(), SipError> {
        self.played.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn stop_playback(&self) {}
    fn start_recording(&self, _path: &Path) -> Result<(), SipError> {
        Ok(())
    }
    fn stop_recording(&self) {}
}

struct PassiveActions {
    media: Arc<CaptureMedia>,
}

impl CallActions for PassiveActions {
    fn call_id(&self) -> CallId {
        1
    }
    fn make_call(&self, _to_uri: &str) -> Result<(), SipError> {
        Ok(())
    }
    fn answer(&self, _status_code: u16) -> Result<(), SipError> {
        Ok(())
    }
    fn hangup(&self, _status_code: u16) -> Result<(), SipError> {
        Ok(())
    }
    fn transfer(&self, _to_uri: &str) -> Result<(), SipError> {
        Ok(())
    }
    fn dial_dtmf(&self, _digits: &str) -> Result<(), SipError> {
        Ok(())
    }
    fn lifecycle(&self) -> Result<CallLifecycle, SipError> {
        Ok(CallLifecycle::Confirmed)
    }
    fn last_status_code(&self) -> u16 {
        200
    }
    fn media(&self) -> Result<Arc<dyn CallMedia>, SipError> {
        Ok(Arc::clone(&self.media) as Arc<dyn CallMedia>)
    }
}

fn fast_vad_config(tmp: &Path) -> GatewayConfig {
    GatewayConfig {
        sip: SipSettings {
            user: "user".into(),
            login: "user".into(),
            domain: "sip.example.com".into(),
            password: "secret".into(),
            caller_id: None,
            port: 5060,
            use_tcp: true,
            use_ice: false,
            stun_servers: vec![],
            proxy_servers: vec![],
            codecs_priority: BTreeMap::new(),
            max_calls: 32,
            allow_inbound_calls: true,
        },
        tmp_audio_dir: tmp.join("tmp"),
        sip_audio_dir: tmp.join("wav"),
        frame_time_usec: 60_000,
        vad_sampling_rate: 16_000,
        vad_model_path: tmp.join("model.onnx"),
        vad_model_url: String::new(),
        vad_threshold: 0.5,
        // One 512-sample window is 32 ms; keep every threshold a handful
        // of windows so the scripted sequence stays short.
        vad_min_speech_duration_ms: 32,
        vad_min_silence_duration_ms: 64,
        vad_speech_pad_ms: 96,
        vad_speech_prob_window: 1,
        vad_use_dynamic_corrections: false,
        vad_correction_debug: false,
        vad_correction_enter_thres: 0.6,
        vad_correction_exit_thres: 0.4,
        short_pause_offset_ms: 32,
        long_pause_offset_ms: 64,
        user_silence_timeout_ms: 60_000,
        min_speech_duration_sec: 0.1,
        interruptions_are_allowed: true,
        is_streaming: true,
        sip_early_eoc: false,
        tts_max_inflight: 3,
        greeting_delay_sec: 0.0,
        record_audio_parts: false,
        backend_url: "http://backend.local".into(),
        authorization_token: None,
        backend_request_timeout: 60.0,
        backend_connect_timeout: 60.0,
        backend_sock_read_timeout: 60.0,
        sip_rest_api_port: 8000,
        flametree_callback_url: None,
        flametree_callback_port: 8088,
        events_delay: 0.010,
        async_delay: 0.005,
        log_level: "INFO".into(),
    }
}

async fn wait_for(description: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for: {description}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_frames_drive_start_and_commit() {
    let tmp = tempfile::tempdir().unwrap();
    let config = fast_vad_config(tmp.path());

    // 8 speech windows, then silence through short pause (3 windows) and
    // long pause (5 windows).
    let mut probs = vec![0.9f32; 8];
    probs.extend(vec![0.1f32; 8]);
    let model = ScriptedModel::new(probs);

    let media = Arc::new(CaptureMedia::default());
    let actions = Arc::new(PassiveActions {
        media: Arc::clone(&media),
    });
    let backend = Arc::new(RecordingBackend::default());

    let conversation = Conversation::new(
        1,
        actions as Arc<dyn CallActions>,
        Arc::clone(&backend) as Arc<dyn BackendApi>,
        Arc::new(Metrics::new()),
        Arc::new(config),
        model,
    );
    conversation.bind_session("sess-e2e");
    conversation.on_call_state(CallLifecycle::Confirmed, 200);

    let port = media.attached.lock().clone().expect("capture attached");

    // Stream the capture: 16 windows of 512 samples.
    for _ in 0..16 {
        port.push_frame(vec![1000i16; 512]);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    wait_for("speculative start", || {
        backend.ops.lock().iter().any(|op| op.starts_with("start:"))
    })
    .await;
    wait_for("commit", || backend.ops.lock().contains(&"commit".into())).await;
    wait_for("state settles", || {
        conversation.state() == ConversationState::WaitForUser
    })
    .await;

    let ops = backend.ops.lock().clone();
    let transcribes = ops.iter().filter(|op| *op == "transcribe").count();
    assert_eq!(transcribes, 1, "speculation must be reused by the commit");
    assert!(ops.contains(&"start:what I said".to_string()));

    conversation.on_call_state(CallLifecycle::Disconnected, 200);
    wait_for("close reported", || backend.ops.lock().contains(&"close".into())).await;
}
