//! Gateway configuration.
//!
//! Everything is loadable from `.env` / process environment variables
//! (UPPER_SNAKE_CASE). `BACKEND_URL` is the only required key; all other
//! settings carry production defaults. After loading, `validate()` rejects
//! obviously broken combinations before anything is started.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;

mod env;
mod validation;

use env::{
    get_env_bool, get_env_csv, get_env_json_map, get_env_optional, get_env_parse, get_env_required,
    get_env_str,
};

/// SIP registration and transport settings handed to the driver adapter.
///
/// The core never interprets these beyond validation; they parameterize
/// whichever SIP stack binding is attached to the gateway.
#[derive(Debug, Clone)]
pub struct SipSettings {
    pub user: String,
    pub login: String,
    pub domain: String,
    pub password: String,
    pub caller_id: Option<String>,
    pub port: u16,
    pub use_tcp: bool,
    pub use_ice: bool,
    pub stun_servers: Vec<String>,
    pub proxy_servers: Vec<String>,
    /// Codec name -> priority, e.g. `{"opus/48000": 254}`.
    pub codecs_priority: BTreeMap<String, i32>,
    pub max_calls: i32,
    pub allow_inbound_calls: bool,
}

/// Full gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub sip: SipSettings,

    // Audio directories
    /// Transient TTS artifacts; files here are deleted after playback.
    pub tmp_audio_dir: PathBuf,
    /// Persistent per-call recordings (`<session_id>.wav`).
    pub sip_audio_dir: PathBuf,

    // Media framing
    pub frame_time_usec: u32,
    pub vad_sampling_rate: u32,

    // VAD core
    pub vad_model_path: PathBuf,
    pub vad_model_url: String,
    pub vad_threshold: f32,
    pub vad_min_speech_duration_ms: u32,
    pub vad_min_silence_duration_ms: u32,
    pub vad_speech_pad_ms: u32,
    pub vad_speech_prob_window: usize,

    // Dynamic correction
    pub vad_use_dynamic_corrections: bool,
    pub vad_correction_debug: bool,
    pub vad_correction_enter_thres: f64,
    pub vad_correction_exit_thres: f64,

    // Pause / timeout thresholds
    pub short_pause_offset_ms: u32,
    pub long_pause_offset_ms: u32,
    pub user_silence_timeout_ms: u32,
    pub min_speech_duration_sec: f64,

    // Conversation behavior
    pub interruptions_are_allowed: bool,
    pub is_streaming: bool,
    pub sip_early_eoc: bool,
    pub tts_max_inflight: usize,
    pub greeting_delay_sec: f64,
    pub record_audio_parts: bool,

    // Backend client
    pub backend_url: String,
    pub authorization_token: Option<String>,
    pub backend_request_timeout: f64,
    pub backend_connect_timeout: f64,
    pub backend_sock_read_timeout: f64,

    // Control plane
    pub sip_rest_api_port: u16,
    pub flametree_callback_url: Option<String>,
    pub flametree_callback_port: u16,

    // Event loop pacing for the SIP adapter
    pub events_delay: f64,
    pub async_delay: f64,

    pub log_level: String,
}

impl GatewayConfig {
    /// Load configuration from `.env` plus the process environment.
    pub fn load() -> Result<Self> {
        // Missing .env is fine; a malformed one is not silently ignored
        // beyond what dotenvy tolerates.
        let _ = dotenvy::dotenv();

        let cwd = std::env::current_dir()?;
        let audio_base = get_env_str("SIP_AUDIO_DIR", &cwd.to_string_lossy());

        let default_codecs: BTreeMap<String, i32> = BTreeMap::from([
            ("opus/48000".to_string(), 254),
            ("G722/16000".to_string(), 253),
        ]);

        let sip_user = get_env_str("SIP_USER", "user");
        let sip = SipSettings {
            login: get_env_str("SIP_LOGIN", &sip_user),
            user: sip_user,
            domain: get_env_str("SIP_DOMAIN", "sip.linphone.org"),
            password: get_env_str("SIP_PASSWORD", "password"),
            caller_id: get_env_optional("SIP_CALLER_ID"),
            port: get_env_parse("SIP_PORT", 5060)?,
            use_tcp: get_env_bool("SIP_USE_TCP", true),
            use_ice: get_env_bool("SIP_USE_ICE", false),
            stun_servers: get_env_csv("SIP_STUN_SERVERS"),
            proxy_servers: get_env_csv("SIP_PROXY_SERVERS"),
            codecs_priority: get_env_json_map("CODECS_PRIORITY", default_codecs)?,
            max_calls: get_env_parse("SIP_MAX_CALLS", 32)?,
            allow_inbound_calls: get_env_bool("ALLOW_INBOUND_CALLS", true),
        };

        Ok(Self {
            sip,
            tmp_audio_dir: PathBuf::from(get_env_str(
                "SIP_AUDIO_TMP_DIR",
                &format!("{audio_base}/tmp"),
            )),
            sip_audio_dir: PathBuf::from(get_env_str(
                "SIP_AUDIO_WAV_DIR",
                &format!("{audio_base}/wav"),
            )),
            frame_time_usec: get_env_parse("FRAME_TIME_USEC", 60_000)?,
            vad_sampling_rate: get_env_parse("VAD_SAMPLING_RATE", 16_000)?,
            vad_model_path: PathBuf::from(get_env_str("VAD_MODEL_PATH", &cwd.to_string_lossy()))
                .join("silero_vad.onnx"),
            vad_model_url: get_env_str(
                "VAD_MODEL_URL",
                "https://huggingface.co/onnx-community/silero-vad/resolve/main/onnx/model.onnx",
            ),
            vad_threshold: get_env_parse("VAD_THRESHOLD", 0.65)?,
            vad_min_speech_duration_ms: get_env_parse("VAD_MIN_SPEECH_DURATION_MS", 150)?,
            vad_min_silence_duration_ms: get_env_parse("VAD_MIN_SILENCE_DURATION_MS", 300)?,
            vad_speech_pad_ms: get_env_parse("VAD_SPEECH_PAD_MS", 700)?,
            vad_speech_prob_window: get_env_parse("VAD_SPEECH_PROB_WINDOW", 3)?,
            vad_use_dynamic_corrections: get_env_bool("VAD_USE_DYNAMIC_CORRECTIONS", true),
            vad_correction_debug: get_env_bool("VAD_CORRECTION_DEBUG", false),
            vad_correction_enter_thres: get_env_parse("VAD_CORRECTION_ENTER_THRESHOLD", 0.6)?,
            vad_correction_exit_thres: get_env_parse("VAD_CORRECTION_EXIT_THRESHOLD", 0.4)?,
            short_pause_offset_ms: get_env_parse("SHORT_PAUSE_OFFSET_MS", 200)?,
            long_pause_offset_ms: get_env_parse("LONG_PAUSE_OFFSET_MS", 850)?,
            user_silence_timeout_ms: get_env_parse("USER_SILENCE_TIMEOUT_MS", 60_000)?,
            min_speech_duration_sec: get_env_parse("MIN_SPEECH_DURATION_SEC", 1.5)?,
            interruptions_are_allowed: get_env_bool("INTERRUPTIONS_ARE_ALLOWED", true),
            is_streaming: get_env_bool("IS_STREAMING", true),
            sip_early_eoc: get_env_bool("SIP_EARLY_EOC", false),
            tts_max_inflight: get_env_parse("TTS_MAX_INFLIGHT", 3)?,
            greeting_delay_sec: get_env_parse("GREETING_DELAY_SEC", 0.0)?,
            record_audio_parts: get_env_bool("RECORD_AUDIO_PARTS", false),
            backend_url: get_env_required("BACKEND_URL")?,
            authorization_token: get_env_optional("AUTHORIZATION_TOKEN"),
            backend_request_timeout: get_env_parse("BACKEND_REQUEST_TIMEOUT", 60.0)?,
            backend_connect_timeout: get_env_parse("BACKEND_CONNECT_TIMEOUT", 60.0)?,
            backend_sock_read_timeout: get_env_parse("BACKEND_SOCK_READ_TIMEOUT", 60.0)?,
            sip_rest_api_port: get_env_parse("SIP_REST_API_PORT", 8000)?,
            flametree_callback_url: get_env_optional("FLAMETREE_CALLBACK_URL"),
            flametree_callback_port: get_env_parse("FLAMETREE_CALLBACK_PORT", 8088)?,
            events_delay: get_env_parse("EVENTS_DELAY", 0.010)?,
            async_delay: get_env_parse("ASYNC_DELAY", 0.005)?,
            log_level: get_env_str("LOG_LEVEL", "INFO"),
        })
    }

    /// Address the control-plane listener binds to.
    pub fn rest_address(&self) -> String {
        format!("0.0.0.0:{}", self.sip_rest_api_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> GatewayConfig {
        // Tests run in parallel; leave the variable in place so concurrent
        // loads all see it.
        std::env::set_var("BACKEND_URL", "http://backend.local");
        GatewayConfig::load().unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = minimal_config();
        assert_eq!(config.vad_sampling_rate, 16_000);
        assert_eq!(config.vad_threshold, 0.65);
        assert_eq!(config.vad_min_speech_duration_ms, 150);
        assert_eq!(config.vad_min_silence_duration_ms, 300);
        assert_eq!(config.vad_speech_pad_ms, 700);
        assert_eq!(config.short_pause_offset_ms, 200);
        assert_eq!(config.long_pause_offset_ms, 850);
        assert_eq!(config.user_silence_timeout_ms, 60_000);
        assert_eq!(config.min_speech_duration_sec, 1.5);
        assert_eq!(config.tts_max_inflight, 3);
        assert_eq!(config.sip_rest_api_port, 8000);
        assert_eq!(config.frame_time_usec, 60_000);
        assert!(config.interruptions_are_allowed);
        assert!(!config.sip_early_eoc);
    }

    #[test]
    fn test_default_codec_priorities() {
        let config = minimal_config();
        assert_eq!(config.sip.codecs_priority.get("opus/48000"), Some(&254));
        assert_eq!(config.sip.codecs_priority.get("G722/16000"), Some(&253));
    }

    #[test]
    fn test_rest_address() {
        let config = minimal_config();
        assert_eq!(config.rest_address(), "0.0.0.0:8000");
    }

    #[test]
    fn test_validate_accepts_defaults() {
        let config = minimal_config();
        assert!(config.validate().is_ok());
    }
}
