//! Configuration validation.

use anyhow::Result;

use super::GatewayConfig;

impl GatewayConfig {
    /// Reject configurations that cannot possibly run.
    pub fn validate(&self) -> Result<()> {
        if self.sip.user.is_empty() {
            anyhow::bail!("SIP_USER is required");
        }
        if self.sip.domain.is_empty() {
            anyhow::bail!("SIP_DOMAIN is required");
        }
        if self.sip.password.is_empty() {
            anyhow::bail!("SIP_PASSWORD is required");
        }
        if self.backend_url.is_empty() {
            anyhow::bail!("BACKEND_URL is required");
        }
        if self.sip.port == 0 {
            anyhow::bail!("SIP_PORT must be positive");
        }
        if self.sip_rest_api_port == 0 {
            anyhow::bail!("SIP_REST_API_PORT must be positive");
        }
        if self.sip.max_calls <= 0 {
            anyhow::bail!("SIP_MAX_CALLS must be positive");
        }
        if self.tts_max_inflight == 0 {
            anyhow::bail!("TTS_MAX_INFLIGHT must be positive");
        }
        if self.vad_sampling_rate != 8_000 && self.vad_sampling_rate != 16_000 {
            anyhow::bail!("VAD_SAMPLING_RATE must be 8000 or 16000");
        }
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            anyhow::bail!("VAD_THRESHOLD must be within [0, 1]");
        }
        if self.vad_speech_prob_window == 0 {
            anyhow::bail!("VAD_SPEECH_PROB_WINDOW must be positive");
        }
        Ok(())
    }
}
