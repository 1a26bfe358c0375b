//! Streaming voice-activity segmentation.
//!
//! Consumes the call's PCM stream in fixed 512-sample windows and turns it
//! into conversation events: speech start/end, short pause, long pause, and
//! the user-silence timeout. A rolling padded speech buffer accompanies each
//! event so downstream transcription receives smooth, contiguous audio.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::VadError;

use super::correction::DynamicCorrection;
use super::model::SpeechModel;

/// Samples per analysis window.
const WINDOW_SIZE_SAMPLES: usize = 512;

/// Timing parameters for the streaming processor, in milliseconds.
#[derive(Debug, Clone)]
pub struct VadTuning {
    pub threshold: f32,
    pub min_speech_duration_ms: u32,
    pub min_silence_duration_ms: u32,
    pub speech_pad_ms: u32,
    /// Added on top of `min_silence_duration_ms` for the short pause.
    pub short_pause_offset_ms: u32,
    /// Added on top of the short pause for the long pause.
    pub long_pause_offset_ms: u32,
    pub user_silence_timeout_ms: u32,
    pub speech_prob_window: usize,
}

/// Event emitted by the processor. Audio payloads are float PCM at the
/// model's sampling rate; `start` and `duration` are in seconds of stream
/// time.
#[derive(Debug, Clone)]
pub enum VadEvent {
    SpeechStart {
        audio: Vec<f32>,
        start: f64,
        duration: f64,
    },
    SpeechEnd {
        audio: Vec<f32>,
        start: f64,
        duration: f64,
    },
    ShortPause {
        audio: Vec<f32>,
        start: f64,
        duration: f64,
    },
    LongPause {
        audio: Vec<f32>,
        start: f64,
        duration: f64,
    },
    UserSilenceTimeout {
        at: f64,
    },
}

pub struct StreamingVad {
    model: Arc<dyn SpeechModel>,
    threshold: f32,
    sampling_rate: u32,
    prob_window: usize,

    min_speech_samples: usize,
    min_silence_samples: usize,
    speech_pad_samples: usize,
    short_pause_samples: usize,
    long_pause_samples: usize,
    user_silence_samples: i64,
    max_silence_samples: usize,

    buffer: Vec<f32>,
    speech_buffer: Vec<f32>,
    silence_buffer: Vec<f32>,
    silence_pad_buffer: Vec<f32>,
    prob_history: VecDeque<f32>,
    state: Vec<f32>,

    current_sample: i64,
    active_speech: bool,
    active_long_speech: bool,
    short_pause_fired: bool,
    long_pause_suspended: bool,
    speech_start: i64,
    user_silence_start: i64,
    user_silence_timeout_fired: bool,

    correction: Option<DynamicCorrection>,
}

impl StreamingVad {
    pub fn new(
        model: Arc<dyn SpeechModel>,
        tuning: VadTuning,
        correction: Option<DynamicCorrection>,
    ) -> Self {
        let sr = model.sampling_rate();
        let to_samples = |ms: u32| (sr as usize * ms as usize) / 1000;

        let min_silence_samples = to_samples(tuning.min_silence_duration_ms);
        let short_pause_samples = min_silence_samples + to_samples(tuning.short_pause_offset_ms);
        let max_silence_ms = (tuning.speech_pad_ms * 2).max(tuning.min_silence_duration_ms);
        let state = model.initialize_state();

        Self {
            threshold: tuning.threshold,
            sampling_rate: sr,
            prob_window: tuning.speech_prob_window.max(1),
            min_speech_samples: to_samples(tuning.min_speech_duration_ms),
            min_silence_samples,
            speech_pad_samples: to_samples(tuning.speech_pad_ms),
            short_pause_samples,
            long_pause_samples: short_pause_samples + to_samples(tuning.long_pause_offset_ms),
            user_silence_samples: to_samples(tuning.user_silence_timeout_ms) as i64,
            max_silence_samples: to_samples(max_silence_ms),
            buffer: Vec::new(),
            speech_buffer: Vec::new(),
            silence_buffer: Vec::new(),
            silence_pad_buffer: Vec::new(),
            prob_history: VecDeque::new(),
            state,
            current_sample: 0,
            active_speech: false,
            active_long_speech: false,
            short_pause_fired: false,
            long_pause_suspended: false,
            speech_start: 0,
            user_silence_start: 0,
            user_silence_timeout_fired: false,
            correction,
            model,
        }
    }

    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    /// Feed captured PCM and collect the events it produces, in order.
    pub fn process_samples(&mut self, samples: &[i16]) -> Vec<VadEvent> {
        let mut events = Vec::new();
        if samples.is_empty() {
            return events;
        }
        self.buffer
            .extend(samples.iter().map(|&s| s as f32 / 32768.0));
        while self.buffer.len() >= WINDOW_SIZE_SAMPLES {
            let window: Vec<f32> = self.buffer.drain(..WINDOW_SIZE_SAMPLES).collect();
            self.process_window(&window, &mut events);
        }
        events
    }

    /// Flush an open utterance as a final long pause.
    pub fn finalize(&mut self) -> Vec<VadEvent> {
        let mut events = Vec::new();
        if self.speech_buffer.len() >= self.min_speech_samples {
            self.fire_long_pause(&mut events);
        }
        events
    }

    /// Suppress or re-allow long-pause events (used while a commit runs).
    pub fn set_long_pause_suspended(&mut self, suspended: bool) {
        self.long_pause_suspended = suspended;
    }

    /// Arm the user-silence timer from the current stream position.
    pub fn start_user_silence(&mut self) {
        self.user_silence_start = self.current_sample;
        self.user_silence_timeout_fired = false;
        if let Some(correction) = &mut self.correction {
            correction.start_early_detection();
        }
        debug!(time_sec = self.current_time_sec(), "User silence period started");
    }

    /// Disarm the user-silence timer entirely.
    pub fn reset_user_silence(&mut self) {
        self.user_silence_start = 0;
        self.user_silence_timeout_fired = true;
    }

    /// Cancel the running timer without changing the fired latch.
    pub fn cancel_user_silence(&mut self) {
        self.user_silence_start = 0;
        debug!(time_sec = self.current_time_sec(), "User silence timer cancelled");
    }

    fn smoothed_prob(&mut self, window: &[f32]) -> f32 {
        let mut normalized = window.to_vec();
        let max_amp = normalized.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
        if (max_amp > 1.0 || max_amp < 0.01) && max_amp > 0.0 {
            for value in &mut normalized {
                *value /= max_amp;
            }
        }

        let prob = match self.model.get_speech_prob(&normalized, &mut self.state) {
            Ok(prob) => prob,
            Err(VadError::Inference(reason)) => {
                warn!(reason, "VAD inference failed, treating window as silence");
                0.0
            }
            Err(err) => {
                warn!(error = %err, "VAD inference failed, treating window as silence");
                0.0
            }
        };

        self.prob_history.push_back(prob);
        if self.prob_history.len() > self.prob_window {
            self.prob_history.pop_front();
        }
        if self.prob_history.len() <= 1 {
            return prob;
        }
        let mut weighted_sum = 0.0f32;
        let mut weight_total = 0.0f32;
        for (i, value) in self.prob_history.iter().enumerate() {
            let weight = (i + 1) as f32;
            weighted_sum += value * weight;
            weight_total += weight;
        }
        weighted_sum / weight_total
    }

    fn process_window(&mut self, window: &[f32], events: &mut Vec<VadEvent>) {
        let speech_prob = self.smoothed_prob(window);
        let is_speech_frame = if let Some(correction) = &mut self.correction {
            let energy = (window.iter().map(|v| (*v as f64) * (*v as f64)).sum::<f64>()
                / window.len() as f64)
                .sqrt();
            correction.process_frame(speech_prob as f64, energy)
        } else {
            speech_prob > self.threshold
        };

        self.current_sample += window.len() as i64;

        if self.active_long_speech {
            self.speech_buffer.extend_from_slice(window);
            if is_speech_frame {
                if !self.silence_buffer.is_empty() {
                    self.silence_buffer.clear();
                }
            } else {
                self.grow_silence_buffer(window);
            }
        } else if is_speech_frame {
            self.speech_buffer.extend_from_slice(window);
        } else {
            if !self.speech_buffer.is_empty() {
                let pending: Vec<f32> = std::mem::take(&mut self.speech_buffer);
                self.grow_silence_buffer(&pending);
            }
            self.grow_silence_buffer(window);
        }

        if is_speech_frame {
            if !self.active_speech {
                self.speech_start = self.current_sample - window.len() as i64;
                if self.speech_buffer.len() >= self.min_speech_samples {
                    self.fire_speech_start(events);
                }
            }
        } else {
            if self.active_speech {
                if self.silence_buffer.len() >= self.min_silence_samples {
                    self.fire_speech_end(events);
                }
            } else if !self.user_silence_timeout_fired
                && self.current_sample - self.user_silence_start > self.user_silence_samples
            {
                self.fire_user_silence_timeout(events);
            }
            if self.active_long_speech {
                if !self.short_pause_fired
                    && self.silence_buffer.len() >= self.short_pause_samples
                {
                    self.fire_short_pause(events);
                }
                if !self.long_pause_suspended
                    && self.silence_buffer.len() >= self.long_pause_samples
                {
                    self.fire_long_pause(events);
                }
            }
        }
    }

    fn grow_silence_buffer(&mut self, window: &[f32]) {
        self.silence_buffer.extend_from_slice(window);
        if self.silence_buffer.len() > self.max_silence_samples {
            let excess = self.silence_buffer.len() - self.max_silence_samples;
            self.silence_buffer.drain(..excess);
        }
    }

    fn fire_speech_start(&mut self, events: &mut Vec<VadEvent>) {
        self.active_speech = true;
        if !self.active_long_speech {
            self.active_long_speech = true;
            let pad_len = self.speech_pad_samples.min(self.silence_buffer.len());
            let pad_start = self.silence_buffer.len() - pad_len;
            self.silence_pad_buffer = apply_fade(&self.silence_buffer[pad_start..], true);
        }
        self.silence_buffer.clear();
        let (start, duration) = self.times_sec(self.silence_pad_buffer.len());
        debug!(time_sec = self.current_time_sec(), start, duration, "Speech start detected");
        events.push(VadEvent::SpeechStart {
            audio: self.silence_pad_buffer.clone(),
            start,
            duration,
        });
    }

    fn fire_speech_end(&mut self, events: &mut Vec<VadEvent>) {
        self.active_speech = false;
        if !self.active_long_speech {
            self.speech_buffer.clear();
        }
        self.short_pause_fired = false;
        self.user_silence_start = self.current_sample - self.silence_buffer.len() as i64;
        self.user_silence_timeout_fired = false;

        let speech_len = self.speech_buffer.len() as i64;
        let start_index = (speech_len + (self.speech_start - self.current_sample)).max(0) as usize;
        let end_index = (speech_len - self.silence_buffer.len() as i64).max(0) as usize;
        let audio = if end_index > start_index {
            self.speech_buffer[start_index..end_index].to_vec()
        } else {
            Vec::new()
        };
        let (start, duration) = self.times_sec(audio.len());
        debug!(time_sec = self.current_time_sec(), start, duration, "Speech end detected");
        events.push(VadEvent::SpeechEnd {
            audio,
            start,
            duration,
        });
    }

    fn pause_payload(&self) -> Vec<f32> {
        let silence_len = self.silence_buffer.len();
        let postfix = apply_fade(&self.silence_buffer, false);
        let mut audio = self.silence_pad_buffer.clone();
        if self.speech_buffer.len() > silence_len {
            audio.extend_from_slice(&self.speech_buffer[..self.speech_buffer.len() - silence_len]);
        }
        audio.extend_from_slice(&postfix);
        audio
    }

    fn fire_short_pause(&mut self, events: &mut Vec<VadEvent>) {
        let audio = self.pause_payload();
        let (start, duration) = self.times_sec(audio.len());
        debug!(time_sec = self.current_time_sec(), start, duration, "Short pause detected");
        events.push(VadEvent::ShortPause {
            audio,
            start,
            duration,
        });
        self.short_pause_fired = true;
    }

    fn fire_long_pause(&mut self, events: &mut Vec<VadEvent>) {
        let audio = self.pause_payload();
        let (start, duration) = self.times_sec(audio.len());
        debug!(time_sec = self.current_time_sec(), start, duration, "Long pause detected");
        events.push(VadEvent::LongPause {
            audio,
            start,
            duration,
        });
        self.short_pause_fired = false;
        self.active_long_speech = false;
        self.speech_buffer.clear();
    }

    fn fire_user_silence_timeout(&mut self, events: &mut Vec<VadEvent>) {
        let at = self.current_time_sec();
        debug!(time_sec = at, "User silence timeout");
        events.push(VadEvent::UserSilenceTimeout { at });
        self.user_silence_timeout_fired = true;
    }

    fn current_time_sec(&self) -> f64 {
        self.current_sample as f64 / self.sampling_rate as f64
    }

    fn times_sec(&self, audio_len: usize) -> (f64, f64) {
        let start = (self.current_sample - audio_len as i64) as f64 / self.sampling_rate as f64;
        let duration = audio_len as f64 / self.sampling_rate as f64;
        (start, duration)
    }
}

/// Quarter-sine fade. `fade_in` scales sample `i` by `sin(pi/2 * i/(L-1))`,
/// the fade-out curve is its complement.
fn apply_fade(audio: &[f32], fade_in: bool) -> Vec<f32> {
    if audio.len() <= 1 {
        return audio.to_vec();
    }
    let len = audio.len();
    audio
        .iter()
        .enumerate()
        .map(|(i, &sample)| {
            let ratio = i as f32 / (len - 1) as f32;
            let mut curve = (ratio * std::f32::consts::FRAC_PI_2).sin();
            if !fade_in {
                curve = 1.0 - curve;
            }
            sample * curve
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Deterministic model driven by a scripted probability sequence.
    struct ScriptedModel {
        probs: Mutex<std::collections::VecDeque<f32>>,
    }

    impl ScriptedModel {
        fn new(probs: &[f32]) -> Arc<Self> {
            Arc::new(Self {
                probs: Mutex::new(probs.iter().copied().collect()),
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

    fn tuning() -> VadTuning {
        VadTuning {
            threshold: 0.5,
            min_speech_duration_ms: 32,  // one window
            min_silence_duration_ms: 64, // two windows
            speech_pad_ms: 96, // keeps the silence ring larger than the long pause
            short_pause_offset_ms: 32, // short pause at 3 windows of silence
            long_pause_offset_ms: 64,  // long pause at 5 windows of silence
            user_silence_timeout_ms: 320,
            speech_prob_window: 1,
        }
    }

    fn vad_with(probs: &[f32]) -> StreamingVad {
        StreamingVad::new(ScriptedModel::new(probs), tuning(), None)
    }

    /// One analysis window of non-trivial PCM.
    fn window(value: i16) -> Vec<i16> {
        vec![value; WINDOW_SIZE_SAMPLES]
    }

    fn names(events: &[VadEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| match e {
                VadEvent::SpeechStart { .. } => "speech_start",
                VadEvent::SpeechEnd { .. } => "speech_end",
                VadEvent::ShortPause { .. } => "short_pause",
                VadEvent::LongPause { .. } => "long_pause",
                VadEvent::UserSilenceTimeout { .. } => "user_silence_timeout",
            })
            .collect()
    }

    #[test]
    fn test_speech_start_fires_after_min_speech() {
        let mut vad = vad_with(&[0.9]);
        let events = vad.process_samples(&window(1000));
        assert_eq!(names(&events), vec!["speech_start"]);
    }

    #[test]
    fn test_silence_only_no_events_before_timeout() {
        let mut vad = vad_with(&[0.1; 4]);
        for _ in 0..4 {
            assert!(vad.process_samples(&window(10)).is_empty());
        }
    }

    #[test]
    fn test_full_utterance_event_sequence() {
        // 2 speech windows, then continuous silence until the long pause.
        let probs = [0.9, 0.9, 0.1, 0.1, 0.1, 0.1, 0.1];
        let mut vad = vad_with(&probs);
        let mut all = Vec::new();
        for _ in 0..probs.len() {
            all.extend(vad.process_samples(&window(1000)));
        }
        assert_eq!(
            names(&all),
            vec!["speech_start", "speech_end", "short_pause", "long_pause"]
        );
    }

    #[test]
    fn test_short_pause_fires_once_per_utterance() {
        // Silence continues long after the short-pause threshold.
        let probs = [0.9, 0.1, 0.1, 0.1, 0.1];
        let mut vad = vad_with(&probs);
        // Suspend long pause so silence keeps accumulating.
        vad.set_long_pause_suspended(true);
        let mut all = Vec::new();
        for _ in 0..probs.len() {
            all.extend(vad.process_samples(&window(1000)));
        }
        let short_count = names(&all)
            .iter()
            .filter(|n| **n == "short_pause")
            .count();
        assert_eq!(short_count, 1);
        assert!(!names(&all).contains(&"long_pause"));
    }

    #[test]
    fn test_long_pause_suspension_and_release() {
        let probs = [0.9, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1];
        let mut vad = vad_with(&probs);
        vad.set_long_pause_suspended(true);
        let mut all = Vec::new();
        for _ in 0..5 {
            all.extend(vad.process_samples(&window(1000)));
        }
        assert!(!names(&all).contains(&"long_pause"));

        vad.set_long_pause_suspended(false);
        // Next silence window crosses the threshold again.
        let events = vad.process_samples(&window(1000));
        assert_eq!(names(&events), vec!["long_pause"]);
    }

    #[test]
    fn test_pause_payload_is_contiguous_capture() {
        // The short-pause payload must equal pad + speech + faded silence,
        // i.e. a contiguous suffix of the captured stream.
        let probs = [0.9, 0.9, 0.1, 0.1, 0.1];
        let mut vad = vad_with(&probs);
        let mut all = Vec::new();
        for _ in 0..probs.len() {
            all.extend(vad.process_samples(&window(1000)));
        }
        let short = all
            .iter()
            .find_map(|e| match e {
                VadEvent::ShortPause { audio, .. } => Some(audio.clone()),
                _ => None,
            })
            .unwrap();
        // 5 windows captured, no pad (speech started at stream head).
        assert_eq!(short.len(), 5 * WINDOW_SIZE_SAMPLES);
        // The speech portion is untouched by the fades.
        let expected = 1000.0 / 32768.0;
        assert!((short[WINDOW_SIZE_SAMPLES] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_speech_end_payload_excludes_trailing_silence() {
        let probs = [0.9, 0.9, 0.1, 0.1];
        let mut vad = vad_with(&probs);
        let mut all = Vec::new();
        for _ in 0..probs.len() {
            all.extend(vad.process_samples(&window(1000)));
        }
        let end_audio = all
            .iter()
            .find_map(|e| match e {
                VadEvent::SpeechEnd { audio, .. } => Some(audio.clone()),
                _ => None,
            })
            .unwrap();
        // Two speech windows survive; the two silence windows are trimmed.
        assert_eq!(end_audio.len(), 2 * WINDOW_SIZE_SAMPLES);
    }

    #[test]
    fn test_user_silence_timeout_fires_once() {
        // Timeout at 320 ms = 10 windows with no speech at all.
        let mut vad = vad_with(&[0.1; 16]);
        let mut all = Vec::new();
        for _ in 0..16 {
            all.extend(vad.process_samples(&window(10)));
        }
        let timeouts = names(&all)
            .iter()
            .filter(|n| **n == "user_silence_timeout")
            .count();
        assert_eq!(timeouts, 1);
    }

    #[test]
    fn test_reset_user_silence_disarms_timer() {
        let mut vad = vad_with(&[0.1; 16]);
        vad.reset_user_silence();
        let mut all = Vec::new();
        for _ in 0..16 {
            all.extend(vad.process_samples(&window(10)));
        }
        assert!(all.is_empty());
    }

    #[test]
    fn test_start_user_silence_rearms_from_now() {
        let mut vad = vad_with(&[0.1; 24]);
        vad.reset_user_silence();
        for _ in 0..4 {
            vad.process_samples(&window(10));
        }
        vad.start_user_silence();
        let mut all = Vec::new();
        for _ in 0..20 {
            all.extend(vad.process_samples(&window(10)));
        }
        assert_eq!(names(&all), vec!["user_silence_timeout"]);
    }

    #[test]
    fn test_finalize_flushes_open_utterance() {
        let mut vad = vad_with(&[0.9, 0.9]);
        vad.process_samples(&window(1000));
        vad.process_samples(&window(1000));
        let events = vad.finalize();
        assert_eq!(names(&events), vec!["long_pause"]);
        // A second finalize is a no-op.
        assert!(vad.finalize().is_empty());
    }

    #[test]
    fn test_partial_windows_are_buffered() {
        let mut vad = vad_with(&[0.9]);
        // Half a window produces nothing.
        assert!(vad.process_samples(&vec![1000; 256]).is_empty());
        // The second half completes the window and fires speech start.
        let events = vad.process_samples(&vec![1000; 256]);
        assert_eq!(names(&events), vec!["speech_start"]);
    }

    #[test]
    fn test_fade_curves() {
        let audio = vec![1.0f32; 5];
        let fade_in = apply_fade(&audio, true);
        assert!(fade_in[0].abs() < 1e-6);
        assert!((fade_in[4] - 1.0).abs() < 1e-6);
        let fade_out = apply_fade(&audio, false);
        assert!((fade_out[0] - 1.0).abs() < 1e-6);
        assert!(fade_out[4].abs() < 1e-6);
        // Complementary curves.
        for i in 0..5 {
            assert!((fade_in[i] + fade_out[i] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_inference_error_treated_as_silence() {
        struct FailingModel;
        impl SpeechModel for FailingModel {
            fn sampling_rate(&self) -> u32 {
                16_000
            }
            fn initialize_state(&self) -> Vec<f32> {
                Vec::new()
            }
            fn get_speech_prob(
                &self,
                _audio: &[f32],
                _state: &mut Vec<f32>,
            ) -> Result<f32, VadError> {
                Err(VadError::Inference("boom".into()))
            }
        }
        let mut vad = StreamingVad::new(Arc::new(FailingModel), tuning(), None);
        assert!(vad.process_samples(&window(1000)).is_empty());
    }
}
