//! Adaptive second-stage speech/silence classifier.
//!
//! Post-processes the smoothed VAD probability together with per-window
//! energy to stay robust under changing noise floors. It maintains an
//! adaptive noise estimate, a decaying energy peak, and short probability and
//! score histories, then combines four normalized signals (probability, SNR,
//! foreground probability variance, normalized energy) into a weighted score
//! with enter/exit hysteresis.

use std::collections::VecDeque;

use tracing::debug;

/// Tuning for [`DynamicCorrection`].
#[derive(Debug, Clone)]
pub struct CorrectionConfig {
    pub score_window: usize,
    pub prob_window: usize,

    pub enter_thres: f64,
    pub exit_thres: f64,

    /// Lowered entry threshold while the early-detection window is open.
    pub early_enter_thres: f64,
    pub early_phase_frames: i64,
    pub early_prob_boost: f64,

    pub w_prob: f64,
    pub w_snr: f64,
    pub w_var: f64,
    pub w_energy: f64,

    /// Probabilities above this count as foreground for the variance signal.
    pub speech_prob_threshold: f64,
    pub min_speech_frames: usize,
    pub transition_threshold: f64,

    pub snr_clip: (f64, f64),
    pub var_clip: (f64, f64),

    pub noise_alpha: f64,
    pub peak_decay: f64,

    pub initial_noise_alpha: f64,
    pub initial_adapt_frames: usize,

    pub debug: bool,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            score_window: 5,
            prob_window: 15,
            enter_thres: 0.40,
            exit_thres: 0.25,
            early_enter_thres: 0.30,
            early_phase_frames: 200,
            early_prob_boost: 0.20,
            w_prob: 0.60,
            w_snr: 0.15,
            w_var: 0.05,
            w_energy: 0.20,
            speech_prob_threshold: 0.3,
            min_speech_frames: 3,
            transition_threshold: 0.4,
            snr_clip: (0.0, 20.0),
            var_clip: (0.0, 0.05),
            noise_alpha: 0.02,
            peak_decay: 0.05,
            initial_noise_alpha: 0.15,
            initial_adapt_frames: 50,
            debug: false,
        }
    }
}

fn mean(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_variance_deque(values: &VecDeque<f64>) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean(values);
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64
}

fn population_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64
}

pub struct DynamicCorrection {
    cfg: CorrectionConfig,
    score_buf: VecDeque<f64>,
    prob_buf: VecDeque<f64>,
    noise_energy: f64,
    peak_energy: f64,
    initial_energy_samples: Vec<f64>,
    state: bool,
    frame_index: i64,
    in_early_phase: bool,
    early_phase_start_frame: i64,
}

impl DynamicCorrection {
    pub fn new(cfg: CorrectionConfig) -> Self {
        Self {
            cfg,
            score_buf: VecDeque::new(),
            prob_buf: VecDeque::new(),
            noise_energy: 0.01,
            peak_energy: 0.1,
            initial_energy_samples: Vec::new(),
            state: false,
            frame_index: 0,
            in_early_phase: false,
            early_phase_start_frame: -1,
        }
    }

    /// Open the early-detection window (lower entry threshold plus a
    /// probability boost). Armed when the far end finishes speaking so a
    /// quiet immediate reply is not missed.
    pub fn start_early_detection(&mut self) {
        if self.early_phase_start_frame == -1 {
            self.in_early_phase = true;
            self.early_phase_start_frame = self.frame_index;
        }
    }

    fn clip_norm(&self, value: f64, low: f64, high: f64) -> f64 {
        if high <= low {
            return 0.0;
        }
        (value.clamp(low, high) - low) / (high - low)
    }

    fn update_energy_profile(&mut self, energy: f64, speech_prob: f64) {
        if self.initial_energy_samples.len() < self.cfg.initial_adapt_frames {
            self.initial_energy_samples.push(energy);
            if self.initial_energy_samples.len() == self.cfg.initial_adapt_frames {
                let mut sorted = self.initial_energy_samples.clone();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                // Tenth percentile seeds the noise floor.
                self.noise_energy = sorted[sorted.len() / 10];
            }
        }

        let alpha = if self.frame_index < self.cfg.initial_adapt_frames as i64 {
            self.cfg.initial_noise_alpha
        } else {
            self.cfg.noise_alpha
        };

        if !self.state && speech_prob < 0.3 {
            self.noise_energy = (1.0 - alpha) * self.noise_energy + alpha * energy;
        }

        if energy > self.peak_energy {
            self.peak_energy = energy;
        } else {
            self.peak_energy = (1.0 - self.cfg.peak_decay) * self.peak_energy
                + self.cfg.peak_decay * self.noise_energy;
        }
        self.peak_energy = self.peak_energy.max(self.noise_energy + 1e-6);
    }

    fn is_transition_period(&self) -> bool {
        if self.prob_buf.len() < 4 {
            return false;
        }
        let recent: Vec<f64> = self.prob_buf.iter().rev().take(4).copied().collect();
        let min = recent.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = recent.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        (max - min) > self.cfg.transition_threshold
    }

    fn foreground_variance(&self) -> f64 {
        if self.prob_buf.len() < 2 {
            return 0.0;
        }
        if !self.state {
            return 0.0;
        }

        let speech_probs: Vec<f64> = self
            .prob_buf
            .iter()
            .copied()
            .filter(|p| *p > self.cfg.speech_prob_threshold)
            .collect();
        if speech_probs.len() < self.cfg.min_speech_frames {
            return 0.0;
        }

        let mut foreground_var = population_variance(&speech_probs);
        if self.is_transition_period() {
            // During transitions, recompute over the most recent speech
            // probabilities only.
            let recent: Vec<f64> = self
                .prob_buf
                .iter()
                .rev()
                .filter(|p| **p > self.cfg.speech_prob_threshold)
                .take(6)
                .copied()
                .collect();
            foreground_var = if recent.len() >= 3 {
                population_variance(&recent)
            } else {
                0.0
            };
        }
        foreground_var
    }

    fn boosted(&self, speech_prob: f64) -> f64 {
        if !self.in_early_phase {
            return speech_prob;
        }
        (speech_prob + self.cfg.early_prob_boost).min(1.0)
    }

    fn enter_threshold(&self) -> f64 {
        if self.in_early_phase {
            self.cfg.early_enter_thres
        } else {
            self.cfg.enter_thres
        }
    }

    /// Classify one window. Returns the corrected speech/silence decision.
    pub fn process_frame(&mut self, speech_prob: f64, frame_energy: f64) -> bool {
        self.update_energy_profile(frame_energy, speech_prob);

        let adjusted_prob = self.boosted(speech_prob);
        let snr = frame_energy / (self.noise_energy + 1e-6);
        let snr_n = self.clip_norm(snr, self.cfg.snr_clip.0, self.cfg.snr_clip.1);

        self.prob_buf.push_back(adjusted_prob);
        if self.prob_buf.len() > self.cfg.prob_window {
            self.prob_buf.pop_front();
        }

        let fg_var = self.foreground_variance();
        let fg_var_n = self.clip_norm(fg_var, self.cfg.var_clip.0, self.cfg.var_clip.1);

        let mut eng_n = if self.peak_energy > self.noise_energy {
            (frame_energy - self.noise_energy) / (self.peak_energy - self.noise_energy + 1e-6)
        } else if frame_energy > self.noise_energy {
            0.5
        } else {
            0.0
        };
        eng_n = eng_n.clamp(0.0, 1.0);

        let weight_sum = self.cfg.w_prob + self.cfg.w_snr + self.cfg.w_var + self.cfg.w_energy;
        let mut score = self.cfg.w_prob * adjusted_prob
            + self.cfg.w_snr * snr_n
            + self.cfg.w_var * fg_var_n
            + self.cfg.w_energy * eng_n;
        score /= if weight_sum > 0.0 { weight_sum } else { 1.0 };

        self.score_buf.push_back(score);
        if self.score_buf.len() > self.cfg.score_window {
            self.score_buf.pop_front();
        }

        let mean_score = mean(&self.score_buf);
        if !self.state && mean_score >= self.enter_threshold() {
            self.state = true;
        } else if self.state && mean_score <= self.cfg.exit_thres {
            self.state = false;
        }

        if self.in_early_phase {
            if self.state {
                self.in_early_phase = false;
            } else if self.early_phase_start_frame >= 0
                && self.frame_index >= self.early_phase_start_frame + self.cfg.early_phase_frames
            {
                self.in_early_phase = false;
            }
        }

        if self.cfg.debug {
            debug!(
                frame = self.frame_index,
                prob = speech_prob,
                score = mean_score,
                state = if self.state { "SPEECH" } else { "SILENCE" },
                "VAD correction frame"
            );
        }

        self.frame_index += 1;
        self.state
    }
}
