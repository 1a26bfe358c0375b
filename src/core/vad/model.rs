//! Silero VAD inference behind the `SpeechModel` port.
//!
//! The streaming processor only depends on the trait; tests substitute a
//! scripted model, production loads the Silero ONNX weights through `ort`.

use std::path::Path;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use ort::session::Session;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::value::Value;
use tracing::{debug, info};

use crate::errors::VadError;

/// Size of the recurrent state tensor: 2 * 1 * 128.
const STATE_SIZE: usize = 256;

/// Voice-activity inference over fixed windows of float PCM.
///
/// The caller owns the opaque recurrent state vector and threads it through
/// consecutive calls; a fresh vector comes from [`SpeechModel::initialize_state`].
pub trait SpeechModel: Send + Sync {
    fn sampling_rate(&self) -> u32;

    fn initialize_state(&self) -> Vec<f32>;

    /// Speech probability in [0, 1] for one window, updating `state` in place.
    fn get_speech_prob(&self, audio: &[f32], state: &mut Vec<f32>) -> Result<f32, VadError>;
}

/// Silero VAD ONNX model.
///
/// Input tensors: `input` `[1, N]`, optional `state` `[2, 1, 128]`, optional
/// `sr` `[1]`. Outputs: `output` (probability) and optional `stateN`.
pub struct SileroModel {
    session: Mutex<Session>,
    sampling_rate: u32,
    has_sr: bool,
    has_state: bool,
    has_state_out: bool,
}

impl SileroModel {
    pub fn load(model_path: &Path, sampling_rate: u32) -> Result<Self> {
        info!(path = %model_path.display(), sampling_rate, "Loading Silero VAD model");

        let session = SessionBuilder::new()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .with_inter_threads(1)?
            .commit_from_file(model_path)
            .context("Failed to load Silero VAD ONNX model")?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        debug!(?input_names, ?output_names, "Silero VAD model tensors");

        if !input_names.iter().any(|n| n == "input") {
            anyhow::bail!("VAD model missing input node 'input'");
        }
        if !output_names.iter().any(|n| n == "output") {
            anyhow::bail!("VAD model missing output node 'output'");
        }

        Ok(Self {
            has_sr: input_names.iter().any(|n| n == "sr"),
            has_state: input_names.iter().any(|n| n == "state"),
            has_state_out: output_names.iter().any(|n| n == "stateN"),
            session: Mutex::new(session),
            sampling_rate,
        })
    }
}

impl SpeechModel for SileroModel {
    fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    fn initialize_state(&self) -> Vec<f32> {
        if self.has_state {
            vec![0.0; STATE_SIZE]
        } else {
            Vec::new()
        }
    }

    fn get_speech_prob(&self, audio: &[f32], state: &mut Vec<f32>) -> Result<f32, VadError> {
        if audio.is_empty() {
            return Ok(0.0);
        }

        let mut session = self.session.lock();

        let input_value: Value = Value::from_array(([1usize, audio.len()], audio.to_vec()))
            .map_err(|e| VadError::Inference(format!("input tensor: {e}")))?
            .into();
        let mut inputs: Vec<(&str, Value)> = vec![("input", input_value)];

        if self.has_sr {
            let sr_value: Value = Value::from_array(([1usize], vec![self.sampling_rate as i64]))
                .map_err(|e| VadError::Inference(format!("sr tensor: {e}")))?
                .into();
            inputs.push(("sr", sr_value));
        }

        if self.has_state {
            let state_data = if state.len() == STATE_SIZE {
                state.clone()
            } else {
                vec![0.0; STATE_SIZE]
            };
            let state_value: Value = Value::from_array(([2usize, 1, 128], state_data))
                .map_err(|e| VadError::Inference(format!("state tensor: {e}")))?
                .into();
            inputs.push(("state", state_value));
        }

        let outputs = session
            .run(inputs)
            .map_err(|e| VadError::Inference(e.to_string()))?;

        let (_, output_data) = outputs
            .get("output")
            .ok_or_else(|| VadError::Inference("no 'output' tensor in results".into()))?
            .try_extract_raw_tensor::<f32>()
            .map_err(|e| VadError::Inference(format!("output tensor: {e}")))?;
        let prob = output_data.first().copied().unwrap_or(0.0);

        if self.has_state_out {
            if let Some(state_tensor) = outputs.get("stateN") {
                let (_, state_data) = state_tensor
                    .try_extract_raw_tensor::<f32>()
                    .map_err(|e| VadError::Inference(format!("stateN tensor: {e}")))?;
                if !state_data.is_empty() {
                    state.clear();
                    state.extend_from_slice(state_data);
                }
            }
        }

        Ok(prob)
    }
}
