//! Voice activity detection: Silero ONNX inference, streaming segmentation,
//! and the optional dynamic correction stage.

pub mod assets;
pub mod correction;
pub mod model;
pub mod processor;

pub use correction::{CorrectionConfig, DynamicCorrection};
pub use model::{SileroModel, SpeechModel};
pub use processor::{StreamingVad, VadEvent, VadTuning};
