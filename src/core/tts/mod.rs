//! Text-to-speech production pipeline.

pub mod pipeline;

pub use pipeline::{ReadyFn, ReadySignalFn, SynthFn, TtsPipeline};
