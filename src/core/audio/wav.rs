//! WAV encoding of captured float PCM.
//!
//! Speech slices leave the VAD as `f32` sample vectors in [-1, 1]. The
//! backend `/transcribe` endpoint takes a mono 16-bit RIFF/WAVE blob, so we
//! quantize and wrap here.

use std::io::Cursor;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

/// Encode mono float samples as a 16-bit little-endian PCM WAV blob.
///
/// Samples are clamped to [-1, 1] before scaling to `i16::MAX`.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
        for &sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            writer
                .write_sample((clamped * i16::MAX as f32) as i16)
                .context("Failed to write WAV sample")?;
        }
        writer.finalize().context("Failed to finalize WAV blob")?;
    }
    Ok(cursor.into_inner())
}

/// Decode a mono 16-bit WAV blob back into float samples.
///
/// Used by tests and by the recording inspection tooling.
pub fn decode_wav(blob: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader = WavReader::new(Cursor::new(blob)).context("Failed to parse WAV blob")?;
    let sample_rate = reader.spec().sample_rate;
    let samples: Result<Vec<f32>, _> = reader
        .into_samples::<i16>()
        .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
        .collect();
    Ok((samples.context("Failed to read WAV samples")?, sample_rate))
}
