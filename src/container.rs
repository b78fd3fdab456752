//! Container encoding: merged PCM to an uncompressed IEEE-float WAV.
//!
//! The decoder subprocess consumes a file, so the merged samples are
//! serialized once per session into a mono 32-bit float container. The
//! header is fully determined by the payload length and format parameters;
//! no metadata chunks are written.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;

use crate::audio::{TARGET_CHANNELS, TARGET_RATE};

pub fn canonical_spec() -> WavSpec {
    WavSpec {
        channels: TARGET_CHANNELS,
        sample_rate: TARGET_RATE,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    }
}

/// Serialize samples into WAV container bytes. Deterministic: the same
/// samples and spec always produce identical bytes.
pub fn encode_wav(samples: &[f32], spec: WavSpec) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            WavWriter::new(&mut cursor, spec).context("failed to start WAV container")?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .context("failed to write WAV sample")?;
        }
        writer.finalize().context("failed to finalize WAV header")?;
    }
    Ok(cursor.into_inner())
}
