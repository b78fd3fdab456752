//! Dual-source audio capture pipeline.
//!
//! Two independently clocked producers (microphone and system/loopback
//! audio) deliver hardware buffers on their own callback threads. Each
//! buffer is converted to the canonical format (16 kHz mono f32) and
//! stamped with the seconds elapsed since the capture session started,
//! then funneled into one shared chunk sink. Chronological ordering
//! across the two sources is established later, at merge time.

/// Canonical sample rate all sources are converted to.
pub const TARGET_RATE: u32 = 16_000;

/// Canonical channel count (mono).
pub const TARGET_CHANNELS: u16 = 1;

mod chunk;
mod convert;
mod error;
mod mic;
mod system;
#[cfg(test)]
mod tests;

pub use chunk::{CaptureSource, ChunkSink, ChunkSource, TimestampedChunk};
pub use convert::FormatConverter;
pub use error::CaptureError;
pub use mic::MicrophoneSource;
pub use system::SystemAudioSource;
