//! Timestamped chunk types and the shared append path.
//!
//! Both source adapters push into one `ChunkSink` from their callback
//! threads. The sink is the single serialization point for the session's
//! chunk list; chunks are never mutated after append.

use super::CaptureError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Which producer a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkSource {
    Microphone,
    System,
}

impl ChunkSource {
    pub fn label(self) -> &'static str {
        match self {
            ChunkSource::Microphone => "microphone",
            ChunkSource::System => "system",
        }
    }
}

/// One converted buffer from a single source.
///
/// `timestamp` is seconds elapsed since session start, sampled on the
/// delivery thread when the buffer arrived. Timestamps are monotonically
/// non-decreasing per source but interleave arbitrarily between sources.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampedChunk {
    pub samples: Vec<f32>,
    pub timestamp: f64,
    pub source: ChunkSource,
}

/// Cloneable handle over the session's append-only chunk list.
///
/// Concurrent pushes from the microphone and system callbacks are expected;
/// the inner mutex is the one exclusive-access mechanism they share.
#[derive(Clone)]
pub struct ChunkSink {
    chunks: Arc<Mutex<Vec<TimestampedChunk>>>,
    dropped: Arc<AtomicUsize>,
    observer: Option<Arc<dyn Fn(&TimestampedChunk) + Send + Sync>>,
}

impl ChunkSink {
    pub fn new() -> Self {
        Self {
            chunks: Arc::new(Mutex::new(Vec::new())),
            dropped: Arc::new(AtomicUsize::new(0)),
            observer: None,
        }
    }

    /// A handle over the same chunk list that additionally invokes
    /// `observer` on every push. The system adapter uses this to keep its
    /// own authoritative copy alongside the incremental delivery path.
    pub fn with_observer(
        base: ChunkSink,
        observer: impl Fn(&TimestampedChunk) + Send + Sync + 'static,
    ) -> Self {
        Self {
            chunks: base.chunks,
            dropped: base.dropped,
            observer: Some(Arc::new(observer)),
        }
    }

    pub fn push(&self, chunk: TimestampedChunk) {
        if let Some(observer) = &self.observer {
            observer(&chunk);
        }
        let mut chunks = self
            .chunks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        chunks.push(chunk);
    }

    /// Record a buffer that could not be converted and was dropped.
    pub fn note_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.chunks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the accumulated chunks. Only called once every producer has
    /// fully quiesced, so no append can race with the read.
    pub fn drain(&self) -> Vec<TimestampedChunk> {
        let mut chunks = self
            .chunks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *chunks)
    }
}

impl Default for ChunkSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability shared by the microphone and system-audio adapters.
///
/// `start` wires the producer to the sink and returns once capture is
/// confirmed running. `stop` is idempotent and must fully quiesce the
/// underlying stream before returning; its return value is the adapter's
/// authoritative set of late chunks (empty for adapters that deliver
/// everything incrementally).
pub trait CaptureSource {
    fn source(&self) -> ChunkSource;

    fn start(&mut self, session_start: Instant, sink: ChunkSink) -> Result<(), CaptureError>;

    fn stop(&mut self) -> Vec<TimestampedChunk>;
}
