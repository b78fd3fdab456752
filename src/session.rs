//! Capture session lifecycle and the chronological merge.
//!
//! One controller owns both source adapters and at most one live session.
//! State transitions happen on the controller's owner thread only; chunk
//! appends happen on the adapters' callback threads through the shared
//! sink. The merge runs strictly after every adapter has quiesced.

use crate::audio::{
    CaptureError, CaptureSource, ChunkSink, ChunkSource, MicrophoneSource, SystemAudioSource,
    TimestampedChunk,
};
use crate::mode::RecordingMode;
use std::cmp::Ordering;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
    Finalizing,
    Complete,
    Failed,
}

impl SessionState {
    pub fn label(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Capturing => "capturing",
            SessionState::Finalizing => "finalizing",
            SessionState::Complete => "complete",
            SessionState::Failed => "failed",
        }
    }
}

/// One recording lifecycle. Created on start, replaced by the next start.
struct CaptureSession {
    id: u64,
    mode: RecordingMode,
    started_at: Instant,
    sink: ChunkSink,
    state: SessionState,
}

/// Output of the chronological merge: one canonical-format buffer plus
/// per-source chunk counts so callers can detect degraded dual captures.
#[derive(Debug, Clone)]
pub struct MergedAudio {
    pub samples: Vec<f32>,
    pub mode: RecordingMode,
    pub mic_chunks: usize,
    pub system_chunks: usize,
}

impl MergedAudio {
    /// True when a dual-source session got audio from only one source.
    /// The session still completes; callers decide how loudly to flag it.
    pub fn is_partial(&self) -> bool {
        self.mode.is_dual_source() && (self.mic_chunks == 0 || self.system_chunks == 0)
    }

    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        self.samples.len() as f64 / f64::from(sample_rate.max(1))
    }
}

pub struct SessionController {
    mic: Box<dyn CaptureSource>,
    system: Box<dyn CaptureSource>,
    session: Option<CaptureSession>,
    next_id: u64,
}

impl SessionController {
    pub fn new(mic: MicrophoneSource, system: SystemAudioSource) -> Self {
        Self::with_sources(Box::new(mic), Box::new(system))
    }

    /// Adapter-injection constructor; tests pass fake sources.
    pub fn with_sources(mic: Box<dyn CaptureSource>, system: Box<dyn CaptureSource>) -> Self {
        Self {
            mic,
            system,
            session: None,
            next_id: 1,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle)
    }

    pub fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Start a new session. Returns `Ok(false)` as a benign no-op when a
    /// session is already capturing or finalizing (fast repeated input is
    /// a race, not an error). Adapter failures fail the whole session; in
    /// dual-source mode a system-audio start failure rolls back an
    /// already-started microphone rather than degrading silently.
    pub fn start_recording(&mut self, mode: RecordingMode) -> Result<bool, CaptureError> {
        match self.state() {
            SessionState::Capturing | SessionState::Finalizing => {
                tracing::debug!(state = self.state().label(), "start_recording ignored");
                return Ok(false);
            }
            SessionState::Idle | SessionState::Complete | SessionState::Failed => {}
        }

        let id = self.next_id;
        self.next_id += 1;
        let sink = ChunkSink::new();
        let started_at = Instant::now();
        let mut session = CaptureSession {
            id,
            mode,
            started_at,
            sink: sink.clone(),
            state: SessionState::Capturing,
        };
        tracing::info!(id, mode = mode.label(), "starting capture session");

        if let Err(err) = self.mic.start(started_at, sink.clone()) {
            session.state = SessionState::Failed;
            self.session = Some(session);
            return Err(err);
        }

        if mode.is_dual_source() {
            if let Err(err) = self.system.start(started_at, sink) {
                // Never leave a half-started dual session running.
                let _ = self.mic.stop();
                session.state = SessionState::Failed;
                self.session = Some(session);
                return Err(err);
            }
        }

        self.session = Some(session);
        Ok(true)
    }

    /// Stop the live session, quiesce all adapters, and merge.
    ///
    /// Returns `Ok(None)` as a benign no-op when nothing is capturing.
    /// `NoAudioCaptured` is returned when neither source produced a chunk;
    /// a dual-source session with only one contributing source still
    /// merges whatever exists.
    pub fn stop_recording(&mut self) -> Result<Option<MergedAudio>, CaptureError> {
        if self.state() != SessionState::Capturing {
            tracing::debug!(state = self.state().label(), "stop_recording ignored");
            return Ok(None);
        }
        let session = self.session.as_mut().expect("capturing implies a session");
        session.state = SessionState::Finalizing;
        let mode = session.mode;
        let id = session.id;

        // Quiesce order: every stream must confirm teardown before the
        // chunk list is read, so no append can race the merge.
        let _ = self.mic.stop();
        let system_tail = if mode.is_dual_source() {
            self.system.stop()
        } else {
            Vec::new()
        };

        let session = self.session.as_mut().expect("still finalizing");
        let mut chunks = session.sink.drain();
        reconcile_tail(&mut chunks, system_tail);

        let dropped = session.sink.dropped();
        if dropped > 0 {
            tracing::warn!(id, dropped, "buffers dropped during capture");
        }

        let merged = merge_chronologically(chunks, mode);
        if merged.samples.is_empty() {
            session.state = SessionState::Failed;
            tracing::info!(id, "session produced no audio");
            return Err(CaptureError::NoAudioCaptured);
        }

        session.state = SessionState::Complete;
        if merged.is_partial() {
            tracing::warn!(
                id,
                mic_chunks = merged.mic_chunks,
                system_chunks = merged.system_chunks,
                "dual-source session completed with only one contributing source"
            );
        }
        tracing::info!(
            id,
            samples = merged.samples.len(),
            mic_chunks = merged.mic_chunks,
            system_chunks = merged.system_chunks,
            "capture session complete"
        );
        Ok(Some(merged))
    }

    /// Seconds elapsed in the live session, for UI/progress display.
    pub fn elapsed_secs(&self) -> Option<f64> {
        let session = self.session.as_ref()?;
        matches!(session.state, SessionState::Capturing)
            .then(|| session.started_at.elapsed().as_secs_f64())
    }
}

/// Append chunks from the system adapter's stop() handoff that were not
/// already delivered incrementally. Identity is full chunk equality
/// (source, timestamp, payload), so a re-delivered tail never duplicates.
fn reconcile_tail(chunks: &mut Vec<TimestampedChunk>, tail: Vec<TimestampedChunk>) {
    for chunk in tail {
        if !chunks.iter().any(|existing| *existing == chunk) {
            chunks.push(chunk);
        }
    }
}

/// Stable-sort all chunks by timestamp and concatenate the payloads.
/// Equal timestamps keep their arrival order into the shared list.
fn merge_chronologically(mut chunks: Vec<TimestampedChunk>, mode: RecordingMode) -> MergedAudio {
    chunks.sort_by(|a, b| {
        a.timestamp
            .partial_cmp(&b.timestamp)
            .unwrap_or(Ordering::Equal)
    });

    let mic_chunks = chunks
        .iter()
        .filter(|c| c.source == ChunkSource::Microphone)
        .count();
    let system_chunks = chunks.len() - mic_chunks;
    let total: usize = chunks.iter().map(|c| c.samples.len()).sum();
    let mut samples = Vec::with_capacity(total);
    for chunk in chunks {
        samples.extend(chunk.samples);
    }

    MergedAudio {
        samples,
        mode,
        mic_chunks,
        system_chunks,
    }
}
