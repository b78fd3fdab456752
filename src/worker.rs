//! Background worker that encodes merged audio and runs transcription.
//! Decoding can take several seconds, so it happens off the calling
//! thread and reports back exactly one message.

use crate::container;
use crate::session::MergedAudio;
use crate::transcribe::{TranscribeOptions, Transcriber, TranscriptionError, TranscriptionResult};
use crossbeam_channel::{bounded, Receiver};
use std::thread;

/// Handle the caller uses to wait on the worker thread.
pub struct TranscribeJob {
    pub receiver: Receiver<JobMessage>,
    pub handle: Option<thread::JoinHandle<()>>,
}

impl TranscribeJob {
    /// Block until the worker finishes and return its single message.
    pub fn wait(mut self) -> JobMessage {
        let message = self.receiver.recv().unwrap_or_else(|_| {
            JobMessage::Error(TranscriptionError::ProcessError(
                "transcription worker terminated unexpectedly".to_string(),
            ))
        });
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        message
    }
}

/// Messages sent from the worker back to the caller.
#[derive(Debug)]
pub enum JobMessage {
    Transcript {
        result: TranscriptionResult,
        /// One of two requested sources stopped delivering mid-session.
        partial_capture: bool,
    },
    Empty {
        partial_capture: bool,
    },
    Error(TranscriptionError),
}

/// Spawn a worker thread that encodes `merged` and runs the decoder.
pub fn start_transcription_job(
    transcriber: Transcriber,
    merged: MergedAudio,
    opts: TranscribeOptions,
) -> TranscribeJob {
    let (tx, rx) = bounded(1);

    let handle = thread::spawn(move || {
        let message = perform_transcription(&transcriber, &merged, &opts);
        let _ = tx.send(message);
    });

    TranscribeJob {
        receiver: rx,
        handle: Some(handle),
    }
}

fn perform_transcription(
    transcriber: &Transcriber,
    merged: &MergedAudio,
    opts: &TranscribeOptions,
) -> JobMessage {
    let partial_capture = merged.is_partial();

    let wav = match container::encode_wav(&merged.samples, container::canonical_spec()) {
        Ok(bytes) => bytes,
        Err(err) => {
            return JobMessage::Error(TranscriptionError::ProcessError(format!(
                "container encoding failed: {err:#}"
            )))
        }
    };

    tracing::debug!(
        samples = merged.samples.len(),
        duration_secs = merged.duration_secs(crate::audio::TARGET_RATE),
        partial_capture,
        "submitting audio to decoder"
    );

    match transcriber.transcribe(&wav, opts) {
        Ok(result) if result.text.is_empty() => JobMessage::Empty { partial_capture },
        Ok(result) => JobMessage::Transcript {
            result,
            partial_capture,
        },
        Err(err) => JobMessage::Error(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::RecordingMode;
    use crate::transcribe::ModelKind;
    use std::path::PathBuf;

    fn merged(samples: Vec<f32>) -> MergedAudio {
        MergedAudio {
            samples,
            mode: RecordingMode::Plain,
            mic_chunks: 1,
            system_chunks: 0,
        }
    }

    #[test]
    fn job_reports_decoder_setup_errors() {
        let transcriber = Transcriber::new(PathBuf::from("/no/such/decoder"), PathBuf::from("/"));
        let opts = TranscribeOptions::new(ModelKind::Tiny, "en", false);
        let job = start_transcription_job(transcriber, merged(vec![0.0; 160]), opts);
        match job.wait() {
            JobMessage::Error(TranscriptionError::MissingBinary(path)) => {
                assert_eq!(path, PathBuf::from("/no/such/decoder"));
            }
            other => panic!("expected MissingBinary, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn job_delivers_transcript_from_decoder() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("dualscribe-worker-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let decoder = dir.join("decoder.sh");
        fs::write(&decoder, "#!/bin/sh\necho 'worker says hi'\n").unwrap();
        fs::set_permissions(&decoder, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(dir.join(ModelKind::Tiny.file_name()), b"stub").unwrap();

        let transcriber = Transcriber::new(decoder, dir.clone());
        let opts = TranscribeOptions::new(ModelKind::Tiny, "en", false);
        let job = start_transcription_job(transcriber, merged(vec![0.25; 1600]), opts);
        match job.wait() {
            JobMessage::Transcript {
                result,
                partial_capture,
            } => {
                assert_eq!(result.text, "worker says hi");
                assert!(!partial_capture);
            }
            other => panic!("expected Transcript, got {other:?}"),
        }

        let _ = fs::remove_dir_all(&dir);
    }
}
