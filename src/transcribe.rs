//! Transcription process orchestration.
//!
//! Writes the encoded container to a uniquely-named temporary file, runs
//! the external whisper-cli decoder against it, and turns the decoder's
//! semi-structured stdout into a clean transcript. The temporary file is
//! removed on every exit path. Decoder and model presence are verified
//! before the process is spawned so missing assets surface as precise
//! request-time errors instead of opaque exit codes.

use clap::ValueEnum;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// The decoder prints this token when it detects pure silence.
const BLANK_AUDIO_MARKER: &str = "[BLANK_AUDIO]";

/// stdout lines starting with these prefixes are decoder diagnostics.
const DIAGNOSTIC_PREFIXES: &[&str] = &["whisper_", "ggml_", "main:", "system_info"];

/// Quality/speed tiers mapping to bundled ggml model files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelKind {
    pub fn file_name(self) -> &'static str {
        match self {
            ModelKind::Tiny => "ggml-tiny.bin",
            ModelKind::Base => "ggml-base.bin",
            ModelKind::Small => "ggml-small.bin",
            ModelKind::Medium => "ggml-medium.bin",
            ModelKind::Large => "ggml-large-v3.bin",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ModelKind::Tiny => "tiny",
            ModelKind::Base => "base",
            ModelKind::Small => "small",
            ModelKind::Medium => "medium",
            ModelKind::Large => "large",
        }
    }
}

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("decoder binary not found: {0}")]
    MissingBinary(PathBuf),

    #[error("model '{name}' not found (looked for {path})")]
    ModelNotFound { name: String, path: PathBuf },

    #[error("decoder I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("decoder failed: {0}")]
    ProcessError(String),

    #[error("decoder produced no text")]
    EmptyTranscription,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub timestamps_included: bool,
}

/// Per-request knobs; passed explicitly, never read from global state.
#[derive(Debug, Clone)]
pub struct TranscribeOptions {
    pub model: ModelKind,
    pub language: String,
    pub want_timestamps: bool,
    pub threads: usize,
    /// Extra decoder arguments appended verbatim after the built-in set.
    pub extra_args: Vec<String>,
}

impl TranscribeOptions {
    pub fn new(model: ModelKind, language: impl Into<String>, want_timestamps: bool) -> Self {
        Self {
            model,
            language: language.into(),
            want_timestamps,
            threads: default_thread_count(),
            extra_args: Vec::new(),
        }
    }
}

/// Cap decoder threads so laptops don't max out every core.
pub fn default_thread_count() -> usize {
    num_cpus::get().min(8)
}

/// Orchestrates one decoder subprocess per request.
pub struct Transcriber {
    decoder_path: PathBuf,
    models_dir: PathBuf,
}

impl Transcriber {
    pub fn new(decoder_path: PathBuf, models_dir: PathBuf) -> Self {
        Self {
            decoder_path,
            models_dir,
        }
    }

    /// Run the decoder over encoded container bytes.
    ///
    /// Blocking; callers that must stay responsive run this on a worker
    /// thread (see `worker::start_transcription_job`).
    pub fn transcribe(
        &self,
        wav_bytes: &[u8],
        opts: &TranscribeOptions,
    ) -> Result<TranscriptionResult, TranscriptionError> {
        if !self.decoder_path.is_file() {
            return Err(TranscriptionError::MissingBinary(self.decoder_path.clone()));
        }
        let model_path = self.models_dir.join(opts.model.file_name());
        if !model_path.is_file() {
            return Err(TranscriptionError::ModelNotFound {
                name: opts.model.label().to_string(),
                path: model_path,
            });
        }

        // Guard deletes the file on every return path below.
        let audio = TempWav::create(wav_bytes)?;

        let mut args = build_decoder_args(
            &model_path,
            audio.path(),
            &opts.language,
            opts.want_timestamps,
            opts.threads,
        );
        args.extend(opts.extra_args.iter().cloned());

        tracing::debug!(decoder = %self.decoder_path.display(), ?args, "spawning decoder");
        let output = Command::new(&self.decoder_path).args(&args).output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if stderr.is_empty() {
                format!("exit status {}", output.status)
            } else {
                stderr
            };
            return Err(TranscriptionError::ProcessError(detail));
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        finish_transcription(&raw, opts.want_timestamps)
    }
}

/// Turn raw decoder stdout into the final result. Split out of
/// `transcribe` so output handling is testable without a subprocess.
fn finish_transcription(
    raw: &str,
    want_timestamps: bool,
) -> Result<TranscriptionResult, TranscriptionError> {
    let cleaned = clean_decoder_output(raw);
    let heard_silence = cleaned.contains(BLANK_AUDIO_MARKER);
    let text = cleaned.replace(BLANK_AUDIO_MARKER, " ");
    let text = collapse_whitespace(&text);

    if text.is_empty() {
        if heard_silence {
            // The decoder positively reported silence; that is a
            // successful empty transcription, not a failure.
            return Ok(TranscriptionResult {
                text: String::new(),
                timestamps_included: false,
            });
        }
        return Err(TranscriptionError::EmptyTranscription);
    }

    if want_timestamps {
        let reflowed = reflow_timestamps(&text);
        let timestamps_included = reflowed != text;
        return Ok(TranscriptionResult {
            text: reflowed,
            timestamps_included,
        });
    }

    Ok(TranscriptionResult {
        text,
        timestamps_included: false,
    })
}

/// Decoder argument vector. Pure so the subprocess contract is testable
/// without spawning anything. Flags match whisper-cli exactly: `-np`
/// suppresses diagnostics, `-nt` suppresses timestamps (only passed when
/// timestamps were not requested).
pub fn build_decoder_args(
    model_path: &Path,
    audio_path: &Path,
    language: &str,
    want_timestamps: bool,
    threads: usize,
) -> Vec<String> {
    let mut args = vec![
        "-m".to_string(),
        model_path.to_string_lossy().into_owned(),
        "-f".to_string(),
        audio_path.to_string_lossy().into_owned(),
        "-l".to_string(),
        language.to_string(),
        "-t".to_string(),
        threads.max(1).to_string(),
        "-np".to_string(),
    ];
    if !want_timestamps {
        args.push("-nt".to_string());
    }
    args
}

/// Strip ANSI escapes and decoder-internal diagnostic lines.
fn clean_decoder_output(raw: &str) -> String {
    let stripped = strip_ansi_escapes::strip(raw.as_bytes());
    let plain = String::from_utf8_lossy(&stripped);
    plain
        .lines()
        .filter(|line| !is_diagnostic_line(line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_diagnostic_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    DIAGNOSTIC_PREFIXES
        .iter()
        .any(|prefix| trimmed.starts_with(prefix))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn timestamp_range_re() -> &'static Regex {
    static RANGE_RE: OnceLock<Regex> = OnceLock::new();
    RANGE_RE.get_or_init(|| {
        Regex::new(r"\[(\d{2}:\d{2}:\d{2}[.,]\d{3})\s*-->\s*(\d{2}:\d{2}:\d{2}[.,]\d{3})\]")
            .expect("timestamp range regex should compile")
    })
}

/// Re-emit each spoken segment on its own line under its time-range
/// marker, turning one unbroken decoder line into a readable transcript:
///
/// ```text
/// [00:00:00.000 --> 00:00:02.500]
/// hello there
/// ```
fn reflow_timestamps(text: &str) -> String {
    let re = timestamp_range_re();
    let matches: Vec<_> = re.find_iter(text).collect();
    if matches.is_empty() {
        return text.to_string();
    }

    let mut out = String::new();
    for (i, marker) in matches.iter().enumerate() {
        let segment_end = matches
            .get(i + 1)
            .map(|next| next.start())
            .unwrap_or(text.len());
        let segment = text[marker.end()..segment_end].trim();
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(marker.as_str());
        if !segment.is_empty() {
            out.push('\n');
            out.push_str(segment);
        }
    }
    out
}

/// Uniquely-named temporary WAV, deleted on drop.
struct TempWav {
    path: PathBuf,
}

impl TempWav {
    fn create(bytes: &[u8]) -> std::io::Result<Self> {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        let path = std::env::temp_dir().join(format!(
            "dualscribe-{}-{}-{}.wav",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed),
            nanos
        ));
        std::fs::write(&path, bytes)?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempWav {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), "temp WAV cleanup failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_args_suppress_timestamps_by_default() {
        let args = build_decoder_args(
            Path::new("/models/ggml-base.bin"),
            Path::new("/tmp/a.wav"),
            "en",
            false,
            4,
        );
        assert_eq!(
            args,
            vec![
                "-m",
                "/models/ggml-base.bin",
                "-f",
                "/tmp/a.wav",
                "-l",
                "en",
                "-t",
                "4",
                "-np",
                "-nt",
            ]
        );
    }

    #[test]
    fn decoder_args_request_timestamps_when_wanted() {
        let args = build_decoder_args(
            Path::new("/models/ggml-tiny.bin"),
            Path::new("/tmp/a.wav"),
            "auto",
            true,
            1,
        );
        assert!(!args.contains(&"-nt".to_string()));
        assert!(args.contains(&"-np".to_string()));
    }

    #[test]
    fn cleaning_drops_diagnostics_and_ansi_escapes() {
        let raw = "whisper_init_from_file: loading model\n\
                   ggml_metal_init: found device\n\
                   main: processing audio\n\
                   system_info: n_threads = 4\n\
                   \x1b[32mhello\x1b[0m world\n";
        let result = finish_transcription(raw, false).unwrap();
        assert_eq!(result.text, "hello world");
        assert!(!result.timestamps_included);
    }

    #[test]
    fn blank_audio_marker_is_successful_silence() {
        let result = finish_transcription("[BLANK_AUDIO]\n", false).unwrap();
        assert_eq!(result.text, "");
        assert!(!result.timestamps_included);
    }

    #[test]
    fn empty_output_without_marker_is_an_error() {
        let err = finish_transcription("whisper_init: done\n", false).unwrap_err();
        assert!(matches!(err, TranscriptionError::EmptyTranscription));
    }

    #[test]
    fn timestamped_output_reflows_each_segment() {
        let raw = "[00:00:00.000 --> 00:00:02.000] hello there \
                   [00:00:02.000 --> 00:00:04.500] second segment";
        let result = finish_transcription(raw, true).unwrap();
        assert!(result.timestamps_included);
        assert_eq!(
            result.text,
            "[00:00:00.000 --> 00:00:02.000]\nhello there\n\
             [00:00:02.000 --> 00:00:04.500]\nsecond segment"
        );
    }

    #[test]
    fn plain_text_with_timestamps_requested_stays_intact() {
        let result = finish_transcription("no markers here", true).unwrap();
        assert_eq!(result.text, "no markers here");
        assert!(!result.timestamps_included);
    }

    #[test]
    fn model_files_map_to_ggml_names() {
        assert_eq!(ModelKind::Tiny.file_name(), "ggml-tiny.bin");
        assert_eq!(ModelKind::Large.file_name(), "ggml-large-v3.bin");
    }

    #[test]
    fn temp_wav_is_deleted_on_drop() {
        let path = {
            let wav = TempWav::create(b"RIFF").unwrap();
            assert!(wav.path().is_file());
            wav.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn missing_binary_fails_before_spawn() {
        let transcriber = Transcriber::new(
            PathBuf::from("/no/such/decoder"),
            std::env::temp_dir(),
        );
        let opts = TranscribeOptions::new(ModelKind::Tiny, "en", false);
        let err = transcriber.transcribe(b"", &opts).unwrap_err();
        assert!(matches!(err, TranscriptionError::MissingBinary(_)));
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        /// Drop-cleaned fixture: a fake decoder script plus a dummy model
        /// file in a private directory.
        struct FakeDecoder {
            dir: PathBuf,
        }

        impl FakeDecoder {
            fn new(name: &str, script: &str) -> Self {
                let dir = std::env::temp_dir().join(format!(
                    "dualscribe-test-{}-{name}",
                    std::process::id()
                ));
                fs::create_dir_all(&dir).unwrap();
                let decoder = dir.join("decoder.sh");
                fs::write(&decoder, format!("#!/bin/sh\n{script}\n")).unwrap();
                fs::set_permissions(&decoder, fs::Permissions::from_mode(0o755)).unwrap();
                fs::write(dir.join(ModelKind::Tiny.file_name()), b"stub").unwrap();
                Self { dir }
            }

            fn transcriber(&self) -> Transcriber {
                Transcriber::new(self.dir.join("decoder.sh"), self.dir.clone())
            }
        }

        impl Drop for FakeDecoder {
            fn drop(&mut self) {
                let _ = fs::remove_dir_all(&self.dir);
            }
        }

        fn opts() -> TranscribeOptions {
            TranscribeOptions::new(ModelKind::Tiny, "en", false)
        }

        #[test]
        fn successful_decode_returns_cleaned_text() {
            let fake = FakeDecoder::new("ok", "echo ' hello   from decoder '");
            let result = fake.transcriber().transcribe(b"RIFF", &opts()).unwrap();
            assert_eq!(result.text, "hello from decoder");
        }

        #[test]
        fn blank_audio_resolves_to_empty_success() {
            let fake = FakeDecoder::new("blank", "echo '[BLANK_AUDIO]'");
            let result = fake.transcriber().transcribe(b"RIFF", &opts()).unwrap();
            assert_eq!(result.text, "");
        }

        #[test]
        fn nonzero_exit_surfaces_stderr_as_process_error() {
            let fake = FakeDecoder::new("fail", "echo 'model load failed' >&2; exit 1");
            let err = fake.transcriber().transcribe(b"RIFF", &opts()).unwrap_err();
            match err {
                TranscriptionError::ProcessError(detail) => {
                    assert_eq!(detail, "model load failed");
                }
                other => panic!("expected ProcessError, got {other:?}"),
            }
        }

        #[test]
        fn missing_model_fails_before_spawn() {
            let fake = FakeDecoder::new("nomodel", "echo unused");
            let opts = TranscribeOptions::new(ModelKind::Large, "en", false);
            let err = fake.transcriber().transcribe(b"RIFF", &opts).unwrap_err();
            match err {
                TranscriptionError::ModelNotFound { name, .. } => assert_eq!(name, "large"),
                other => panic!("expected ModelNotFound, got {other:?}"),
            }
        }

        #[test]
        fn temp_file_is_cleaned_up_on_success_and_failure() {
            // The input file path is argv[4] (-f <path>); the script
            // records it so the test can check it was removed.
            let fake = FakeDecoder::new("cleanup", "echo \"$4\" > \"$(dirname \"$0\")/seen\"; echo hi");
            let transcriber = fake.transcriber();
            transcriber.transcribe(b"RIFF", &opts()).unwrap();
            let seen = fs::read_to_string(fake.dir.join("seen")).unwrap();
            let temp_path = PathBuf::from(seen.trim());
            assert!(!temp_path.exists(), "temp WAV should be deleted");

            let failing = FakeDecoder::new("cleanup2", "echo \"$4\" > \"$(dirname \"$0\")/seen\"; exit 1");
            let transcriber = failing.transcriber();
            let _ = transcriber.transcribe(b"RIFF", &opts()).unwrap_err();
            let seen = fs::read_to_string(failing.dir.join("seen")).unwrap();
            let temp_path = PathBuf::from(seen.trim());
            assert!(!temp_path.exists(), "temp WAV should be deleted on failure too");
        }
    }
}
