//! Command-line parsing and validation.

use crate::mode::RecordingMode;
use crate::transcribe::{default_thread_count, ModelKind, TranscribeOptions};
use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

const MAX_RECORD_SECONDS: u64 = 3_600;
const MAX_THREADS: usize = 64;
const MAX_EXTRA_DECODER_ARGS: usize = 32;

/// CLI options for dualscribe. Validated values keep the decoder
/// subprocess invocation safe.
#[derive(Debug, Parser, Clone)]
#[command(about = "Dual-source voice capture and transcription", author, version)]
pub struct AppConfig {
    /// Recording mode: plain (mic only) or meeting (mic + system audio)
    #[arg(long, value_enum, default_value_t = RecordingMode::Plain)]
    pub mode: RecordingMode,

    /// Whisper model tier
    #[arg(long, value_enum, default_value_t = ModelKind::Base)]
    pub model: ModelKind,

    /// Spoken language code, or "auto" for detection
    #[arg(long, default_value = "auto")]
    pub lang: String,

    /// Path to the whisper-cli decoder binary
    #[arg(long = "decoder-cmd", env = "DUALSCRIBE_DECODER", default_value = "whisper-cli")]
    pub decoder_cmd: PathBuf,

    /// Directory holding ggml model files
    #[arg(long = "models-dir", env = "DUALSCRIBE_MODELS_DIR", default_value = "models")]
    pub models_dir: PathBuf,

    /// Preferred microphone device name
    #[arg(long)]
    pub input_device: Option<String>,

    /// Preferred system-audio capture device name
    #[arg(long)]
    pub system_device: Option<String>,

    /// Print detected microphone devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Print detected system-audio capture devices and exit
    #[arg(long = "list-system-devices", default_value_t = false)]
    pub list_system_devices: bool,

    /// Recording duration in seconds; 0 records until Enter is pressed
    #[arg(long, default_value_t = 0)]
    pub seconds: u64,

    /// Force timestamped output regardless of mode
    #[arg(long, default_value_t = false)]
    pub timestamps: bool,

    /// Decoder threads; 0 picks a sensible default for this machine
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    /// Extra decoder arguments, shell-quoted in one string
    #[arg(long = "decoder-args", value_name = "ARGS", allow_hyphen_values = true)]
    pub decoder_args: Option<String>,

    /// Parsed form of --decoder-args, filled during validation
    #[arg(skip)]
    pub extra_decoder_args: Vec<String>,

    /// Emit the result as JSON on stdout
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Write the transcript to this file as well as stdout
    #[arg(long = "transcript-out", value_name = "PATH")]
    pub transcript_out: Option<PathBuf>,

    /// Enable verbose logging (same as DUALSCRIBE_LOG=debug)
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and expand quoted decoder arguments.
    pub fn validate(&mut self) -> Result<()> {
        if self.seconds > MAX_RECORD_SECONDS {
            bail!(
                "--seconds must be at most {MAX_RECORD_SECONDS}, got {}",
                self.seconds
            );
        }
        if self.threads > MAX_THREADS {
            bail!("--threads must be at most {MAX_THREADS}, got {}", self.threads);
        }
        if self.lang.is_empty()
            || !self
                .lang
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '-')
        {
            bail!(
                "--lang must be a lowercase language code or 'auto', got '{}'",
                self.lang
            );
        }

        if let Some(raw) = &self.decoder_args {
            let parsed = shell_words::split(raw)
                .map_err(|err| anyhow::anyhow!("--decoder-args is not valid shell quoting: {err}"))?;
            if parsed.len() > MAX_EXTRA_DECODER_ARGS {
                bail!(
                    "--decoder-args allows at most {MAX_EXTRA_DECODER_ARGS} arguments, got {}",
                    parsed.len()
                );
            }
            self.extra_decoder_args = parsed;
        }

        Ok(())
    }

    /// Thread count after resolving the 0 = auto sentinel.
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            default_thread_count()
        } else {
            self.threads
        }
    }

    /// Timestamps follow the mode's policy unless forced on the CLI.
    pub fn wants_timestamps(&self) -> bool {
        self.timestamps || self.mode.wants_timestamps()
    }

    pub fn transcribe_options(&self) -> TranscribeOptions {
        TranscribeOptions {
            model: self.model,
            language: self.lang.clone(),
            want_timestamps: self.wants_timestamps(),
            threads: self.effective_threads(),
            extra_args: self.extra_decoder_args.clone(),
        }
    }
}
