pub mod audio;
pub mod config;
pub mod container;
pub mod logging;
pub mod mode;
pub mod session;
pub mod transcribe;
pub mod worker;

pub use config::AppConfig;
pub use logging::init_logging;
pub use mode::RecordingMode;
pub use session::{MergedAudio, SessionController, SessionState};
pub use transcribe::{ModelKind, TranscribeOptions, Transcriber, TranscriptionResult};
pub use worker::{start_transcription_job, JobMessage, TranscribeJob};
