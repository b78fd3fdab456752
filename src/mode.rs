//! Recording mode policy: maps user intent to the source adapters a
//! session must activate and whether the decoder should emit timestamps.

use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    /// Microphone only; single-line transcript for dictation.
    Plain,
    /// Microphone plus system audio; timestamped meeting transcript.
    Meeting,
}

impl RecordingMode {
    pub fn label(self) -> &'static str {
        match self {
            RecordingMode::Plain => "plain",
            RecordingMode::Meeting => "meeting",
        }
    }

    /// Whether the session must also capture system audio.
    pub fn is_dual_source(self) -> bool {
        matches!(self, RecordingMode::Meeting)
    }

    /// Whether the decoder is asked for per-segment timestamps.
    pub fn wants_timestamps(self) -> bool {
        matches!(self, RecordingMode::Meeting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_mode_is_microphone_only_without_timestamps() {
        assert!(!RecordingMode::Plain.is_dual_source());
        assert!(!RecordingMode::Plain.wants_timestamps());
    }

    #[test]
    fn meeting_mode_activates_both_sources_and_timestamps() {
        assert!(RecordingMode::Meeting.is_dual_source());
        assert!(RecordingMode::Meeting.wants_timestamps());
    }
}
