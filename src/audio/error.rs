use thiserror::Error;

/// Failures surfaced by the source adapters and the session controller.
///
/// Permission and setup errors abort the whole session; `NoAudioCaptured`
/// is the normal-but-unsuccessful outcome of a session that produced no
/// chunks from either source.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("microphone permission denied: {0}")]
    MicrophonePermissionDenied(String),

    #[error("system audio permission denied: {0}")]
    SystemAudioPermissionDenied(String),

    #[error("no system audio capture target available: {0}")]
    NoCaptureTargetAvailable(String),

    #[error("audio setup failed: {0}")]
    SetupFailed(String),

    #[error("no audio captured from any source")]
    NoAudioCaptured,
}

/// Platform-specific remediation hint appended to microphone permission errors.
pub(super) fn mic_permission_hint() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macOS: System Settings > Privacy & Security > Microphone (enable your terminal)."
    }
    #[cfg(target_os = "linux")]
    {
        "Linux: check PipeWire/PulseAudio permissions and ensure the device is not muted."
    }
    #[cfg(target_os = "windows")]
    {
        "Windows: Settings > Privacy & Security > Microphone (allow access)."
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        "Check OS microphone permissions."
    }
}

/// Remediation hint for system-audio capture failures.
pub(super) fn system_capture_hint() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macOS: install a loopback device (e.g. BlackHole) and grant Screen Recording permission."
    }
    #[cfg(target_os = "linux")]
    {
        "Linux: PulseAudio/PipeWire expose system output as a 'Monitor of ...' input source."
    }
    #[cfg(target_os = "windows")]
    {
        "Windows: enable 'Stereo Mix' or install a loopback driver."
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        "Install or enable a loopback audio device."
    }
}
