//! Microphone source adapter built on CPAL.
//!
//! Opens a continuous input stream at the device's native format. Every
//! hardware buffer is converted to the canonical format on the callback
//! thread, stamped relative to session start, and pushed to the shared
//! sink. Data is delivered incrementally only; `stop` returns nothing.

use super::chunk::{CaptureSource, ChunkSink, ChunkSource, TimestampedChunk};
use super::error::mic_permission_hint;
use super::{CaptureError, FormatConverter};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleFormat, StreamConfig};
use std::time::Instant;

pub struct MicrophoneSource {
    preferred: Option<String>,
    stream: Option<cpal::Stream>,
    active_device: Option<String>,
}

impl MicrophoneSource {
    pub fn new(preferred: Option<String>) -> Self {
        Self {
            preferred,
            stream: None,
            active_device: None,
        }
    }

    /// Input device names, for the CLI's device selector.
    pub fn list_devices() -> Result<Vec<String>, CaptureError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|err| CaptureError::SetupFailed(format!("cannot list input devices: {err}")))?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    /// Name of the device this adapter will open (used by the system
    /// adapter to exclude the microphone from loopback discovery).
    pub fn resolved_device_name(&self) -> Option<String> {
        if self.preferred.is_some() {
            return self.preferred.clone();
        }
        cpal::default_host()
            .default_input_device()
            .and_then(|d| d.name().ok())
    }

    fn open_device(&self) -> Result<cpal::Device, CaptureError> {
        let host = cpal::default_host();
        match &self.preferred {
            Some(name) => {
                let mut devices = host.input_devices().map_err(|err| {
                    CaptureError::SetupFailed(format!("cannot list input devices: {err}"))
                })?;
                devices
                    .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                    .ok_or_else(|| {
                        CaptureError::SetupFailed(format!("input device '{name}' not found"))
                    })
            }
            None => host.default_input_device().ok_or_else(|| {
                CaptureError::MicrophonePermissionDenied(format!(
                    "no default input device. {}",
                    mic_permission_hint()
                ))
            }),
        }
    }
}

impl CaptureSource for MicrophoneSource {
    fn source(&self) -> ChunkSource {
        ChunkSource::Microphone
    }

    fn start(&mut self, session_start: Instant, sink: ChunkSink) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let device = self.open_device()?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let supported = device.default_input_config().map_err(|err| {
            CaptureError::SetupFailed(format!("cannot query '{device_name}' config: {err}"))
        })?;
        let format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let native_rate = config.sample_rate.0;
        let channels = usize::from(config.channels.max(1));

        tracing::debug!(
            device = %device_name,
            ?format,
            native_rate,
            channels,
            "starting microphone stream"
        );

        let stream = build_converted_stream(
            &device,
            &config,
            format,
            FormatConverter::new(native_rate, channels),
            ChunkSource::Microphone,
            session_start,
            sink,
        )
        .map_err(|err| classify_mic_error(&device_name, err))?;

        stream.play().map_err(|err| {
            CaptureError::SetupFailed(format!("cannot start '{device_name}' stream: {err}"))
        })?;

        self.active_device = Some(device_name);
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) -> Vec<TimestampedChunk> {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                tracing::debug!("failed to pause microphone stream: {err}");
            }
            drop(stream);
            tracing::debug!(device = ?self.active_device, "microphone stream stopped");
        }
        self.active_device = None;
        Vec::new()
    }
}

fn classify_mic_error(device_name: &str, err: BuildStreamError) -> CaptureError {
    match err {
        BuildStreamError::DeviceNotAvailable => CaptureError::MicrophonePermissionDenied(format!(
            "'{device_name}' is not available. {}",
            mic_permission_hint()
        )),
        other => CaptureError::SetupFailed(format!("cannot open '{device_name}': {other}")),
    }
}

/// Build an input stream that converts every supported sample type to the
/// canonical format and pushes timestamped chunks to the sink. Shared by
/// both adapters so the format match arms live in one place.
pub(super) fn build_converted_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SampleFormat,
    converter: FormatConverter,
    source: ChunkSource,
    session_start: Instant,
    sink: ChunkSink,
) -> Result<cpal::Stream, BuildStreamError> {
    let err_fn = move |err| tracing::warn!(source = source.label(), "audio stream error: {err}");
    match format {
        SampleFormat::F32 => device.build_input_stream(
            config,
            chunk_callback(converter, source, session_start, sink, |s: f32| s),
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            config,
            chunk_callback(converter, source, session_start, sink, |s: i16| {
                f32::from(s) / 32_768.0
            }),
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            config,
            chunk_callback(converter, source, session_start, sink, |s: u16| {
                (f32::from(s) - 32_768.0) / 32_768.0
            }),
            err_fn,
            None,
        ),
        other => {
            tracing::warn!(?other, "unsupported input sample format");
            Err(BuildStreamError::StreamConfigNotSupported)
        }
    }
}

fn chunk_callback<T, F>(
    mut converter: FormatConverter,
    source: ChunkSource,
    session_start: Instant,
    sink: ChunkSink,
    to_f32: F,
) -> impl FnMut(&[T], &cpal::InputCallbackInfo)
where
    T: Copy,
    F: FnMut(T) -> f32 + Copy,
{
    move |data: &[T], _: &cpal::InputCallbackInfo| {
        // Stamp at delivery time, before conversion, so the timestamp
        // reflects when the audio arrived rather than how long resampling took.
        let timestamp = session_start.elapsed().as_secs_f64();
        let samples = converter.convert(data, to_f32);
        if samples.is_empty() {
            sink.note_dropped();
            tracing::debug!(source = source.label(), "dropped unconvertible buffer");
            return;
        }
        sink.push(TimestampedChunk {
            samples,
            timestamp,
            source,
        });
    }
}
