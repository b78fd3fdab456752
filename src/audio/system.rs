//! System-audio source adapter.
//!
//! Captures "what the machine is playing" through a loopback/monitor input
//! device (PulseAudio/PipeWire monitors, BlackHole, Stereo Mix, ...). The
//! CPAL stream is not `Send`, so a dedicated thread owns it: `start` blocks
//! on the thread's ready handshake and `stop` blocks until teardown
//! completes, then returns the thread's accumulated chunks as the
//! authoritative set for this source.
//!
//! Self-filtering is at device granularity: the device the microphone
//! adapter resolved to is never selected as the loopback target.

use super::chunk::{CaptureSource, ChunkSink, ChunkSource, TimestampedChunk};
use super::error::system_capture_hint;
use super::mic::build_converted_stream;
use super::{CaptureError, FormatConverter, TARGET_RATE};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const START_TIMEOUT: Duration = Duration::from_secs(10);

/// Device-name substrings that identify a loopback/monitor source.
const LOOPBACK_KEYWORDS: &[&str] = &[
    "monitor",
    "loopback",
    "blackhole",
    "soundflower",
    "vb-audio",
    "virtual",
    "stereo mix",
];

struct Worker {
    stop_tx: Sender<()>,
    done_rx: Receiver<Vec<TimestampedChunk>>,
    handle: JoinHandle<()>,
}

pub struct SystemAudioSource {
    preferred: Option<String>,
    exclude: Option<String>,
    worker: Option<Worker>,
}

impl SystemAudioSource {
    /// `preferred` pins a capture device by name; `exclude` is the
    /// microphone adapter's device, which discovery must skip.
    pub fn new(preferred: Option<String>, exclude: Option<String>) -> Self {
        Self {
            preferred,
            exclude,
            worker: None,
        }
    }

    /// Candidate loopback device names, for the CLI's device selector.
    pub fn list_devices() -> Result<Vec<String>, CaptureError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|err| CaptureError::SetupFailed(format!("cannot list input devices: {err}")))?;
        Ok(devices
            .filter_map(|d| d.name().ok())
            .filter(|name| is_loopback_name(name))
            .collect())
    }
}

impl CaptureSource for SystemAudioSource {
    fn source(&self) -> ChunkSource {
        ChunkSource::System
    }

    fn start(&mut self, session_start: Instant, sink: ChunkSink) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (ready_tx, ready_rx) = bounded::<Result<(), CaptureError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<Vec<TimestampedChunk>>(1);
        let preferred = self.preferred.clone();
        let exclude = self.exclude.clone();

        let handle = thread::spawn(move || {
            run_capture_thread(
                preferred,
                exclude,
                session_start,
                sink,
                ready_tx,
                stop_rx,
                done_tx,
            );
        });

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(())) => {
                self.worker = Some(Worker {
                    stop_tx,
                    done_rx,
                    handle,
                });
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => Err(CaptureError::SetupFailed(
                "system audio capture did not confirm startup in time".to_string(),
            )),
        }
    }

    fn stop(&mut self) -> Vec<TimestampedChunk> {
        let Some(worker) = self.worker.take() else {
            return Vec::new();
        };
        let _ = worker.stop_tx.send(());
        // Teardown confirmation doubles as the authoritative chunk handoff;
        // blocking here is what guarantees no callback is still in flight.
        let chunks = worker.done_rx.recv().unwrap_or_default();
        let _ = worker.handle.join();
        tracing::debug!(chunks = chunks.len(), "system audio stream stopped");
        chunks
    }
}

#[allow(clippy::too_many_arguments)]
fn run_capture_thread(
    preferred: Option<String>,
    exclude: Option<String>,
    session_start: Instant,
    sink: ChunkSink,
    ready_tx: Sender<Result<(), CaptureError>>,
    stop_rx: Receiver<()>,
    done_tx: Sender<Vec<TimestampedChunk>>,
) {
    let accumulated: Arc<Mutex<Vec<TimestampedChunk>>> = Arc::new(Mutex::new(Vec::new()));

    let stream = match open_loopback_stream(
        preferred.as_deref(),
        exclude.as_deref(),
        session_start,
        sink,
        accumulated.clone(),
    ) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            let _ = done_tx.send(Vec::new());
            return;
        }
    };

    if let Err(err) = stream.play() {
        let _ = ready_tx.send(Err(CaptureError::SetupFailed(format!(
            "cannot start system audio stream: {err}"
        ))));
        let _ = done_tx.send(Vec::new());
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Park until stop; the stream keeps delivering on its callback thread.
    let _ = stop_rx.recv();
    if let Err(err) = stream.pause() {
        tracing::debug!("failed to pause system audio stream: {err}");
    }
    drop(stream);

    let chunks = accumulated
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();
    let _ = done_tx.send(chunks);
}

fn open_loopback_stream(
    preferred: Option<&str>,
    exclude: Option<&str>,
    session_start: Instant,
    sink: ChunkSink,
    accumulated: Arc<Mutex<Vec<TimestampedChunk>>>,
) -> Result<cpal::Stream, CaptureError> {
    let device = discover_device(preferred, exclude)?;
    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let supported = pick_capture_config(&device, &device_name)?;
    let format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let native_rate = config.sample_rate.0;
    let channels = usize::from(config.channels.max(1));

    if native_rate != TARGET_RATE {
        tracing::debug!(
            device = %device_name,
            native_rate,
            "loopback device ignored the canonical rate; resampling"
        );
    }

    // Fan the converted chunks out to the shared sink (incremental path)
    // and the thread-local accumulator (authoritative stop() result).
    let tee = TeeSink {
        sink,
        accumulated,
    };

    build_converted_stream(
        &device,
        &config,
        format,
        FormatConverter::new(native_rate, channels),
        ChunkSource::System,
        session_start,
        tee.into_sink(),
    )
    .map_err(|err| match err {
        cpal::BuildStreamError::DeviceNotAvailable => CaptureError::SystemAudioPermissionDenied(
            format!("'{device_name}' is not available. {}", system_capture_hint()),
        ),
        other => CaptureError::SetupFailed(format!("cannot open '{device_name}': {other}")),
    })
}

/// Both delivery paths behind one sink handle so the stream callback stays
/// identical to the microphone's.
struct TeeSink {
    sink: ChunkSink,
    accumulated: Arc<Mutex<Vec<TimestampedChunk>>>,
}

impl TeeSink {
    fn into_sink(self) -> ChunkSink {
        // ChunkSink is the only type the shared stream builder accepts, so
        // the tee is expressed as a sink whose push also records locally.
        let TeeSink { sink, accumulated } = self;
        ChunkSink::with_observer(sink, move |chunk| {
            accumulated
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(chunk.clone());
        })
    }
}

fn discover_device(
    preferred: Option<&str>,
    exclude: Option<&str>,
) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    let devices: Vec<cpal::Device> = host
        .input_devices()
        .map_err(|err| CaptureError::SetupFailed(format!("cannot list input devices: {err}")))?
        .collect();

    if let Some(name) = preferred {
        return devices
            .into_iter()
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| {
                CaptureError::NoCaptureTargetAvailable(format!(
                    "system audio device '{name}' not found. {}",
                    system_capture_hint()
                ))
            });
    }

    let exclude_lower = exclude.map(str::to_lowercase);
    for device in devices {
        let Ok(name) = device.name() else { continue };
        let lower = name.to_lowercase();
        if exclude_lower.as_deref() == Some(lower.as_str()) {
            continue;
        }
        if is_loopback_name(&lower) {
            tracing::debug!(device = %name, "selected loopback capture device");
            return Ok(device);
        }
    }

    Err(CaptureError::NoCaptureTargetAvailable(format!(
        "no loopback/monitor input device found. {}",
        system_capture_hint()
    )))
}

fn is_loopback_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Ask the device for the canonical rate; fall back to its default config
/// when the platform does not offer 16 kHz (the converter resamples).
fn pick_capture_config(
    device: &cpal::Device,
    device_name: &str,
) -> Result<cpal::SupportedStreamConfig, CaptureError> {
    if let Ok(ranges) = device.supported_input_configs() {
        let mut candidates: Vec<_> = ranges
            .filter(|r| {
                r.min_sample_rate().0 <= TARGET_RATE && TARGET_RATE <= r.max_sample_rate().0
            })
            .collect();
        candidates.sort_by_key(|r| r.channels());
        if let Some(range) = candidates.into_iter().next() {
            return Ok(range.with_sample_rate(cpal::SampleRate(TARGET_RATE)));
        }
    }
    device.default_input_config().map_err(|err| {
        CaptureError::SetupFailed(format!("cannot query '{device_name}' config: {err}"))
    })
}
