//! dualscribe entrypoint: capture from one or two audio sources, merge,
//! encode, and hand the result to the whisper-cli decoder.

use anyhow::{Context, Result};
use dualscribe::audio::{MicrophoneSource, SystemAudioSource};
use dualscribe::worker::{start_transcription_job, JobMessage};
use dualscribe::{init_logging, AppConfig, SessionController, Transcriber};
use std::io::{BufRead, Write};
use std::time::Duration;

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    init_logging(config.verbose);

    if config.list_input_devices {
        return list_devices("microphone", MicrophoneSource::list_devices());
    }
    if config.list_system_devices {
        return list_devices("system audio", SystemAudioSource::list_devices());
    }

    let mic = MicrophoneSource::new(config.input_device.clone());
    let mic_name = mic.resolved_device_name();
    let system = SystemAudioSource::new(config.system_device.clone(), mic_name);
    let mut controller = SessionController::new(mic, system);

    controller
        .start_recording(config.mode)
        .with_context(|| format!("could not start {} capture", config.mode.label()))?;
    eprintln!("Recording ({})...", config.mode.label());

    wait_for_stop(config.seconds)?;

    if let Some(elapsed) = controller.elapsed_secs() {
        eprintln!("Recorded {elapsed:.1}s.");
    }
    let merged = controller
        .stop_recording()
        .context("capture produced no usable audio")?
        .context("no capture session was running")?;

    let transcriber = Transcriber::new(config.decoder_cmd.clone(), config.models_dir.clone());
    let job = start_transcription_job(transcriber, merged, config.transcribe_options());
    eprintln!("Transcribing...");

    match job.wait() {
        JobMessage::Transcript {
            result,
            partial_capture,
        } => {
            if partial_capture {
                eprintln!("warning: only one audio source contributed to this recording");
            }
            emit_transcript(&config, &result, partial_capture)?;
        }
        JobMessage::Empty { partial_capture } => {
            if partial_capture {
                eprintln!("warning: only one audio source contributed to this recording");
            }
            eprintln!("No speech detected.");
        }
        JobMessage::Error(err) => return Err(err.into()),
    }

    Ok(())
}

/// Device listing must work on machines with no audio hardware; an
/// empty list is a normal answer, not a failure.
fn list_devices(
    kind: &str,
    devices: Result<Vec<String>, dualscribe::audio::CaptureError>,
) -> Result<()> {
    match devices {
        Ok(names) if names.is_empty() => println!("No {kind} devices detected."),
        Ok(names) => {
            for name in names {
                println!("{name}");
            }
        }
        Err(err) => println!("No {kind} devices detected ({err})."),
    }
    Ok(())
}

/// Fixed duration when --seconds is set, otherwise block until Enter.
fn wait_for_stop(seconds: u64) -> Result<()> {
    if seconds > 0 {
        std::thread::sleep(Duration::from_secs(seconds));
        return Ok(());
    }
    eprint!("Press Enter to stop recording... ");
    std::io::stderr().flush().ok();
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed reading stdin")?;
    Ok(())
}

fn emit_transcript(
    config: &AppConfig,
    result: &dualscribe::TranscriptionResult,
    partial_capture: bool,
) -> Result<()> {
    if config.json {
        let mut value = serde_json::to_value(result)?;
        if let Some(map) = value.as_object_mut() {
            map.insert("mode".into(), serde_json::to_value(config.mode)?);
            map.insert("model".into(), serde_json::to_value(config.model)?);
            map.insert("partial_capture".into(), partial_capture.into());
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", result.text);
    }

    if let Some(path) = &config.transcript_out {
        std::fs::write(path, format!("{}\n", result.text))
            .with_context(|| format!("could not write transcript to {}", path.display()))?;
        eprintln!("Transcript written to {}", path.display());
    }

    Ok(())
}
