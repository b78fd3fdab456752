//! Format conversion: arbitrary native PCM to 16 kHz mono f32.
//!
//! Each source adapter owns one `FormatConverter`; converter state is never
//! shared between adapters. A failed conversion yields an empty buffer (the
//! chunk is dropped and logged), never a session failure.

use super::TARGET_RATE;
use std::f32::consts::PI;

#[cfg(feature = "high-quality-audio")]
use rubato::{InterpolationParameters, InterpolationType, Resampler, SincFixedIn, WindowFunction};

// Practical native-rate bounds; anything outside is treated as a
// negotiation failure rather than fed to the resampler.
const MIN_NATIVE_RATE: u32 = 4_000;
const MAX_NATIVE_RATE: u32 = 384_000;
const MAX_FIR_TAPS: usize = 129;

/// Per-adapter converter: interleaved native buffers in, canonical mono out.
pub struct FormatConverter {
    native_rate: u32,
    channels: usize,
    mono_scratch: Vec<f32>,
    #[cfg(feature = "high-quality-audio")]
    sinc_failed: bool,
}

impl FormatConverter {
    pub fn new(native_rate: u32, channels: usize) -> Self {
        Self {
            native_rate,
            channels: channels.max(1),
            mono_scratch: Vec::new(),
            #[cfg(feature = "high-quality-audio")]
            sinc_failed: false,
        }
    }

    pub fn native_rate(&self) -> u32 {
        self.native_rate
    }

    /// Convert one hardware buffer. Returns an empty vec when the native
    /// rate is outside the supported range (the caller drops the chunk).
    pub fn convert<T, F>(&mut self, data: &[T], to_f32: F) -> Vec<f32>
    where
        T: Copy,
        F: FnMut(T) -> f32,
    {
        if data.is_empty() {
            return Vec::new();
        }
        if self.native_rate != TARGET_RATE
            && !(MIN_NATIVE_RATE..=MAX_NATIVE_RATE).contains(&self.native_rate)
        {
            return Vec::new();
        }

        self.mono_scratch.clear();
        downmix_to_mono(&mut self.mono_scratch, data, self.channels, to_f32);

        if self.native_rate == TARGET_RATE {
            return self.mono_scratch.clone();
        }

        #[cfg(feature = "high-quality-audio")]
        {
            if !self.sinc_failed {
                match sinc_resample(&self.mono_scratch, self.native_rate) {
                    Ok(out) => return out,
                    Err(err) => {
                        // Warn once per adapter, then stay on the fallback path.
                        self.sinc_failed = true;
                        tracing::warn!(
                            rate = self.native_rate,
                            "sinc resampler failed ({err}); using fallback resampler"
                        );
                    }
                }
            }
        }

        fallback_resample(&self.mono_scratch, self.native_rate)
    }
}

/// Average interleaved frames into mono while applying the sample converter.
pub(super) fn downmix_to_mono<T, F>(out: &mut Vec<f32>, data: &[T], channels: usize, mut to_f32: F)
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        out.extend(data.iter().copied().map(&mut to_f32));
        return;
    }
    for frame in data.chunks(channels) {
        let sum: f32 = frame.iter().copied().map(&mut to_f32).sum();
        out.push(sum / frame.len() as f32);
    }
}

#[cfg(feature = "high-quality-audio")]
fn sinc_resample(input: &[f32], native_rate: u32) -> anyhow::Result<Vec<f32>> {
    use anyhow::anyhow;

    let ratio = f64::from(TARGET_RATE) / f64::from(native_rate);
    let chunk = 256usize;
    let params = InterpolationParameters {
        sinc_len: 64,
        f_cutoff: 0.90,
        interpolation: InterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk, 1)
        .map_err(|e| anyhow!("failed to construct sinc resampler: {e:?}"))?;

    let expect = ((input.len() as f64) * ratio).round().max(1.0) as usize;
    let mut out = Vec::with_capacity(expect + 8);
    let mut segment = vec![0.0f32; chunk];

    for piece in input.chunks(chunk) {
        // Pad the final partial chunk with its last sample to avoid a click.
        let pad = piece.last().copied().unwrap_or(0.0);
        segment.fill(pad);
        segment[..piece.len()].copy_from_slice(piece);
        let produced = resampler
            .process(std::slice::from_ref(&segment), None)
            .map_err(|e| anyhow!("sinc resampler process failed: {e:?}"))?;
        out.extend_from_slice(&produced[0]);
    }

    // Chunk padding can over- or under-shoot by a few samples.
    if out.len() > expect {
        out.truncate(expect);
    } else if out.len() < expect {
        let pad = out.last().copied().unwrap_or(0.0);
        out.resize(expect, pad);
    }
    Ok(out)
}

/// FIR-filtered linear resampler used when rubato is unavailable or fails.
pub(super) fn fallback_resample(input: &[f32], native_rate: u32) -> Vec<f32> {
    if input.is_empty() || native_rate == TARGET_RATE || native_rate == 0 {
        return input.to_vec();
    }
    let filtered = if native_rate > TARGET_RATE {
        // Low-pass before decimation so speech does not alias.
        fir_low_pass(input, native_rate, fir_taps(native_rate))
    } else {
        input.to_vec()
    };
    let ratio = TARGET_RATE as f32 / native_rate as f32;
    linear_resample(&filtered, ratio)
}

pub(super) fn linear_resample(input: &[f32], ratio: f32) -> Vec<f32> {
    let out_len = (input.len() as f32 * ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f32 / ratio;
        let idx = pos.floor() as usize;
        let frac = pos - idx as f32;
        if idx + 1 < input.len() {
            out.push(input[idx] * (1.0 - frac) + input[idx + 1] * frac);
        } else {
            out.push(input.last().copied().unwrap_or(0.0));
        }
    }
    out
}

/// Short filter near equal rates, longer when collapsing 44.1/48 kHz to 16 kHz.
pub(super) fn fir_taps(native_rate: u32) -> usize {
    let decimation = native_rate as f32 / TARGET_RATE as f32;
    let mut taps = (decimation * 4.0).ceil().max(11.0) as usize;
    if taps % 2 == 0 {
        taps += 1;
    }
    taps.min(MAX_FIR_TAPS)
}

pub(super) fn fir_low_pass(input: &[f32], native_rate: u32, taps: usize) -> Vec<f32> {
    if input.is_empty() || taps <= 1 {
        return input.to_vec();
    }
    let cutoff = (TARGET_RATE as f32 * 0.5 / native_rate as f32).min(0.499);
    let coeffs = windowed_sinc(cutoff, taps);
    let half = taps / 2;
    let mut out = Vec::with_capacity(input.len());
    for n in 0..input.len() {
        let mut acc = 0.0f32;
        for (k, coeff) in coeffs.iter().enumerate() {
            if let Some(idx) = (n + k).checked_sub(half) {
                if let Some(sample) = input.get(idx) {
                    acc += *sample * coeff;
                }
            }
        }
        out.push(acc);
    }
    out
}

/// Normalized Hamming-windowed sinc taps.
pub(super) fn windowed_sinc(cutoff: f32, taps: usize) -> Vec<f32> {
    let mut coeffs = Vec::with_capacity(taps);
    let m = (taps - 1) as f32;
    for n in 0..taps {
        let centered = n as f32 - m / 2.0;
        let x = 2.0 * PI * cutoff * centered;
        let sinc = if centered == 0.0 {
            2.0 * cutoff
        } else {
            (2.0 * cutoff * x.sin()) / x
        };
        let window = if taps <= 1 {
            1.0
        } else {
            0.54 - 0.46 * ((2.0 * PI * n as f32) / m).cos()
        };
        coeffs.push(sinc * window);
    }
    let sum: f32 = coeffs.iter().sum();
    if sum != 0.0 {
        for coeff in coeffs.iter_mut() {
            *coeff /= sum;
        }
    }
    coeffs
}
