use super::chunk::{ChunkSink, ChunkSource, TimestampedChunk};
use super::convert::{
    downmix_to_mono, fallback_resample, fir_taps, linear_resample, windowed_sinc, FormatConverter,
};
use super::TARGET_RATE;
use std::sync::{Arc, Mutex};

fn chunk(timestamp: f64, samples: Vec<f32>, source: ChunkSource) -> TimestampedChunk {
    TimestampedChunk {
        samples,
        timestamp,
        source,
    }
}

#[test]
fn downmixes_multi_channel_audio() {
    let mut buf = Vec::new();
    let samples = [1.0f32, -1.0, 0.5, 0.5];
    downmix_to_mono(&mut buf, &samples, 2, |sample| sample);
    assert_eq!(buf, vec![0.0, 0.5]);
}

#[test]
fn preserves_single_channel_audio() {
    let mut buf = Vec::new();
    let samples = [0.1f32, 0.2, 0.3];
    downmix_to_mono(&mut buf, &samples, 1, |sample| sample);
    assert_eq!(buf, samples);
}

#[test]
fn downmix_applies_the_sample_converter() {
    let mut buf = Vec::new();
    let samples = [16_384i16, -16_384];
    downmix_to_mono(&mut buf, &samples, 2, |s| f32::from(s) / 32_768.0);
    assert_eq!(buf, vec![0.0]);
}

#[test]
fn converter_passes_through_at_target_rate() {
    let mut converter = FormatConverter::new(TARGET_RATE, 1);
    assert_eq!(converter.native_rate(), TARGET_RATE);
    let input = vec![0.1f32, 0.2, 0.3];
    let output = converter.convert(&input, |s| s);
    assert_eq!(output, input);
}

#[test]
fn converter_returns_empty_for_empty_input() {
    let mut converter = FormatConverter::new(48_000, 2);
    let output = converter.convert(&[] as &[f32], |s| s);
    assert!(output.is_empty());
}

#[test]
fn converter_drops_chunks_at_unsupported_rates() {
    let mut converter = FormatConverter::new(1_000_000, 1);
    let output = converter.convert(&[0.5f32; 64], |s| s);
    assert!(output.is_empty());
}

#[test]
fn converter_downsamples_48k_to_roughly_a_third() {
    let mut converter = FormatConverter::new(48_000, 1);
    let input: Vec<f32> = (0..960).map(|i| (i as f32 * 0.01).sin()).collect();
    let output = converter.convert(&input, |s| s);
    let expected = input.len() / 3;
    let diff = (output.len() as isize - expected as isize).unsigned_abs();
    assert!(
        diff <= 10,
        "expected about {expected} samples, got {}",
        output.len()
    );
}

#[test]
fn linear_resample_scales_length() {
    let input = vec![0.0f32, 1.0, 2.0, 3.0];
    let result = linear_resample(&input, 0.5);
    assert!(result.len() < input.len());
    assert!((result.first().copied().unwrap_or_default() - 0.0).abs() < 1e-6);
}

#[test]
fn fallback_resample_returns_input_when_rate_matches() {
    let input = vec![0.1f32, 0.2, 0.3];
    assert_eq!(fallback_resample(&input, TARGET_RATE), input);
}

#[test]
fn fallback_upsample_grows_the_buffer() {
    let input = vec![0.0f32, 1.0, 0.0, -1.0];
    let result = fallback_resample(&input, 8_000);
    assert_eq!(result.len(), input.len() * 2);
}

#[test]
fn fir_tap_count_is_always_odd_and_bounded() {
    for rate in [16_000u32, 22_050, 44_100, 48_000, 96_000, 384_000] {
        let taps = fir_taps(rate);
        assert_eq!(taps % 2, 1, "taps for {rate} must be odd");
        assert!(taps <= 129);
    }
}

#[test]
fn windowed_sinc_taps_sum_to_unity() {
    let coeffs = windowed_sinc(0.25, 31);
    let sum: f32 = coeffs.iter().sum();
    assert!((sum - 1.0).abs() < 1e-5);
}

#[test]
fn sink_preserves_push_order_within_a_source() {
    let sink = ChunkSink::new();
    sink.push(chunk(0.0, vec![1.0], ChunkSource::Microphone));
    sink.push(chunk(0.1, vec![2.0], ChunkSource::Microphone));
    let chunks = sink.drain();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].samples, vec![1.0]);
    assert_eq!(chunks[1].samples, vec![2.0]);
    assert!(sink.is_empty());
}

#[test]
fn sink_counts_dropped_buffers() {
    let sink = ChunkSink::new();
    assert_eq!(sink.dropped(), 0);
    sink.note_dropped();
    sink.note_dropped();
    assert_eq!(sink.dropped(), 2);
}

#[test]
fn observer_handle_shares_the_chunk_list() {
    let base = ChunkSink::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let tee = ChunkSink::with_observer(base.clone(), move |chunk: &TimestampedChunk| {
        seen_clone.lock().unwrap().push(chunk.timestamp);
    });

    tee.push(chunk(0.5, vec![1.0], ChunkSource::System));

    // The observer saw the chunk and the shared list received it.
    assert_eq!(*seen.lock().unwrap(), vec![0.5]);
    assert_eq!(base.len(), 1);
}

#[test]
fn chunk_sources_have_distinct_labels() {
    assert_eq!(ChunkSource::Microphone.label(), "microphone");
    assert_eq!(ChunkSource::System.label(), "system");
}
