//! Mixing and timing utilities for combining rap vocals with beats.

use std::path::{Path, PathBuf};

use log::{info, warn};

use super::AudioClip;
use crate::error::{BattleError, Result};

/// Full-scale RMS reference a bucket is normalized against.
const WAVEFORM_REFERENCE_RMS: f32 = 0.4;
/// Fixed boost applied after normalization.
const WAVEFORM_BOOST: f32 = 2.5;

/// Concatenate clips in order with optional silence between them.
///
/// Missing files are skipped with a warning. If every clip is missing the
/// result is an empty (zero-duration) file; callers must guard.
pub fn concatenate(clip_paths: &[PathBuf], gap_ms: u64, output_path: &Path) -> Result<PathBuf> {
    let combined = concatenate_clips(clip_paths, gap_ms)?;
    combined.save(output_path)?;
    Ok(output_path.to_path_buf())
}

/// In-memory concatenation used by both [`concatenate`] and [`mix`].
fn concatenate_clips(clip_paths: &[PathBuf], gap_ms: u64) -> Result<AudioClip> {
    let mut combined: Option<AudioClip> = None;

    for path in clip_paths {
        if !path.exists() {
            warn!("Skipping missing clip: {}", path.display());
            continue;
        }
        let clip = AudioClip::load(path)?;
        info!("Added clip: {} ({}ms)", path.display(), clip.duration_ms());
        combined = Some(match combined {
            None => clip,
            Some(mut acc) => {
                let clip = clip.resampled(acc.sample_rate);
                if gap_ms > 0 {
                    acc.samples
                        .extend(AudioClip::silence(gap_ms, acc.sample_rate).samples);
                }
                acc.samples.extend(clip.samples);
                acc
            }
        });
    }

    Ok(combined.unwrap_or_else(|| AudioClip::empty(44_100)))
}

/// Loop `track` until it covers `target_ms`, then hard-trim to exactly that
/// length. The output is a prefix of the track repeated
/// `ceil(target_ms / track_ms)` times.
pub fn loop_to_length(track: &AudioClip, target_ms: u64) -> AudioClip {
    let target_len = (target_ms as u128 * track.sample_rate as u128 / 1000) as usize;
    if track.samples.is_empty() {
        return AudioClip::new(vec![0.0; target_len], track.sample_rate);
    }
    let mut samples = Vec::with_capacity(target_len);
    while samples.len() < target_len {
        let remaining = target_len - samples.len();
        let take = remaining.min(track.samples.len());
        samples.extend_from_slice(&track.samples[..take]);
    }
    AudioClip::new(samples, track.sample_rate)
}

/// Apply a dB gain in place. Negative values attenuate.
pub fn apply_gain_db(clip: &mut AudioClip, gain_db: f32) {
    let factor = 10f32.powf(gain_db / 20.0);
    for sample in &mut clip.samples {
        *sample *= factor;
    }
}

/// Overlay `over` on top of `base`, sample-wise, clamped to full scale.
/// The result keeps the length of `base`.
pub fn overlay(base: &AudioClip, over: &AudioClip) -> AudioClip {
    let over = over.resampled(base.sample_rate);
    let samples = base
        .samples
        .iter()
        .enumerate()
        .map(|(i, &s)| (s + over.samples.get(i).copied().unwrap_or(0.0)).clamp(-1.0, 1.0))
        .collect();
    AudioClip::new(samples, base.sample_rate)
}

/// Mix rap vocal clips with a beat track.
///
/// Vocals are concatenated end-to-end with no gap; the beat is looped and
/// trimmed to the exact vocal duration, attenuated by `beat_gain_db`, and laid
/// underneath.
pub fn mix(
    vocal_paths: &[PathBuf],
    beat_path: &Path,
    beat_gain_db: f32,
    output_path: &Path,
) -> Result<PathBuf> {
    info!("Mixing {} rap clips with beat", vocal_paths.len());

    let vocals = concatenate_clips(vocal_paths, 0)?;
    if vocals.is_empty() {
        return Err(BattleError::AudioProcessing(
            "No valid rap clips provided".to_string(),
        ));
    }
    let total_ms = vocals.duration_ms();
    info!("Total rap duration: {total_ms}ms");

    let beat = AudioClip::load(beat_path)?.resampled(vocals.sample_rate);
    let mut beat = loop_to_length(&beat, total_ms);
    apply_gain_db(&mut beat, beat_gain_db);

    let mixed = overlay(&beat, &vocals);
    mixed.save(output_path)?;
    info!("Mixed audio exported to: {}", output_path.display());
    Ok(output_path.to_path_buf())
}

/// Downsample the signal into `bucket_count` RMS amplitude buckets in
/// `[0.0, 1.0]`, for the client-side visualization.
pub fn waveform(path: &Path, bucket_count: usize) -> Result<Vec<f32>> {
    let clip = AudioClip::load(path)?;
    if bucket_count == 0 {
        return Ok(Vec::new());
    }
    if clip.samples.is_empty() {
        return Ok(vec![0.0; bucket_count]);
    }

    let bucket_len = (clip.samples.len() as f64 / bucket_count as f64).max(1.0);
    let mut buckets = Vec::with_capacity(bucket_count);
    for i in 0..bucket_count {
        let start = (i as f64 * bucket_len) as usize;
        let end = (((i + 1) as f64 * bucket_len) as usize).min(clip.samples.len());
        let window = &clip.samples[start.min(clip.samples.len())..end];
        let rms = if window.is_empty() {
            0.0
        } else {
            (window.iter().map(|s| s * s).sum::<f32>() / window.len() as f32).sqrt()
        };
        buckets.push((rms / WAVEFORM_REFERENCE_RMS * WAVEFORM_BOOST).clamp(0.0, 1.0));
    }
    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::test_support::write_tone;

    #[test]
    fn concatenation_duration_is_additive() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_tone(dir.path(), "a.wav", 700, 440.0);
        let b = write_tone(dir.path(), "b.wav", 500, 220.0);
        let out = dir.path().join("joined.wav");

        concatenate(&[a, b], 250, &out).unwrap();
        let total = crate::audio::duration_ms(&out).unwrap();
        assert!(total.abs_diff(700 + 500 + 250) <= 1, "got {total}ms");
    }

    #[test]
    fn concatenation_skips_missing_clips() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_tone(dir.path(), "a.wav", 400, 440.0);
        let missing = dir.path().join("missing.wav");
        let out = dir.path().join("joined.wav");

        concatenate(&[missing.clone(), a], 0, &out).unwrap();
        assert!(crate::audio::duration_ms(&out).unwrap().abs_diff(400) <= 1);

        // All clips missing: empty output, caller's problem.
        let out2 = dir.path().join("empty.wav");
        concatenate(&[missing], 0, &out2).unwrap();
        assert_eq!(crate::audio::duration_ms(&out2).unwrap(), 0);
    }

    #[test]
    fn loop_to_length_is_exact_and_prefix() {
        let track = AudioClip::new(vec![0.1, 0.2, 0.3, 0.4], 1_000);
        let looped = loop_to_length(&track, 10); // 10 samples at 1kHz
        assert_eq!(looped.samples.len(), 10);
        // Prefix of the track repeated ceil(10/4) = 3 times.
        let expected: Vec<f32> = track
            .samples
            .iter()
            .cycle()
            .take(10)
            .copied()
            .collect();
        assert_eq!(looped.samples, expected);

        // Zero target is legal.
        assert_eq!(loop_to_length(&track, 0).samples.len(), 0);
    }

    #[test]
    fn gain_attenuates() {
        let mut clip = AudioClip::new(vec![0.5; 8], 1_000);
        apply_gain_db(&mut clip, -6.0);
        assert!((clip.samples[0] - 0.2506).abs() < 1e-3);
    }

    #[test]
    fn mix_matches_vocal_duration() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_tone(dir.path(), "a.wav", 900, 440.0);
        let b = write_tone(dir.path(), "b.wav", 600, 330.0);
        let beat = write_tone(dir.path(), "beat.wav", 400, 110.0);
        let out = dir.path().join("mix.wav");

        mix(&[a, b], &beat, -10.0, &out).unwrap();
        assert!(crate::audio::duration_ms(&out).unwrap().abs_diff(1_500) <= 1);
    }

    #[test]
    fn mix_with_no_vocals_errors() {
        let dir = tempfile::tempdir().unwrap();
        let beat = write_tone(dir.path(), "beat.wav", 400, 110.0);
        let out = dir.path().join("mix.wav");
        let err = mix(&[dir.path().join("nope.wav")], &beat, -10.0, &out).unwrap_err();
        assert!(matches!(err, BattleError::AudioProcessing(_)));
    }

    #[test]
    fn waveform_bucket_count_invariant() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(dir.path(), "tone.wav", 1_200, 440.0);
        for n in [1usize, 7, 100, 513] {
            let buckets = waveform(&path, n).unwrap();
            assert_eq!(buckets.len(), n);
            assert!(buckets.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn waveform_of_silence_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.wav");
        AudioClip::silence(500, 22_050).save(&path).unwrap();
        let buckets = waveform(&path, 10).unwrap();
        assert!(buckets.iter().all(|&v| v == 0.0));
    }
}
