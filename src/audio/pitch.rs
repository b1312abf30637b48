//! Pitch shifting for the celebrity voice path.
//!
//! A clip is resampled by the reciprocal of the pitch factor and kept at its
//! original sample rate, which raises or lowers the pitch by exactly that
//! factor. The voice pipeline applies the shift before style transfer and the
//! reciprocal shift after, so pitch and duration both cancel out end to end.

use std::path::Path;

use log::info;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::AudioClip;
use crate::error::{BattleError, Result};

/// Default downward factor applied before cloning (12% lower).
pub const CELEBRITY_PITCH_FACTOR: f64 = 0.88;

const CHUNK_SIZE: usize = 1024;

/// Shift the pitch of a clip by `factor` (>1.0 raises, <1.0 lowers).
pub fn pitch_shift(clip: &AudioClip, factor: f64) -> Result<AudioClip> {
    if !(0.25..=4.0).contains(&factor) {
        return Err(BattleError::AudioProcessing(format!(
            "pitch factor {factor} outside supported range"
        )));
    }
    if clip.is_empty() {
        return Ok(clip.clone());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    // Fewer output samples played at the same rate = higher pitch.
    let mut resampler = SincFixedIn::<f32>::new(1.0 / factor, 2.0, params, CHUNK_SIZE, 1)
        .map_err(|e| BattleError::AudioProcessing(format!("resampler init: {e}")))?;

    let mut output = Vec::with_capacity((clip.samples.len() as f64 / factor) as usize);
    let mut position = 0;
    while position < clip.samples.len() {
        let end = (position + CHUNK_SIZE).min(clip.samples.len());
        let mut chunk = clip.samples[position..end].to_vec();
        chunk.resize(CHUNK_SIZE, 0.0);
        let processed = resampler
            .process(&[chunk], None)
            .map_err(|e| BattleError::AudioProcessing(format!("resample: {e}")))?;
        output.extend_from_slice(&processed[0]);
        position = end;
    }

    Ok(AudioClip::new(output, clip.sample_rate))
}

/// File-to-file convenience wrapper used by the voice pipeline.
pub fn pitch_shift_file(input: &Path, output: &Path, factor: f64) -> Result<()> {
    let clip = AudioClip::load(input)?;
    let shifted = pitch_shift(&clip, factor)?;
    shifted.save(output)?;
    info!(
        "Pitch shifted {} by {:.3} -> {}",
        input.display(),
        factor,
        output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(duration_ms: u64, freq: f32, sample_rate: u32) -> AudioClip {
        let len = (duration_ms as u128 * sample_rate as u128 / 1000) as usize;
        let samples = (0..len)
            .map(|i| (i as f32 / sample_rate as f32 * freq * std::f32::consts::TAU).sin() * 0.5)
            .collect();
        AudioClip::new(samples, sample_rate)
    }

    #[test]
    fn downward_shift_lengthens_clip() {
        let clip = tone(1_000, 440.0, 22_050);
        let shifted = pitch_shift(&clip, CELEBRITY_PITCH_FACTOR).unwrap();
        let ratio = shifted.samples.len() as f64 / clip.samples.len() as f64;
        // 1/0.88 more samples at the same rate, within resampler padding.
        assert!((ratio - 1.0 / CELEBRITY_PITCH_FACTOR).abs() < 0.1, "ratio {ratio}");
    }

    #[test]
    fn round_trip_restores_duration() {
        let clip = tone(1_000, 440.0, 22_050);
        let down = pitch_shift(&clip, CELEBRITY_PITCH_FACTOR).unwrap();
        let restored = pitch_shift(&down, 1.0 / CELEBRITY_PITCH_FACTOR).unwrap();
        let diff = restored.duration_ms().abs_diff(clip.duration_ms());
        assert!(diff <= 150, "duration drifted by {diff}ms");
    }

    #[test]
    fn rejects_extreme_factor() {
        let clip = tone(100, 440.0, 22_050);
        assert!(pitch_shift(&clip, 10.0).is_err());
        assert!(pitch_shift(&clip, 0.0).is_err());
    }

    #[test]
    fn empty_clip_passes_through() {
        let clip = AudioClip::empty(22_050);
        assert!(pitch_shift(&clip, 0.88).unwrap().is_empty());
    }
}
