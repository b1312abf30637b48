//! Local audio processing.
//!
//! Everything in this module operates on plain 16-bit PCM WAV files through
//! the [`AudioClip`] buffer type; no external tools are involved.

pub mod align;
pub mod beat;
pub mod bpm;
pub mod mixer;
pub mod pitch;

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use crate::error::{BattleError, Result};

/// A decoded mono audio buffer.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// An empty clip at the given rate.
    pub fn empty(sample_rate: u32) -> Self {
        Self::new(Vec::new(), sample_rate)
    }

    /// A silent clip of the given duration.
    pub fn silence(duration_ms: u64, sample_rate: u32) -> Self {
        let len = (duration_ms as u128 * sample_rate as u128 / 1000) as usize;
        Self::new(vec![0.0; len], sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.samples.len() as u128 * 1000 / self.sample_rate as u128) as u64
    }

    /// Decode a WAV file, downmixing multi-channel input to mono.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BattleError::FileNotFound(path.display().to_string()));
        }
        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.unwrap_or(0.0))
                .collect(),
            SampleFormat::Int => {
                let full_scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.unwrap_or(0) as f32 / full_scale)
                    .collect()
            }
        };

        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        Ok(Self::new(samples, spec.sample_rate))
    }

    /// Write the clip as 16-bit PCM mono WAV.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let spec = WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(value)?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Linear-interpolation resample to a different rate. Used to align clip
    /// rates before concatenation or overlay.
    pub fn resampled(&self, target_rate: u32) -> Self {
        if self.sample_rate == target_rate || self.samples.is_empty() {
            return Self::new(self.samples.clone(), target_rate);
        }
        let ratio = self.sample_rate as f64 / target_rate as f64;
        let out_len = (self.samples.len() as f64 / ratio).round() as usize;
        let mut out = Vec::with_capacity(out_len);
        for i in 0..out_len {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = self.samples.get(idx).copied().unwrap_or(0.0);
            let b = self.samples.get(idx + 1).copied().unwrap_or(a);
            out.push(a + (b - a) * frac);
        }
        Self::new(out, target_rate)
    }
}

/// Duration of an audio file in milliseconds.
pub fn duration_ms(path: &Path) -> Result<u64> {
    Ok(AudioClip::load(path)?.duration_ms())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_round_trip_preserves_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let clip = AudioClip::silence(1_500, 22_050);
        clip.save(&path).unwrap();
        let loaded = AudioClip::load(&path).unwrap();
        assert_eq!(loaded.sample_rate, 22_050);
        assert_eq!(loaded.duration_ms(), 1_500);
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let err = AudioClip::load(Path::new("/nonexistent/clip.wav")).unwrap_err();
        assert!(matches!(err, BattleError::FileNotFound(_)));
    }

    #[test]
    fn resample_scales_length() {
        let clip = AudioClip::silence(1_000, 44_100);
        let down = clip.resampled(22_050);
        assert_eq!(down.sample_rate, 22_050);
        let diff = down.duration_ms().abs_diff(1_000);
        assert!(diff <= 1, "duration off by {diff}ms");
    }
}
