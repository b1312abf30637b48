//! Beat pattern schema and sample-bank renderer.
//!
//! Patterns arrive as JSON from the pattern generation model. [`BeatPattern`]
//! validates the structure and [`BeatSynth`] renders it to audio by overlaying
//! percussion samples on a silent grid.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::{mixer, AudioClip};
use crate::error::{BattleError, Result};

/// Sound codes mapped to sample files. `-` is a rest and has no sample.
pub const SAMPLE_FILES: &[(&str, &str)] = &[
    ("K", "kick-drum-263837.wav"),
    ("S", "snare-drum-341273.wav"),
    ("H", "hi-hat-231042.wav"),
    ("B", "808-bass-drum-421219.wav"),
    ("C", "clap-375693.wav"),
    ("O", "open-hi-hat-431740.wav"),
    ("X", "tr808-crash-cymbal-241377.wav"),
    ("P", "shaker-drum-434902.wav"),
];

/// Duration codes in beats: whole, half, quarter, eighth, sixteenth.
const DURATION_CODES: &[(&str, f64)] =
    &[("w", 4.0), ("h", 2.0), ("q", 1.0), ("e", 0.5), ("s", 0.25)];

fn default_duration() -> String {
    "q".to_string()
}

fn default_time_signature() -> (u32, u32) {
    (4, 4)
}

fn default_loopable() -> bool {
    true
}

/// A single sound event at a beat position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatEvent {
    pub sound: String,
    #[serde(default = "default_duration")]
    pub duration: String,
}

/// Events occurring at a specific beat position within a bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatPosition {
    pub beat: f64,
    pub events: Vec<BeatEvent>,
}

/// A single bar of the pattern, 1-indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub bar: u32,
    pub beats: Vec<BeatPosition>,
}

/// Metadata for a sound track entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackInfo {
    pub name: String,
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatMetadata {
    pub title: String,
    pub style: String,
    pub bpm: u32,
    #[serde(default = "default_time_signature")]
    pub time_signature: (u32, u32),
    pub bars: u32,
    #[serde(default = "default_loopable")]
    pub loopable: bool,
}

/// Complete beat pattern with metadata and per-bar events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatPattern {
    pub metadata: BeatMetadata,
    #[serde(default)]
    pub tracks: HashMap<String, TrackInfo>,
    pub pattern: Vec<Bar>,
}

impl BeatPattern {
    /// Parse and validate a JSON pattern. Any schema violation is an
    /// [`BattleError::InvalidPattern`].
    pub fn from_json(json: &str) -> Result<Self> {
        let pattern: BeatPattern = serde_json::from_str(json)
            .map_err(|e| BattleError::InvalidPattern(format!("malformed JSON: {e}")))?;
        pattern.validate()?;
        Ok(pattern)
    }

    pub fn validate(&self) -> Result<()> {
        let meta = &self.metadata;
        if !(60..=200).contains(&meta.bpm) {
            return Err(invalid(format!("bpm {} outside 60..=200", meta.bpm)));
        }
        if !(1..=16).contains(&meta.bars) {
            return Err(invalid(format!("bars {} outside 1..=16", meta.bars)));
        }

        let mut prev_bar = 0u32;
        for bar in &self.pattern {
            if bar.bar <= prev_bar {
                return Err(invalid(format!(
                    "bar numbers must be strictly increasing, got {} after {}",
                    bar.bar, prev_bar
                )));
            }
            if bar.bar > meta.bars {
                return Err(invalid(format!(
                    "bar {} exceeds declared bar count {}",
                    bar.bar, meta.bars
                )));
            }
            prev_bar = bar.bar;

            for position in &bar.beats {
                if !(1.0..=4.75).contains(&position.beat) {
                    return Err(invalid(format!(
                        "beat position {} outside 1.0..=4.75 in bar {}",
                        position.beat, bar.bar
                    )));
                }
                for event in &position.events {
                    if event.sound != "-"
                        && !SAMPLE_FILES.iter().any(|(code, _)| *code == event.sound)
                    {
                        return Err(invalid(format!("unknown sound code {:?}", event.sound)));
                    }
                    if !DURATION_CODES.iter().any(|(code, _)| *code == event.duration) {
                        return Err(invalid(format!(
                            "unknown duration code {:?}",
                            event.duration
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Duration of one loop of the pattern in milliseconds.
    pub fn loop_duration_ms(&self) -> u64 {
        let total_beats = self.metadata.bars as f64 * self.metadata.time_signature.0 as f64;
        (total_beats * 60_000.0 / self.metadata.bpm as f64) as u64
    }
}

fn invalid(message: String) -> BattleError {
    BattleError::InvalidPattern(message)
}

/// Renders beat patterns using a bank of percussion samples.
pub struct BeatSynth {
    samples: HashMap<String, AudioClip>,
    sample_rate: u32,
}

impl BeatSynth {
    /// Load the sample bank from `sounds_dir`. Missing samples are tolerated;
    /// their events are skipped at render time.
    pub fn new(sounds_dir: &Path) -> Self {
        let mut samples = HashMap::new();
        let mut sample_rate = 44_100;
        for (code, filename) in SAMPLE_FILES {
            let path = sounds_dir.join(filename);
            match AudioClip::load(&path) {
                Ok(clip) => {
                    sample_rate = clip.sample_rate;
                    samples.insert(code.to_string(), clip);
                }
                Err(e) => warn!("Sample {code} unavailable: {e}"),
            }
        }
        info!("Loaded {} percussion samples", samples.len());
        Self { samples, sample_rate }
    }

    /// Render one loop of the pattern.
    pub fn synthesize(&self, pattern: &BeatPattern) -> AudioClip {
        let bpm = pattern.metadata.bpm as f64;
        let beats_per_bar = pattern.metadata.time_signature.0 as f64;
        let ms_per_beat = 60_000.0 / bpm;
        let mut output = AudioClip::silence(pattern.loop_duration_ms(), self.sample_rate);

        for bar in &pattern.pattern {
            let bar_offset_beats = (bar.bar - 1) as f64 * beats_per_bar;
            for position in &bar.beats {
                // Beat 1 is the start of the bar.
                let absolute_beat = bar_offset_beats + position.beat;
                let position_ms = (absolute_beat - 1.0) * ms_per_beat;
                let offset =
                    (position_ms / 1000.0 * self.sample_rate as f64) as usize;
                for event in &position.events {
                    if event.sound == "-" {
                        continue;
                    }
                    let Some(sample) = self.samples.get(&event.sound) else {
                        continue;
                    };
                    overlay_at(&mut output, sample, offset);
                }
            }
        }
        output
    }

    /// Parse, validate, render and loop a JSON pattern to a WAV file.
    pub fn render_to_file(
        &self,
        json: &str,
        loops: u32,
        output_path: &Path,
    ) -> Result<(PathBuf, BeatPattern)> {
        let pattern = BeatPattern::from_json(json)?;
        let single = self.synthesize(&pattern);
        let total_ms = single.duration_ms() * loops.max(1) as u64;
        let looped = mixer::loop_to_length(&single, total_ms);
        looped.save(output_path)?;
        info!(
            "Rendered beat pattern '{}' ({} bpm, {} bars, {} loops) to {}",
            pattern.metadata.title,
            pattern.metadata.bpm,
            pattern.metadata.bars,
            loops,
            output_path.display()
        );
        Ok((output_path.to_path_buf(), pattern))
    }
}

/// Add `sample` into `base` starting at `offset`, clamped, without growing the
/// base buffer. Events near the loop end are truncated.
fn overlay_at(base: &mut AudioClip, sample: &AudioClip, offset: usize) {
    let sample = sample.resampled(base.sample_rate);
    for (i, &value) in sample.samples.iter().enumerate() {
        let Some(slot) = base.samples.get_mut(offset + i) else {
            break;
        };
        *slot = (*slot + value).clamp(-1.0, 1.0);
    }
}
