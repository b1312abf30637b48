//! Battle configuration and run state.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::{BattleStage, ProgressSnapshot};
use crate::audio::align::TimingData;

/// One fighter's inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FighterConfig {
    pub name: String,
    pub description: String,
    /// Style preset tag, resolved against the preset table.
    pub style_tag: String,
    pub lyrics: String,
    /// Uploaded voice identity sample, if any.
    pub voice_path: Option<PathBuf>,
    /// Uploaded reference photo, if any.
    pub image_path: Option<PathBuf>,
    pub social_handle: Option<String>,
}

/// Immutable input to a battle run. Lyrics may still be empty at construction
/// time; the voice stage enforces non-empty lyrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleConfig {
    pub theme: String,
    pub visual_style: String,
    pub location: String,
    pub beat_style: String,
    pub test_mode: bool,
    pub audio_only: bool,
    pub celebrity_mode: bool,
    pub fighter_a: FighterConfig,
    pub fighter_b: FighterConfig,
}

impl BattleConfig {
    /// Minimal audio-only configuration, mostly for tests and the arena UI
    /// default path.
    pub fn arena(beat_style: &str, fighter_a: FighterConfig, fighter_b: FighterConfig) -> Self {
        Self {
            theme: String::new(),
            visual_style: "Photorealistic".to_string(),
            location: "underground hip-hop club".to_string(),
            beat_style: beat_style.to_string(),
            test_mode: false,
            audio_only: true,
            celebrity_mode: false,
            fighter_a,
            fighter_b,
        }
    }
}

/// The mutable record of a single run. Written only by the run's own
/// pipeline task, read by any concurrent status or stream request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleState {
    pub battle_id: Uuid,
    pub config: BattleConfig,
    pub stage: BattleStage,
    pub progress: f64,
    pub message: String,
    pub audio_url: Option<String>,
    pub video_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,

    // Accumulated artifacts.
    pub audio_clips: Vec<PathBuf>,
    pub detected_bpm: Option<f64>,
    pub beat_path: Option<PathBuf>,
    pub mixed_audio_path: Option<PathBuf>,
    pub waveform: Option<Vec<f32>>,
    pub timing_data: Option<TimingData>,
    pub storyboard_images: Vec<PathBuf>,
    pub video_segments: Vec<PathBuf>,
    pub talkhead_a_url: Option<String>,
    pub talkhead_b_url: Option<String>,
}

impl BattleState {
    pub fn new(battle_id: Uuid, config: BattleConfig) -> Self {
        Self {
            battle_id,
            config,
            stage: BattleStage::Queued,
            progress: 0.0,
            message: "Battle queued".to_string(),
            audio_url: None,
            video_url: None,
            error: None,
            created_at: Utc::now(),
            audio_clips: Vec::new(),
            detected_bpm: None,
            beat_path: None,
            mixed_audio_path: None,
            waveform: None,
            timing_data: None,
            storyboard_images: Vec::new(),
            video_segments: Vec::new(),
            talkhead_a_url: None,
            talkhead_b_url: None,
        }
    }

    /// The fixed projection pushed to the progress stream.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            battle_id: self.battle_id.to_string(),
            stage: self.stage,
            progress: self.progress,
            message: self.message.clone(),
            status: self.stage.status().to_string(),
            audio_url: self.audio_url.clone(),
            video_url: self.video_url.clone(),
            detected_bpm: self.detected_bpm,
            error: self.error.clone(),
            waveform: self.waveform.clone(),
            timing_data: self.timing_data.clone(),
            talkhead_a_url: self.talkhead_a_url.clone(),
            talkhead_b_url: self.talkhead_b_url.clone(),
        }
    }
}
