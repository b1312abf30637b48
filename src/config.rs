//! Crate configuration.
//!
//! All external endpoints, credentials and tunables live here so that the
//! pipeline itself never touches the environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Named style presets resolved against [`AppConfig::voices_dir`].
///
/// Each entry maps a style tag to a delivery/cadence sample clip.
pub const STYLE_PRESETS: &[(&str, &str)] = &[
    ("UK Grime 1 (Stormzy)", "stormzy_trimmed.wav"),
    ("NY Rap (A$AP Rocky)", "asap_rocky_trimmed.wav"),
    ("Toronto Rap (Drake)", "drake_pushups_trimmed.wav"),
    ("West Coast (Kendrick)", "kendrick_euphoria_trimmed.wav"),
];

/// Polling parameters for long-running external jobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PollSettings {
    /// Seconds between status checks.
    pub interval_secs: u64,
    /// Give up after this many seconds; surfaces as a stage failure.
    pub max_wait_secs: u64,
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

/// Configuration for the battle pipeline and its service adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Flat directory all generated artifacts are written to.
    pub output_dir: PathBuf,
    /// Directory holding the percussion sample bank (WAV files).
    pub sounds_dir: PathBuf,
    /// Directory holding the style preset voice clips.
    pub voices_dir: PathBuf,

    /// Key for the voice synthesis / beat pattern / image endpoints.
    pub voice_api_key: Option<String>,
    pub voice_api_base: String,
    pub pattern_api_base: String,
    pub pattern_model: String,
    pub image_api_base: String,
    pub image_model: String,

    /// Key for the voice style transfer service.
    pub style_api_key: Option<String>,
    pub style_api_base: String,

    /// Key for the image-to-video animation service.
    pub video_api_key: Option<String>,
    pub video_api_base: String,
    pub video_api_version: String,

    /// Key for the lip-sync service.
    pub lipsync_api_key: Option<String>,
    pub lipsync_api_base: String,

    /// Transient public host the lip-sync provider fetches inputs from.
    pub hosting_api_base: String,

    /// Beat attenuation under the vocals, in dB.
    pub beat_gain_db: f32,
    /// Bars requested from the pattern generator.
    pub beat_bars: u32,
    /// Loop count when rendering the pattern to audio.
    pub beat_loops: u32,
    /// Buckets in the waveform visualization array.
    pub waveform_buckets: usize,
    /// Shot length requested from the animation service, in seconds.
    pub shot_duration_secs: u32,

    pub video_poll: PollSettings,
    pub lipsync_poll: PollSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outputs"),
            sounds_dir: PathBuf::from("sounds"),
            voices_dir: PathBuf::from("voices"),
            voice_api_key: None,
            voice_api_base: "https://us-east-4.api.x.ai/voice-staging".to_string(),
            pattern_api_base: "https://api.x.ai/v1".to_string(),
            pattern_model: "grok-2-latest".to_string(),
            image_api_base: "https://api.x.ai/v1".to_string(),
            image_model: "grok-2-image".to_string(),
            style_api_key: None,
            style_api_base: "https://api.elevenlabs.io/v1".to_string(),
            video_api_key: None,
            video_api_base: "https://api.dev.runwayml.com/v1".to_string(),
            video_api_version: "2024-11-06".to_string(),
            lipsync_api_key: None,
            lipsync_api_base: "https://api.sync.so/v2".to_string(),
            hosting_api_base: "https://tmpfiles.org/api/v1".to_string(),
            beat_gain_db: -10.0,
            beat_bars: 4,
            beat_loops: 8,
            waveform_buckets: 100,
            shot_duration_secs: 10,
            video_poll: PollSettings {
                interval_secs: 5,
                max_wait_secs: 300,
            },
            lipsync_poll: PollSettings {
                interval_secs: 10,
                max_wait_secs: 600,
            },
        }
    }
}

impl AppConfig {
    /// Build a configuration from the environment, falling back to defaults
    /// for everything but the credentials.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.voice_api_key = env::var("XAI_API_KEY").ok().filter(|k| !k.is_empty());
        config.style_api_key = env::var("ELEVENLABS_API_KEY").ok().filter(|k| !k.is_empty());
        config.video_api_key = env::var("RUNWAYML_API_SECRET").ok().filter(|k| !k.is_empty());
        config.lipsync_api_key = env::var("SYNC_API_KEY").ok().filter(|k| !k.is_empty());
        if let Ok(dir) = env::var("BEATCLASH_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("BEATCLASH_SOUNDS_DIR") {
            config.sounds_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("BEATCLASH_VOICES_DIR") {
            config.voices_dir = PathBuf::from(dir);
        }
        config
    }

    /// Resolve a style preset tag to the preset clip path, if the tag is known.
    pub fn preset_path(&self, style_tag: &str) -> Option<PathBuf> {
        STYLE_PRESETS
            .iter()
            .find(|(label, _)| *label == style_tag)
            .map(|(_, file)| self.voices_dir.join(file))
    }

    /// Translate an artifact path into the public URL path the thin HTTP
    /// layer serves it under.
    pub fn public_url(&self, path: &std::path::Path) -> String {
        match path.file_name() {
            Some(name) => format!("/outputs/{}", name.to_string_lossy()),
            None => "/outputs/".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_lookup() {
        let config = AppConfig::default();
        let path = config.preset_path("West Coast (Kendrick)").unwrap();
        assert!(path.ends_with("kendrick_euphoria_trimmed.wav"));
        assert!(config.preset_path("no such preset").is_none());
    }

    #[test]
    fn public_url_uses_file_name_only() {
        let config = AppConfig::default();
        let url = config.public_url(std::path::Path::new("/tmp/deep/battle_abc.wav"));
        assert_eq!(url, "/outputs/battle_abc.wav");
    }
}
