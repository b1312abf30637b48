//! Grok Voice text-to-speech adapter.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use serde_json::json;
use uuid::Uuid;

use super::{file_to_base64, AdapterResult, FailureReason, VoiceSynthesis};
use crate::config::AppConfig;

/// Lyrics beyond this are truncated before synthesis.
const MAX_INPUT_LENGTH: usize = 4096;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct GrokVoice {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
    output_dir: PathBuf,
}

impl GrokVoice {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.voice_api_key.clone(),
            endpoint: format!(
                "{}/api/v1/text-to-speech/generate",
                config.voice_api_base.trim_end_matches('/')
            ),
            output_dir: config.output_dir.clone(),
        }
    }
}

/// Fold a tempo hint into the delivery instructions so the model paces the
/// performance to the beat.
fn build_tempo_instructions(base: &str, bpm: Option<u32>, style: Option<&str>) -> String {
    let style_suffix = style.map(|s| format!(" {s} style")).unwrap_or_default();
    let Some(bpm) = bpm else {
        if style_suffix.is_empty() {
            return base.to_string();
        }
        return format!("{base}. Delivery:{style_suffix}");
    };
    let tempo_desc = match bpm {
        60..=89 => "slow, deliberate",
        90..=119 => "moderate groove",
        120..=149 => "energetic, punchy",
        150..=179 => "rapid-fire, intense",
        _ => "moderate",
    };
    format!("{base}. Delivery: {tempo_desc} at {bpm} BPM{style_suffix}")
}

fn truncate_lyrics(lyrics: &str) -> &str {
    if lyrics.len() <= MAX_INPUT_LENGTH {
        return lyrics;
    }
    let mut cut = MAX_INPUT_LENGTH;
    while !lyrics.is_char_boundary(cut) {
        cut -= 1;
    }
    &lyrics[..cut]
}

#[async_trait]
impl VoiceSynthesis for GrokVoice {
    async fn synthesize(
        &self,
        lyrics: &str,
        style_instructions: &str,
        voice_sample: Option<&Path>,
        tempo_hint: Option<u32>,
        beat_style: Option<&str>,
    ) -> AdapterResult<PathBuf> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| FailureReason::ConfigMissing("XAI_API_KEY not set".into()))?;
        if lyrics.trim().is_empty() {
            return Err(FailureReason::Malformed("no lyrics provided".into()));
        }

        let voice = match voice_sample.filter(|p| p.exists()) {
            Some(path) => file_to_base64(path)?,
            None => "None".to_string(),
        };
        let instructions = build_tempo_instructions(style_instructions, tempo_hint, beat_style);
        info!("Synthesizing rap vocal ({} chars of lyrics)", lyrics.len());

        let payload = json!({
            "model": "grok-voice",
            "input": truncate_lyrics(lyrics),
            "response_format": "mp3",
            "instructions": instructions,
            "voice": voice,
            "sampling_params": {
                "max_new_tokens": 512,
                "temperature": 1.0,
                "min_p": 0.01,
            },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(FailureReason::from_request_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FailureReason::upstream(Some(status), body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(FailureReason::from_request_error)?;
        let output_path = self.output_dir.join(format!("voice_{}.mp3", Uuid::new_v4()));
        std::fs::create_dir_all(&self.output_dir)
            .and_then(|_| std::fs::write(&output_path, &bytes))
            .map_err(|e| FailureReason::upstream(None, e.to_string()))?;
        info!("Rap vocal written to {}", output_path.display());
        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tempo_instructions_map_bpm_ranges() {
        let base = "aggressive hip-hop rapper";
        assert_eq!(build_tempo_instructions(base, None, None), base);
        assert_eq!(
            build_tempo_instructions(base, Some(95), Some("boom bap")),
            "aggressive hip-hop rapper. Delivery: moderate groove at 95 BPM boom bap style"
        );
        assert!(build_tempo_instructions(base, Some(140), None)
            .contains("energetic, punchy at 140 BPM"));
        assert!(build_tempo_instructions(base, Some(70), None).contains("slow, deliberate"));
    }

    #[test]
    fn beat_style_survives_without_a_tempo_hint() {
        let base = "aggressive hip-hop rapper";
        assert_eq!(
            build_tempo_instructions(base, None, Some("trap")),
            "aggressive hip-hop rapper. Delivery: trap style"
        );
    }

    #[test]
    fn lyrics_are_truncated_on_char_boundary() {
        let long = "é".repeat(3000); // 6000 bytes
        let cut = truncate_lyrics(&long);
        assert!(cut.len() <= MAX_INPUT_LENGTH);
        assert!(cut.chars().all(|c| c == 'é'));

        let short = "short lyrics";
        assert_eq!(truncate_lyrics(short), short);
    }

    #[tokio::test]
    async fn missing_key_is_config_failure() {
        let config = AppConfig::default();
        let adapter = GrokVoice::new(&config);
        let err = adapter
            .synthesize("some bars", "style", None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FailureReason::ConfigMissing(_)));
    }

    #[tokio::test]
    async fn empty_lyrics_are_rejected_before_any_request() {
        let mut config = AppConfig::default();
        config.voice_api_key = Some("test-key".into());
        let adapter = GrokVoice::new(&config);
        let err = adapter
            .synthesize("   ", "style", None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FailureReason::Malformed(_)));
    }
}
