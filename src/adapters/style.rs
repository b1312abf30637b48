//! ElevenLabs voice style transfer adapter.
//!
//! A style reference is made in two upstream steps: clone the identity sample
//! into a temporary voice, then run the delivery sample through
//! speech-to-speech against that voice. Celebrity mode wraps both ends in a
//! reversible pitch shift so the identity source does not trip upstream voice
//! fingerprint detection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use serde_json::json;
use uuid::Uuid;

use super::{AdapterResult, FailureReason, StyleReference, StyleTransfer};
use crate::audio::pitch::{pitch_shift_file, CELEBRITY_PITCH_FACTOR};
use crate::config::AppConfig;

const CLONE_TIMEOUT: Duration = Duration::from_secs(60);
const S2S_TIMEOUT: Duration = Duration::from_secs(120);

pub struct ElevenLabsStyle {
    client: reqwest::Client,
    api_key: Option<String>,
    api_base: String,
    output_dir: PathBuf,
}

impl ElevenLabsStyle {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.style_api_key.clone(),
            api_base: config.style_api_base.trim_end_matches('/').to_string(),
            output_dir: config.output_dir.clone(),
        }
    }

    fn key(&self) -> AdapterResult<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| FailureReason::ConfigMissing("ELEVENLABS_API_KEY not set".into()))
    }

    async fn clone_voice(&self, name: &str, audio_file: &Path) -> AdapterResult<String> {
        let key = self.key()?;
        let bytes = std::fs::read(audio_file).map_err(|e| {
            FailureReason::upstream(None, format!("cannot read {}: {e}", audio_file.display()))
        })?;
        let file_name = audio_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "identity.wav".to_string());

        let form = reqwest::multipart::Form::new()
            .text("name", name.to_string())
            .text("description", format!("Cloned voice: {name}"))
            .part(
                "files",
                reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("audio/mpeg")
                    .map_err(|e| FailureReason::Malformed(e.to_string()))?,
            );

        let response = self
            .client
            .post(format!("{}/voices/add", self.api_base))
            .header("xi-api-key", key)
            .multipart(form)
            .timeout(CLONE_TIMEOUT)
            .send()
            .await
            .map_err(FailureReason::from_request_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FailureReason::upstream(Some(status), body));
        }
        let data: serde_json::Value = response
            .json()
            .await
            .map_err(FailureReason::from_request_error)?;
        data["voice_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| FailureReason::Malformed("no voice_id in clone response".into()))
    }

    async fn speech_to_speech(
        &self,
        source_audio: &Path,
        voice_id: &str,
        stability: f32,
        similarity: f32,
    ) -> AdapterResult<PathBuf> {
        let key = self.key()?;
        let bytes = std::fs::read(source_audio).map_err(|e| {
            FailureReason::upstream(None, format!("cannot read {}: {e}", source_audio.display()))
        })?;
        let file_name = source_audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "style.wav".to_string());

        let voice_settings = json!({
            "stability": stability,
            "similarity_boost": similarity,
            "style": 0.0,
            "use_speaker_boost": true,
        });
        let form = reqwest::multipart::Form::new()
            .text("model_id", "eleven_multilingual_sts_v2")
            .text("remove_background_noise", "true")
            .text("voice_settings", voice_settings.to_string())
            .part(
                "audio",
                reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("audio/mpeg")
                    .map_err(|e| FailureReason::Malformed(e.to_string()))?,
            );

        let response = self
            .client
            .post(format!("{}/speech-to-speech/{voice_id}", self.api_base))
            .header("xi-api-key", key)
            .multipart(form)
            .timeout(S2S_TIMEOUT)
            .send()
            .await
            .map_err(FailureReason::from_request_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FailureReason::upstream(Some(status), body));
        }
        let audio = response
            .bytes()
            .await
            .map_err(FailureReason::from_request_error)?;
        let output_path = self.output_dir.join(format!("s2s_{}.mp3", Uuid::new_v4()));
        std::fs::create_dir_all(&self.output_dir)
            .and_then(|_| std::fs::write(&output_path, &audio))
            .map_err(|e| FailureReason::upstream(None, e.to_string()))?;
        Ok(output_path)
    }
}

#[async_trait]
impl StyleTransfer for ElevenLabsStyle {
    async fn create_style_reference(
        &self,
        identity_sample: &Path,
        style_sample: &Path,
        reference_name: &str,
        celebrity_mode: bool,
        stability: f32,
        similarity: f32,
    ) -> AdapterResult<StyleReference> {
        // The identity sample gets distorted before cloning, never the style
        // sample.
        let working_identity = if celebrity_mode {
            info!("Celebrity mode: pitch shifting identity sample down");
            let shifted = self
                .output_dir
                .join(format!("pitch_{}.wav", Uuid::new_v4()));
            pitch_shift_file(identity_sample, &shifted, CELEBRITY_PITCH_FACTOR)
                .map_err(|e| FailureReason::upstream(None, format!("pitch shift: {e}")))?;
            shifted
        } else {
            identity_sample.to_path_buf()
        };

        let voice_id = self.clone_voice(reference_name, &working_identity).await?;
        info!("Cloned voice {voice_id} for reference '{reference_name}'");

        let fused = self
            .speech_to_speech(style_sample, &voice_id, stability, similarity)
            .await?;

        let audio_path = if celebrity_mode {
            info!("Celebrity mode: reversing pitch shift on fused output");
            let corrected = self
                .output_dir
                .join(format!("pitch_{}.wav", Uuid::new_v4()));
            match pitch_shift_file(&fused, &corrected, 1.0 / CELEBRITY_PITCH_FACTOR) {
                Ok(()) => corrected,
                Err(e) => {
                    // Ship the uncorrected fusion rather than losing the run.
                    warn!("Pitch correction failed, keeping shifted output: {e}");
                    fused
                }
            }
        } else {
            fused
        };

        Ok(StyleReference {
            audio_path,
            voice_id: Some(voice_id),
        })
    }

    async fn delete_voice(&self, voice_id: &str) -> AdapterResult<()> {
        let key = self.key()?;
        let response = self
            .client
            .delete(format!("{}/voices/{voice_id}", self.api_base))
            .header("xi-api-key", key)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(FailureReason::from_request_error)?;
        if response.status().is_success() {
            info!("Deleted cloned voice {voice_id}");
            Ok(())
        } else {
            Err(FailureReason::upstream(
                Some(response.status().as_u16()),
                response.text().await.unwrap_or_default(),
            ))
        }
    }
}
