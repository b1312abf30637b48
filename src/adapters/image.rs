//! Grok image generation and identity-preserving edits for storyboards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use log::info;
use serde_json::json;
use uuid::Uuid;

use super::{download_to_file, image_data_url, AdapterResult, FailureReason, ImageGeneration};
use crate::config::AppConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const EDIT_MODEL: &str = "grok-imagine-v0p9";

pub struct GrokImage {
    client: reqwest::Client,
    api_key: Option<String>,
    api_base: String,
    model: String,
    output_dir: PathBuf,
}

impl GrokImage {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.voice_api_key.clone(),
            api_base: config.image_api_base.trim_end_matches('/').to_string(),
            model: config.image_model.clone(),
            output_dir: config.output_dir.clone(),
        }
    }

    fn key(&self) -> AdapterResult<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| FailureReason::ConfigMissing("XAI_API_KEY not set".into()))
    }

    fn output_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("storyboard_{}.png", Uuid::new_v4()))
    }

    /// Text-to-image generation; the image comes back inline as base64.
    async fn generate_new(&self, prompt: &str) -> AdapterResult<PathBuf> {
        let response = self
            .client
            .post(format!("{}/images/generations", self.api_base))
            .bearer_auth(self.key()?)
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "n": 1,
                "response_format": "b64_json",
            }))
            .timeout(REQUEST_TIMEOUT)
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
        let b64 = data["data"][0]["b64_json"]
            .as_str()
            .ok_or_else(|| FailureReason::Malformed("no b64_json in image response".into()))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| FailureReason::Malformed(format!("bad base64 image: {e}")))?;

        let output_path = self.output_path();
        std::fs::create_dir_all(&self.output_dir)
            .and_then(|_| std::fs::write(&output_path, &bytes))
            .map_err(|e| FailureReason::upstream(None, e.to_string()))?;
        info!("Storyboard image written to {}", output_path.display());
        Ok(output_path)
    }

    /// Identity-preserving edit of a reference photo; the result is returned
    /// by URL and downloaded locally.
    async fn edit_existing(&self, prompt: &str, source_image: &Path) -> AdapterResult<PathBuf> {
        let data_url = image_data_url(source_image)?;
        let response = self
            .client
            .post(format!("{}/images/edits", self.api_base))
            .bearer_auth(self.key()?)
            .json(&json!({
                "model": EDIT_MODEL,
                "prompt": prompt,
                "image": {"url": data_url},
                "n": 1,
                "response_format": "url",
            }))
            .timeout(REQUEST_TIMEOUT)
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
        let image_url = data["data"][0]["url"]
            .as_str()
            .ok_or_else(|| FailureReason::Malformed("no url in image edit response".into()))?;

        let output_path = self.output_path();
        download_to_file(&self.client, image_url, &output_path).await?;
        Ok(output_path)
    }
}

#[async_trait]
impl ImageGeneration for GrokImage {
    async fn generate(
        &self,
        prompt: &str,
        source_image: Option<&Path>,
    ) -> AdapterResult<PathBuf> {
        match source_image.filter(|p| p.exists()) {
            Some(source) => self.edit_existing(prompt, source).await,
            None => self.generate_new(prompt).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_is_config_failure() {
        let config = AppConfig::default();
        let adapter = GrokImage::new(&config);
        let err = adapter.generate("a rapper on stage", None).await.unwrap_err();
        assert!(matches!(err, FailureReason::ConfigMissing(_)));
    }
}
