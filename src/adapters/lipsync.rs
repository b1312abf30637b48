//! Sync Labs lip-sync adapter.
//!
//! The provider fetches both inputs itself, so video and audio must already
//! be reachable by URL before a job is created.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use serde_json::json;
use uuid::Uuid;

use super::{download_to_file, AdapterResult, FailureReason, LipSync};
use crate::config::{AppConfig, PollSettings};

const CREATE_TIMEOUT: Duration = Duration::from_secs(60);
const MODEL: &str = "lipsync-2";

pub struct SyncLabs {
    client: reqwest::Client,
    api_key: Option<String>,
    api_base: String,
    poll: PollSettings,
    output_dir: PathBuf,
}

impl SyncLabs {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.lipsync_api_key.clone(),
            api_base: config.lipsync_api_base.trim_end_matches('/').to_string(),
            poll: config.lipsync_poll,
            output_dir: config.output_dir.clone(),
        }
    }

    fn key(&self) -> AdapterResult<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| FailureReason::ConfigMissing("SYNC_API_KEY not set".into()))
    }

    async fn poll_generation(&self, generation_id: &str) -> AdapterResult<String> {
        let deadline = tokio::time::Instant::now() + self.poll.max_wait();
        loop {
            let response = self
                .client
                .get(format!("{}/generate/{generation_id}", self.api_base))
                .header("x-api-key", self.key()?)
                .timeout(Duration::from_secs(30))
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
            let status = data["status"].as_str().unwrap_or("UNKNOWN");
            debug!("Generation {generation_id} status: {status}");

            match status {
                "COMPLETED" => {
                    return data["outputUrl"].as_str().map(str::to_string).ok_or_else(|| {
                        FailureReason::Malformed("completed without output URL".into())
                    });
                }
                "FAILED" => {
                    let error = data["error"].as_str().unwrap_or("unknown error");
                    return Err(FailureReason::upstream(None, format!("lip sync failed: {error}")));
                }
                "REJECTED" => {
                    return Err(FailureReason::upstream(None, "lip sync job was rejected"));
                }
                "PENDING" | "PROCESSING" => {}
                other => {
                    return Err(FailureReason::Malformed(format!("unknown job status: {other}")));
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(FailureReason::Timeout(format!(
                    "lip sync {generation_id} did not finish within {}s",
                    self.poll.max_wait_secs
                )));
            }
            tokio::time::sleep(self.poll.interval()).await;
        }
    }
}

#[async_trait]
impl LipSync for SyncLabs {
    async fn lipsync(
        &self,
        video_url: &str,
        audio_url: &str,
        sync_mode: &str,
    ) -> AdapterResult<PathBuf> {
        let key = self.key()?;
        if !video_url.starts_with("http") || !audio_url.starts_with("http") {
            return Err(FailureReason::Malformed(
                "lip sync inputs must be URLs, upload them first".into(),
            ));
        }

        let response = self
            .client
            .post(format!("{}/generate", self.api_base))
            .header("x-api-key", key)
            .json(&json!({
                "model": MODEL,
                "input": [
                    {"type": "video", "url": video_url},
                    {"type": "audio", "url": audio_url},
                ],
                "options": {"sync_mode": sync_mode},
            }))
            .timeout(CREATE_TIMEOUT)
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
        let generation_id = data["id"]
            .as_str()
            .ok_or_else(|| FailureReason::Malformed("no generation id in response".into()))?;
        info!("Lip sync job {generation_id} created, polling for completion");

        let output_url = self.poll_generation(generation_id).await?;
        let output_path = self
            .output_dir
            .join(format!("lipsynced_{}.mp4", Uuid::new_v4()));
        download_to_file(&self.client, &output_url, &output_path).await?;
        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_is_config_failure() {
        let config = AppConfig::default();
        let adapter = SyncLabs::new(&config);
        let err = adapter
            .lipsync("https://host/video.mp4", "https://host/audio.mp3", "loop")
            .await
            .unwrap_err();
        assert!(matches!(err, FailureReason::ConfigMissing(_)));
    }

    #[tokio::test]
    async fn local_paths_are_rejected() {
        let mut config = AppConfig::default();
        config.lipsync_api_key = Some("test-key".into());
        let adapter = SyncLabs::new(&config);
        let err = adapter
            .lipsync("/tmp/video.mp4", "https://host/audio.mp3", "loop")
            .await
            .unwrap_err();
        assert!(matches!(err, FailureReason::Malformed(_)));
    }
}
