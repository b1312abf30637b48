//! Runway image-to-video animation adapter.
//!
//! A generation is a two-phase job: create the task, then poll it until a
//! terminal status or the configured deadline. With an audio clip attached the
//! act_two model drives lip movement from the performance audio.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use serde_json::json;
use uuid::Uuid;

use super::{
    download_to_file, file_to_base64, image_data_url, AdapterResult, FailureReason, VideoAnimation,
};
use crate::config::{AppConfig, PollSettings};

const CREATE_TIMEOUT: Duration = Duration::from_secs(60);
const MODEL: &str = "gen4_turbo";
const LIPSYNC_MODEL: &str = "act_two";
const RATIO: &str = "1280:720";

pub struct RunwayVideo {
    client: reqwest::Client,
    api_key: Option<String>,
    api_base: String,
    api_version: String,
    poll: PollSettings,
    output_dir: PathBuf,
}

impl RunwayVideo {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.video_api_key.clone(),
            api_base: config.video_api_base.trim_end_matches('/').to_string(),
            api_version: config.video_api_version.clone(),
            poll: config.video_poll,
            output_dir: config.output_dir.clone(),
        }
    }

    fn key(&self) -> AdapterResult<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| FailureReason::ConfigMissing("RUNWAYML_API_SECRET not set".into()))
    }

    /// Poll the task until it reaches a terminal status or the deadline.
    async fn poll_task(&self, task_id: &str) -> AdapterResult<String> {
        let deadline = tokio::time::Instant::now() + self.poll.max_wait();
        loop {
            let response = self
                .client
                .get(format!("{}/tasks/{task_id}", self.api_base))
                .bearer_auth(self.key()?)
                .header("X-Runway-Version", &self.api_version)
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
            debug!("Task {task_id} status: {status}");

            match status {
                "SUCCEEDED" => {
                    return data["output"][0]
                        .as_str()
                        .map(str::to_string)
                        .ok_or_else(|| {
                            FailureReason::Malformed("task succeeded without output".into())
                        });
                }
                "FAILED" => {
                    let failure = data["failure"].as_str().unwrap_or("unknown error");
                    return Err(FailureReason::upstream(None, format!("task failed: {failure}")));
                }
                _ => {}
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(FailureReason::Timeout(format!(
                    "video task {task_id} did not finish within {}s",
                    self.poll.max_wait_secs
                )));
            }
            tokio::time::sleep(self.poll.interval()).await;
        }
    }
}

#[async_trait]
impl VideoAnimation for RunwayVideo {
    async fn animate(
        &self,
        image_path: &Path,
        prompt: &str,
        duration_secs: u32,
        audio_path: Option<&Path>,
    ) -> AdapterResult<PathBuf> {
        let key = self.key()?;
        let prompt_image = image_data_url(image_path)?;

        let mut payload = json!({
            "model": MODEL,
            "promptImage": prompt_image,
            "promptText": prompt,
            "ratio": RATIO,
            "duration": duration_secs,
        });
        if let Some(audio) = audio_path.filter(|p| p.exists()) {
            payload["model"] = json!(LIPSYNC_MODEL);
            payload["audio"] = json!(format!(
                "data:audio/mpeg;base64,{}",
                file_to_base64(audio)?
            ));
        }

        let response = self
            .client
            .post(format!("{}/image_to_video", self.api_base))
            .bearer_auth(key)
            .header("X-Runway-Version", &self.api_version)
            .json(&payload)
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
        let task_id = data["id"]
            .as_str()
            .ok_or_else(|| FailureReason::Malformed("no task id in create response".into()))?;
        info!("Video task {task_id} created, polling for completion");

        let video_url = self.poll_task(task_id).await?;
        let output_path = self.output_dir.join(format!("video_{}.mp4", Uuid::new_v4()));
        download_to_file(&self.client, &video_url, &output_path).await?;
        Ok(output_path)
    }
}
