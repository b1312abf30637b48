//! External service adapters.
//!
//! Each adapter wraps one provider behind a trait so the orchestrator can be
//! tested against in-memory fakes. Adapters never propagate ordinary upstream
//! failures as errors; they return [`FailureReason`] values and let the
//! orchestrator decide per stage whether a failure is fatal or degradable.

pub mod beatgen;
pub mod hosting;
pub mod image;
pub mod lipsync;
pub mod style;
pub mod video;
pub mod voice;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use serde::Serialize;
use thiserror::Error;

/// Why an adapter call produced no artifact.
#[derive(Debug, Clone, Error, Serialize)]
pub enum FailureReason {
    #[error("missing configuration: {0}")]
    ConfigMissing(String),

    #[error("upstream error{}: {detail}", .status.map(|s| format!(" {s}")).unwrap_or_default())]
    Upstream {
        status: Option<u16>,
        detail: String,
    },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FailureReason {
    pub fn upstream(status: Option<u16>, detail: impl Into<String>) -> Self {
        FailureReason::Upstream {
            status,
            detail: detail.into(),
        }
    }

    pub(crate) fn from_request_error(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FailureReason::Timeout(err.to_string())
        } else {
            FailureReason::Upstream {
                status: err.status().map(|s| s.as_u16()),
                detail: err.to_string(),
            }
        }
    }
}

/// The adapter calling convention: an artifact or a structured failure.
pub type AdapterResult<T> = std::result::Result<T, FailureReason>;

/// A fused voice sample plus the upstream voice id it was cloned through.
#[derive(Debug, Clone)]
pub struct StyleReference {
    pub audio_path: PathBuf,
    pub voice_id: Option<String>,
}

#[async_trait]
pub trait VoiceSynthesis: Send + Sync {
    /// Synthesize rap vocals for the given lyrics, optionally cloning the
    /// voice from a sample and adapting delivery to a tempo hint.
    async fn synthesize(
        &self,
        lyrics: &str,
        style_instructions: &str,
        voice_sample: Option<&Path>,
        tempo_hint: Option<u32>,
        beat_style: Option<&str>,
    ) -> AdapterResult<PathBuf>;
}

#[async_trait]
pub trait StyleTransfer: Send + Sync {
    /// Fuse a voice identity sample with a delivery/cadence sample.
    async fn create_style_reference(
        &self,
        identity_sample: &Path,
        style_sample: &Path,
        reference_name: &str,
        celebrity_mode: bool,
        stability: f32,
        similarity: f32,
    ) -> AdapterResult<StyleReference>;

    /// Delete an upstream cloned voice once the run no longer needs it.
    async fn delete_voice(&self, voice_id: &str) -> AdapterResult<()>;
}

#[async_trait]
pub trait BeatPatternSource: Send + Sync {
    /// Generate a beat pattern as JSON text at the given tempo.
    async fn generate_pattern(&self, style: &str, bpm: u32, bars: u32) -> AdapterResult<String>;
}

#[async_trait]
pub trait ImageGeneration: Send + Sync {
    /// Generate an image from a prompt, or edit `source_image` when given
    /// (identity-preserving edit mode).
    async fn generate(
        &self,
        prompt: &str,
        source_image: Option<&Path>,
    ) -> AdapterResult<PathBuf>;
}

#[async_trait]
pub trait VideoAnimation: Send + Sync {
    /// Animate a still image into a short video, optionally driving lip
    /// movement from an audio clip. Polls the upstream job to completion.
    async fn animate(
        &self,
        image_path: &Path,
        prompt: &str,
        duration_secs: u32,
        audio_path: Option<&Path>,
    ) -> AdapterResult<PathBuf>;
}

#[async_trait]
pub trait LipSync: Send + Sync {
    /// Lip-sync a video to an audio track. Both inputs must already be
    /// reachable by URL; see [`TransientHost`].
    async fn lipsync(
        &self,
        video_url: &str,
        audio_url: &str,
        sync_mode: &str,
    ) -> AdapterResult<PathBuf>;
}

#[async_trait]
pub trait TransientHost: Send + Sync {
    /// Upload a local file to a transient public host, returning the URL the
    /// lip-sync provider can fetch it from.
    async fn upload(&self, path: &Path) -> AdapterResult<String>;
}

/// The full adapter bundle a battle run is given. Swappable wholesale in
/// tests.
#[derive(Clone)]
pub struct MediaServices {
    pub voice: Arc<dyn VoiceSynthesis>,
    pub style: Arc<dyn StyleTransfer>,
    pub patterns: Arc<dyn BeatPatternSource>,
    pub images: Arc<dyn ImageGeneration>,
    pub video: Arc<dyn VideoAnimation>,
    pub lipsync: Arc<dyn LipSync>,
    pub hosting: Arc<dyn TransientHost>,
}

impl MediaServices {
    /// Production bundle wired from configuration.
    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self {
            voice: Arc::new(voice::GrokVoice::new(config)),
            style: Arc::new(style::ElevenLabsStyle::new(config)),
            patterns: Arc::new(beatgen::GrokPatternSource::new(config)),
            images: Arc::new(image::GrokImage::new(config)),
            video: Arc::new(video::RunwayVideo::new(config)),
            lipsync: Arc::new(lipsync::SyncLabs::new(config)),
            hosting: Arc::new(hosting::TmpFilesHost::new(config)),
        }
    }
}

/// Run two independent fallible futures concurrently and return both
/// outcomes. Partial success is representable: one side failing does not
/// discard the other side's artifact.
pub async fn join_fallible_pair<T, FA, FB>(a: FA, b: FB) -> (AdapterResult<T>, AdapterResult<T>)
where
    FA: std::future::Future<Output = AdapterResult<T>>,
    FB: std::future::Future<Output = AdapterResult<T>>,
{
    futures::future::join(a, b).await
}

/// Stream an HTTP response body to a local file, chunk by chunk.
pub(crate) async fn download_to_file(
    client: &reqwest::Client,
    url: &str,
    output_path: &Path,
) -> AdapterResult<()> {
    use futures::StreamExt;
    use tokio::io::AsyncWriteExt;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(FailureReason::from_request_error)?;
    if !response.status().is_success() {
        return Err(FailureReason::upstream(
            Some(response.status().as_u16()),
            format!("download failed for {url}"),
        ));
    }
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| FailureReason::upstream(None, e.to_string()))?;
    }
    let mut file = tokio::fs::File::create(output_path)
        .await
        .map_err(|e| FailureReason::upstream(None, e.to_string()))?;
    let mut stream = response.bytes_stream();
    let mut total = 0usize;
    while let Some(chunk) = stream.next().await {
        let chunk: bytes::Bytes = chunk.map_err(FailureReason::from_request_error)?;
        total += chunk.len();
        file.write_all(&chunk)
            .await
            .map_err(|e| FailureReason::upstream(None, e.to_string()))?;
    }
    file.flush()
        .await
        .map_err(|e| FailureReason::upstream(None, e.to_string()))?;
    info!("Downloaded {total} bytes to {}", output_path.display());
    Ok(())
}

/// Read a local file as base64 for providers that take inline payloads.
pub(crate) fn file_to_base64(path: &Path) -> AdapterResult<String> {
    use base64::Engine;
    let bytes = std::fs::read(path).map_err(|e| {
        FailureReason::upstream(None, format!("cannot read {}: {e}", path.display()))
    })?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Data URL for inline image payloads.
pub(crate) fn image_data_url(path: &Path) -> AdapterResult<String> {
    let mime = match path.extension().and_then(|e| e.to_str()) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    };
    Ok(format!("data:{mime};base64,{}", file_to_base64(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_pair_preserves_partial_success() {
        let ok = async { AdapterResult::Ok(PathBuf::from("a.mp4")) };
        let fail = async {
            AdapterResult::<PathBuf>::Err(FailureReason::Timeout("slow provider".into()))
        };
        let (left, right) = join_fallible_pair(ok, fail).await;
        assert_eq!(left.unwrap(), PathBuf::from("a.mp4"));
        assert!(matches!(right.unwrap_err(), FailureReason::Timeout(_)));
    }

    #[test]
    fn failure_reason_formats_status() {
        let reason = FailureReason::upstream(Some(503), "service unavailable");
        assert_eq!(reason.to_string(), "upstream error 503: service unavailable");
        let reason = FailureReason::upstream(None, "connection refused");
        assert_eq!(reason.to_string(), "upstream error: connection refused");
    }

    #[test]
    fn data_url_picks_mime_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.jpg");
        std::fs::write(&path, b"notarealimage").unwrap();
        let url = image_data_url(&path).unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
    }
}
