//! Transient file hosting for the lip-sync provider.
//!
//! tmpfiles.org keeps uploads for an hour, long enough for the provider to
//! fetch them. The page URL it returns is rewritten to the direct download
//! form before being handed on.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use log::info;

use super::{AdapterResult, FailureReason, TransientHost};
use crate::config::AppConfig;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

pub struct TmpFilesHost {
    client: reqwest::Client,
    api_base: String,
}

impl TmpFilesHost {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: config.hosting_api_base.trim_end_matches('/').to_string(),
        }
    }
}

/// `https://tmpfiles.org/123/file.mp4` -> `https://tmpfiles.org/dl/123/file.mp4`
fn to_direct_url(page_url: &str) -> String {
    page_url.replacen("tmpfiles.org/", "tmpfiles.org/dl/", 1)
}

#[async_trait]
impl TransientHost for TmpFilesHost {
    async fn upload(&self, path: &Path) -> AdapterResult<String> {
        let bytes = std::fs::read(path).map_err(|e| {
            FailureReason::upstream(None, format!("cannot read {}: {e}", path.display()))
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());

        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(bytes).file_name(file_name),
        );

        let response = self
            .client
            .post(format!("{}/upload", self.api_base))
            .multipart(form)
            .timeout(UPLOAD_TIMEOUT)
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
        let page_url = data["data"]["url"]
            .as_str()
            .ok_or_else(|| FailureReason::Malformed("no url in upload response".into()))?;

        let direct = to_direct_url(page_url);
        info!("Uploaded {} -> {direct}", path.display());
        Ok(direct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_url_becomes_direct_download() {
        assert_eq!(
            to_direct_url("https://tmpfiles.org/123/clip.mp4"),
            "https://tmpfiles.org/dl/123/clip.mp4"
        );
        // Already-direct URLs are left intact apart from the first occurrence
        // rule, which only fires once.
        assert_eq!(
            to_direct_url("https://example.com/clip.mp4"),
            "https://example.com/clip.mp4"
        );
    }

    #[tokio::test]
    async fn unreadable_file_is_upstream_failure() {
        let host = TmpFilesHost::new(&AppConfig::default());
        let err = host.upload(Path::new("/no/such/file.mp4")).await.unwrap_err();
        assert!(matches!(err, FailureReason::Upstream { .. }));
    }
}
