use crate::api::JobApi;
use crate::error::{ClientError, Result};
use crate::model::{ClientConfig, FormatCatalog, ProgressSnapshot, VideoMetadata};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// reqwest-backed client for the download service's JSON API.
pub struct HttpJobApi {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct VideoInfoRequest<'a> {
    url: &'a str,
}

#[derive(Debug, Serialize)]
struct StartDownloadRequest<'a> {
    url: &'a str,
    format_id: &'a str,
}

/// The server answers HTTP 200 with `success: false` plus a message on
/// application-level failures, so every response body carries the flag.
#[derive(Debug, Deserialize)]
struct VideoInfoResponse {
    success: bool,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<i64>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    formats: Option<FormatCatalog>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartDownloadResponse {
    success: bool,
    #[serde(default)]
    download_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArtifactErrorResponse {
    #[serde(default)]
    error: Option<String>,
}

impl HttpJobApi {
    pub fn new(cfg: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .user_agent(cfg.user_agent.clone())
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn video_info(&self, url: &str) -> Result<VideoMetadata> {
        let resp: VideoInfoResponse = self
            .http
            .post(self.endpoint("video_info"))
            .json(&VideoInfoRequest { url })
            .send()
            .await?
            .json()
            .await?;

        if !resp.success {
            return Err(ClientError::remote(
                resp.error,
                "failed to resolve video info",
            ));
        }
        Ok(VideoMetadata {
            title: resp.title.unwrap_or_else(|| "(untitled)".to_string()),
            duration_seconds: resp.duration,
            thumbnail_url: resp.thumbnail,
            description: resp.description,
            formats: resp.formats.unwrap_or_default(),
        })
    }

    async fn start_download(&self, url: &str, format_id: &str) -> Result<String> {
        let resp: StartDownloadResponse = self
            .http
            .post(self.endpoint("start_download"))
            .json(&StartDownloadRequest { url, format_id })
            .send()
            .await?
            .json()
            .await?;

        if !resp.success {
            return Err(ClientError::remote(resp.error, "failed to start download"));
        }
        resp.download_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ClientError::Remote("server returned no download id".to_string()))
    }

    async fn progress(&self, download_id: &str) -> Result<ProgressSnapshot> {
        let snapshot = self
            .http
            .get(self.endpoint(&format!("progress/{download_id}")))
            .send()
            .await?
            .json::<ProgressSnapshot>()
            .await?;
        Ok(snapshot)
    }

    async fn cancel(&self, download_id: &str) -> Result<()> {
        // Acknowledgment only; the body is not consumed for control flow.
        self.http
            .post(self.endpoint(&format!("cancel_download/{download_id}")))
            .send()
            .await?;
        Ok(())
    }

    async fn fetch_artifact(&self, download_id: &str, dest_dir: &Path) -> Result<PathBuf> {
        let resp = self
            .http
            .get(self.endpoint(&format!("download/{download_id}")))
            .send()
            .await?;

        // A JSON body here is the server refusing (job not complete, file gone).
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if content_type.contains("application/json") {
            let err: ArtifactErrorResponse = resp.json().await?;
            return Err(ClientError::remote(err.error, "artifact not available"));
        }

        let disposition = resp
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let filename = artifact_filename(disposition.as_deref(), download_id);
        let dest = dest_dir.join(filename);

        let mut file = tokio::fs::File::create(&dest).await?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(dest)
    }
}

/// Derive the local filename from a Content-Disposition header, falling back
/// to the job id. Path separators are stripped so a hostile header cannot
/// escape the output directory.
fn artifact_filename(disposition: Option<&str>, download_id: &str) -> String {
    let from_header = disposition.and_then(|value| {
        value.split(';').find_map(|part| {
            let part = part.trim();
            part.strip_prefix("filename=")
                .map(|name| name.trim_matches('"').to_string())
        })
    });
    let name = from_header
        .map(|n| {
            n.chars()
                .filter(|c| !matches!(c, '/' | '\\'))
                .collect::<String>()
        })
        .filter(|n| !n.is_empty());
    name.unwrap_or_else(|| format!("{download_id}.mp4"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobStatus;

    #[test]
    fn video_info_response_parses_catalog_and_error_shapes() {
        let ok: VideoInfoResponse = serde_json::from_str(
            r#"{
                "success": true,
                "title": "Some video",
                "duration": 212,
                "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/hqdefault.jpg",
                "description": "desc",
                "formats": {
                    "predefined": [{"id": "video_best", "display": "Best"}],
                    "video": [],
                    "audio": [{"id": "audio_128kbps", "display": "128 kbps"}]
                }
            }"#,
        )
        .unwrap();
        assert!(ok.success);
        let formats = ok.formats.unwrap();
        assert_eq!(formats.predefined.len(), 1);
        assert!(formats.video.is_empty());

        let err: VideoInfoResponse =
            serde_json::from_str(r#"{"success": false, "error": "video unavailable"}"#).unwrap();
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("video unavailable"));
    }

    #[test]
    fn progress_response_tolerates_missing_optionals() {
        let snap: ProgressSnapshot =
            serde_json::from_str(r#"{"status": "downloading", "progress": 42.5}"#).unwrap();
        assert_eq!(snap.status, JobStatus::Running);
        assert_eq!(snap.percent(), 42.5);
        assert!(snap.speed.is_none() && snap.eta.is_none());
    }

    #[test]
    fn artifact_filename_prefers_content_disposition() {
        assert_eq!(
            artifact_filename(Some(r#"attachment; filename="My_Video.mp4""#), "dl_1"),
            "My_Video.mp4"
        );
        assert_eq!(
            artifact_filename(Some("attachment; filename=plain.mp4"), "dl_1"),
            "plain.mp4"
        );
        assert_eq!(artifact_filename(None, "dl_1"), "dl_1.mp4");
        // Separators are stripped, never joined into the path.
        assert_eq!(
            artifact_filename(Some(r#"attachment; filename="../../evil.mp4""#), "dl_1"),
            "....evil.mp4"
        );
    }
}
