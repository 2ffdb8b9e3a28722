//! Boundary to the remote metadata/job service.
//!
//! The controller only talks to [`JobApi`]; the reqwest-backed implementation
//! lives in `http`. Tests substitute a scripted mock behind the same trait.

mod http;

pub use http::HttpJobApi;

use crate::error::Result;
use crate::model::{ProgressSnapshot, VideoMetadata};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait JobApi: Send + Sync {
    /// Resolve a watch URL to video metadata and the selectable format catalog.
    async fn video_info(&self, url: &str) -> Result<VideoMetadata>;

    /// Start a server-side download job; returns the opaque job id.
    async fn start_download(&self, url: &str, format_id: &str) -> Result<String>;

    /// Fetch the current progress snapshot for a job.
    async fn progress(&self, download_id: &str) -> Result<ProgressSnapshot>;

    /// Ask the server to cancel a job. Best effort; callers ignore failures.
    async fn cancel(&self, download_id: &str) -> Result<()>;

    /// Stream the completed artifact into `dest_dir`; returns the saved path.
    async fn fetch_artifact(&self, download_id: &str, dest_dir: &Path) -> Result<PathBuf>;
}
