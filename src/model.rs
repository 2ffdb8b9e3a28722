use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub user_agent: String,
    pub output_dir: PathBuf,
}

/// Lifecycle phase of the single client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Idle,
    FetchingInfo,
    FormatSelection,
    Downloading,
    Completed,
    Cancelled,
    Failed,
}

impl SessionPhase {
    /// Terminal phases only admit a reset back to Idle.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionPhase::Completed | SessionPhase::Cancelled | SessionPhase::Failed
        )
    }
}

/// One selectable output format as the server advertises it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatOption {
    pub id: String,
    pub display: String,
}

/// Which selector a format id came from. Order matters: when more than one
/// selector somehow holds a value, the earlier group wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatGroup {
    Predefined,
    Video,
    Audio,
}

impl FormatGroup {
    pub fn label(self) -> &'static str {
        match self {
            FormatGroup::Predefined => "Predefined",
            FormatGroup::Video => "Video",
            FormatGroup::Audio => "Audio",
        }
    }
}

/// The three disjoint format groups returned with video metadata. Any group
/// may be empty; that is signalled to the user, not fatal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatCatalog {
    #[serde(default)]
    pub predefined: Vec<FormatOption>,
    #[serde(default)]
    pub video: Vec<FormatOption>,
    #[serde(default)]
    pub audio: Vec<FormatOption>,
}

impl FormatCatalog {
    pub fn is_empty(&self) -> bool {
        self.predefined.is_empty() && self.video.is_empty() && self.audio.is_empty()
    }

    pub fn group(&self, group: FormatGroup) -> &[FormatOption] {
        match group {
            FormatGroup::Predefined => &self.predefined,
            FormatGroup::Video => &self.video,
            FormatGroup::Audio => &self.audio,
        }
    }

    /// Look up a format id across all three groups.
    pub fn find(&self, id: &str) -> Option<&FormatOption> {
        self.predefined
            .iter()
            .chain(self.video.iter())
            .chain(self.audio.iter())
            .find(|f| f.id == id)
    }

    /// Resolve at most one selection from per-group candidates, honoring the
    /// predefined > video > audio precedence. Ids not present in their group
    /// are treated as no selection.
    pub fn resolve_selection(
        &self,
        predefined: Option<&str>,
        video: Option<&str>,
        audio: Option<&str>,
    ) -> Option<&FormatOption> {
        fn pick<'a>(group: &'a [FormatOption], id: Option<&str>) -> Option<&'a FormatOption> {
            id.and_then(|id| group.iter().find(|f| f.id == id))
        }
        pick(&self.predefined, predefined)
            .or_else(|| pick(&self.video, video))
            .or_else(|| pick(&self.audio, audio))
    }
}

/// Resolved video metadata for the submitted URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub duration_seconds: Option<i64>,
    pub thumbnail_url: Option<String>,
    pub description: Option<String>,
    pub formats: FormatCatalog,
}

/// Job status as reported by the progress endpoint. The server emits a few
/// extra in-flight strings ("iniciando", "preparando_descarga", "downloading",
/// "unknown"); everything that is not a terminal status counts as running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Error,
    #[serde(other)]
    Running,
}

/// Transient value received per poll tick; not retained past the display refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub speed: Option<String>,
    #[serde(default)]
    pub eta: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl ProgressSnapshot {
    /// Progress percentage clamped to the displayable [0, 100] range.
    pub fn percent(&self) -> f64 {
        self.progress.clamp(0.0, 100.0)
    }
}

/// Events emitted by the controller and consumed by the presentation layer.
#[derive(Debug, Clone)]
pub enum JobEvent {
    PhaseChanged {
        phase: SessionPhase,
    },
    MetadataResolved {
        // Box to keep JobEvent small; the catalog can be large.
        metadata: Box<VideoMetadata>,
    },
    ProgressTick {
        percent: f64,
        speed: Option<String>,
        eta: Option<String>,
    },
    JobCompleted {
        title: Option<String>,
    },
    JobFailed {
        message: String,
    },
    Info(InfoEvent),
}

/// Structured info events surfaced to the user outside the progress stream.
#[derive(Debug, Clone)]
pub enum InfoEvent {
    Message(String),
    EmptyFormatGroup { group: &'static str },
    Cancelling,
}

impl InfoEvent {
    /// Render a human-readable message for the CLI layer.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::EmptyFormatGroup { group } => {
                format!("{} formats: none available", group)
            }
            InfoEvent::Cancelling => "Cancelling download…".to_string(),
        }
    }
}
