use crate::error::{ClientError, Result};
use crate::model::{JobStatus, ProgressSnapshot, SessionPhase, VideoMetadata};
use crate::validate;

/// Outcome of applying a poll snapshot to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
    /// Message from an old poll epoch or outside Downloading; dropped.
    Stale,
    Running {
        percent: f64,
        speed: Option<String>,
        eta: Option<String>,
    },
    Completed {
        title: Option<String>,
    },
    Failed {
        message: String,
    },
}

/// The single long-lived entity of the client: current phase, job id,
/// resolved metadata and format choice. All mutation goes through the
/// transition methods below; the async controller layers polling on top.
#[derive(Debug)]
pub struct Session {
    phase: SessionPhase,
    selected_url: String,
    active_job_id: Option<String>,
    metadata: Option<VideoMetadata>,
    selected_format_id: Option<String>,
    poll_epoch: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            selected_url: String::new(),
            active_job_id: None,
            metadata: None,
            selected_format_id: None,
            poll_epoch: 0,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn selected_url(&self) -> &str {
        &self.selected_url
    }

    pub fn active_job_id(&self) -> Option<&str> {
        self.active_job_id.as_deref()
    }

    #[cfg(test)]
    pub fn metadata(&self) -> Option<&VideoMetadata> {
        self.metadata.as_ref()
    }

    pub fn selected_format_id(&self) -> Option<&str> {
        self.selected_format_id.as_deref()
    }

    /// Epoch of the currently sanctioned poll task. Bumped on every job start
    /// and reset, so messages from older pollers are recognisably stale.
    #[cfg(test)]
    pub fn poll_epoch(&self) -> u64 {
        self.poll_epoch
    }

    /// Idle → FetchingInfo. Validates URL syntax locally first; on a malformed
    /// URL the session stays in Idle and no network call is warranted.
    pub fn begin_fetch(&mut self, url: &str) -> Result<()> {
        if self.phase != SessionPhase::Idle {
            return Err(ClientError::Validation(format!(
                "cannot submit a URL while {:?}",
                self.phase
            )));
        }
        let url = url.trim();
        if !validate::is_valid_watch_url(url) {
            return Err(ClientError::Validation(
                "not a recognized YouTube watch URL".to_string(),
            ));
        }
        self.selected_url = url.to_string();
        self.phase = SessionPhase::FetchingInfo;
        Ok(())
    }

    /// FetchingInfo → FormatSelection with the resolved catalog.
    pub fn metadata_resolved(&mut self, metadata: VideoMetadata) -> Result<()> {
        if self.phase != SessionPhase::FetchingInfo {
            return Err(ClientError::Validation(format!(
                "metadata arrived while {:?}",
                self.phase
            )));
        }
        self.metadata = Some(metadata);
        self.selected_format_id = None;
        self.phase = SessionPhase::FormatSelection;
        Ok(())
    }

    /// FetchingInfo → Idle after a failed metadata resolve.
    pub fn metadata_failed(&mut self) {
        if self.phase == SessionPhase::FetchingInfo {
            self.metadata = None;
            self.phase = SessionPhase::Idle;
        }
    }

    /// Record a format choice. Only valid during FormatSelection and only for
    /// ids the catalog actually advertises.
    pub fn select_format(&mut self, format_id: &str) -> Result<()> {
        if self.phase != SessionPhase::FormatSelection {
            return Err(ClientError::Validation(format!(
                "cannot select a format while {:?}",
                self.phase
            )));
        }
        let known = self
            .metadata
            .as_ref()
            .is_some_and(|m| m.formats.find(format_id).is_some());
        if !known {
            return Err(ClientError::Validation(format!(
                "unknown format id: {format_id}"
            )));
        }
        self.selected_format_id = Some(format_id.to_string());
        Ok(())
    }

    /// The start action is enabled only when exactly one format is chosen.
    pub fn can_start(&self) -> bool {
        self.phase == SessionPhase::FormatSelection && self.selected_format_id.is_some()
    }

    /// FormatSelection → Downloading once the server accepted the job.
    /// Returns the new poll epoch for the poller about to be spawned.
    pub fn job_started(&mut self, job_id: String) -> Result<u64> {
        if !self.can_start() {
            return Err(ClientError::Validation(
                "no format selected".to_string(),
            ));
        }
        self.active_job_id = Some(job_id);
        self.phase = SessionPhase::Downloading;
        self.poll_epoch += 1;
        Ok(self.poll_epoch)
    }

    /// Apply one poll snapshot. Anything from a stale epoch, or arriving after
    /// a terminal transition already happened, is dropped; this is what keeps
    /// out-of-order poll responses from regressing progress or double-firing
    /// completion.
    pub fn apply_snapshot(&mut self, epoch: u64, snapshot: &ProgressSnapshot) -> SnapshotOutcome {
        if epoch != self.poll_epoch || self.phase != SessionPhase::Downloading {
            return SnapshotOutcome::Stale;
        }
        match snapshot.status {
            JobStatus::Running => SnapshotOutcome::Running {
                percent: snapshot.percent(),
                speed: snapshot.speed.clone(),
                eta: snapshot.eta.clone(),
            },
            JobStatus::Completed => {
                self.phase = SessionPhase::Completed;
                SnapshotOutcome::Completed {
                    title: snapshot.title.clone(),
                }
            }
            JobStatus::Error => {
                self.phase = SessionPhase::Failed;
                SnapshotOutcome::Failed {
                    message: snapshot
                        .error
                        .clone()
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or_else(|| "download failed".to_string()),
                }
            }
        }
    }

    /// Downloading → Cancelled. Local bookkeeping only; the best-effort
    /// cancel call happens in the controller.
    pub fn cancelled(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Downloading {
            return Err(ClientError::Validation(format!(
                "nothing to cancel while {:?}",
                self.phase
            )));
        }
        self.phase = SessionPhase::Cancelled;
        Ok(())
    }

    /// Back to a pristine Idle session. Valid from any phase and idempotent;
    /// the epoch bump invalidates whatever a leftover poller might still send.
    pub fn reset(&mut self) {
        self.phase = SessionPhase::Idle;
        self.selected_url.clear();
        self.active_job_id = None;
        self.metadata = None;
        self.selected_format_id = None;
        self.poll_epoch += 1;
    }
}
