//! Job lifecycle controller.
//!
//! Owns the session state machine, the poll task and the event stream to the
//! presentation layer. CLI code translates user input into calls/commands and
//! renders the events; all transition rules live here and in [`Session`].

mod poller;
mod session;

pub use session::{Session, SnapshotOutcome};

use crate::api::JobApi;
use crate::error::{ClientError, Result};
use crate::model::{ClientConfig, InfoEvent, JobEvent, SessionPhase, VideoMetadata};
use poller::PollMessage;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Commands emitted by UI layers while a download is running.
#[derive(Debug, Clone)]
pub enum ControlCommand {
    Cancel,
}

pub struct SessionController {
    api: Arc<dyn JobApi>,
    cfg: ClientConfig,
    session: Session,
    event_tx: UnboundedSender<JobEvent>,
    poll_tx: UnboundedSender<PollMessage>,
    poll_rx: UnboundedReceiver<PollMessage>,
    cmd_tx: UnboundedSender<ControlCommand>,
    cmd_rx: UnboundedReceiver<ControlCommand>,
    // At most one poll task may be alive per session; enforced by aborting
    // this handle before any new spawn.
    poll_task: Option<tokio::task::JoinHandle<()>>,
    last_failure: Option<String>,
}

impl SessionController {
    pub fn new(
        api: Arc<dyn JobApi>,
        cfg: ClientConfig,
        event_tx: UnboundedSender<JobEvent>,
    ) -> Self {
        let (poll_tx, poll_rx) = unbounded_channel();
        let (cmd_tx, cmd_rx) = unbounded_channel();
        Self {
            api,
            cfg,
            session: Session::new(),
            event_tx,
            poll_tx,
            poll_rx,
            cmd_tx,
            cmd_rx,
            poll_task: None,
            last_failure: None,
        }
    }

    #[cfg(test)]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Sender for UI layers (e.g. the Ctrl-C handler) to request cancellation.
    pub fn command_sender(&self) -> UnboundedSender<ControlCommand> {
        self.cmd_tx.clone()
    }

    #[cfg(test)]
    pub fn has_active_poll(&self) -> bool {
        self.poll_task.is_some()
    }

    /// Server message of the terminal failure, when the session is Failed.
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    fn emit(&self, event: JobEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_phase(&self, phase: SessionPhase) {
        self.emit(JobEvent::PhaseChanged { phase });
    }

    /// Submit a URL: local validation, then the metadata-resolve call.
    /// On failure the session drops back to Idle and the error is surfaced
    /// with the server's message when it provided one.
    pub async fn resolve_metadata(&mut self, url: &str) -> Result<VideoMetadata> {
        self.session.begin_fetch(url)?;
        self.emit_phase(SessionPhase::FetchingInfo);

        match self.api.video_info(self.session.selected_url()).await {
            Ok(metadata) => {
                if metadata.formats.is_empty() {
                    self.emit(JobEvent::Info(InfoEvent::Message(
                        "Server returned no downloadable formats".to_string(),
                    )));
                }
                for (group, options) in [
                    ("predefined", &metadata.formats.predefined),
                    ("video", &metadata.formats.video),
                    ("audio", &metadata.formats.audio),
                ] {
                    if options.is_empty() {
                        self.emit(JobEvent::Info(InfoEvent::EmptyFormatGroup { group }));
                    }
                }
                self.session.metadata_resolved(metadata.clone())?;
                self.emit_phase(SessionPhase::FormatSelection);
                self.emit(JobEvent::MetadataResolved {
                    metadata: Box::new(metadata.clone()),
                });
                Ok(metadata)
            }
            Err(e) => {
                self.session.metadata_failed();
                self.emit_phase(SessionPhase::Idle);
                Err(e)
            }
        }
    }

    pub fn select_format(&mut self, format_id: &str) -> Result<()> {
        self.session.select_format(format_id)
    }

    /// Start the server-side job and begin polling. Refuses locally (no
    /// network call) when no format has been chosen; on a rejected start the
    /// session stays in FormatSelection so the user can pick again.
    pub async fn start(&mut self) -> Result<String> {
        if !self.session.can_start() {
            return Err(ClientError::Validation("no format selected".to_string()));
        }
        let url = self.session.selected_url().to_string();
        let format_id = self
            .session
            .selected_format_id()
            .map(str::to_string)
            .ok_or_else(|| ClientError::Validation("no format selected".to_string()))?;

        let job_id = self.api.start_download(&url, &format_id).await?;
        let epoch = self.session.job_started(job_id.clone())?;

        self.stop_polling();
        self.poll_task = Some(poller::spawn_poll_task(
            self.api.clone(),
            job_id.clone(),
            epoch,
            self.cfg.poll_interval,
            self.poll_tx.clone(),
        ));
        self.emit_phase(SessionPhase::Downloading);
        Ok(job_id)
    }

    /// Drive the Downloading phase until a terminal transition: either the
    /// poller reports completion/failure, or a Cancel command arrives.
    pub async fn run_to_completion(&mut self) -> SessionPhase {
        loop {
            tokio::select! {
                Some(msg) = self.poll_rx.recv() => {
                    if let Some(phase) = self.handle_poll_message(msg) {
                        return phase;
                    }
                }
                Some(ControlCommand::Cancel) = self.cmd_rx.recv() => {
                    self.emit(JobEvent::Info(InfoEvent::Cancelling));
                    self.cancel().await;
                    return SessionPhase::Cancelled;
                }
            }
        }
    }

    /// Apply one poll message; returns the terminal phase once reached.
    fn handle_poll_message(&mut self, msg: PollMessage) -> Option<SessionPhase> {
        match self.session.apply_snapshot(msg.epoch, &msg.snapshot) {
            SnapshotOutcome::Stale => {
                tracing::debug!(epoch = msg.epoch, "dropping stale poll message");
                None
            }
            SnapshotOutcome::Running {
                percent,
                speed,
                eta,
            } => {
                self.emit(JobEvent::ProgressTick {
                    percent,
                    speed,
                    eta,
                });
                None
            }
            SnapshotOutcome::Completed { title } => {
                self.stop_polling();
                self.emit_phase(SessionPhase::Completed);
                self.emit(JobEvent::JobCompleted { title });
                Some(SessionPhase::Completed)
            }
            SnapshotOutcome::Failed { message } => {
                self.stop_polling();
                self.last_failure = Some(message.clone());
                self.emit_phase(SessionPhase::Failed);
                self.emit(JobEvent::JobFailed { message });
                Some(SessionPhase::Failed)
            }
        }
    }

    /// Cancel the running job. The server call is fire-and-forget: its
    /// failure is logged and local cleanup happens regardless.
    pub async fn cancel(&mut self) {
        if let Some(job_id) = self.session.active_job_id().map(str::to_string) {
            if let Err(e) = self.api.cancel(&job_id).await {
                tracing::warn!(%job_id, error = %e, "cancel request failed; stopping polling anyway");
            }
        }
        self.stop_polling();
        if self.session.phase() == SessionPhase::Downloading {
            let _ = self.session.cancelled();
            self.emit_phase(SessionPhase::Cancelled);
        }
    }

    /// Fetch the completed artifact into the configured output directory.
    pub async fn fetch_artifact(&self) -> Result<PathBuf> {
        if self.session.phase() != SessionPhase::Completed {
            return Err(ClientError::Validation(
                "no completed download to fetch".to_string(),
            ));
        }
        let job_id = self
            .session
            .active_job_id()
            .ok_or_else(|| ClientError::Validation("no active job id".to_string()))?;
        self.api.fetch_artifact(job_id, &self.cfg.output_dir).await
    }

    /// Clear the session back to Idle, tearing down any poller first.
    pub fn reset(&mut self) {
        self.stop_polling();
        self.last_failure = None;
        self.session.reset();
        self.emit_phase(SessionPhase::Idle);
    }

    fn stop_polling(&mut self) {
        if let Some(handle) = self.poll_task.take() {
            handle.abort();
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        FormatCatalog, FormatOption, JobStatus, ProgressSnapshot, VideoMetadata,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    fn running(pct: f64) -> ProgressSnapshot {
        ProgressSnapshot {
            status: JobStatus::Running,
            progress: pct,
            speed: Some("1.2 MiB/s".into()),
            eta: Some("00:10".into()),
            error: None,
            title: None,
        }
    }

    fn completed() -> ProgressSnapshot {
        ProgressSnapshot {
            status: JobStatus::Completed,
            progress: 100.0,
            speed: None,
            eta: None,
            error: None,
            title: Some("Some video".into()),
        }
    }

    fn metadata() -> VideoMetadata {
        VideoMetadata {
            title: "Some video".into(),
            duration_seconds: Some(212),
            thumbnail_url: None,
            description: None,
            formats: FormatCatalog {
                predefined: vec![FormatOption {
                    id: "video_best".into(),
                    display: "Best".into(),
                }],
                video: vec![
                    FormatOption {
                        id: "video_720p".into(),
                        display: "720p".into(),
                    },
                    FormatOption {
                        id: "video_360p".into(),
                        display: "360p".into(),
                    },
                ],
                audio: vec![],
            },
        }
    }

    struct MockApi {
        snapshots: Mutex<VecDeque<ProgressSnapshot>>,
        fail_cancel: bool,
        // Number of leading progress calls that fail before the script runs.
        flaky_polls: usize,
        video_info_calls: AtomicUsize,
        start_calls: AtomicUsize,
        progress_calls: AtomicUsize,
        cancel_calls: AtomicUsize,
    }

    impl MockApi {
        fn scripted(snapshots: Vec<ProgressSnapshot>) -> Self {
            Self {
                snapshots: Mutex::new(snapshots.into()),
                fail_cancel: false,
                flaky_polls: 0,
                video_info_calls: AtomicUsize::new(0),
                start_calls: AtomicUsize::new(0),
                progress_calls: AtomicUsize::new(0),
                cancel_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl JobApi for MockApi {
        async fn video_info(&self, _url: &str) -> crate::error::Result<VideoMetadata> {
            self.video_info_calls.fetch_add(1, Ordering::SeqCst);
            Ok(metadata())
        }

        async fn start_download(
            &self,
            _url: &str,
            _format_id: &str,
        ) -> crate::error::Result<String> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            Ok("dl_1".to_string())
        }

        async fn progress(&self, _download_id: &str) -> crate::error::Result<ProgressSnapshot> {
            let call = self.progress_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.flaky_polls {
                return Err(ClientError::Remote("progress endpoint timed out".into()));
            }
            // An exhausted script keeps the job running so cancel paths can
            // observe a live poller.
            let next = self.snapshots.lock().unwrap().pop_front();
            Ok(next.unwrap_or_else(|| running(50.0)))
        }

        async fn cancel(&self, _download_id: &str) -> crate::error::Result<()> {
            self.cancel_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_cancel {
                Err(ClientError::Remote("cancel endpoint unreachable".into()))
            } else {
                Ok(())
            }
        }

        async fn fetch_artifact(
            &self,
            download_id: &str,
            dest_dir: &Path,
        ) -> crate::error::Result<PathBuf> {
            let dest = dest_dir.join(format!("{download_id}.mp4"));
            tokio::fs::write(&dest, b"media").await?;
            Ok(dest)
        }
    }

    fn test_config() -> ClientConfig {
        ClientConfig {
            base_url: "http://127.0.0.1:5000".into(),
            poll_interval: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(10),
            user_agent: "test".into(),
            output_dir: std::env::temp_dir(),
        }
    }

    fn controller(api: Arc<MockApi>) -> (SessionController, UnboundedReceiver<JobEvent>) {
        let (event_tx, event_rx) = unbounded_channel();
        (
            SessionController::new(api, test_config(), event_tx),
            event_rx,
        )
    }

    fn drain(rx: &mut UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn start_without_format_makes_no_network_call() {
        let api = Arc::new(MockApi::scripted(vec![]));
        let (mut ctl, _rx) = controller(api.clone());

        ctl.resolve_metadata(URL).await.unwrap();
        let err = ctl.start().await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert_eq!(api.start_calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctl.session().phase(), SessionPhase::FormatSelection);
        assert!(!ctl.has_active_poll());
    }

    #[tokio::test]
    async fn empty_format_group_is_signalled_not_fatal() {
        let api = Arc::new(MockApi::scripted(vec![]));
        let (mut ctl, mut rx) = controller(api);

        ctl.resolve_metadata(URL).await.unwrap();
        let events = drain(&mut rx);
        let audio_flagged = events.iter().any(|e| {
            matches!(
                e,
                JobEvent::Info(InfoEvent::EmptyFormatGroup { group: "audio" })
            )
        });
        assert!(audio_flagged);
        assert_eq!(ctl.session().phase(), SessionPhase::FormatSelection);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_sequence_transitions_to_completed_exactly_once() {
        let api = Arc::new(MockApi::scripted(vec![
            running(10.0),
            running(55.0),
            completed(),
        ]));
        let (mut ctl, mut rx) = controller(api.clone());

        ctl.resolve_metadata(URL).await.unwrap();
        ctl.select_format("video_best").unwrap();
        ctl.start().await.unwrap();
        assert!(ctl.has_active_poll());

        let phase = ctl.run_to_completion().await;
        assert_eq!(phase, SessionPhase::Completed);
        assert_eq!(ctl.session().phase(), SessionPhase::Completed);
        assert!(!ctl.has_active_poll());
        assert_eq!(api.progress_calls.load(Ordering::SeqCst), 3);

        let events = drain(&mut rx);
        let completions = events
            .iter()
            .filter(|e| matches!(e, JobEvent::JobCompleted { .. }))
            .count();
        let ticks = events
            .iter()
            .filter(|e| matches!(e, JobEvent::ProgressTick { .. }))
            .count();
        assert_eq!(completions, 1);
        assert_eq!(ticks, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_poll_failures_are_retried_until_completion() {
        let mut api = MockApi::scripted(vec![running(40.0), completed()]);
        api.flaky_polls = 2;
        let api = Arc::new(api);
        let (mut ctl, mut rx) = controller(api.clone());

        ctl.resolve_metadata(URL).await.unwrap();
        ctl.select_format("video_best").unwrap();
        ctl.start().await.unwrap();

        let phase = ctl.run_to_completion().await;
        assert_eq!(phase, SessionPhase::Completed);
        assert_eq!(ctl.session().phase(), SessionPhase::Completed);
        // Two failed probes, then the running and completed snapshots.
        assert_eq!(api.progress_calls.load(Ordering::SeqCst), 4);

        let events = drain(&mut rx);
        let ticks = events
            .iter()
            .filter(|e| matches!(e, JobEvent::ProgressTick { .. }))
            .count();
        assert_eq!(ticks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_polling_even_when_the_cancel_call_fails() {
        let mut api = MockApi::scripted(vec![]);
        api.fail_cancel = true;
        let api = Arc::new(api);
        let (mut ctl, _rx) = controller(api.clone());

        ctl.resolve_metadata(URL).await.unwrap();
        ctl.select_format("video_720p").unwrap();
        ctl.start().await.unwrap();
        assert!(ctl.has_active_poll());

        ctl.command_sender().send(ControlCommand::Cancel).unwrap();
        let phase = ctl.run_to_completion().await;
        assert_eq!(phase, SessionPhase::Cancelled);
        assert_eq!(ctl.session().phase(), SessionPhase::Cancelled);
        assert!(!ctl.has_active_poll());
        assert_eq!(api.cancel_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_epoch_messages_do_not_touch_the_session() {
        let api = Arc::new(MockApi::scripted(vec![]));
        let (mut ctl, _rx) = controller(api);

        ctl.resolve_metadata(URL).await.unwrap();
        ctl.select_format("video_best").unwrap();
        ctl.start().await.unwrap();

        let stale = PollMessage {
            epoch: ctl.session().poll_epoch() - 1,
            snapshot: completed(),
        };
        assert_eq!(ctl.handle_poll_message(stale), None);
        assert_eq!(ctl.session().phase(), SessionPhase::Downloading);
        assert!(ctl.has_active_poll());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_artifact_requires_completion_and_saves_to_output_dir() {
        let api = Arc::new(MockApi::scripted(vec![completed()]));
        let (mut ctl, _rx) = controller(api);
        let tmp = tempfile::tempdir().unwrap();
        ctl.cfg.output_dir = tmp.path().to_path_buf();

        ctl.resolve_metadata(URL).await.unwrap();
        ctl.select_format("video_best").unwrap();

        // Too early: nothing completed yet.
        assert!(matches!(
            ctl.fetch_artifact().await,
            Err(ClientError::Validation(_))
        ));

        ctl.start().await.unwrap();
        let phase = ctl.run_to_completion().await;
        assert_eq!(phase, SessionPhase::Completed);

        let saved = ctl.fetch_artifact().await.unwrap();
        assert!(saved.starts_with(tmp.path()));
        assert_eq!(std::fs::read(&saved).unwrap(), b"media");
    }

    #[tokio::test(start_paused = true)]
    async fn reset_after_completion_returns_to_idle_without_a_poller() {
        let api = Arc::new(MockApi::scripted(vec![completed()]));
        let (mut ctl, _rx) = controller(api);

        ctl.resolve_metadata(URL).await.unwrap();
        ctl.select_format("video_best").unwrap();
        ctl.start().await.unwrap();
        ctl.run_to_completion().await;

        ctl.reset();
        assert_eq!(ctl.session().phase(), SessionPhase::Idle);
        assert!(ctl.session().active_job_id().is_none());
        assert!(ctl.session().selected_format_id().is_none());
        assert!(!ctl.has_active_poll());
    }
}
