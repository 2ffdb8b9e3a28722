use crate::api::JobApi;
use crate::model::{JobStatus, ProgressSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::MissedTickBehavior;

/// One progress observation, tagged with the poll epoch it belongs to so the
/// controller can drop messages from a poller that has since been replaced.
#[derive(Debug, Clone)]
pub(crate) struct PollMessage {
    pub epoch: u64,
    pub snapshot: ProgressSnapshot,
}

/// Spawn the fixed-interval progress poller for one job.
///
/// The probe is awaited inside the loop, so in-flight polls never overlap,
/// and missed ticks are skipped rather than queued behind a slow response.
/// Transient failures are logged and the loop keeps going; the task ends on
/// its own once it has forwarded a terminal snapshot.
pub(crate) fn spawn_poll_task(
    api: Arc<dyn JobApi>,
    download_id: String,
    epoch: u64,
    interval: Duration,
    tx: UnboundedSender<PollMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of a tokio interval fires immediately; consume it so
        // the first probe lands one interval after the job started.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match api.progress(&download_id).await {
                Ok(snapshot) => {
                    let terminal =
                        matches!(snapshot.status, JobStatus::Completed | JobStatus::Error);
                    if tx.send(PollMessage { epoch, snapshot }).is_err() {
                        break;
                    }
                    if terminal {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(%download_id, error = %e, "progress poll failed; will retry");
                }
            }
        }
    })
}
