use crate::api::HttpJobApi;
use crate::controller::{ControlCommand, SessionController};
use crate::display::{self, ProgressTier};
use crate::model::{ClientConfig, JobEvent, SessionPhase, VideoMetadata};
use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "yt-download-cli",
    version,
    about = "Client for a yt-dlp style video download web service"
)]
pub struct Cli {
    /// Watch URL to resolve and download
    pub url: String,

    /// Base URL of the download service
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    pub base_url: String,

    /// Pick a predefined format id (e.g. video_best)
    #[arg(long)]
    pub preset: Option<String>,

    /// Pick a video format id (e.g. video_720p)
    #[arg(long)]
    pub video_format: Option<String>,

    /// Pick an audio format id (e.g. audio_128kbps)
    #[arg(long)]
    pub audio_format: Option<String>,

    /// Print the format catalog and exit without starting a download
    #[arg(long)]
    pub list_formats: bool,

    /// Machine-readable output: metadata and run summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Directory the completed artifact is saved into
    #[arg(long, default_value = ".")]
    pub output_dir: std::path::PathBuf,

    /// Leave the artifact on the server; do not fetch it after completion
    #[arg(long)]
    pub no_fetch: bool,

    /// Progress poll interval
    #[arg(long, default_value = "1s")]
    pub poll_interval: humantime::Duration,

    /// Per-request HTTP timeout
    #[arg(long, default_value = "10s")]
    pub request_timeout: humantime::Duration,

    /// Verbose diagnostics on stderr
    #[arg(short, long)]
    pub verbose: bool,
}

/// Install the tracing subscriber on stderr.
pub fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

/// Build a `ClientConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> ClientConfig {
    ClientConfig {
        base_url: args.base_url.clone(),
        poll_interval: Duration::from(args.poll_interval),
        request_timeout: Duration::from(args.request_timeout),
        user_agent: format!("yt-download-cli/{}", env!("CARGO_PKG_VERSION")),
        output_dir: args.output_dir.clone(),
    }
}

/// Final run summary for `--json` mode.
#[derive(Debug, Serialize)]
struct RunSummary {
    timestamp_utc: String,
    url: String,
    video_id: Option<String>,
    title: Option<String>,
    format_id: Option<String>,
    download_id: Option<String>,
    status: String,
    artifact_path: Option<std::path::PathBuf>,
}

fn utc_now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

fn phase_label(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::Idle => "idle",
        SessionPhase::FetchingInfo => "fetching_info",
        SessionPhase::FormatSelection => "format_selection",
        SessionPhase::Downloading => "downloading",
        SessionPhase::Completed => "completed",
        SessionPhase::Cancelled => "cancelled",
        SessionPhase::Failed => "failed",
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if args.json && !args.list_formats {
        let any_selection =
            args.preset.is_some() || args.video_format.is_some() || args.audio_format.is_some();
        if !any_selection {
            anyhow::bail!(
                "--json needs a format selection flag (--preset, --video-format or --audio-format)"
            );
        }
    }

    let cfg = build_config(&args);
    let api = Arc::new(HttpJobApi::new(&cfg).context("failed to build HTTP client")?);
    let (out_tx, out_handle) = spawn_output_writer();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<JobEvent>();
    let render = tokio::spawn(render_events(event_rx, out_tx.clone(), args.json));

    let mut controller = SessionController::new(api, cfg, event_tx);
    let result = drive(&args, &mut controller, &out_tx).await;

    // Close the event channel so the render task drains and exits.
    drop(controller);
    let _ = render.await;
    drop(out_tx);
    let _ = out_handle.await;

    result
}

/// The sequential flow: resolve, pick a format, download, fetch the artifact.
async fn drive(
    args: &Cli,
    controller: &mut SessionController,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    let metadata = controller
        .resolve_metadata(&args.url)
        .await
        .context("could not resolve video info")?;

    if args.list_formats {
        emit_metadata(args, &metadata, out_tx);
        return Ok(());
    }
    if !args.json {
        emit_metadata(args, &metadata, out_tx);
    }

    let format_id = choose_format(args, &metadata).await?;
    controller.select_format(&format_id)?;

    let download_id = controller
        .start()
        .await
        .context("could not start the download job")?;

    // Ctrl-C during Downloading becomes a cancel command; the cancel call is
    // best effort and polling stops regardless of its outcome.
    let cancel_tx = controller.command_sender();
    let ctrlc = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(ControlCommand::Cancel);
        }
    });
    let phase = controller.run_to_completion().await;
    ctrlc.abort();
    debug_assert!(phase.is_terminal());

    let mut artifact_path = None;
    match phase {
        SessionPhase::Completed => {
            if !args.no_fetch {
                let path = controller
                    .fetch_artifact()
                    .await
                    .context("could not fetch the completed artifact")?;
                let _ = out_tx.send(OutputLine::Stderr(format!("Saved: {}", path.display())));
                artifact_path = Some(path);
            }
        }
        SessionPhase::Cancelled => {
            let _ = out_tx.send(OutputLine::Stderr("Download cancelled".into()));
            // Cancelled admits a reset; return the session to Idle before exit.
            controller.reset();
        }
        SessionPhase::Failed => {
            let message = controller
                .last_failure()
                .unwrap_or("download failed")
                .to_string();
            return Err(crate::error::ClientError::Job(message).into());
        }
        other => anyhow::bail!("download ended in unexpected state {other:?}"),
    }

    if args.json {
        let summary = RunSummary {
            timestamp_utc: utc_now_rfc3339(),
            url: args.url.clone(),
            video_id: crate::validate::extract_video_id(&args.url),
            title: Some(metadata.title.clone()),
            format_id: Some(format_id),
            download_id: Some(download_id),
            status: phase_label(phase).to_string(),
            artifact_path,
        };
        let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&summary)?));
    }

    Ok(())
}

/// Print resolved metadata, as JSON or as the text summary.
fn emit_metadata(args: &Cli, metadata: &VideoMetadata, out_tx: &mpsc::UnboundedSender<OutputLine>) {
    if args.json {
        if let Ok(json) = serde_json::to_string_pretty(metadata) {
            let _ = out_tx.send(OutputLine::Stdout(json));
        }
        return;
    }
    for line in display::build_metadata_summary(metadata).lines {
        let _ = out_tx.send(OutputLine::Stdout(line));
    }
}

/// Resolve the format choice: selection flags first (predefined > video >
/// audio precedence), otherwise an interactive prompt on stdin.
async fn choose_format(args: &Cli, metadata: &VideoMetadata) -> Result<String> {
    if let Some(opt) = metadata.formats.resolve_selection(
        args.preset.as_deref(),
        args.video_format.as_deref(),
        args.audio_format.as_deref(),
    ) {
        return Ok(opt.id.clone());
    }
    if args.preset.is_some() || args.video_format.is_some() || args.audio_format.is_some() {
        anyhow::bail!("the requested format id is not in the server's catalog");
    }

    let line = tokio::task::spawn_blocking(|| -> Result<String> {
        let mut stderr = std::io::stderr();
        write!(stderr, "Format id: ")?;
        stderr.flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line.trim().to_string())
    })
    .await
    .context("stdin prompt task failed")??;

    if line.is_empty() {
        anyhow::bail!("no format selected");
    }
    match metadata.formats.find(&line) {
        Some(opt) => Ok(opt.id.clone()),
        None => anyhow::bail!("unknown format id: {line}"),
    }
}

fn bar_style(tier: ProgressTier) -> ProgressStyle {
    ProgressStyle::with_template(&format!(
        "[{{bar:40.{color}}}] {{pos:>3}}% {{msg}}",
        color = tier.bar_color()
    ))
    .expect("static template")
    .progress_chars("=> ")
}

/// Consume controller events and render them: progress bar in text mode,
/// status lines on stderr, silence in JSON mode.
async fn render_events(
    mut rx: mpsc::UnboundedReceiver<JobEvent>,
    out_tx: mpsc::UnboundedSender<OutputLine>,
    quiet: bool,
) {
    let mut bar: Option<ProgressBar> = None;
    let mut tier = ProgressTier::Low;
    let mut resolved_title: Option<String> = None;

    while let Some(ev) = rx.recv().await {
        if quiet {
            continue;
        }
        match ev {
            JobEvent::PhaseChanged { phase } => {
                if phase == SessionPhase::FetchingInfo {
                    let _ = out_tx.send(OutputLine::Stderr("Resolving video info…".into()));
                }
            }
            JobEvent::MetadataResolved { metadata } => {
                resolved_title = Some(metadata.title);
            }
            JobEvent::ProgressTick {
                percent,
                speed,
                eta,
            } => {
                let bar = bar.get_or_insert_with(|| {
                    let b = ProgressBar::new(100);
                    b.set_style(bar_style(ProgressTier::Low));
                    b
                });
                let new_tier = ProgressTier::for_percent(percent);
                if new_tier != tier {
                    tier = new_tier;
                    bar.set_style(bar_style(tier));
                }
                bar.set_position(percent.round() as u64);
                bar.set_message(format!(
                    "{} ETA {}",
                    speed.as_deref().unwrap_or("--"),
                    eta.as_deref().unwrap_or("--")
                ));
            }
            JobEvent::JobCompleted { title } => {
                if let Some(bar) = bar.take() {
                    bar.set_position(100);
                    bar.finish_with_message("completed");
                }
                // The progress endpoint does not always echo the title back;
                // fall back to the one resolved with the metadata.
                let title = title
                    .or_else(|| resolved_title.take())
                    .unwrap_or_else(|| "video".to_string());
                let _ = out_tx.send(OutputLine::Stderr(format!("Completed: {title}")));
            }
            JobEvent::JobFailed { .. } => {
                // The message is surfaced by the main flow's error path.
                if let Some(bar) = bar.take() {
                    bar.abandon();
                }
            }
            JobEvent::Info(info) => {
                let msg = info.to_message();
                match bar.as_ref() {
                    Some(bar) => bar.println(msg),
                    None => {
                        let _ = out_tx.send(OutputLine::Stderr(msg));
                    }
                }
            }
        }
    }
}
