//! Text formatting helpers for CLI output.
//!
//! This module formats human-readable lines for the metadata summary and
//! owns the small presentational contracts (duration text, progress banding).

use crate::model::{FormatGroup, VideoMetadata};

/// Placeholder shown when the server reports no usable duration.
pub const UNKNOWN_DURATION: &str = "unknown";

/// Placeholder line for a format group with no entries.
pub const NO_FORMATS: &str = "  (no formats available)";

/// Format a duration in seconds as `minutes:seconds`, seconds zero-padded.
/// Absent or non-positive durations render the unknown placeholder instead.
pub fn format_duration(seconds: Option<i64>) -> String {
    match seconds {
        Some(s) if s > 0 => format!("{}:{:02}", s / 60, s % 60),
        _ => UNKNOWN_DURATION.to_string(),
    }
}

/// Color band for the progress bar. Purely presentational; never feeds back
/// into session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressTier {
    Low,
    Mid,
    High,
}

impl ProgressTier {
    /// Band a clamped percentage: below 30 is Low, 30-70 Mid, above 70 High.
    pub fn for_percent(percent: f64) -> Self {
        if percent < 30.0 {
            ProgressTier::Low
        } else if percent <= 70.0 {
            ProgressTier::Mid
        } else {
            ProgressTier::High
        }
    }

    /// Color name in indicatif template syntax.
    pub fn bar_color(self) -> &'static str {
        match self {
            ProgressTier::Low => "red",
            ProgressTier::Mid => "yellow",
            ProgressTier::High => "green",
        }
    }
}

/// Pre-formatted lines for the resolved-metadata summary.
pub struct MetadataSummary {
    pub lines: Vec<String>,
}

/// Build the summary printed after a successful metadata resolve.
pub fn build_metadata_summary(meta: &VideoMetadata) -> MetadataSummary {
    let mut lines = Vec::new();

    lines.push(format!("Title:    {}", meta.title));
    lines.push(format!(
        "Duration: {}",
        format_duration(meta.duration_seconds)
    ));
    if let Some(thumb) = meta.thumbnail_url.as_deref() {
        lines.push(format!("Thumbnail: {thumb}"));
    }
    if let Some(desc) = meta.description.as_deref() {
        if !desc.trim().is_empty() {
            lines.push(format!("About:    {}", desc.trim()));
        }
    }

    for group in [
        FormatGroup::Predefined,
        FormatGroup::Video,
        FormatGroup::Audio,
    ] {
        lines.push(format!("{} formats:", group.label()));
        let options = meta.formats.group(group);
        if options.is_empty() {
            lines.push(NO_FORMATS.to_string());
        } else {
            for opt in options {
                lines.push(format!("  {:<24} {}", opt.id, opt.display));
            }
        }
    }

    MetadataSummary { lines }
}
