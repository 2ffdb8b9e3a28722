use once_cell::sync::Lazy;
use regex::Regex;

/// The three accepted link shapes: watch/short, embed, and legacy /v/ URLs.
/// Each requires an 11-character video id. Advisory only; a URL that slips
/// through is caught by the metadata call failing server-side.
static WATCH_URL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^(https?://)?(www\.)?(youtube\.com/watch\?v=|youtu\.be/)[A-Za-z0-9_-]{11}",
        r"^(https?://)?(www\.)?youtube\.com/embed/[A-Za-z0-9_-]{11}",
        r"^(https?://)?(www\.)?youtube\.com/v/[A-Za-z0-9_-]{11}",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

static VIDEO_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?:youtube\.com/watch\?v=|youtu\.be/)([A-Za-z0-9_-]{11})",
        r"youtube\.com/embed/([A-Za-z0-9_-]{11})",
        r"youtube\.com/v/([A-Za-z0-9_-]{11})",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

/// Pure predicate over the candidate URL; never touches the network.
pub fn is_valid_watch_url(url: &str) -> bool {
    let url = url.trim();
    !url.is_empty() && WATCH_URL_PATTERNS.iter().any(|re| re.is_match(url))
}

/// Extract the 11-character video id from any of the accepted URL shapes.
pub fn extract_video_id(url: &str) -> Option<String> {
    VIDEO_ID_PATTERNS
        .iter()
        .find_map(|re| re.captures(url.trim()))
        .map(|caps| caps[1].to_string())
}
