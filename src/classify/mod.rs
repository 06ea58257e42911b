use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{DownloaderError, Result};

/// What a URL points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlKind {
    Video,
    Playlist,
    Channel,
}

impl UrlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlKind::Video => "video",
            UrlKind::Playlist => "playlist",
            UrlKind::Channel => "channel",
        }
    }

    /// Playlists and channels expand to many videos
    pub fn is_collection(&self) -> bool {
        !matches!(self, UrlKind::Video)
    }
}

impl std::fmt::Display for UrlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtube-nocookie.com",
    "www.youtube-nocookie.com",
];

const CHANNEL_PREFIXES: &[&str] = &["/channel/", "/c/", "/user/"];

fn is_youtube_host(host: &str) -> bool {
    YOUTUBE_HOSTS.contains(&host)
}

/// Classify a single URL.
///
/// A `list` query parameter always makes the URL a playlist, even on a watch
/// page, so `watch?v=..&list=..` downloads the whole playlist. Channels are
/// recognised by path on YouTube hosts only; anything else is left to yt-dlp
/// as a single video.
pub fn classify(url: &str) -> UrlKind {
    let parsed = match Url::parse(url.trim()) {
        Ok(parsed) => parsed,
        Err(_) => return UrlKind::Video,
    };

    if parsed.query_pairs().any(|(key, _)| key == "list") {
        return UrlKind::Playlist;
    }

    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    if !is_youtube_host(&host) {
        return UrlKind::Video;
    }

    let path = parsed.path();
    if path == "/playlist" {
        return UrlKind::Playlist;
    }

    if path.starts_with("/@") || CHANNEL_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return UrlKind::Channel;
    }

    UrlKind::Video
}

/// Classifies URLs and remembers the answer for the rest of the run
#[derive(Debug, Default)]
pub struct UrlClassifier {
    cache: Mutex<HashMap<String, UrlKind>>,
    hits: AtomicUsize,
}

impl UrlClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&self, url: &str) -> UrlKind {
        let key = url.trim().to_string();
        let mut cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(kind) = cache.get(&key) {
            tracing::trace!("Classification cache hit for {}", key);
            self.hits.fetch_add(1, Ordering::Relaxed);
            return *kind;
        }

        let kind = classify(&key);
        tracing::debug!("Classified {} as {}", key, kind);
        cache.insert(key, kind);
        kind
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    /// Lookups answered from the cache
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }
}

fn is_video_id(token: &str) -> bool {
    token.len() == 11
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Normalize a single token into an http(s) URL
fn normalize_token(token: &str) -> Result<String> {
    if is_video_id(token) {
        return Ok(format!("https://www.youtube.com/watch?v={}", token));
    }

    let parsed = Url::parse(token).map_err(|_| DownloaderError::InvalidUrl(token.to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DownloaderError::InvalidUrl(format!(
            "{} (URL must use HTTP or HTTPS protocol)",
            token
        ))
        .into());
    }

    if parsed.host_str().is_none() {
        return Err(DownloaderError::InvalidUrl(token.to_string()).into());
    }

    Ok(token.to_string())
}

/// Split user input into a de-duplicated list of URLs.
///
/// Tokens are separated by whitespace or commas. Bare video ids are expanded
/// to watch URLs. Order of first appearance is kept.
pub fn parse_urls(input: &str) -> Result<Vec<String>> {
    let mut urls: Vec<String> = Vec::new();

    for token in input
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        let url = normalize_token(token)?;
        if !urls.contains(&url) {
            urls.push(url);
        }
    }

    Ok(urls)
}

/// Read URLs from a batch file, skipping blank lines and `#` comments
pub fn read_batch_file(path: &Path) -> Result<Vec<String>> {
    let content = fs_err::read_to_string(path)?;

    let body = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n");

    parse_urls(&body)
}
