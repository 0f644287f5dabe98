//! Track resolution.
//!
//! A [`TrackResolver`] turns a video URL or free search text into a
//! playable stream plus the metadata the catalog stores. The `YouTube`
//! implementation reads video details through `rusty_ytdl` and scrapes the
//! public search page for free-text queries.
//!
//! All calls block on network I/O. Run them on a blocking pool thread, never
//! on a UI or async worker thread.

use std::time::Duration;

use regex::Regex;
use rusty_ytdl::{Video, VideoOptions, VideoQuality, VideoSearchOptions};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::Track;
use crate::config::ResolverConfig;
use crate::error::{Error, Result};

pub use crate::player::StreamHandle;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// A resolved, playable track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTrack {
    /// Display title reported by the source.
    pub title: String,
    /// Source video id.
    pub source_id: String,
    /// Canonical page URL of the video.
    pub url: String,
    /// Direct audio stream.
    pub stream: StreamHandle,
    /// Length in seconds, when known.
    pub duration_secs: Option<u64>,
}

impl ResolvedTrack {
    /// Catalog entry for this track, starting at 0.
    #[must_use]
    pub fn to_track(&self) -> Track {
        Track::new(&self.title, &self.url, &self.source_id)
    }
}

/// One hit of a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Video title.
    pub title: String,
    /// Video id.
    pub source_id: String,
    /// Watch URL.
    pub url: String,
    /// Length in seconds, when listed.
    pub duration_secs: Option<u64>,
}

impl SearchResult {
    fn from_id(source_id: String, title: String, duration_secs: Option<u64>) -> Self {
        Self {
            url: watch_url(&source_id),
            source_id,
            title,
            duration_secs,
        }
    }

    /// Catalog entry for this hit.
    #[must_use]
    pub fn to_track(&self) -> Track {
        Track::new(&self.title, &self.url, &self.source_id)
    }
}

/// External track resolver.
#[cfg_attr(test, mockall::automock)]
pub trait TrackResolver: Send + Sync {
    /// Resolve a URL, or the first search hit for free text.
    ///
    /// # Errors
    ///
    /// Returns `Error::Resolution` naming `url_or_query` on any failure.
    fn resolve(&self, url_or_query: &str) -> Result<ResolvedTrack>;

    /// Search for up to `limit` videos.
    ///
    /// # Errors
    ///
    /// Returns `Error::Resolution` if the search page cannot be fetched.
    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>>;
}

/// `YouTube` resolver built on `rusty_ytdl` and the public search page.
#[derive(Debug, Clone)]
pub struct YouTubeResolver {
    config: ResolverConfig,
}

impl Default for YouTubeResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl YouTubeResolver {
    /// Create a resolver with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ResolverConfig::default())
    }

    /// Create a resolver with custom settings.
    #[must_use]
    pub const fn with_config(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Number of results a search returns by default.
    #[must_use]
    pub const fn search_limit(&self) -> usize {
        self.config.search_limit
    }

    fn resolve_video(&self, url: &str) -> Result<ResolvedTrack> {
        let url = url.to_string();
        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        block_on(&url, async {
            tokio::time::timeout(timeout, Self::resolve_video_async(&url))
                .await
                .map_err(|_| Error::resolution(&url, "timed out"))?
        })
    }

    async fn resolve_video_async(url: &str) -> Result<ResolvedTrack> {
        let options = VideoOptions {
            quality: VideoQuality::HighestAudio,
            filter: VideoSearchOptions::Audio,
            ..Default::default()
        };

        let video = Video::new_with_options(url, options.clone())
            .map_err(|e| Error::resolution(url, format!("invalid video: {e}")))?;

        let info = video
            .get_info()
            .await
            .map_err(|e| Error::resolution(url, format!("video unavailable: {e}")))?;

        let stream_url = match rusty_ytdl::choose_format(&info.formats, &options) {
            Ok(format) => format.url,
            Err(e) => {
                debug!("No audio-only format for {}: {}, trying any format with audio", url, e);
                info.formats
                    .iter()
                    .find(|f| f.has_audio)
                    .map(|f| f.url.clone())
                    .ok_or_else(|| Error::resolution(url, "no audio stream available"))?
            }
        };

        let details = &info.video_details;
        info!("Resolved stream for '{}' ({})", details.title, details.video_id);

        Ok(ResolvedTrack {
            title: details.title.clone(),
            source_id: details.video_id.clone(),
            url: watch_url(&details.video_id),
            stream: StreamHandle::new(stream_url),
            duration_secs: details.length_seconds.parse().ok(),
        })
    }

    fn fetch_search_page(&self, query: &str) -> Result<String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::resolution(query, format!("HTTP client: {e}")))?;

        let response = client
            .get("https://www.youtube.com/results")
            .query(&[("search_query", query)])
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .map_err(|e| Error::resolution(query, format!("search request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::resolution(
                query,
                format!("search returned HTTP {}", response.status()),
            ));
        }

        response
            .text()
            .map_err(|e| Error::resolution(query, format!("failed to read search page: {e}")))
    }
}

impl TrackResolver for YouTubeResolver {
    fn resolve(&self, url_or_query: &str) -> Result<ResolvedTrack> {
        let input = url_or_query.trim();
        if input.is_empty() {
            return Err(Error::resolution(url_or_query, "nothing to resolve"));
        }

        if is_youtube_url(input) {
            return self.resolve_video(input);
        }

        debug!("'{}' is not a video URL, searching", input);
        let hit = self
            .search(input, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::resolution(input, "no search results"))?;
        self.resolve_video(&hit.url)
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        info!("Searching for '{}'", query);
        let html = self.fetch_search_page(query)?;
        let mut results = parse_search_results(&html);
        results.truncate(limit);
        debug!("Search for '{}' returned {} results", query, results.len());
        Ok(results)
    }
}

/// Drive a `rusty_ytdl` future to completion from synchronous code.
fn block_on<T>(query: &str, future: impl Future<Output = Result<T>>) -> Result<T> {
    // rusty_ytdl's blocking feature hangs, so its async API is driven here
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        tokio::task::block_in_place(|| handle.block_on(future))
    } else {
        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| Error::resolution(query, format!("failed to create runtime: {e}")))?;
        rt.block_on(future)
    }
}

fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// Whether `input` looks like a `YouTube` video URL.
#[must_use]
pub fn is_youtube_url(input: &str) -> bool {
    extract_video_id(input).is_some()
}

/// Extract the 11-character video id from a watch, short, shorts or embed URL.
#[must_use]
pub fn extract_video_id(url: &str) -> Option<String> {
    let re = Regex::new(
        r"^(?:https?://)?(?:www\.|m\.|music\.)?(?:youtube\.com/(?:watch\?(?:.*&)?v=|shorts/|embed/|live/)|youtu\.be/)([A-Za-z0-9_-]{11})",
    )
    .ok()?;
    re.captures(url.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parse `MM:SS` or `HH:MM:SS` into seconds.
#[must_use]
pub fn parse_duration_text(text: &str) -> Option<u64> {
    let parts: Vec<u64> = text
        .trim()
        .split(':')
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    match *parts.as_slice() {
        [m, s] => m.checked_mul(60)?.checked_add(s),
        [h, m, s] => h
            .checked_mul(3600)?
            .checked_add(m.checked_mul(60)?)?
            .checked_add(s),
        _ => None,
    }
}

/// Format seconds as `M:SS` or `H:MM:SS`.
#[must_use]
pub fn format_duration(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

/// Extract search hits from a results page.
fn parse_search_results(html: &str) -> Vec<SearchResult> {
    let mut results = Vec::new();

    match extract_yt_initial_data(html) {
        Some(data) => collect_video_renderers(&data, &mut results),
        None => debug!("No ytInitialData in search page"),
    }

    if results.is_empty() {
        warn!("No videos found in search data, falling back to regex extraction");
        results = extract_results_regex(html);
    }

    let mut seen = std::collections::HashSet::new();
    results.retain(|r| seen.insert(r.source_id.clone()));
    results
}

/// Find the `ytInitialData` JSON object embedded in a page.
fn extract_yt_initial_data(html: &str) -> Option<serde_json::Value> {
    let marker = "ytInitialData = ";
    let start = html.find(marker)? + marker.len();
    let bytes = &html.as_bytes()[start..];
    if bytes.first() != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;
    let mut end = None;

    for (i, &byte) in bytes.iter().enumerate() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escape_next = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    end = Some(i + 1);
                    break;
                }
            }
            _ => {}
        }
    }

    let json = &html[start..start + end?];
    serde_json::from_str(json)
        .inspect_err(|e| debug!("Failed to parse ytInitialData: {}", e))
        .ok()
}

/// Walk the page data and collect every `videoRenderer` in document order.
fn collect_video_renderers(value: &serde_json::Value, out: &mut Vec<SearchResult>) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(result) = map.get("videoRenderer").and_then(parse_video_renderer) {
                out.push(result);
                return;
            }
            for child in map.values() {
                collect_video_renderers(child, out);
            }
        }
        serde_json::Value::Array(items) => {
            for child in items {
                collect_video_renderers(child, out);
            }
        }
        _ => {}
    }
}

fn parse_video_renderer(renderer: &serde_json::Value) -> Option<SearchResult> {
    let id = renderer.get("videoId")?.as_str()?.to_string();
    let title = renderer
        .get("title")?
        .get("runs")?
        .as_array()?
        .first()?
        .get("text")?
        .as_str()?
        .to_string();
    let duration_secs = renderer
        .get("lengthText")
        .and_then(|lt| lt.get("simpleText"))
        .and_then(|st| st.as_str())
        .and_then(parse_duration_text);

    Some(SearchResult::from_id(id, title, duration_secs))
}

fn extract_results_regex(html: &str) -> Vec<SearchResult> {
    let Ok(re) = Regex::new(
        r#""videoRenderer"\s*:\s*\{\s*"videoId"\s*:\s*"([A-Za-z0-9_-]{11})".*?"title"\s*:\s*\{\s*"runs"\s*:\s*\[\s*\{\s*"text"\s*:\s*"([^"]+)""#,
    ) else {
        return Vec::new();
    };

    re.captures_iter(html)
        .filter_map(|caps| {
            let id = caps.get(1)?.as_str().to_string();
            let title = caps.get(2)?.as_str().to_string();
            Some(SearchResult::from_id(id, title, None))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_video_id() {
        let cases = [
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ", Some("dQw4w9WgXcQ")),
            ("https://youtube.com/watch?list=PL1&v=dQw4w9WgXcQ", Some("dQw4w9WgXcQ")),
            ("https://youtu.be/dQw4w9WgXcQ?t=30", Some("dQw4w9WgXcQ")),
            ("https://www.youtube.com/shorts/dQw4w9WgXcQ", Some("dQw4w9WgXcQ")),
            ("https://music.youtube.com/watch?v=dQw4w9WgXcQ", Some("dQw4w9WgXcQ")),
            ("https://www.youtube.com/playlist?list=PL123", None),
            ("tavern music", None),
        ];
        for (url, expected) in cases {
            assert_eq!(extract_video_id(url).as_deref(), expected, "{url}");
        }
        assert!(is_youtube_url("youtu.be/dQw4w9WgXcQ"));
    }

    #[test]
    fn test_parse_duration_text() {
        assert_eq!(parse_duration_text("3:45"), Some(225));
        assert_eq!(parse_duration_text("1:02:03"), Some(3723));
        assert_eq!(parse_duration_text("live"), None);
        assert_eq!(parse_duration_text("1:2:3:4"), None);
        // Overflowing values from a mangled page are rejected, not wrapped
        assert_eq!(parse_duration_text("18446744073709551615:00"), None);
        assert_eq!(parse_duration_text("9999999999999999:00:00"), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(225), "3:45");
        assert_eq!(format_duration(3723), "1:02:03");
    }

    #[test]
    fn test_parse_search_results_from_initial_data() {
        let html = r#"<script>var ytInitialData = {"contents":{"sectionListRenderer":{"contents":[
            {"itemSectionRenderer":{"contents":[
                {"videoRenderer":{"videoId":"aaaaaaaaaaa","title":{"runs":[{"text":"Tavern {Ambience}"}]},"lengthText":{"simpleText":"1:00:00"}}},
                {"adRenderer":{}},
                {"videoRenderer":{"videoId":"bbbbbbbbbbb","title":{"runs":[{"text":"Battle \"Drums\""}]}}},
                {"videoRenderer":{"videoId":"aaaaaaaaaaa","title":{"runs":[{"text":"Duplicate"}]}}}
            ]}}]}}};</script>"#;

        let results = parse_search_results(html);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Tavern {Ambience}");
        assert_eq!(results[0].duration_secs, Some(3600));
        assert_eq!(results[0].url, "https://www.youtube.com/watch?v=aaaaaaaaaaa");
        assert_eq!(results[1].title, "Battle \"Drums\"");
        assert_eq!(results[1].duration_secs, None);
    }

    #[test]
    fn test_parse_search_results_regex_fallback() {
        let html = r#"broken {"videoRenderer":{"videoId":"ccccccccccc","thumbnail":{},"title":{"runs":[{"text":"Rain"}]}}"#;
        let results = parse_search_results(html);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_id, "ccccccccccc");
        assert_eq!(results[0].title, "Rain");
    }

    #[test]
    fn test_empty_query_searches_nothing() {
        let resolver = YouTubeResolver::new();
        assert!(resolver.search("   ", 15).unwrap().is_empty());
        assert!(resolver.resolve("  ").is_err());
    }

    #[test]
    fn test_search_result_to_track() {
        let hit = SearchResult::from_id("abcdefghijk".to_string(), "Rain".to_string(), None);
        let track = hit.to_track();
        assert_eq!(track.source_id, "abcdefghijk");
        assert_eq!(track.start_offset, 0);
    }

    #[test]
    #[ignore = "requires network access"]
    fn test_resolve_live_video() {
        let resolver = YouTubeResolver::new();
        let track = resolver
            .resolve("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .expect("Should resolve");
        assert_eq!(track.source_id, "dQw4w9WgXcQ");
        assert!(!track.stream.url().is_empty());
    }
}
