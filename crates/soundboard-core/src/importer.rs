//! External playlist import.
//!
//! An importer lists the `(title, artist)` pairs of a third-party playlist.
//! Each pair is then searched through the track resolver; hits become
//! catalog tracks and misses are reported without aborting the import.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{PlaylistRef, Track};
use crate::config::ImportConfig;
use crate::error::{Error, Result};
use crate::resolver::TrackResolver;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A track listed by an external playlist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalTrack {
    /// Song title.
    pub title: String,
    /// Artist names, comma separated.
    pub artist: String,
}

impl ExternalTrack {
    /// Create an entry.
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
        }
    }

    /// Text handed to the resolver's search.
    #[must_use]
    pub fn search_query(&self) -> String {
        if self.artist.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.artist)
        }
    }

    /// Title the imported catalog track gets.
    #[must_use]
    pub fn display_title(&self) -> String {
        if self.artist.is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.title, self.artist)
        }
    }
}

/// An item that could not be matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFailure {
    /// Zero-based position in the external playlist.
    pub position: usize,
    /// The external entry.
    pub item: ExternalTrack,
    /// Why it failed.
    pub reason: String,
}

/// Outcome of resolving an external playlist, ready to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBatch {
    /// The external playlist URL.
    pub source_url: String,
    /// Matched tracks, in external order.
    pub tracks: Vec<Track>,
    /// Unmatched items.
    pub failures: Vec<ImportFailure>,
    /// Items listed by the external playlist.
    pub total: usize,
}

/// What an applied import did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    /// Playlist the tracks went into.
    pub playlist: PlaylistRef,
    /// The external playlist URL.
    pub source_url: String,
    /// Tracks appended.
    pub added: usize,
    /// Items listed by the external playlist.
    pub total: usize,
    /// Unmatched items.
    pub failures: Vec<ImportFailure>,
}

impl ImportReport {
    /// One-line summary for a status bar.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.failures.is_empty() {
            format!("Imported {} tracks into {}", self.added, self.playlist)
        } else {
            format!(
                "Imported {} of {} tracks into {} ({} not found)",
                self.added,
                self.total,
                self.playlist,
                self.failures.len()
            )
        }
    }
}

/// External playlist source.
#[cfg_attr(test, mockall::automock)]
pub trait PlaylistImporter: Send + Sync {
    /// List the tracks of the playlist at `url`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Import` if the URL is not a playlist of this source
    /// or the playlist cannot be fetched.
    fn import_playlist(&self, url: &str) -> Result<Vec<ExternalTrack>>;
}

/// Search every item through `resolver`, keeping hits and recording misses.
pub fn resolve_items(
    resolver: &dyn TrackResolver,
    source_url: &str,
    items: Vec<ExternalTrack>,
) -> ImportBatch {
    let total = items.len();
    let mut tracks = Vec::with_capacity(total);
    let mut failures = Vec::new();

    for (position, item) in items.into_iter().enumerate() {
        let query = item.search_query();
        match resolver.search(&query, 1) {
            Ok(hits) => match hits.into_iter().next() {
                Some(hit) => {
                    debug!("[{}/{}] '{}' -> {}", position + 1, total, query, hit.source_id);
                    tracks.push(Track::new(item.display_title(), hit.url, hit.source_id));
                }
                None => {
                    warn!("[{}/{}] No results for '{}'", position + 1, total, query);
                    failures.push(ImportFailure {
                        position,
                        item,
                        reason: "no search results".to_string(),
                    });
                }
            },
            Err(e) => {
                warn!("[{}/{}] Search for '{}' failed: {}", position + 1, total, query, e);
                failures.push(ImportFailure {
                    position,
                    item,
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        "Matched {}/{} tracks from {}",
        tracks.len(),
        total,
        source_url
    );

    ImportBatch {
        source_url: source_url.to_string(),
        tracks,
        failures,
        total,
    }
}

/// Fetch an external playlist and resolve its items on the blocking pool.
///
/// # Errors
///
/// Returns `Error::Import` if the playlist cannot be fetched or lists no
/// tracks. Individual items that fail to resolve are reported in the batch.
pub async fn fetch_import(
    importer: Arc<dyn PlaylistImporter>,
    resolver: Arc<dyn TrackResolver>,
    url: &str,
) -> Result<ImportBatch> {
    let source_url = url.to_string();
    info!("Importing playlist {}", source_url);

    tokio::task::spawn_blocking(move || {
        let items = importer.import_playlist(&source_url)?;
        if items.is_empty() {
            return Err(Error::import(&source_url, "the playlist has no tracks"));
        }
        Ok(resolve_items(resolver.as_ref(), &source_url, items))
    })
    .await
    .map_err(|e| Error::import(url, format!("import task failed: {e}")))?
}

/// Extract the playlist id from an `open.spotify.com/playlist/<id>` URL or a
/// `spotify:playlist:<id>` URI.
///
/// # Errors
///
/// Returns `Error::Import` if `url` is not a Spotify playlist link.
pub fn extract_spotify_playlist_id(url: &str) -> Result<String> {
    let re = Regex::new(
        r"^(?:(?:https?://)?open\.spotify\.com/(?:intl-[A-Za-z-]+/)?playlist/|spotify:playlist:)([A-Za-z0-9]+)",
    )
    .map_err(|e| Error::import(url, e.to_string()))?;

    re.captures(url.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            Error::import(
                url,
                "not a Spotify playlist link (expected https://open.spotify.com/playlist/...)",
            )
        })
}

/// Imports public Spotify playlists by reading their web pages.
#[derive(Debug, Clone, Default)]
pub struct SpotifyImporter {
    config: ImportConfig,
}

impl SpotifyImporter {
    /// Create an importer.
    #[must_use]
    pub const fn new(config: ImportConfig) -> Self {
        Self { config }
    }

    fn fetch(&self, page_url: &str, source_url: &str) -> Result<String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::import(source_url, format!("HTTP client: {e}")))?;

        let response = client
            .get(page_url)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .map_err(|e| Error::import(source_url, format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::import(
                source_url,
                format!("{page_url} returned HTTP {}", response.status()),
            ));
        }

        response
            .text()
            .map_err(|e| Error::import(source_url, format!("failed to read page: {e}")))
    }
}

impl PlaylistImporter for SpotifyImporter {
    fn import_playlist(&self, url: &str) -> Result<Vec<ExternalTrack>> {
        let id = extract_spotify_playlist_id(url)?;
        info!("Fetching Spotify playlist {}", id);

        let page = self.fetch(&format!("https://open.spotify.com/playlist/{id}"), url)?;
        let mut tracks = match parse_next_data(&page) {
            Some(tracks) if !tracks.is_empty() => tracks,
            _ => {
                debug!("No track data in playlist page, trying the embed page");
                let embed = self.fetch(&format!("https://open.spotify.com/embed/playlist/{id}"), url)?;
                parse_embed_page(&embed)
            }
        };

        dedupe(&mut tracks);
        if tracks.len() > self.config.max_tracks {
            info!(
                "Playlist has {} tracks, keeping the first {}",
                tracks.len(),
                self.config.max_tracks
            );
            tracks.truncate(self.config.max_tracks);
        }
        Ok(tracks)
    }
}

/// Read tracks from the page's embedded `__NEXT_DATA__` JSON.
fn parse_next_data(html: &str) -> Option<Vec<ExternalTrack>> {
    let re = Regex::new(r#"(?s)<script id="__NEXT_DATA__" type="application/json">(.+?)</script>"#)
        .ok()?;
    let json = re.captures(html)?.get(1)?.as_str();
    let data: serde_json::Value = serde_json::from_str(json)
        .inspect_err(|e| debug!("Failed to parse __NEXT_DATA__: {}", e))
        .ok()?;

    let items = data
        .pointer("/props/pageProps/state/data/entity/tracks/items")?
        .as_array()?;

    let tracks = items
        .iter()
        .filter_map(|item| {
            let track = item.get("track")?;
            let title = track.get("name")?.as_str().filter(|s| !s.is_empty())?;
            let artist = track
                .get("artists")
                .and_then(|a| a.as_array())
                .map(|artists| {
                    artists
                        .iter()
                        .filter_map(|a| a.get("name").and_then(|n| n.as_str()))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            Some(ExternalTrack::new(title, artist))
        })
        .collect();
    Some(tracks)
}

/// Scrape `(title, first artist)` pairs from the embed page.
fn parse_embed_page(html: &str) -> Vec<ExternalTrack> {
    let Ok(re) = Regex::new(r#""name":"([^"]+)".*?"artists":\[.*?"name":"([^"]+)""#) else {
        return Vec::new();
    };
    re.captures_iter(html)
        .filter_map(|caps| {
            Some(ExternalTrack::new(
                caps.get(1)?.as_str(),
                caps.get(2)?.as_str(),
            ))
        })
        .collect()
}

fn dedupe(tracks: &mut Vec<ExternalTrack>) {
    let mut seen = HashSet::new();
    tracks.retain(|t| seen.insert((t.title.clone(), t.artist.clone())));
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::resolver::{MockTrackResolver, SearchResult};

    fn hit(id: &str) -> SearchResult {
        SearchResult {
            title: format!("video {id}"),
            source_id: id.to_string(),
            url: format!("https://www.youtube.com/watch?v={id}"),
            duration_secs: None,
        }
    }

    #[test]
    fn test_extract_spotify_playlist_id() {
        assert_eq!(
            extract_spotify_playlist_id("https://open.spotify.com/playlist/37i9dQZF1DX0XUsuxWHRQd?si=abc")
                .unwrap(),
            "37i9dQZF1DX0XUsuxWHRQd"
        );
        assert_eq!(
            extract_spotify_playlist_id("https://open.spotify.com/intl-pt/playlist/abc123").unwrap(),
            "abc123"
        );
        assert_eq!(extract_spotify_playlist_id("spotify:playlist:xyz").unwrap(), "xyz");

        let err = extract_spotify_playlist_id("https://open.spotify.com/album/abc").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Import);
    }

    #[test]
    fn test_parse_next_data() {
        let html = r#"<html><script id="__NEXT_DATA__" type="application/json">
        {"props":{"pageProps":{"state":{"data":{"entity":{"tracks":{"items":[
            {"track":{"name":"Song A","artists":[{"name":"Band"},{"name":"Guest"}]}},
            {"track":{"name":"","artists":[]}},
            {"track":{"name":"Song B","artists":[{"name":"Solo"}]}}
        ]}}}}}}}
        </script></html>"#;

        let tracks = parse_next_data(html).unwrap();
        assert_eq!(
            tracks,
            vec![
                ExternalTrack::new("Song A", "Band, Guest"),
                ExternalTrack::new("Song B", "Solo"),
            ]
        );
    }

    #[test]
    fn test_parse_embed_page_and_dedupe() {
        let html = r#"{"name":"One","uri":"x","artists":[{"name":"A"}]},{"name":"Two","artists":[{"name":"B"}]},{"name":"One","artists":[{"name":"A"}]}"#;
        let mut tracks = parse_embed_page(html);
        dedupe(&mut tracks);
        assert_eq!(
            tracks,
            vec![ExternalTrack::new("One", "A"), ExternalTrack::new("Two", "B")]
        );
    }

    #[test]
    fn test_external_track_titles() {
        let track = ExternalTrack::new("Song", "Band");
        assert_eq!(track.search_query(), "Song Band");
        assert_eq!(track.display_title(), "Song - Band");
        assert_eq!(ExternalTrack::new("Song", "").display_title(), "Song");
    }

    #[test]
    fn test_resolve_items_reports_misses() {
        let mut resolver = MockTrackResolver::new();
        resolver
            .expect_search()
            .returning(|query: &str, _| match query {
                "One A" => Ok(vec![hit("id1")]),
                "Two B" => Ok(Vec::new()),
                _ => Err(Error::resolution(query, "blocked")),
            });

        let batch = resolve_items(
            &resolver,
            "https://open.spotify.com/playlist/x",
            vec![
                ExternalTrack::new("One", "A"),
                ExternalTrack::new("Two", "B"),
                ExternalTrack::new("Three", "C"),
            ],
        );

        assert_eq!(batch.total, 3);
        assert_eq!(batch.tracks.len(), 1);
        assert_eq!(batch.tracks[0].title, "One - A");
        assert_eq!(batch.tracks[0].source_id, "id1");
        assert_eq!(batch.failures.len(), 2);
        assert_eq!(batch.failures[0].position, 1);
        assert!(batch.failures[1].reason.contains("blocked"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fetch_import_empty_playlist_fails() {
        let mut importer = MockPlaylistImporter::new();
        importer.expect_import_playlist().returning(|_| Ok(Vec::new()));
        let mut resolver = MockTrackResolver::new();
        resolver.expect_search().never();

        let err = fetch_import(Arc::new(importer), Arc::new(resolver), "spotify:playlist:x")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Import);
    }

    #[test]
    fn test_report_summary() {
        let report = ImportReport {
            playlist: PlaylistRef::new("Imported", "Road Trip"),
            source_url: String::new(),
            added: 2,
            total: 3,
            failures: vec![ImportFailure {
                position: 1,
                item: ExternalTrack::new("Two", "B"),
                reason: "no search results".to_string(),
            }],
        };
        assert_eq!(
            report.summary(),
            "Imported 2 of 3 tracks into Imported/Road Trip (1 not found)"
        );
    }
}
