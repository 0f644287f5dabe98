//! Integration tests for the catalog, its persistence and playlist import.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::fs;
use std::sync::Arc;

use soundboard_core::catalog::{Catalog, MoveDirection, PlaylistRef, Track};
use soundboard_core::error::{Error, ErrorKind, Result};
use soundboard_core::importer::{ExternalTrack, PlaylistImporter, fetch_import};
use soundboard_core::library::Library;
use soundboard_core::resolver::{ResolvedTrack, SearchResult, StreamHandle, TrackResolver};
use soundboard_core::store::{CatalogStore, JsonCatalogStore};
use tempfile::TempDir;

/// Resolver that finds every query except the ones listed as missing.
struct FakeResolver {
    missing: Vec<&'static str>,
}

impl TrackResolver for FakeResolver {
    fn resolve(&self, url_or_query: &str) -> Result<ResolvedTrack> {
        let id = url_or_query.rsplit('=').next().unwrap_or(url_or_query).to_string();
        Ok(ResolvedTrack {
            title: format!("Video {id}"),
            url: format!("https://www.youtube.com/watch?v={id}"),
            stream: StreamHandle::new(format!("https://stream/{id}")),
            source_id: id,
            duration_secs: Some(180),
        })
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        if self.missing.contains(&query) {
            return Ok(Vec::new());
        }
        let id = query.replace(' ', "_");
        Ok(vec![SearchResult {
            title: query.to_string(),
            url: format!("https://www.youtube.com/watch?v={id}"),
            source_id: id,
            duration_secs: None,
        }]
        .into_iter()
        .take(limit)
        .collect())
    }
}

struct FakeImporter {
    items: Vec<ExternalTrack>,
}

impl PlaylistImporter for FakeImporter {
    fn import_playlist(&self, url: &str) -> Result<Vec<ExternalTrack>> {
        if url.contains("private") {
            return Err(Error::import(url, "HTTP 404"));
        }
        Ok(self.items.clone())
    }
}

fn track(title: &str) -> Track {
    Track::new(title, format!("https://www.youtube.com/watch?v={title}"), title)
}

fn roundtrip(catalog: &Catalog) -> Catalog {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = JsonCatalogStore::new(temp.path().join("soundboard_data.json"));
    store.save(catalog).expect("Should save");
    store.load().expect("Should load")
}

#[test]
fn test_roundtrip_empty_catalog() {
    let catalog = Catalog::new();
    assert_eq!(roundtrip(&catalog), catalog);
}

#[test]
fn test_roundtrip_single_track() {
    let mut catalog = Catalog::new();
    catalog.create_folder("Dungeons").unwrap();
    catalog.create_playlist("Dungeons", "Combat").unwrap();
    catalog
        .add_track(
            &PlaylistRef::new("Dungeons", "Combat"),
            track("boss").with_start_offset(30),
        )
        .unwrap();

    assert_eq!(roundtrip(&catalog), catalog);
}

#[test]
fn test_roundtrip_multi_folder_with_duplicate_titles() {
    let mut catalog = Catalog::new();
    for folder in ["Dungeons", "Town", "Travel"] {
        catalog.create_folder(folder).unwrap();
        for playlist in ["Calm", "Tense"] {
            catalog.create_playlist(folder, playlist).unwrap();
            let target = PlaylistRef::new(folder, playlist);
            catalog.add_track(&target, track("Rain")).unwrap();
            catalog.add_track(&target, track("Wind")).unwrap();
        }
    }
    catalog.create_folder("Empty").unwrap();

    assert_eq!(roundtrip(&catalog), catalog);
}

#[test]
fn test_document_uses_readable_keys() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let path = temp.path().join("data.json");
    let mut library = Library::open_path(&path).unwrap();
    library.create_folder("Town").unwrap();
    let target = library.create_playlist("Town", "Tavern").unwrap();
    library
        .add_track(&target, track("lute").with_start_offset(12))
        .unwrap();

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    let stored = &json["Town"][0];
    assert_eq!(stored["name"], "Tavern");
    assert_eq!(stored["tracks"][0]["sourceId"], "lute");
    assert_eq!(stored["tracks"][0]["startOffset"], 12);
}

#[test]
fn test_loads_legacy_keys() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let path = temp.path().join("data.json");
    fs::write(
        &path,
        r#"{"Dungeons": [{"name": "Combat", "tracks": [
            {"title": "Boss", "url": "https://www.youtube.com/watch?v=abc", "video_id": "abc", "start_time": 45},
            {"title": "Minions", "url": "https://www.youtube.com/watch?v=def"}
        ]}]}"#,
    )
    .unwrap();

    let library = Library::open_path(&path).unwrap();
    let playlist = library
        .catalog()
        .playlist(&PlaylistRef::new("Dungeons", "Combat"))
        .unwrap();
    assert_eq!(playlist.tracks[0].source_id, "abc");
    assert_eq!(playlist.tracks[0].start_offset, 45);
    assert_eq!(playlist.tracks[1].source_id, "");
    assert_eq!(playlist.tracks[1].start_offset, 0);
}

#[test]
fn test_library_changes_survive_reopen() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let path = temp.path().join("data.json");

    {
        let mut library = Library::open_path(&path).unwrap();
        library.create_folder("Dungeons").unwrap();
        let target = library.create_playlist("Dungeons", "Combat").unwrap();
        for title in ["a", "b", "c", "d"] {
            library.add_track(&target, track(title)).unwrap();
        }
        library.move_track(&target, 0, MoveDirection::Down).unwrap(); // b a c d
        library.move_track(&target, 0, MoveDirection::Up).unwrap(); // no-op
        library.move_track(&target, 3, MoveDirection::Down).unwrap(); // no-op
        library.remove_track(&target, 2).unwrap(); // b a d
        library.move_track(&target, 2, MoveDirection::Up).unwrap(); // b d a
        library.set_start_offset(&target, 1, 90).unwrap();
    }

    let library = Library::open_path(&path).unwrap();
    let playlist = library
        .catalog()
        .playlist(&PlaylistRef::new("Dungeons", "Combat"))
        .unwrap();
    let titles: Vec<_> = playlist.tracks.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, ["b", "d", "a"]);
    assert_eq!(playlist.tracks[1].start_offset, 90);
}

#[test]
fn test_duplicate_folder_leaves_catalog_and_document_unchanged() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let path = temp.path().join("data.json");
    let mut library = Library::open_path(&path).unwrap();
    library.create_folder("Dungeons").unwrap();

    let catalog_before = library.catalog().clone();
    let document_before = fs::read_to_string(&path).unwrap();

    let err = library.create_folder("Dungeons").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateName);
    assert_eq!(library.catalog(), &catalog_before);
    assert_eq!(fs::read_to_string(&path).unwrap(), document_before);
}

#[test]
fn test_negative_start_offset_is_rejected() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let mut library = Library::open_path(temp.path().join("data.json")).unwrap();
    library.create_folder("F").unwrap();
    let target = library.create_playlist("F", "P").unwrap();
    library.add_track(&target, track("a")).unwrap();

    let err = library.set_start_offset(&target, 0, -1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(library.catalog().playlist(&target).unwrap().tracks[0].start_offset, 0);
}

#[test]
fn test_failed_write_can_be_retried() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let path = temp.path().join("data.json");
    let mut library = Library::open_path(&path).unwrap();

    // A directory in the document's place makes every write fail
    fs::create_dir(&path).unwrap();
    fs::write(path.join("blocker"), "x").unwrap();

    let err = library.create_folder("Dungeons").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(library.catalog().folder("Dungeons").is_none());
    assert!(library.has_pending_save());
    assert!(library.retry_save().is_err());

    fs::remove_dir_all(&path).unwrap();
    library.retry_save().expect("Should save once the path is writable");
    assert!(library.catalog().folder("Dungeons").is_some());

    let reloaded = JsonCatalogStore::new(&path).load().unwrap();
    assert!(reloaded.folder("Dungeons").is_some());
}

#[tokio::test]
async fn test_import_with_one_unresolvable_item() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let path = temp.path().join("data.json");
    let mut library = Library::open_path(&path).unwrap();
    library.create_folder("Imported").unwrap();
    let target = library.create_playlist("Imported", "Road Trip").unwrap();

    let importer = Arc::new(FakeImporter {
        items: vec![
            ExternalTrack::new("First", "Band"),
            ExternalTrack::new("Second", "Band"),
            ExternalTrack::new("Third", "Band"),
        ],
    });
    let resolver = Arc::new(FakeResolver {
        missing: vec!["Second Band"],
    });

    let batch = fetch_import(importer, resolver, "https://open.spotify.com/playlist/abc")
        .await
        .expect("Should fetch");
    let report = library.apply_import(&target, batch).unwrap();

    assert_eq!(report.added, 2);
    assert_eq!(report.total, 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].position, 1);
    assert_eq!(report.failures[0].item.title, "Second");

    let reopened = Library::open_path(&path).unwrap();
    let titles: Vec<_> = reopened
        .catalog()
        .playlist(&PlaylistRef::new("Imported", "Road Trip"))
        .unwrap()
        .tracks
        .iter()
        .map(|t| t.title.clone())
        .collect();
    assert_eq!(titles, ["First - Band", "Third - Band"]);
}

#[tokio::test]
async fn test_import_of_unreachable_playlist_fails() {
    let importer = Arc::new(FakeImporter { items: Vec::new() });
    let resolver = Arc::new(FakeResolver { missing: Vec::new() });

    let err = fetch_import(importer, resolver, "https://open.spotify.com/playlist/private")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Import);
}

#[test]
fn test_add_track_from_url() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let mut library = Library::open_path(temp.path().join("data.json")).unwrap();
    library.create_folder("F").unwrap();
    let target = library.create_playlist("F", "P").unwrap();

    let resolver = FakeResolver { missing: Vec::new() };
    let index = library
        .add_track_from_url(&resolver, &target, "https://www.youtube.com/watch?v=xyz")
        .unwrap();

    let added = &library.catalog().playlist(&target).unwrap().tracks[index];
    assert_eq!(added.title, "Video xyz");
    assert_eq!(added.source_id, "xyz");
}
