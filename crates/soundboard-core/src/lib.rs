//! Soundboard Core Library
//!
//! This crate provides the core functionality for the Soundboard application:
//! - Track catalog (folders, playlists, tracks) with atomic JSON persistence
//! - Playback queue with sequential and shuffled order
//! - Playback session state machine driving an external player engine
//! - Track resolution and external playlist import

pub mod catalog;
pub mod config;
pub mod error;
pub mod importer;
pub mod library;
pub mod logging;
pub mod player;
pub mod queue;
pub mod resolver;
pub mod session;
pub mod store;

pub use catalog::{Catalog, Folder, MoveDirection, Playlist, PlaylistRef, Track};
pub use config::AppConfig;
pub use error::{CatalogError, Error, ErrorKind, Result, StorageError};
pub use importer::{ExternalTrack, ImportBatch, ImportReport, PlaylistImporter, SpotifyImporter};
pub use library::Library;
pub use player::{FinishedNotifier, MediaPlayer, StreamHandle};
pub use queue::PlaybackQueue;
pub use resolver::{ResolvedTrack, SearchResult, TrackResolver, YouTubeResolver};
pub use session::{PlaybackSession, PlaybackState, SessionEvent, SessionHandle, SessionOptions};
pub use store::{CatalogStore, JsonCatalogStore};
