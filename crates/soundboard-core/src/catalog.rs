//! Track catalog module.
//!
//! The catalog is the persisted tree of folders, playlists and tracks.
//! It is pure data: every operation here validates and mutates in memory,
//! persistence is layered on top by [`crate::library::Library`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};

/// Maximum length of a folder or playlist name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// A reference to a streamable audio source plus presentation metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Display title.
    pub title: String,
    /// Source URL.
    pub url: String,
    /// Opaque identifier used for deduplication and resolution.
    #[serde(default, alias = "video_id")]
    pub source_id: String,
    /// Where playback starts, in seconds.
    #[serde(default, alias = "start_time")]
    pub start_offset: u32,
}

impl Track {
    /// Create a track starting at offset 0.
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            source_id: source_id.into(),
            start_offset: 0,
        }
    }

    /// Set the start offset.
    #[must_use]
    pub const fn with_start_offset(mut self, seconds: u32) -> Self {
        self.start_offset = seconds;
        self
    }

    /// Text handed to the resolver: the URL when present, else the title.
    #[must_use]
    pub fn resolve_query(&self) -> &str {
        if self.url.trim().is_empty() {
            &self.title
        } else {
            &self.url
        }
    }
}

/// A named, ordered collection of tracks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Playlist {
    /// Playlist name, unique within its folder.
    pub name: String,
    /// Tracks in user order.
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl Playlist {
    /// Create an empty playlist.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tracks: Vec::new(),
        }
    }

    /// Number of tracks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Whether the playlist has no tracks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.tracks.len() {
            Ok(())
        } else {
            Err(CatalogError::IndexOutOfRange {
                index,
                len: self.tracks.len(),
            }
            .into())
        }
    }
}

/// A named grouping of playlists. The name is the key in [`Catalog`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Folder {
    /// Playlists owned by this folder, in creation order.
    pub playlists: Vec<Playlist>,
}

impl Folder {
    /// Find a playlist by name.
    #[must_use]
    pub fn playlist(&self, name: &str) -> Option<&Playlist> {
        self.playlists.iter().find(|p| p.name == name)
    }

    fn playlist_mut(&mut self, name: &str) -> Option<&mut Playlist> {
        self.playlists.iter_mut().find(|p| p.name == name)
    }
}

/// Addresses one playlist inside the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaylistRef {
    /// Owning folder name.
    pub folder: String,
    /// Playlist name.
    pub playlist: String,
}

impl PlaylistRef {
    /// Build a reference.
    pub fn new(folder: impl Into<String>, playlist: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            playlist: playlist.into(),
        }
    }
}

impl std::fmt::Display for PlaylistRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.folder, self.playlist)
    }
}

/// Direction for [`Catalog::move_track`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    /// Towards index 0.
    Up,
    /// Towards the end.
    Down,
}

/// The root collection: folder name to folder.
///
/// Serializes as a JSON object mapping each folder name to its array of
/// playlists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Catalog {
    folders: BTreeMap<String, Folder>,
}

impl Catalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether there are no folders.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    /// Folder names in display order.
    pub fn folder_names(&self) -> impl Iterator<Item = &str> {
        self.folders.keys().map(String::as_str)
    }

    /// Iterate folders with their names.
    pub fn folders(&self) -> impl Iterator<Item = (&str, &Folder)> {
        self.folders.iter().map(|(name, folder)| (name.as_str(), folder))
    }

    /// Look up a folder.
    #[must_use]
    pub fn folder(&self, name: &str) -> Option<&Folder> {
        self.folders.get(name)
    }

    /// Look up a playlist.
    #[must_use]
    pub fn playlist(&self, target: &PlaylistRef) -> Option<&Playlist> {
        self.folder(&target.folder)?.playlist(&target.playlist)
    }

    /// Look up a playlist, failing with `NotFound` for the missing part.
    ///
    /// # Errors
    ///
    /// `NotFound` if the folder or the playlist does not exist.
    pub fn require_playlist(&self, target: &PlaylistRef) -> Result<&Playlist> {
        self.folder(&target.folder)
            .ok_or_else(|| {
                crate::error::Error::from(CatalogError::NotFound {
                    kind: "folder",
                    name: target.folder.clone(),
                })
            })?
            .playlist(&target.playlist)
            .ok_or_else(|| playlist_not_found(target))
    }

    /// Total number of tracks across all playlists.
    #[must_use]
    pub fn track_count(&self) -> usize {
        self.folders
            .values()
            .flat_map(|f| &f.playlists)
            .map(Playlist::len)
            .sum()
    }

    /// Create an empty folder.
    ///
    /// # Errors
    ///
    /// `Validation` for a bad name, `DuplicateName` if the folder exists.
    pub fn create_folder(&mut self, name: &str) -> Result<()> {
        let name = validate_name("folder name", name)?;
        if self.folders.contains_key(name) {
            return Err(CatalogError::DuplicateName {
                scope: "catalog".to_string(),
                name: name.to_string(),
            }
            .into());
        }
        self.folders.insert(name.to_string(), Folder::default());
        Ok(())
    }

    /// Delete a folder and every playlist it owns.
    pub fn delete_folder(&mut self, name: &str) -> Result<Folder> {
        self.folders.remove(name).ok_or_else(|| {
            CatalogError::NotFound {
                kind: "folder",
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Create an empty playlist inside a folder.
    pub fn create_playlist(&mut self, folder: &str, name: &str) -> Result<()> {
        let name = validate_name("playlist name", name)?;
        let owner = self.folder_mut(folder)?;
        if owner.playlist(name).is_some() {
            return Err(CatalogError::DuplicateName {
                scope: format!("folder '{folder}'"),
                name: name.to_string(),
            }
            .into());
        }
        owner.playlists.push(Playlist::new(name));
        Ok(())
    }

    /// Delete a playlist and its tracks.
    pub fn delete_playlist(&mut self, target: &PlaylistRef) -> Result<Playlist> {
        let owner = self.folder_mut(&target.folder)?;
        let pos = owner
            .playlists
            .iter()
            .position(|p| p.name == target.playlist)
            .ok_or_else(|| playlist_not_found(target))?;
        Ok(owner.playlists.remove(pos))
    }

    /// Append a track. Returns its index.
    pub fn add_track(&mut self, target: &PlaylistRef, track: Track) -> Result<usize> {
        let playlist = self.playlist_mut(target)?;
        playlist.tracks.push(track);
        Ok(playlist.tracks.len() - 1)
    }

    /// Append several tracks. Returns how many were added.
    pub fn add_tracks(&mut self, target: &PlaylistRef, tracks: Vec<Track>) -> Result<usize> {
        let playlist = self.playlist_mut(target)?;
        let count = tracks.len();
        playlist.tracks.extend(tracks);
        Ok(count)
    }

    /// Remove the track at `index`.
    pub fn remove_track(&mut self, target: &PlaylistRef, index: usize) -> Result<Track> {
        let playlist = self.playlist_mut(target)?;
        playlist.check_index(index)?;
        Ok(playlist.tracks.remove(index))
    }

    /// Swap the track at `index` with its neighbour. Moving the first track
    /// up or the last track down is a no-op. Returns the track's new index.
    pub fn move_track(
        &mut self,
        target: &PlaylistRef,
        index: usize,
        direction: MoveDirection,
    ) -> Result<usize> {
        let playlist = self.playlist_mut(target)?;
        playlist.check_index(index)?;
        let new_index = match direction {
            MoveDirection::Up if index > 0 => index - 1,
            MoveDirection::Down if index + 1 < playlist.tracks.len() => index + 1,
            _ => return Ok(index),
        };
        playlist.tracks.swap(index, new_index);
        Ok(new_index)
    }

    /// Set where playback of a track starts.
    ///
    /// # Errors
    ///
    /// `Validation` if `seconds` is negative or too large, `IndexOutOfRange`
    /// for a bad index.
    pub fn set_start_offset(
        &mut self,
        target: &PlaylistRef,
        index: usize,
        seconds: i64,
    ) -> Result<()> {
        let seconds = u32::try_from(seconds).map_err(|_| CatalogError::Validation {
            field: "start offset",
            reason: format!("{seconds} is not a number of seconds between 0 and {}", u32::MAX),
        })?;
        let playlist = self.playlist_mut(target)?;
        playlist.check_index(index)?;
        playlist.tracks[index].start_offset = seconds;
        Ok(())
    }

    fn folder_mut(&mut self, name: &str) -> Result<&mut Folder> {
        self.folders.get_mut(name).ok_or_else(|| {
            CatalogError::NotFound {
                kind: "folder",
                name: name.to_string(),
            }
            .into()
        })
    }

    fn playlist_mut(&mut self, target: &PlaylistRef) -> Result<&mut Playlist> {
        self.folder_mut(&target.folder)?
            .playlist_mut(&target.playlist)
            .ok_or_else(|| playlist_not_found(target))
    }
}

fn playlist_not_found(target: &PlaylistRef) -> crate::error::Error {
    CatalogError::NotFound {
        kind: "playlist",
        name: target.to_string(),
    }
    .into()
}

/// Validate a folder or playlist name and return it trimmed.
///
/// # Errors
///
/// Returns a `Validation` error for empty, overlong or control-character names.
pub fn validate_name<'a>(field: &'static str, name: &'a str) -> Result<&'a str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::Validation {
            field,
            reason: "cannot be empty".to_string(),
        }
        .into());
    }

    if trimmed.len() > MAX_NAME_LEN {
        return Err(CatalogError::Validation {
            field,
            reason: format!("longer than {MAX_NAME_LEN} bytes"),
        }
        .into());
    }

    if trimmed.chars().any(char::is_control) {
        return Err(CatalogError::Validation {
            field,
            reason: "contains control characters".to_string(),
        }
        .into());
    }

    Ok(trimmed)
}
