//! Error types for Soundboard core operations.
//!
//! Errors are grouped by domain. Structural catalog errors live in
//! [`CatalogError`], persistence failures in [`StorageError`], and the
//! external collaborators (resolver, importer, player) report through
//! dedicated [`Error`] variants. None of them is fatal: every operation
//! leaves the application usable after a failure.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by catalog mutations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// A folder or playlist with this name already exists in the scope.
    #[error("{scope} already contains '{name}'")]
    DuplicateName {
        /// Where the clash happened (e.g. "catalog" or "folder 'Dungeons'").
        scope: String,
        /// The clashing name.
        name: String,
    },

    /// A folder or playlist could not be found.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// What was looked up ("folder" or "playlist").
        kind: &'static str,
        /// The name that was looked up.
        name: String,
    },

    /// A track index was outside the playlist.
    #[error("Track index {index} is out of range (playlist has {len} tracks)")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Number of tracks in the playlist.
        len: usize,
    },

    /// Bad user input.
    #[error("Invalid {field}: {reason}")]
    Validation {
        /// The field that failed validation.
        field: &'static str,
        /// Why it failed.
        reason: String,
    },
}

/// Errors raised while reading or writing the catalog document.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The document exists but could not be read.
    #[error("Failed to read {path}: {reason}")]
    ReadFailed {
        /// Document path.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// The document could not be written.
    #[error("Failed to write {path}: {reason}")]
    WriteFailed {
        /// Document path.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// The document was read but is not a valid catalog.
    #[error("Corrupt catalog document {path}: {reason}")]
    Corrupt {
        /// Document path.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },
}

/// Errors that can occur in Soundboard core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Catalog structure error.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Persistence error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Stream lookup failed (removed video, geo-restriction, network).
    #[error("Could not resolve '{query}': {reason}")]
    Resolution {
        /// The URL, search text or track title that failed.
        query: String,
        /// Why it failed.
        reason: String,
    },

    /// Third-party playlist fetch failed.
    #[error("Could not import playlist {url}: {reason}")]
    Import {
        /// The playlist URL.
        url: String,
        /// Why it failed.
        reason: String,
    },

    /// The external player engine rejected a command.
    #[error("Player error: {0}")]
    Player(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The playback session task is no longer running.
    #[error("Playback session is closed")]
    SessionClosed,

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Fieldless classification of [`Error`], for front ends that map errors
/// to message styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Name clash in the catalog.
    DuplicateName,
    /// Missing folder or playlist.
    NotFound,
    /// Bad track index.
    IndexOutOfRange,
    /// Bad user input.
    Validation,
    /// Stream lookup failure.
    Resolution,
    /// Playlist import failure.
    Import,
    /// Persistence failure.
    Storage,
    /// Player engine failure.
    Player,
    /// Configuration failure.
    Configuration,
    /// Session task gone.
    SessionClosed,
}

impl Error {
    /// Shorthand for a resolution failure.
    pub fn resolution(query: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            query: query.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for an import failure.
    pub fn import(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Import {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Catalog(CatalogError::DuplicateName { .. }) => ErrorKind::DuplicateName,
            Self::Catalog(CatalogError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Catalog(CatalogError::IndexOutOfRange { .. }) => ErrorKind::IndexOutOfRange,
            Self::Catalog(CatalogError::Validation { .. }) => ErrorKind::Validation,
            Self::Storage(_) | Self::Io(_) | Self::Serialization(_) => ErrorKind::Storage,
            Self::Resolution { .. } => ErrorKind::Resolution,
            Self::Import { .. } => ErrorKind::Import,
            Self::Player(_) => ErrorKind::Player,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::SessionClosed => ErrorKind::SessionClosed,
        }
    }

    /// Whether the error came from user input rather than the environment.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(self, Self::Catalog(_))
    }

    /// Whether the failed operation can be retried as is. Only a closed
    /// session needs the front end to spawn a new one first; no error is
    /// fatal to the process.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::SessionClosed)
    }

    /// Message suitable for a status line or dialog.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Storage(_) | Self::Io(_) | Self::Serialization(_) => {
                format!("Could not save your changes ({self}). You can retry the save.")
            }
            Self::SessionClosed => "Playback is unavailable; restart the player.".to_string(),
            _ => self.to_string(),
        }
    }
}
