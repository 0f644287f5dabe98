//! Catalog persistence.
//!
//! The whole catalog is rewritten on every change. Writes go to a temporary
//! file in the destination directory which is then renamed over the
//! document, so a crash mid-write never leaves a truncated catalog behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::error::{Result, StorageError};

/// Durable storage for the catalog document.
#[cfg_attr(test, mockall::automock)]
pub trait CatalogStore: Send {
    /// Load the catalog. An absent document yields an empty catalog.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the document exists but cannot be read
    /// or parsed.
    fn load(&self) -> Result<Catalog>;

    /// Replace the stored catalog.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::WriteFailed` if the destination is not writable.
    fn save(&self, catalog: &Catalog) -> Result<()>;

    /// Human-readable location of the document, for messages.
    fn location(&self) -> String;
}

/// Stores the catalog as a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonCatalogStore {
    path: PathBuf,
}

impl JsonCatalogStore {
    /// Create a store backed by `path`. Nothing is touched until the first
    /// load or save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The document path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CatalogStore for JsonCatalogStore {
    fn load(&self) -> Result<Catalog> {
        if !self.path.exists() {
            debug!(
                "Catalog document {} not found, starting empty",
                self.path.display()
            );
            return Ok(Catalog::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| StorageError::ReadFailed {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let catalog: Catalog =
            serde_json::from_str(&content).map_err(|e| StorageError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        info!(
            "Loaded catalog from {}: {} folders, {} tracks",
            self.path.display(),
            catalog.folder_names().count(),
            catalog.track_count()
        );
        Ok(catalog)
    }

    fn save(&self, catalog: &Catalog) -> Result<()> {
        write_json_atomic(&self.path, catalog)?;
        debug!(
            "Saved catalog to {} ({} tracks)",
            self.path.display(),
            catalog.track_count()
        );
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
///
/// # Errors
///
/// Returns `StorageError::WriteFailed` if any step fails; the previous file
/// content is left intact in that case.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let write_failed = |reason: String| StorageError::WriteFailed {
        path: path.to_path_buf(),
        reason,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !parent.exists() {
        fs::create_dir_all(&parent)
            .map_err(|e| write_failed(format!("cannot create {}: {e}", parent.display())))?;
    }

    let content = serde_json::to_string_pretty(value).map_err(|e| write_failed(e.to_string()))?;

    let mut tmp = NamedTempFile::new_in(&parent).map_err(|e| write_failed(e.to_string()))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| write_failed(e.to_string()))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| write_failed(e.to_string()))?;
    tmp.persist(path)
        .map_err(|e| write_failed(e.error.to_string()))?;

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::{PlaylistRef, Track};
    use crate::error::{Error, ErrorKind};
    use tempfile::TempDir;

    fn sample_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.create_folder("Dungeons").unwrap();
        catalog.create_playlist("Dungeons", "Combat").unwrap();
        catalog
            .add_track(
                &PlaylistRef::new("Dungeons", "Combat"),
                Track::new("Boss", "https://www.youtube.com/watch?v=abc", "abc")
                    .with_start_offset(30),
            )
            .unwrap();
        catalog
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = JsonCatalogStore::new(temp.path().join("missing.json"));
        let catalog = store.load().expect("absent document is not an error");
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = JsonCatalogStore::new(temp.path().join("data.json"));
        let catalog = sample_catalog();

        store.save(&catalog).expect("save");
        assert_eq!(store.load().expect("load"), catalog);
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("nested").join("deeper").join("data.json");
        let store = JsonCatalogStore::new(&path);

        store.save(&sample_catalog()).expect("save");
        assert!(path.exists());
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = JsonCatalogStore::new(temp.path().join("data.json"));
        store.save(&sample_catalog()).unwrap();
        store.save(&Catalog::new()).unwrap();

        let entries: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_save_to_unwritable_destination() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        // A directory where the file should be makes the rename fail
        let path = temp.path().join("data.json");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), "x").unwrap();

        let store = JsonCatalogStore::new(&path);
        let err = store.save(&sample_catalog()).unwrap_err();
        assert!(matches!(
            err,
            Error::Storage(StorageError::WriteFailed { .. })
        ));
    }

    #[test]
    fn test_load_corrupt_document() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("data.json");
        fs::write(&path, "not valid json {{{").unwrap();

        let err = JsonCatalogStore::new(&path).load().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(matches!(err, Error::Storage(StorageError::Corrupt { .. })));
        // The corrupt file is left for the user to inspect
        assert!(path.exists());
    }
}
