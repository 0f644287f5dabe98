//! Library: the catalog with write-through persistence.
//!
//! Every mutation is applied to a copy of the catalog, persisted, and only
//! then committed. Structural errors never touch the committed catalog.
//! When the write fails the committed catalog stays as it was and the
//! rejected copy is parked so the front end can offer a retry. Later
//! mutations build on the parked copy, so the first successful write
//! persists every change made since.

use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, MoveDirection, PlaylistRef, Track};
use crate::error::Result;
use crate::importer::{ImportBatch, ImportReport};
use crate::resolver::TrackResolver;
use crate::store::{CatalogStore, JsonCatalogStore};

/// The user's catalog plus the store it is persisted to.
pub struct Library {
    catalog: Catalog,
    store: Box<dyn CatalogStore>,
    /// A change whose save failed, kept for [`Library::retry_save`].
    pending: Option<Catalog>,
}

impl Library {
    /// Open a library, loading the catalog from `store`.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the stored document cannot be read.
    pub fn open(store: Box<dyn CatalogStore>) -> Result<Self> {
        let catalog = store.load()?;
        info!("Opened library at {}", store.location());
        Ok(Self {
            catalog,
            store,
            pending: None,
        })
    }

    /// Open a library backed by a JSON document at `path`.
    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(Box::new(JsonCatalogStore::new(path)))
    }

    /// The committed catalog.
    #[must_use]
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Where the catalog is stored.
    #[must_use]
    pub fn location(&self) -> String {
        self.store.location()
    }

    /// Whether a change is waiting for a successful save.
    #[must_use]
    pub const fn has_pending_save(&self) -> bool {
        self.pending.is_some()
    }

    /// Retry persisting the last change whose save failed. Does nothing if
    /// there is none.
    ///
    /// # Errors
    ///
    /// Returns the `StorageError` again if the write still fails.
    pub fn retry_save(&mut self) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            debug!("No pending save to retry");
            return Ok(());
        };

        match self.store.save(&pending) {
            Ok(()) => {
                info!("Pending catalog change saved on retry");
                self.catalog = pending;
                Ok(())
            }
            Err(e) => {
                warn!("Retrying save failed: {}", e);
                self.pending = Some(pending);
                Err(e)
            }
        }
    }

    /// Create a folder.
    pub fn create_folder(&mut self, name: &str) -> Result<()> {
        self.mutate("create folder", |c| c.create_folder(name))
    }

    /// Delete a folder and its playlists.
    pub fn delete_folder(&mut self, name: &str) -> Result<()> {
        self.mutate("delete folder", |c| c.delete_folder(name).map(drop))
    }

    /// Create a playlist inside `folder`. Returns a reference to it.
    pub fn create_playlist(&mut self, folder: &str, name: &str) -> Result<PlaylistRef> {
        self.mutate("create playlist", |c| {
            c.create_playlist(folder, name)?;
            Ok(PlaylistRef::new(folder, name.trim()))
        })
    }

    /// Delete a playlist and its tracks.
    pub fn delete_playlist(&mut self, target: &PlaylistRef) -> Result<()> {
        self.mutate("delete playlist", |c| c.delete_playlist(target).map(drop))
    }

    /// Append a track. Returns its index.
    pub fn add_track(&mut self, target: &PlaylistRef, track: Track) -> Result<usize> {
        self.mutate("add track", |c| c.add_track(target, track))
    }

    /// Resolve `url` and append the resulting track. Returns its index.
    ///
    /// This performs network I/O through the resolver; call it off the UI
    /// thread.
    ///
    /// # Errors
    ///
    /// Returns a `ResolutionError` if the URL cannot be resolved; the
    /// catalog is untouched in that case.
    pub fn add_track_from_url(
        &mut self,
        resolver: &dyn TrackResolver,
        target: &PlaylistRef,
        url: &str,
    ) -> Result<usize> {
        // Fail fast on a bad target before touching the network
        self.working().require_playlist(target)?;
        let resolved = resolver.resolve(url)?;
        info!("Resolved '{}' to '{}'", url, resolved.title);
        self.add_track(target, resolved.to_track())
    }

    /// Remove the track at `index`.
    pub fn remove_track(&mut self, target: &PlaylistRef, index: usize) -> Result<Track> {
        self.mutate("remove track", |c| c.remove_track(target, index))
    }

    /// Move a track one step. Boundary moves are no-ops.
    pub fn move_track(
        &mut self,
        target: &PlaylistRef,
        index: usize,
        direction: MoveDirection,
    ) -> Result<usize> {
        self.mutate("move track", |c| c.move_track(target, index, direction))
    }

    /// Set a track's start offset in seconds.
    pub fn set_start_offset(
        &mut self,
        target: &PlaylistRef,
        index: usize,
        seconds: i64,
    ) -> Result<()> {
        self.mutate("set start offset", |c| {
            c.set_start_offset(target, index, seconds)
        })
    }

    /// Append the resolved tracks of an import batch with a single write.
    ///
    /// Items that failed to resolve are carried into the report; they do
    /// not abort the import.
    pub fn apply_import(&mut self, target: &PlaylistRef, batch: ImportBatch) -> Result<ImportReport> {
        let ImportBatch {
            source_url,
            tracks,
            failures,
            total,
        } = batch;

        let added = self.mutate("import playlist", |c| c.add_tracks(target, tracks))?;
        let report = ImportReport {
            playlist: target.clone(),
            source_url,
            added,
            total,
            failures,
        };
        info!("{}", report.summary());
        Ok(report)
    }

    /// The catalog new changes build on: the unsaved one if a save failed.
    fn working(&self) -> &Catalog {
        self.pending.as_ref().unwrap_or(&self.catalog)
    }

    /// Apply `op` to a copy of the working catalog and commit it once
    /// persisted. An unsaved earlier change is carried into the copy.
    fn mutate<T>(
        &mut self,
        action: &str,
        op: impl FnOnce(&mut Catalog) -> Result<T>,
    ) -> Result<T> {
        let base = self.working();
        let mut next = base.clone();
        let output = op(&mut next).inspect_err(|e| debug!("Rejected {}: {}", action, e))?;

        if &next == base {
            debug!("{} left the catalog unchanged, nothing to save", action);
            return Ok(output);
        }

        match self.store.save(&next) {
            Ok(()) => {
                if self.pending.take().is_some() {
                    info!("Saved an earlier pending change along with {}", action);
                }
                self.catalog = next;
                debug!("Committed {}", action);
                Ok(output)
            }
            Err(e) => {
                error!("Failed to persist {}: {}", action, e);
                self.pending = Some(next);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("location", &self.store.location())
            .field("folders", &self.catalog.folder_names().count())
            .field("pending", &self.pending.is_some())
            .finish()
    }
}
