//! Playback queue.
//!
//! The queue holds a snapshot of a playlist's tracks and the order in which
//! to play them. In shuffled mode the order is a uniform random permutation
//! drawn with `rand`; every track plays once before any repeats.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::catalog::Track;
use crate::error::{CatalogError, Result};

/// Ordered tracks plus a cursor.
#[derive(Debug, Clone)]
pub struct PlaybackQueue {
    /// Tracks in playlist order.
    tracks: Vec<Track>,
    /// Play order, as indices into `tracks`.
    order: Vec<usize>,
    /// Position in `order`. `None` before the start or after the end.
    position: Option<usize>,
    shuffle: bool,
    loop_playlist: bool,
    rng: StdRng,
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackQueue {
    /// Create an empty sequential queue that loops.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create an empty queue with a deterministic shuffle.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            tracks: Vec::new(),
            order: Vec::new(),
            position: None,
            shuffle: false,
            loop_playlist: true,
            rng,
        }
    }

    /// Replace the queue contents and rewind before the first track.
    ///
    /// Nothing is current until the first `advance`.
    pub fn reset(&mut self, tracks: Vec<Track>, shuffle: bool) {
        self.tracks = tracks;
        self.shuffle = shuffle;
        self.rebuild_order();
        self.position = None;
        debug!(
            "Queue reset: {} tracks, shuffle={}",
            self.tracks.len(),
            self.shuffle
        );
    }

    /// Drop every track.
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.order.clear();
        self.position = None;
    }

    /// The track under the cursor.
    #[must_use]
    pub fn current(&self) -> Option<&Track> {
        self.current_index().map(|i| &self.tracks[i])
    }

    /// Playlist index of the track under the cursor.
    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        self.position.and_then(|p| self.order.get(p).copied())
    }

    /// Move to the next track and return it.
    ///
    /// Past the last track the queue wraps when looping is on (drawing a
    /// fresh permutation in shuffled mode); otherwise it yields `None` and
    /// the next call starts over.
    pub fn advance(&mut self) -> Option<&Track> {
        if self.tracks.is_empty() {
            return None;
        }

        let next = match self.position {
            None => Some(0),
            Some(p) if p + 1 < self.order.len() => Some(p + 1),
            Some(_) if self.loop_playlist => {
                if self.shuffle {
                    self.reshuffle_avoiding(self.current_index());
                }
                debug!("Queue wrapped to the start");
                Some(0)
            }
            Some(_) => None,
        };

        self.position = next;
        self.current()
    }

    /// Move to the previous track and return it.
    ///
    /// At the first track this wraps to the last when looping, otherwise it
    /// stays put.
    pub fn previous(&mut self) -> Option<&Track> {
        if self.tracks.is_empty() {
            return None;
        }

        let last = self.order.len() - 1;
        self.position = Some(match self.position {
            None => last,
            Some(0) if self.loop_playlist => last,
            Some(0) => 0,
            Some(p) => p - 1,
        });
        self.current()
    }

    /// Put the cursor on the track at `playlist_index` (playlist order).
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfRange` if there is no such track.
    pub fn jump_to(&mut self, playlist_index: usize) -> Result<&Track> {
        let position = self
            .order
            .iter()
            .position(|&i| i == playlist_index)
            .ok_or(CatalogError::IndexOutOfRange {
                index: playlist_index,
                len: self.tracks.len(),
            })?;
        self.position = Some(position);
        Ok(&self.tracks[playlist_index])
    }

    /// Switch shuffle on or off. The current track stays current; turning
    /// shuffle on draws a fresh permutation with it first.
    pub fn set_shuffle(&mut self, shuffle: bool) {
        if shuffle == self.shuffle {
            return;
        }
        self.shuffle = shuffle;

        let current = self.current_index();
        self.rebuild_order();
        if let Some(index) = current {
            if shuffle {
                if let Some(p) = self.order.iter().position(|&i| i == index) {
                    self.order.swap(0, p);
                }
                self.position = Some(0);
            } else {
                self.position = Some(index);
            }
        }
    }

    /// Whether the queue is shuffled.
    #[must_use]
    pub const fn is_shuffled(&self) -> bool {
        self.shuffle
    }

    /// Set whether the queue wraps at the end.
    pub fn set_loop(&mut self, loop_playlist: bool) {
        self.loop_playlist = loop_playlist;
    }

    /// Whether the queue wraps at the end.
    #[must_use]
    pub const fn is_looping(&self) -> bool {
        self.loop_playlist
    }

    /// Play order as playlist indices.
    #[must_use]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Tracks in playlist order.
    #[must_use]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Number of tracks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    fn rebuild_order(&mut self) {
        self.order = (0..self.tracks.len()).collect();
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    /// New permutation for the next cycle. The track that just played is
    /// not allowed to open it, so a wrap never plays the same track twice.
    /// Redrawing keeps every other permutation equally likely.
    fn reshuffle_avoiding(&mut self, last: Option<usize>) {
        loop {
            self.rebuild_order();
            match (last, self.order.first()) {
                (Some(last), Some(&first)) if first == last && self.order.len() > 1 => {}
                _ => break,
            }
        }
    }
}
