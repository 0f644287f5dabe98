//! Player engine seam.
//!
//! The audio engine itself lives outside the core. The session drives it
//! through [`MediaPlayer`] and learns about the end of a track through the
//! [`FinishedNotifier`] handed over with each `load`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Opaque reference to a playable audio stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHandle {
    url: String,
}

impl StreamHandle {
    /// Wrap a direct stream URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The direct stream URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// One-shot "track finished" callback for a single `load`.
///
/// The notifier is tagged with the request token of the load that created
/// it. It may be called from any thread; the session discards it if the
/// token no longer matches.
#[derive(Clone)]
pub struct FinishedNotifier {
    token: u64,
    callback: Arc<dyn Fn(u64) + Send + Sync>,
}

impl FinishedNotifier {
    /// Create a notifier that invokes `callback` with `token`.
    pub fn new(token: u64, callback: impl Fn(u64) + Send + Sync + 'static) -> Self {
        Self {
            token,
            callback: Arc::new(callback),
        }
    }

    /// The request token of the load this notifier belongs to.
    #[must_use]
    pub const fn token(&self) -> u64 {
        self.token
    }

    /// Report that the loaded track reached its end.
    pub fn notify(&self) {
        (self.callback)(self.token);
    }
}

impl fmt::Debug for FinishedNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinishedNotifier")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// External player engine.
///
/// Calls come from the session task only, one at a time.
#[cfg_attr(test, mockall::automock)]
pub trait MediaPlayer: Send {
    /// Load a stream, replacing whatever was loaded. Audio must not start
    /// until [`MediaPlayer::play`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Player` if the engine cannot open the stream.
    fn load(&mut self, stream: &StreamHandle, on_finished: FinishedNotifier) -> Result<()>;

    /// Start or resume audio.
    fn play(&mut self) -> Result<()>;

    /// Pause audio, keeping the position.
    fn pause(&mut self) -> Result<()>;

    /// Stop audio and release the loaded stream.
    fn stop(&mut self) -> Result<()>;

    /// Jump to `seconds` from the start of the loaded stream.
    fn seek(&mut self, seconds: u32) -> Result<()>;

    /// Set the output level, 0 to 100.
    fn set_volume(&mut self, level: u8) -> Result<()>;
}
