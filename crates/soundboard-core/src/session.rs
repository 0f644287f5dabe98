//! Playback session.
//!
//! [`PlaybackSession`] is the Stopped/Playing/Paused state machine. It is
//! synchronous and owns the player and the queue; it never blocks on the
//! network. Starting a track produces a [`ResolveRequest`] that the caller
//! resolves and feeds back through [`PlaybackSession::complete_resolution`].
//!
//! [`SessionHandle::spawn`] runs a session on one tokio task fed by a
//! command channel. User commands, player "finished" notifications and
//! resolver completions all travel through that channel, so transitions are
//! applied one at a time. Every load bumps a request token; completions and
//! notifications carrying an older token are dropped.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::catalog::Track;
use crate::config::PlaybackConfig;
use crate::error::{Error, Result};
use crate::player::{FinishedNotifier, MediaPlayer};
use crate::queue::PlaybackQueue;
use crate::resolver::{ResolvedTrack, TrackResolver};

/// Highest volume level.
pub const MAX_VOLUME: u8 = 100;

/// Playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// Nothing loaded.
    #[default]
    Stopped,
    /// Audio is playing.
    Playing,
    /// Audio is loaded and paused.
    Paused,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Playing => write!(f, "Playing"),
            Self::Paused => write!(f, "Paused"),
        }
    }
}

/// Notifications for the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The state changed.
    StateChanged(PlaybackState),
    /// A track became audible.
    TrackStarted {
        /// The track.
        track: Track,
        /// Length in seconds, when known.
        duration_secs: Option<u64>,
    },
    /// A track's stream could not be resolved; the session is stopped.
    ResolutionFailed {
        /// The track.
        track: Track,
        /// Why.
        error: String,
    },
    /// The player engine failed.
    PlayerFailed(String),
    /// The queue ran out of tracks.
    QueueFinished,
    /// The volume changed.
    VolumeChanged(u8),
    /// A command was not valid in the current state.
    CommandRejected {
        /// The command.
        command: &'static str,
        /// Why.
        reason: String,
    },
}

/// Session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Initial volume.
    pub volume: u8,
    /// Start the next track when one finishes.
    pub auto_advance: bool,
    /// Shuffle the queue.
    pub shuffle: bool,
    /// Wrap to the start after the last track.
    pub loop_playlist: bool,
    /// Fixed shuffle seed, for reproducible orders.
    pub shuffle_seed: Option<u64>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&PlaybackConfig::default())
    }
}

impl From<&PlaybackConfig> for SessionOptions {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            volume: config.volume.min(MAX_VOLUME),
            auto_advance: config.auto_advance,
            shuffle: config.shuffle,
            loop_playlist: config.loop_playlist,
            shuffle_seed: None,
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Current state.
    pub state: PlaybackState,
    /// Track loaded in the player.
    pub current: Option<Track>,
    /// Track waiting for its stream.
    pub resolving: Option<Track>,
    /// Playlist index under the queue cursor.
    pub queue_index: Option<usize>,
    /// Tracks in the queue.
    pub queue_len: usize,
    /// Volume, 0 to 100.
    pub volume: u8,
    /// Auto-advance flag.
    pub auto_advance: bool,
    /// Shuffle flag.
    pub shuffle: bool,
    /// Loop flag.
    pub loop_playlist: bool,
}

/// A stream lookup the session is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    /// Token the result must carry.
    pub token: u64,
    /// The track to resolve.
    pub track: Track,
}

impl ResolveRequest {
    /// What to hand the resolver.
    #[must_use]
    pub fn query(&self) -> &str {
        self.track.resolve_query()
    }
}

type FinishedSink = Arc<dyn Fn(u64) + Send + Sync>;

/// The playback state machine.
pub struct PlaybackSession {
    player: Box<dyn MediaPlayer>,
    queue: PlaybackQueue,
    state: PlaybackState,
    current: Option<Track>,
    pending: Option<Track>,
    volume: u8,
    auto_advance: bool,
    token: u64,
    on_finished: FinishedSink,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl PlaybackSession {
    /// Create a stopped session.
    pub fn new(
        player: Box<dyn MediaPlayer>,
        options: &SessionOptions,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let mut queue = options
            .shuffle_seed
            .map_or_else(PlaybackQueue::new, PlaybackQueue::with_seed);
        queue.set_loop(options.loop_playlist);
        queue.set_shuffle(options.shuffle);

        Self {
            player,
            queue,
            state: PlaybackState::Stopped,
            current: None,
            pending: None,
            volume: options.volume.min(MAX_VOLUME),
            auto_advance: options.auto_advance,
            token: 0,
            on_finished: Arc::new(|_| {}),
            events,
        }
    }

    /// Route "track finished" notifications from the player to `sink`.
    pub fn set_finished_sink(&mut self, sink: impl Fn(u64) + Send + Sync + 'static) {
        self.on_finished = Arc::new(sink);
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> PlaybackState {
        self.state
    }

    /// Token of the latest load request.
    #[must_use]
    pub const fn token(&self) -> u64 {
        self.token
    }

    /// Track loaded in the player.
    #[must_use]
    pub const fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    /// Current volume.
    #[must_use]
    pub const fn volume(&self) -> u8 {
        self.volume
    }

    /// The queue.
    #[must_use]
    pub const fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    /// Snapshot for the front end.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            current: self.current.clone(),
            resolving: self.pending.clone(),
            queue_index: self.queue.current_index(),
            queue_len: self.queue.len(),
            volume: self.volume,
            auto_advance: self.auto_advance,
            shuffle: self.queue.is_shuffled(),
            loop_playlist: self.queue.is_looping(),
        }
    }

    /// Replace the queue with a playlist's tracks. Playback is not touched.
    pub fn load_playlist(&mut self, tracks: Vec<Track>) {
        let shuffle = self.queue.is_shuffled();
        self.queue.reset(tracks, shuffle);
        info!("Loaded {} tracks into the queue", self.queue.len());
    }

    /// Start `track`, stopping whatever is loaded. Accepted in any state.
    pub fn play(&mut self, track: Track) -> ResolveRequest {
        self.release_player();
        self.token += 1;
        info!("Resolving '{}' (request {})", track.title, self.token);
        self.pending = Some(track.clone());
        ResolveRequest {
            token: self.token,
            track,
        }
    }

    /// Start the track under the queue cursor, or the first one.
    pub fn play_current(&mut self) -> Option<ResolveRequest> {
        let track = match self.queue.current() {
            Some(track) => track.clone(),
            None => self.queue.advance()?.clone(),
        };
        Some(self.play(track))
    }

    /// Start the queue track at playlist index `index`.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfRange` if the queue has no such track.
    pub fn play_index(&mut self, index: usize) -> Result<ResolveRequest> {
        let track = self.queue.jump_to(index)?.clone();
        Ok(self.play(track))
    }

    /// Pause. Only meaningful while playing.
    ///
    /// # Errors
    ///
    /// Returns `Error::Player` if the engine refuses.
    pub fn pause(&mut self) -> Result<()> {
        if self.state != PlaybackState::Playing {
            debug!("Pause ignored in state {}", self.state);
            return Ok(());
        }
        self.player.pause()?;
        self.set_state(PlaybackState::Paused);
        Ok(())
    }

    /// Resume. Only meaningful while paused.
    ///
    /// # Errors
    ///
    /// Returns `Error::Player` if the engine refuses.
    pub fn resume(&mut self) -> Result<()> {
        if self.state != PlaybackState::Paused {
            debug!("Resume ignored in state {}", self.state);
            return Ok(());
        }
        self.player.play()?;
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    /// Pause when playing, resume when paused, start the queue when stopped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Player` if the engine refuses.
    pub fn toggle_pause(&mut self) -> Result<Option<ResolveRequest>> {
        match self.state {
            PlaybackState::Playing => self.pause().map(|()| None),
            PlaybackState::Paused => self.resume().map(|()| None),
            PlaybackState::Stopped if self.pending.is_some() => Ok(None),
            PlaybackState::Stopped => {
                let request = self.play_current();
                if request.is_none() {
                    self.reject("toggle_pause", "the queue is empty");
                }
                Ok(request)
            }
        }
    }

    /// Stop and release the player. Any in-flight resolution is cancelled.
    pub fn stop(&mut self) {
        self.token += 1;
        if self.pending.take().is_some() {
            debug!("Cancelled pending resolution");
        }
        self.release_player();
    }

    /// Skip to the next queue track. Rejected while stopped.
    pub fn next(&mut self) -> Option<ResolveRequest> {
        if !self.is_active() {
            self.reject("next", "nothing is playing");
            return None;
        }
        let next = self.queue.advance().cloned();
        self.start_or_finish(next)
    }

    /// Go back to the previous queue track. Rejected while stopped.
    pub fn previous(&mut self) -> Option<ResolveRequest> {
        if !self.is_active() {
            self.reject("previous", "nothing is playing");
            return None;
        }
        let previous = self.queue.previous().cloned();
        self.start_or_finish(previous)
    }

    /// The player reported the end of the track loaded with `token`.
    pub fn track_finished(&mut self, token: u64) -> Option<ResolveRequest> {
        if token != self.token || self.state != PlaybackState::Playing {
            debug!(
                "Discarding stale finished signal (token {}, current {}, state {})",
                token, self.token, self.state
            );
            return None;
        }

        if let Some(track) = &self.current {
            info!("Finished '{}'", track.title);
        }

        let next = self.queue.advance().cloned();
        if self.auto_advance {
            self.start_or_finish(next)
        } else {
            self.release_player();
            None
        }
    }

    /// Apply the outcome of the resolution started with `token`.
    pub fn complete_resolution(&mut self, token: u64, result: Result<ResolvedTrack>) {
        if token != self.token {
            debug!("Discarding stale resolution (token {}, current {})", token, self.token);
            return;
        }
        let Some(track) = self.pending.take() else {
            debug!("No resolution pending for token {}", token);
            return;
        };

        match result {
            Ok(resolved) => {
                if let Err(e) = self.start(&track, &resolved) {
                    error!("Player failed to start '{}': {}", track.title, e);
                    let _ = self.player.stop();
                    self.current = None;
                    self.set_state(PlaybackState::Stopped);
                    let _ = self.events.send(SessionEvent::PlayerFailed(e.to_string()));
                }
            }
            Err(e) => {
                warn!("Could not resolve '{}': {}", track.title, e);
                let error = match e {
                    Error::Resolution { .. } => e.to_string(),
                    other => Error::resolution(&track.title, other.to_string()).to_string(),
                };
                let _ = self.events.send(SessionEvent::ResolutionFailed { track, error });
            }
        }
    }

    /// Set the volume, clamped to 0..=100. Valid in any state.
    ///
    /// # Errors
    ///
    /// Returns `Error::Player` if the engine refuses; the level is kept.
    pub fn set_volume(&mut self, level: i32) -> Result<()> {
        let clamped = u8::try_from(level.clamp(0, i32::from(MAX_VOLUME))).unwrap_or(MAX_VOLUME);
        if i32::from(clamped) != level {
            debug!("Volume {} clamped to {}", level, clamped);
        }
        self.volume = clamped;
        let _ = self.events.send(SessionEvent::VolumeChanged(clamped));
        self.player.set_volume(clamped)
    }

    /// Toggle automatic advance on track end.
    pub fn set_auto_advance(&mut self, enabled: bool) {
        self.auto_advance = enabled;
        info!("Auto-advance {}", if enabled { "on" } else { "off" });
    }

    /// Toggle shuffle. A fresh order is drawn each time it is turned on.
    pub fn set_shuffle(&mut self, enabled: bool) {
        self.queue.set_shuffle(enabled);
        info!("Shuffle {}", if enabled { "on" } else { "off" });
    }

    /// Toggle wrapping at the end of the queue.
    pub fn set_loop(&mut self, enabled: bool) {
        self.queue.set_loop(enabled);
        info!("Loop {}", if enabled { "on" } else { "off" });
    }

    /// Stop everything before the session goes away.
    pub fn shutdown(&mut self) {
        self.stop();
        info!("Playback session shut down");
    }

    fn is_active(&self) -> bool {
        self.state != PlaybackState::Stopped || self.pending.is_some()
    }

    fn start_or_finish(&mut self, track: Option<Track>) -> Option<ResolveRequest> {
        if let Some(track) = track {
            return Some(self.play(track));
        }
        info!("Reached the end of the queue");
        self.stop();
        let _ = self.events.send(SessionEvent::QueueFinished);
        None
    }

    /// Load, seek to the start offset, then play. The seek lands before any
    /// audio so the offset is never heard as a jump.
    fn start(&mut self, track: &Track, resolved: &ResolvedTrack) -> Result<()> {
        let sink = Arc::clone(&self.on_finished);
        let notifier = FinishedNotifier::new(self.token, move |token| sink(token));
        self.player.load(&resolved.stream, notifier)?;

        let offset = track.start_offset;
        match resolved.duration_secs {
            Some(duration) if offset > 0 && u64::from(offset) >= duration => warn!(
                "Start offset {}s is past the end of '{}' ({}s), starting at 0",
                offset, track.title, duration
            ),
            _ if offset > 0 => self.player.seek(offset)?,
            _ => {}
        }

        self.player.set_volume(self.volume)?;
        self.player.play()?;

        self.current = Some(track.clone());
        self.set_state(PlaybackState::Playing);
        info!("Playing '{}' from {}s", track.title, offset);
        let _ = self.events.send(SessionEvent::TrackStarted {
            track: track.clone(),
            duration_secs: resolved.duration_secs,
        });
        Ok(())
    }

    fn release_player(&mut self) {
        if self.state == PlaybackState::Stopped {
            return;
        }
        if let Err(e) = self.player.stop() {
            warn!("Player failed to stop: {}", e);
        }
        self.current = None;
        self.set_state(PlaybackState::Stopped);
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state == state {
            return;
        }
        debug!("Playback state {} -> {}", self.state, state);
        self.state = state;
        let _ = self.events.send(SessionEvent::StateChanged(state));
    }

    fn reject(&self, command: &'static str, reason: &str) {
        debug!("Rejected {}: {}", command, reason);
        let _ = self.events.send(SessionEvent::CommandRejected {
            command,
            reason: reason.to_string(),
        });
    }
}

impl fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("state", &self.state)
            .field("current", &self.current)
            .field("pending", &self.pending)
            .field("volume", &self.volume)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session runtime
// ============================================================================

enum Command {
    Play(Track),
    PlayCurrent,
    PlayIndex(usize),
    Pause,
    Resume,
    TogglePause,
    Stop,
    Next,
    Previous,
    SetVolume(i32),
    LoadPlaylist(Vec<Track>),
    SetAutoAdvance(bool),
    SetShuffle(bool),
    SetLoop(bool),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
    TrackFinished(u64),
    Resolved { token: u64, result: Result<ResolvedTrack> },
}

/// Cloneable handle to a session running on its own task.
///
/// Commands are queued and applied in order. Methods only fail with
/// `Error::SessionClosed` once the task has ended.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    /// Spawn a session task on the current tokio runtime.
    ///
    /// Returns the handle, the event stream and the task. The task ends on
    /// [`SessionHandle::shutdown`] or when every handle is dropped.
    pub fn spawn(
        player: Box<dyn MediaPlayer>,
        resolver: Arc<dyn TrackResolver>,
        options: &SessionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>, JoinHandle<()>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut session = PlaybackSession::new(player, options, event_tx);
        let weak = tx.downgrade();
        session.set_finished_sink(move |token| {
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(Command::TrackFinished(token));
            }
        });

        let task = tokio::spawn(run(session, resolver, rx, tx.downgrade()));
        info!("Playback session started");
        (Self { tx }, event_rx, task)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::SessionClosed)
    }

    /// Play `track`, stopping whatever is playing.
    pub fn play(&self, track: Track) -> Result<()> {
        self.send(Command::Play(track))
    }

    /// Play the track under the queue cursor.
    pub fn play_current(&self) -> Result<()> {
        self.send(Command::PlayCurrent)
    }

    /// Play the queue track at playlist index `index`.
    pub fn play_index(&self, index: usize) -> Result<()> {
        self.send(Command::PlayIndex(index))
    }

    /// Pause.
    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    /// Resume.
    pub fn resume(&self) -> Result<()> {
        self.send(Command::Resume)
    }

    /// Pause, resume or start depending on the state.
    pub fn toggle_pause(&self) -> Result<()> {
        self.send(Command::TogglePause)
    }

    /// Stop.
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Skip forward.
    pub fn next(&self) -> Result<()> {
        self.send(Command::Next)
    }

    /// Skip back.
    pub fn previous(&self) -> Result<()> {
        self.send(Command::Previous)
    }

    /// Set the volume; clamped to 0..=100.
    pub fn set_volume(&self, level: i32) -> Result<()> {
        self.send(Command::SetVolume(level))
    }

    /// Replace the queue.
    pub fn load_playlist(&self, tracks: Vec<Track>) -> Result<()> {
        self.send(Command::LoadPlaylist(tracks))
    }

    /// Toggle auto-advance.
    pub fn set_auto_advance(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetAutoAdvance(enabled))
    }

    /// Toggle shuffle.
    pub fn set_shuffle(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetShuffle(enabled))
    }

    /// Toggle looping.
    pub fn set_loop(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetLoop(enabled))
    }

    /// Current session state, after every command sent before this one.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        response.await.map_err(|_| Error::SessionClosed)
    }

    /// Stop playback and end the session task.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }
}

async fn run(
    mut session: PlaybackSession,
    resolver: Arc<dyn TrackResolver>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    weak: mpsc::WeakUnboundedSender<Command>,
) {
    while let Some(command) = rx.recv().await {
        let request = match command {
            Command::Play(track) => Some(session.play(track)),
            Command::PlayCurrent => {
                let request = session.play_current();
                if request.is_none() {
                    session.reject("play", "the queue is empty");
                }
                request
            }
            Command::PlayIndex(index) => match session.play_index(index) {
                Ok(request) => Some(request),
                Err(e) => {
                    session.reject("play", &e.to_string());
                    None
                }
            },
            Command::Pause => {
                let result = session.pause();
                player_result(&session, result)
            }
            Command::Resume => {
                let result = session.resume();
                player_result(&session, result)
            }
            Command::TogglePause => match session.toggle_pause() {
                Ok(request) => request,
                Err(e) => player_result::<()>(&session, Err(e)),
            },
            Command::Stop => {
                session.stop();
                None
            }
            Command::Next => session.next(),
            Command::Previous => session.previous(),
            Command::SetVolume(level) => {
                let result = session.set_volume(level);
                player_result(&session, result)
            }
            Command::LoadPlaylist(tracks) => {
                session.load_playlist(tracks);
                None
            }
            Command::SetAutoAdvance(enabled) => {
                session.set_auto_advance(enabled);
                None
            }
            Command::SetShuffle(enabled) => {
                session.set_shuffle(enabled);
                None
            }
            Command::SetLoop(enabled) => {
                session.set_loop(enabled);
                None
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(session.snapshot());
                None
            }
            Command::Shutdown => break,
            Command::TrackFinished(token) => session.track_finished(token),
            Command::Resolved { token, result } => {
                session.complete_resolution(token, result);
                None
            }
        };

        if let Some(request) = request {
            spawn_resolution(Arc::clone(&resolver), weak.clone(), request);
        }
    }

    session.shutdown();
}

/// Report a player failure as an event. Always yields no request.
fn player_result<T>(session: &PlaybackSession, result: Result<T>) -> Option<ResolveRequest> {
    if let Err(e) = result {
        error!("Player error: {}", e);
        let _ = session.events.send(SessionEvent::PlayerFailed(e.to_string()));
    }
    None
}

fn spawn_resolution(
    resolver: Arc<dyn TrackResolver>,
    weak: mpsc::WeakUnboundedSender<Command>,
    request: ResolveRequest,
) {
    tokio::task::spawn_blocking(move || {
        let result = resolver.resolve(request.query());
        match weak.upgrade() {
            Some(tx) => {
                let _ = tx.send(Command::Resolved {
                    token: request.token,
                    result,
                });
            }
            None => debug!("Session gone, dropping resolution of '{}'", request.track.title),
        }
    });
}
