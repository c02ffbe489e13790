//! Per-guild playback session.
//!
//! A session is an actor: one task owns the queue, the playback state, the
//! inactivity timer and the transport, and applies commands one at a time.
//! [`SessionHandle`] is the cheap, cloneable front end. Resolutions run on the
//! caller (blocking enqueue) or on background tasks, serialized by the
//! session's [`ResolutionGate`], and post their results back to the actor.

use serenity::model::id::GuildId;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

use crate::{
    audio::{
        gate::{Priority, ResolutionGate},
        hooks::{Notification, Notifier, SessionHooks},
        queue::{TrackQueue, MAX_QUEUE_LEN},
        state::PlaybackState,
        tasks::TaskRegistry,
        timer::{InactivityTimer, INACTIVITY_TIMEOUT},
        track::Track,
        transport::{CompletionCallback, PlaybackTransport},
    },
    error::{SessionError, SessionResult},
    sources::{MetadataResolver, StreamHandle},
};

/// Consecutive tracks that may fail to start before the session gives up and
/// goes idle.
pub const RETRY_BUDGET: u32 = 3;

const NOTIFIER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub inactivity_timeout: Duration,
    pub retry_budget: u32,
    pub queue_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            inactivity_timeout: INACTIVITY_TIMEOUT,
            retry_budget: RETRY_BUDGET,
            queue_capacity: MAX_QUEUE_LEN,
        }
    }
}

/// What `current_queue` returns: the tracks in order and, while something is
/// playing, the index of that track.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub current: Option<usize>,
    pub tracks: Vec<Arc<Track>>,
    pub looping: bool,
    pub state: PlaybackState,
}

impl QueueSnapshot {
    pub fn current_track(&self) -> Option<&Arc<Track>> {
        self.current.and_then(|index| self.tracks.get(index))
    }
}

enum Command {
    Append {
        tracks: Vec<Arc<Track>>,
        reply: oneshot::Sender<()>,
    },
    Skip {
        reply: oneshot::Sender<bool>,
    },
    Remove {
        index: usize,
        reply: oneshot::Sender<SessionResult<Arc<Track>>>,
    },
    Clear {
        reply: oneshot::Sender<usize>,
    },
    ToggleLoop {
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    ReportError(SessionError),
    Disconnect {
        reason: String,
    },
    TrackFinished {
        play_id: u64,
        error: Option<SessionError>,
    },
    StartResolved {
        play_id: u64,
        track: Arc<Track>,
        result: SessionResult<StreamHandle>,
    },
    TimerFired {
        generation: u64,
    },
}

struct SessionShared {
    guild_id: GuildId,
    commands: mpsc::UnboundedSender<Command>,
    gate: ResolutionGate,
    tasks: TaskRegistry,
    resolver: Arc<dyn MetadataResolver>,
    disconnecting: AtomicBool,
    closed: watch::Receiver<bool>,
}

/// Handle to a running session. Cloning is cheap; every clone talks to the
/// same session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("guild_id", &self.shared.guild_id)
            .field("disconnecting", &self.is_disconnecting())
            .finish()
    }
}

pub struct Session;

impl Session {
    /// Starts a session in `Idle`, with the inactivity timer armed, and
    /// returns its handle.
    pub fn start(
        guild_id: GuildId,
        resolver: Arc<dyn MetadataResolver>,
        transport: Arc<dyn PlaybackTransport>,
        hooks: SessionHooks,
        options: SessionOptions,
    ) -> SessionHandle {
        let (commands, rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        let handle = SessionHandle {
            shared: Arc::new(SessionShared {
                guild_id,
                commands,
                gate: ResolutionGate::new(),
                tasks: TaskRegistry::new(),
                resolver,
                disconnecting: AtomicBool::new(false),
                closed: closed_rx,
            }),
        };

        let actor = SessionActor {
            notifier: Some(Notifier::spawn(hooks, handle.clone())),
            shared: handle.shared.clone(),
            transport,
            queue: TrackQueue::with_capacity(options.queue_capacity),
            state: PlaybackState::Idle,
            timer: InactivityTimer::new(options.inactivity_timeout),
            closed: closed_tx,
            next_play_id: 0,
            playing: None,
            pending_start: None,
            prefetching: None,
            failures: 0,
            retry_budget: options.retry_budget.max(1),
        };
        tokio::spawn(actor.run(rx));

        info!("🎧 Session started for guild {}", guild_id);
        handle
    }
}

impl SessionHandle {
    pub fn guild_id(&self) -> GuildId {
        self.shared.guild_id
    }

    pub fn is_disconnecting(&self) -> bool {
        self.shared.disconnecting.load(Ordering::Acquire)
    }

    /// True when both handles refer to the same session.
    pub fn ptr_eq(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Resolves `query` and appends the result, waiting for both.
    ///
    /// Returns the first appended track (playlists append every entry).
    /// Resolutions are serialized, so concurrent enqueues append in the order
    /// they were issued.
    pub async fn enqueue(&self, query: &str) -> SessionResult<Arc<Track>> {
        self.ensure_connected()?;

        let ticket = self.shared.gate.acquire(Priority::Normal).await?;
        debug!("🔎 Resolving '{}' via {}", query, self.shared.resolver.source_name());
        let resolution = ticket.run(self.shared.resolver.resolve(query)).await;
        let resolution = match resolution {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!("❌ Could not resolve '{}': {}", query, e);
                return Err(e);
            }
        };

        let tracks: Vec<Arc<Track>> = resolution
            .into_tracks()
            .into_iter()
            .map(|resolved| Arc::new(Track::new(query, resolved)))
            .collect();
        let Some(first) = tracks.first().cloned() else {
            return Err(SessionError::ResolutionFailed(format!(
                "nothing playable for '{}'",
                query
            )));
        };

        // The ticket is held until the append lands so the order of appends
        // matches the order of gate grants.
        self.request(|reply| Command::Append { tracks, reply }).await?;
        ticket.release();
        Ok(first)
    }

    /// Enqueues on a background task and returns at once. Failures are
    /// reported through the session's error hook.
    pub fn enqueue_detached(&self, query: impl Into<String>) -> SessionResult<()> {
        self.ensure_connected()?;

        let query = query.into();
        let session = self.clone();
        let spawned = self.shared.tasks.spawn("enqueue", async move {
            if let Err(e) = session.enqueue(&query).await {
                if e != SessionError::ResolutionCancelled && e != SessionError::NotConnected {
                    let _ = session.shared.commands.send(Command::ReportError(e));
                }
            }
        });

        if spawned {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    /// Stops the playing track so the next one starts. Returns false when
    /// nothing was playing.
    pub async fn skip(&self) -> SessionResult<bool> {
        self.request(|reply| Command::Skip { reply }).await
    }

    pub async fn remove_from_queue(&self, index: usize) -> SessionResult<Arc<Track>> {
        self.request(|reply| Command::Remove { index, reply }).await?
    }

    /// Empties the queue. The playing track keeps playing.
    pub async fn clear_queue(&self) -> SessionResult<usize> {
        self.request(|reply| Command::Clear { reply }).await
    }

    /// Flips loop mode and returns the new value.
    pub async fn toggle_loop(&self) -> SessionResult<bool> {
        self.request(|reply| Command::ToggleLoop { reply }).await
    }

    pub async fn current_queue(&self) -> SessionResult<QueueSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn state(&self) -> PlaybackState {
        match self.current_queue().await {
            Ok(snapshot) => snapshot.state,
            Err(_) => PlaybackState::Disconnecting,
        }
    }

    pub async fn is_active(&self) -> bool {
        self.state().await == PlaybackState::Active
    }

    /// Tears the session down and waits until it is gone. Safe to call any
    /// number of times; only the first call's reason is reported.
    pub async fn disconnect(&self, reason: impl Into<String>) {
        if !self.shared.disconnecting.swap(true, Ordering::AcqRel) {
            let reason = reason.into();
            debug!("Disconnect requested for guild {}: {}", self.guild_id(), reason);
            let _ = self.shared.commands.send(Command::Disconnect { reason });
        }
        self.closed().await;
    }

    /// Resolves once the session has fully shut down.
    pub async fn closed(&self) {
        let mut closed = self.shared.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    fn ensure_connected(&self) -> SessionResult<()> {
        if self.is_disconnecting() {
            Err(SessionError::NotConnected)
        } else {
            Ok(())
        }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> SessionResult<T> {
        let (reply, rx) = oneshot::channel();
        self.shared
            .commands
            .send(command(reply))
            .map_err(|_| SessionError::NotConnected)?;
        rx.await.map_err(|_| SessionError::NotConnected)
    }
}

struct SessionActor {
    shared: Arc<SessionShared>,
    transport: Arc<dyn PlaybackTransport>,
    queue: TrackQueue,
    state: PlaybackState,
    timer: InactivityTimer,
    notifier: Option<Notifier>,
    closed: watch::Sender<bool>,
    next_play_id: u64,
    /// Play id of the track the transport is playing
    playing: Option<u64>,
    /// Play id of a track whose stream is being resolved before it can start
    pending_start: Option<u64>,
    /// Last track a prefetch was started for
    prefetching: Option<Arc<Track>>,
    failures: u32,
    retry_budget: u32,
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.settle_idle();

        while let Some(command) = commands.recv().await {
            self.handle(command).await;
            if self.state.is_terminal() {
                break;
            }
        }

        if !self.state.is_terminal() {
            self.teardown("session dropped".to_string()).await;
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Append { tracks, reply } => {
                self.append(tracks).await;
                let _ = reply.send(());
            }
            Command::Skip { reply } => {
                let skipped = self.skip().await;
                let _ = reply.send(skipped);
            }
            Command::Remove { index, reply } => {
                let _ = reply.send(self.queue.remove(index));
            }
            Command::Clear { reply } => {
                let _ = reply.send(self.queue.clear());
            }
            Command::ToggleLoop { reply } => {
                let _ = reply.send(self.queue.toggle_loop());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::ReportError(err) => self.notify(Notification::Error(err)),
            Command::Disconnect { reason } => self.teardown(reason).await,
            Command::TrackFinished { play_id, error } => self.track_finished(play_id, error).await,
            Command::StartResolved {
                play_id,
                track,
                result,
            } => self.start_resolved(play_id, track, result).await,
            Command::TimerFired { generation } => {
                if !self.timer.accept_fire(generation) {
                    debug!("Ignoring stale inactivity timer (generation {})", generation);
                    return;
                }
                // An external disconnect may already be queued; it carries the reason
                if !self.shared.disconnecting.swap(true, Ordering::AcqRel) {
                    self.teardown("timed out".to_string()).await;
                }
            }
        }
    }

    fn notify(&self, notification: Notification) {
        if let Some(notifier) = &self.notifier {
            notifier.send(notification);
        }
    }

    fn post(&self) -> mpsc::UnboundedSender<Command> {
        self.shared.commands.clone()
    }

    async fn append(&mut self, tracks: Vec<Arc<Track>>) {
        for track in tracks {
            self.queue.append(track.clone());
            self.notify(Notification::Queued(track));
        }

        match self.state {
            PlaybackState::Idle => self.play_next().await,
            PlaybackState::Active => self.prefetch_next(),
            PlaybackState::Disconnecting => {}
        }
    }

    /// Starts the next track if nothing is playing or being started. Tracks
    /// that fail to start are skipped until the retry budget runs out.
    async fn play_next(&mut self) {
        if self.state != PlaybackState::Idle || self.pending_start.is_some() {
            return;
        }
        self.timer.disarm();

        while let Some(track) = self.queue.advance() {
            let Some(stream) = track.stream() else {
                self.resolve_then_start(track);
                return;
            };

            match self.start(&track, stream).await {
                Ok(()) => return,
                Err(e) => {
                    if !self.record_failure(&track, e) {
                        return;
                    }
                }
            }
        }

        info!("📭 Queue finished in guild {}", self.shared.guild_id);
        self.settle_idle();
    }

    async fn start(&mut self, track: &Arc<Track>, stream: StreamHandle) -> SessionResult<()> {
        self.next_play_id += 1;
        let play_id = self.next_play_id;

        let commands = self.post();
        let on_complete: CompletionCallback = Box::new(move |error| {
            let _ = commands.send(Command::TrackFinished { play_id, error });
        });
        self.transport.play(&stream, on_complete).await?;

        self.timer.disarm();
        self.transition(PlaybackState::Active);
        self.playing = Some(play_id);
        self.failures = 0;

        info!("▶️ Now playing in guild {}: {}", self.shared.guild_id, track.title());
        self.notify(Notification::Playing(track.clone()));
        self.prefetch_next();
        Ok(())
    }

    /// Reports a track that could not start. Returns false once the retry
    /// budget is spent; the session is idle at that point.
    fn record_failure(&mut self, track: &Arc<Track>, err: SessionError) -> bool {
        warn!("⏭️ Skipping '{}': {}", track.title(), err);
        self.notify(Notification::Error(err));

        self.failures += 1;
        if self.failures < self.retry_budget {
            return true;
        }

        error!(
            "Giving up in guild {} after {} tracks failed in a row",
            self.shared.guild_id, self.failures
        );
        self.notify(Notification::Error(SessionError::PlaybackFailed(format!(
            "{} tracks in a row could not be played",
            self.failures
        ))));
        self.failures = 0;
        self.settle_idle();
        false
    }

    /// The next track has no stream yet: resolve it ahead of any ordinary
    /// resolution and start it when the result comes back.
    fn resolve_then_start(&mut self, track: Arc<Track>) {
        self.next_play_id += 1;
        let play_id = self.next_play_id;

        let gate = self.shared.gate.clone();
        let resolver = self.shared.resolver.clone();
        let commands = self.post();
        info!("⏳ Fetching stream for '{}' before playing it", track.title());

        let spawned = self.shared.tasks.spawn("play-resolve", async move {
            let result = resolve_stream(&gate, resolver.as_ref(), &track, Priority::High).await;
            let _ = commands.send(Command::StartResolved {
                play_id,
                track,
                result,
            });
        });

        if spawned {
            self.pending_start = Some(play_id);
        }
    }

    async fn start_resolved(
        &mut self,
        play_id: u64,
        track: Arc<Track>,
        result: SessionResult<StreamHandle>,
    ) {
        if self.pending_start != Some(play_id) || self.state.is_terminal() {
            debug!("Dropping stale stream resolution for '{}'", track.title());
            return;
        }
        self.pending_start = None;

        let outcome = match result {
            Ok(stream) => self.start(&track, stream).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            if self.record_failure(&track, e) {
                self.play_next().await;
            }
        }
    }

    /// Starts resolving the following track's stream in the background so it
    /// is ready when the current one ends.
    fn prefetch_next(&mut self) {
        let Some(next) = self.queue.peek_next() else {
            return;
        };
        if next.has_stream() || next.is_resolving() {
            return;
        }
        if self.prefetching.as_ref().is_some_and(|track| Arc::ptr_eq(track, &next)) {
            return;
        }

        let gate = self.shared.gate.clone();
        let resolver = self.shared.resolver.clone();
        debug!("Prefetching stream for '{}'", next.title());
        self.prefetching = Some(next.clone());

        self.shared.tasks.spawn("prefetch", async move {
            if let Err(e) = resolve_stream(&gate, resolver.as_ref(), &next, Priority::Normal).await {
                warn!("Prefetch for '{}' failed: {}", next.title(), e);
            }
        });
    }

    async fn track_finished(&mut self, play_id: u64, error: Option<SessionError>) {
        if self.playing != Some(play_id) {
            debug!("Ignoring completion of an earlier track (play {})", play_id);
            return;
        }
        self.playing = None;
        if !self.transition(PlaybackState::Idle) {
            return;
        }

        if let Some(err) = error {
            self.notify(Notification::Error(err));
        }
        self.play_next().await;
    }

    async fn skip(&mut self) -> bool {
        let Some(play_id) = self.playing.filter(|_| self.state == PlaybackState::Active) else {
            return false;
        };

        info!("⏭️ Skipping current track in guild {}", self.shared.guild_id);
        if let Err(e) = self.transport.stop().await {
            // Without a stop there will be no completion; advance by hand
            self.notify(Notification::Error(e));
            self.track_finished(play_id, None).await;
        }
        true
    }

    fn snapshot(&self) -> QueueSnapshot {
        let current = match self.state {
            PlaybackState::Active => self.queue.current().map(|(index, _)| index),
            _ => None,
        };
        QueueSnapshot {
            current,
            tracks: self.queue.tracks(),
            looping: self.queue.is_looping(),
            state: self.state,
        }
    }

    /// Enters `Idle` and arms the inactivity timer.
    fn settle_idle(&mut self) {
        if !self.transition(PlaybackState::Idle) {
            return;
        }
        self.playing = None;

        let commands = self.post();
        self.timer.arm(move |generation| {
            let _ = commands.send(Command::TimerFired { generation });
        });
    }

    /// Moves to `next` if the state machine allows it.
    fn transition(&mut self, next: PlaybackState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                "Refusing state change {} -> {} in guild {}",
                self.state, next, self.shared.guild_id
            );
            return false;
        }
        if self.state != next {
            debug!("Guild {}: {} -> {}", self.shared.guild_id, self.state, next);
        }
        self.state = next;
        true
    }

    async fn teardown(&mut self, reason: String) {
        if self.state.is_terminal() {
            return;
        }
        info!("👋 Leaving guild {}: {}", self.shared.guild_id, reason);

        self.transition(PlaybackState::Disconnecting);
        self.shared.disconnecting.store(true, Ordering::Release);
        self.pending_start = None;
        self.shared.gate.close();

        if self.playing.take().is_some() || self.transport.is_playing().await {
            if let Err(e) = self.transport.stop().await {
                self.notify(Notification::Error(e));
            }
        }
        if let Err(e) = self.transport.disconnect().await {
            self.notify(Notification::Error(e));
        }

        self.timer.disarm();
        self.queue.clear();
        self.shared.tasks.shutdown().await;

        if let Some(notifier) = self.notifier.take() {
            notifier
                .finish(Notification::Disconnected(reason), NOTIFIER_DRAIN_TIMEOUT)
                .await;
        }
        self.closed.send_replace(true);
    }
}

/// Fetches a stream for `track` under a gate ticket. A stream that showed up
/// while waiting for the gate is returned without resolving again. The track
/// only reads as resolving once the ticket is held.
async fn resolve_stream(
    gate: &ResolutionGate,
    resolver: &dyn MetadataResolver,
    track: &Arc<Track>,
    priority: Priority,
) -> SessionResult<StreamHandle> {
    let ticket = gate.acquire(priority).await?;
    if let Some(stream) = track.stream() {
        return Ok(stream);
    }
    let guard = track.begin_resolving();
    trace!("Resolving stream for '{}' ({:?})", track.title(), ticket.priority());

    let resolution = ticket.run(resolver.resolve(track.url())).await?;
    let stream = resolution
        .into_first()
        .and_then(|resolved| resolved.stream)
        .ok_or_else(|| SessionError::ResolutionFailed(format!("no stream for '{}'", track.title())))?;

    Ok(match guard {
        Some(guard) => guard.finish(stream),
        None => track.set_stream(stream),
    })
}
