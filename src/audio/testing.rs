//! Fakes shared by the session and manager tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    audio::{hooks::SessionHooks, transport::{CompletionCallback, PlaybackTransport}},
    error::{SessionError, SessionResult},
    sources::{MetadataResolver, Resolution, ResolvedTrack, StreamHandle, TrackMetadata},
};

/// Resolver with scripted answers:
/// - `playlist:a,b` yields stream-less entries `a` and `b`
/// - `https://example.com/<name>` and plain `<name>` yield `stream://<name>`
/// - `hang` (or `https://example.com/hang`) never completes
/// - anything passed to [`FakeResolver::fail`] fails
#[derive(Default)]
pub struct FakeResolver {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeResolver {
    pub fn fail(&self, query: impl Into<String>) {
        self.failing.lock().insert(query.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl MetadataResolver for FakeResolver {
    async fn resolve(&self, query: &str) -> SessionResult<Resolution> {
        self.calls.lock().push(query.to_string());
        if query.strip_prefix("https://example.com/").unwrap_or(query) == "hang" {
            std::future::pending::<()>().await;
        }
        tokio::task::yield_now().await;

        if self.failing.lock().contains(query) {
            return Err(SessionError::ResolutionFailed(query.to_string()));
        }

        if let Some(entries) = query.strip_prefix("playlist:") {
            let tracks = entries
                .split(',')
                .map(|name| ResolvedTrack::unresolved(TrackMetadata::titled(name)))
                .collect();
            return Ok(Resolution::Playlist(tracks));
        }

        let name = query.strip_prefix("https://example.com/").unwrap_or(query);
        Ok(Resolution::Track(ResolvedTrack::new(
            TrackMetadata::titled(name),
            StreamHandle::new(format!("stream://{}", name)),
        )))
    }

    fn source_name(&self) -> &'static str {
        "fake"
    }
}

/// Transport that records what it was asked to do. Tracks only end when the
/// test calls [`FakeTransport::finish`] or the session stops them.
#[derive(Default)]
pub struct FakeTransport {
    plays: Mutex<Vec<String>>,
    refused: Mutex<HashSet<String>>,
    current: Mutex<Option<CompletionCallback>>,
    stops: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FakeTransport {
    /// Makes `play` fail for this stream.
    pub fn refuse(&self, stream: impl Into<String>) {
        self.refused.lock().insert(stream.into());
    }

    /// Ends the playing track as if the stream ran out (or broke).
    pub fn finish(&self, error: Option<SessionError>) {
        let callback = self.current.lock().take();
        if let Some(callback) = callback {
            callback(error);
        }
    }

    pub fn plays(&self) -> Vec<String> {
        self.plays.lock().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackTransport for FakeTransport {
    async fn play(&self, stream: &StreamHandle, on_complete: CompletionCallback) -> SessionResult<()> {
        if self.refused.lock().contains(stream.as_str()) {
            return Err(SessionError::PlaybackFailed(format!("cannot open {}", stream)));
        }
        self.plays.lock().push(stream.to_string());
        *self.current.lock() = Some(on_complete);
        Ok(())
    }

    async fn stop(&self) -> SessionResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.finish(None);
        Ok(())
    }

    async fn is_playing(&self) -> bool {
        self.current.lock().is_some()
    }

    async fn disconnect(&self) -> SessionResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Hooks that log `queued:<title>`, `play:<title>`, `error:<message>` and
/// `disconnect:<reason>`.
pub fn recording_hooks() -> (SessionHooks, EventLog) {
    let log: EventLog = Arc::default();
    let (queued, playing, errors, disconnects) = (log.clone(), log.clone(), log.clone(), log.clone());

    let hooks = SessionHooks::new()
        .on_queued(move |track, _| {
            let log = queued.clone();
            async move { log.lock().push(format!("queued:{}", track.title())) }
        })
        .on_play(move |track, _| {
            let log = playing.clone();
            async move { log.lock().push(format!("play:{}", track.title())) }
        })
        .on_error(move |_, err| {
            let log = errors.clone();
            async move { log.lock().push(format!("error:{}", err)) }
        })
        .on_disconnect(move |_, reason| {
            let log = disconnects.clone();
            async move { log.lock().push(format!("disconnect:{}", reason)) }
        });

    (hooks, log)
}

/// Hooks whose `on_play` takes `delay` before logging `play:<title>`;
/// `on_disconnect` logs `disconnect:<reason>` right away.
pub fn stalling_hooks(delay: Duration) -> (SessionHooks, EventLog) {
    let log: EventLog = Arc::default();
    let (playing, disconnects) = (log.clone(), log.clone());

    let hooks = SessionHooks::new()
        .on_play(move |track, _| {
            let log = playing.clone();
            async move {
                tokio::time::sleep(delay).await;
                log.lock().push(format!("play:{}", track.title()));
            }
        })
        .on_disconnect(move |_, reason| {
            let log = disconnects.clone();
            async move { log.lock().push(format!("disconnect:{}", reason)) }
        });

    (hooks, log)
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().clone()
}

/// Lets spawned tasks (resolutions, the actor, the notifier) run to a
/// quiescent point.
pub async fn settle() {
    for _ in 0..200 {
        tokio::task::yield_now().await;
    }
}
