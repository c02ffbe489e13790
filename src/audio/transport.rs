use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serenity::model::id::GuildId;
use songbird::{
    error::JoinError,
    input::{HttpRequest, Input},
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::{SessionError, SessionResult},
    sources::StreamHandle,
};

/// Called exactly once when a started stream ends: `None` when it finished
/// or was stopped, the error otherwise.
pub type CompletionCallback = Box<dyn FnOnce(Option<SessionError>) + Send + 'static>;

/// The audio sink a session plays into.
///
/// `stop` must make the running stream's completion callback fire, so the
/// session advances the same way as when a track ends on its own.
#[async_trait]
pub trait PlaybackTransport: Send + Sync {
    async fn play(&self, stream: &StreamHandle, on_complete: CompletionCallback) -> SessionResult<()>;

    async fn stop(&self) -> SessionResult<()>;

    async fn is_playing(&self) -> bool;

    /// Leaves the voice channel.
    async fn disconnect(&self) -> SessionResult<()>;
}

/// Plays streams into a songbird voice call.
pub struct SongbirdTransport {
    guild_id: GuildId,
    manager: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
    http: reqwest::Client,
    volume: f32,
    current: SyncMutex<Option<TrackHandle>>,
}

impl SongbirdTransport {
    pub fn new(
        guild_id: GuildId,
        manager: Arc<Songbird>,
        call: Arc<Mutex<Call>>,
        http: reqwest::Client,
        volume: f32,
    ) -> Self {
        Self {
            guild_id,
            manager,
            call,
            http,
            volume: volume.clamp(0.0, 2.0),
            current: SyncMutex::new(None),
        }
    }

    fn current(&self) -> Option<TrackHandle> {
        self.current.lock().clone()
    }
}

#[async_trait]
impl PlaybackTransport for SongbirdTransport {
    async fn play(&self, stream: &StreamHandle, on_complete: CompletionCallback) -> SessionResult<()> {
        let input: Input = HttpRequest::new(self.http.clone(), stream.as_str().to_string()).into();

        let handle = {
            let mut call = self.call.lock().await;
            call.play_only_input(input)
        };

        if let Err(e) = handle.set_volume(self.volume) {
            warn!("Could not set volume on guild {}: {}", self.guild_id, e);
        }

        let notifier = CompletionNotifier {
            callback: Arc::new(SyncMutex::new(Some(on_complete))),
        };
        for event in [TrackEvent::End, TrackEvent::Error] {
            if let Err(e) = handle.add_event(Event::Track(event), notifier.clone()) {
                let _ = handle.stop();
                return Err(SessionError::PlaybackFailed(format!(
                    "could not watch track events: {}",
                    e
                )));
            }
        }

        debug!("🔊 Streaming into guild {}", self.guild_id);
        *self.current.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> SessionResult<()> {
        let Some(handle) = self.current() else {
            return Ok(());
        };
        handle.stop().map_err(SessionError::playback)
    }

    async fn is_playing(&self) -> bool {
        match self.current() {
            Some(handle) => matches!(
                handle.get_info().await,
                Ok(state) if matches!(state.playing, PlayMode::Play | PlayMode::Pause)
            ),
            None => false,
        }
    }

    async fn disconnect(&self) -> SessionResult<()> {
        self.current.lock().take();
        match self.manager.remove(self.guild_id).await {
            Ok(()) => info!("🔌 Left voice in guild {}", self.guild_id),
            // Already gone, e.g. kicked from the channel
            Err(JoinError::NoCall) => debug!("No voice call left in guild {}", self.guild_id),
            Err(e) => {
                return Err(SessionError::PlaybackFailed(format!("could not leave voice: {}", e)));
            }
        }
        Ok(())
    }
}

/// Forwards the first End/Error event of a track to its completion callback.
#[derive(Clone)]
struct CompletionNotifier {
    callback: Arc<SyncMutex<Option<CompletionCallback>>>,
}

#[async_trait]
impl VoiceEventHandler for CompletionNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(SessionError::PlaybackFailed(format!("{:?}", e))),
                _ => None,
            }),
            _ => None,
        };

        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            callback(error);
        }
        Some(Event::Cancel)
    }
}
