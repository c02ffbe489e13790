use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    audio::{
        hooks::SessionHooks,
        session::{Session, SessionHandle, SessionOptions},
        transport::PlaybackTransport,
    },
    sources::MetadataResolver,
};

/// One session per guild. A session leaves the map once it has closed,
/// whatever the reason, and a session that is disconnecting is never handed
/// out again.
pub struct SessionManager {
    sessions: Arc<DashMap<GuildId, SessionHandle>>,
    resolver: Arc<dyn MetadataResolver>,
    options: SessionOptions,
}

impl SessionManager {
    pub fn new(resolver: Arc<dyn MetadataResolver>, options: SessionOptions) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            resolver,
            options,
        }
    }

    /// The guild's live session, if any.
    pub fn get(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.sessions
            .get(&guild_id)
            .map(|entry| entry.value().clone())
            .filter(|session| !session.is_disconnecting())
    }

    pub fn contains(&self, guild_id: GuildId) -> bool {
        self.get(guild_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns the guild's session, starting one over `transport` if there is
    /// none or the existing one is shutting down. `hooks` only apply to a newly
    /// started session.
    pub fn get_or_start(
        &self,
        guild_id: GuildId,
        transport: Arc<dyn PlaybackTransport>,
        hooks: SessionHooks,
    ) -> SessionHandle {
        match self.sessions.entry(guild_id) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_disconnecting() {
                    return entry.get().clone();
                }
                debug!("Replacing closing session for guild {}", guild_id);
                let handle = self.start(guild_id, transport, hooks);
                entry.insert(handle.clone());
                handle
            }
            Entry::Vacant(entry) => {
                let handle = self.start(guild_id, transport, hooks);
                entry.insert(handle.clone());
                handle
            }
        }
    }

    /// Disconnects the guild's session. Returns false if there was none.
    pub async fn disconnect(&self, guild_id: GuildId, reason: &str) -> bool {
        match self.get(guild_id) {
            Some(session) => {
                session.disconnect(reason).await;
                unregister(&self.sessions, &session);
                true
            }
            None => false,
        }
    }

    /// Disconnects every session, for process shutdown.
    pub async fn shutdown(&self) {
        let sessions: Vec<SessionHandle> = self.sessions.iter().map(|e| e.value().clone()).collect();
        info!("🛑 Closing {} session(s)", sessions.len());
        futures::future::join_all(sessions.iter().map(|session| async move {
            session.disconnect("shutting down").await;
            unregister(&self.sessions, session);
        }))
        .await;
    }

    /// Starts a session and a watcher that drops it from the map once it has
    /// closed.
    fn start(
        &self,
        guild_id: GuildId,
        transport: Arc<dyn PlaybackTransport>,
        hooks: SessionHooks,
    ) -> SessionHandle {
        let handle = Session::start(
            guild_id,
            self.resolver.clone(),
            transport,
            hooks,
            self.options.clone(),
        );

        let sessions = self.sessions.clone();
        let watched = handle.clone();
        tokio::spawn(async move {
            watched.closed().await;
            unregister(&sessions, &watched);
        });
        handle
    }
}

/// Removes `session` from the map unless a newer session took its place.
fn unregister(sessions: &DashMap<GuildId, SessionHandle>, session: &SessionHandle) {
    let guild_id = session.guild_id();
    if sessions
        .remove_if(&guild_id, |_, current| current.ptr_eq(session))
        .is_some()
    {
        debug!("Session for guild {} unregistered", guild_id);
    }
}
