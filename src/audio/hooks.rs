use futures::{
    future::{BoxFuture, FutureExt},
    Future,
};
use std::{fmt, panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, warn};

use crate::{
    audio::{session::SessionHandle, track::Track},
    error::SessionError,
};

pub type TrackHook = Arc<dyn Fn(Arc<Track>, SessionHandle) -> BoxFuture<'static, ()> + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(SessionHandle, SessionError) -> BoxFuture<'static, ()> + Send + Sync>;
pub type DisconnectHook = Arc<dyn Fn(SessionHandle, String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callbacks a session reports to. Every hook is optional; unset hooks are
/// skipped.
///
/// Hooks run one at a time, in the order the events happened, on a task of
/// their own. A hook must not wait for its own session to close (for example
/// by awaiting [`SessionHandle::disconnect`]); spawn that instead.
#[derive(Clone, Default)]
pub struct SessionHooks {
    pub on_play: Option<TrackHook>,
    pub on_queued: Option<TrackHook>,
    pub on_error: Option<ErrorHook>,
    pub on_disconnect: Option<DisconnectHook>,
}

impl SessionHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_play<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<Track>, SessionHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_play = Some(Arc::new(move |track, session| hook(track, session).boxed()));
        self
    }

    pub fn on_queued<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<Track>, SessionHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_queued = Some(Arc::new(move |track, session| hook(track, session).boxed()));
        self
    }

    pub fn on_error<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(SessionHandle, SessionError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_error = Some(Arc::new(move |session, err| hook(session, err).boxed()));
        self
    }

    pub fn on_disconnect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(SessionHandle, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_disconnect = Some(Arc::new(move |session, reason| hook(session, reason).boxed()));
        self
    }
}

impl fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHooks")
            .field("on_play", &self.on_play.is_some())
            .field("on_queued", &self.on_queued.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub(crate) enum Notification {
    Queued(Arc<Track>),
    Playing(Arc<Track>),
    Error(SessionError),
    Disconnected(String),
}

/// Delivers notifications to the hooks, in order, on a dedicated task so a
/// slow hook never stalls the session.
pub(crate) struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
    task: JoinHandle<()>,
    hooks: SessionHooks,
    session: SessionHandle,
}

impl Notifier {
    pub(crate) fn spawn(hooks: SessionHooks, session: SessionHandle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task = tokio::spawn({
            let hooks = hooks.clone();
            let session = session.clone();
            async move {
                while let Some(notification) = rx.recv().await {
                    deliver(&hooks, &session, notification).await;
                }
                debug!("Notifier for guild {} drained", session.guild_id());
            }
        });

        Self {
            tx,
            task,
            hooks,
            session,
        }
    }

    pub(crate) fn send(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            warn!("Notifier task is gone, dropping notification");
        }
    }

    /// Stops accepting notifications, waits for the queued ones to be
    /// delivered, then delivers `last`. Hooks still running after `timeout`
    /// are aborted; `last` is delivered either way.
    pub(crate) async fn finish(self, last: Notification, timeout: Duration) {
        let Notifier {
            tx,
            mut task,
            hooks,
            session,
        } = self;
        drop(tx);

        if tokio::time::timeout(timeout, &mut task).await.is_err() {
            warn!(
                "Hooks for guild {} still running after {}, aborting them",
                session.guild_id(),
                humantime::format_duration(timeout)
            );
            task.abort();
        }

        if tokio::time::timeout(timeout, deliver(&hooks, &session, last)).await.is_err() {
            error!("Final hook for guild {} timed out", session.guild_id());
        }
    }
}

async fn deliver(hooks: &SessionHooks, session: &SessionHandle, notification: Notification) {
    let pending = match notification {
        Notification::Queued(track) => hooks.on_queued.as_ref().map(|hook| hook(track, session.clone())),
        Notification::Playing(track) => hooks.on_play.as_ref().map(|hook| hook(track, session.clone())),
        Notification::Error(err) => {
            warn!("⚠️ Session error in guild {}: {}", session.guild_id(), err);
            hooks.on_error.as_ref().map(|hook| hook(session.clone(), err))
        }
        Notification::Disconnected(reason) => hooks
            .on_disconnect
            .as_ref()
            .map(|hook| hook(session.clone(), reason)),
    };

    if let Some(fut) = pending {
        if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
            error!("A session hook panicked in guild {}", session.guild_id());
        }
    }
}
