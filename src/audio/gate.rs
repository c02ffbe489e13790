//! Single-flight serializer for metadata/stream resolution.
//!
//! Every resolution in a session runs while holding a [`GateTicket`]. Ordinary
//! requests are served first-in first-out; a [`Priority::High`] request (the
//! play path waiting on the next track) jumps ahead of ordinary requests that
//! have not started yet, but never interrupts the one that is running.
//!
//! Tickets release the gate when dropped. A ticket handed to a waiter whose
//! `acquire` future was dropped travels inside the hand-off channel, so it is
//! released as well and the gate cannot be left held by nobody.

use parking_lot::Mutex;
use std::{collections::VecDeque, fmt, future::Future, sync::Arc};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{SessionError, SessionResult};

/// Consecutive priority grants allowed to overtake queued ordinary waiters
/// before one ordinary waiter is let through.
pub const MAX_PRIORITY_STREAK: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    High,
}

#[derive(Clone, Default)]
pub struct ResolutionGate {
    shared: Arc<GateShared>,
}

#[derive(Default)]
struct GateShared {
    state: Mutex<GateState>,
}

#[derive(Default)]
struct GateState {
    busy: bool,
    closed: bool,
    ordinary: VecDeque<oneshot::Sender<GateTicket>>,
    priority: VecDeque<oneshot::Sender<GateTicket>>,
    priority_streak: usize,
    in_flight: Option<CancellationToken>,
    next_id: u64,
}

impl ResolutionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for this caller's turn.
    ///
    /// Fails with [`SessionError::ResolutionCancelled`] when the gate is closed
    /// before the turn comes.
    pub async fn acquire(&self, priority: Priority) -> SessionResult<GateTicket> {
        let turn = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(SessionError::ResolutionCancelled);
            }

            if !state.busy {
                state.busy = true;
                return Ok(self.shared.issue(&mut state, priority));
            }

            let (tx, rx) = oneshot::channel();
            match priority {
                Priority::Normal => state.ordinary.push_back(tx),
                Priority::High => state.priority.push_back(tx),
            }
            trace!(
                "Gate busy, waiting ({:?}, {} ordinary / {} priority queued)",
                priority,
                state.ordinary.len(),
                state.priority.len()
            );
            rx
        };

        turn.await.map_err(|_| SessionError::ResolutionCancelled)
    }

    /// Cancels the resolution currently holding the gate. Its holder sees
    /// `ResolutionCancelled` from [`GateTicket::run`] and still releases.
    pub fn cancel_in_flight(&self) -> bool {
        let state = self.shared.state.lock();
        match &state.in_flight {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels the running resolution, fails every waiter and refuses new
    /// requests. Used on session teardown.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        if let Some(token) = &state.in_flight {
            token.cancel();
        }

        let dropped = state.ordinary.len() + state.priority.len();
        state.ordinary.clear();
        state.priority.clear();
        debug!("Resolution gate closed, {} waiters dropped", dropped);
    }

    pub fn is_busy(&self) -> bool {
        self.shared.state.lock().busy
    }

    /// Number of callers waiting for a turn.
    pub fn pending(&self) -> usize {
        let state = self.shared.state.lock();
        state.ordinary.len() + state.priority.len()
    }
}

impl GateShared {
    fn issue(self: &Arc<Self>, state: &mut GateState, priority: Priority) -> GateTicket {
        state.next_id += 1;
        let token = CancellationToken::new();
        state.in_flight = Some(token.clone());

        GateTicket {
            gate: Arc::clone(self),
            id: state.next_id,
            priority,
            token,
            armed: true,
        }
    }

    fn release(self: &Arc<Self>, id: u64) {
        let mut state = self.state.lock();
        state.in_flight = None;

        while let Some((waiter, priority)) = state.next_waiter() {
            let ticket = self.issue(&mut state, priority);
            match waiter.send(ticket) {
                Ok(()) => {
                    trace!("Gate ticket {} released, next turn granted ({:?})", id, priority);
                    return;
                }
                // The waiter gave up; this ticket never left the gate.
                Err(mut orphan) => orphan.armed = false,
            }
        }

        state.in_flight = None;
        state.busy = false;
        trace!("Gate ticket {} released, gate idle", id);
    }
}

impl GateState {
    fn next_waiter(&mut self) -> Option<(oneshot::Sender<GateTicket>, Priority)> {
        let ordinary_starving =
            !self.ordinary.is_empty() && self.priority_streak >= MAX_PRIORITY_STREAK;

        if !ordinary_starving {
            if let Some(waiter) = self.priority.pop_front() {
                self.priority_streak = if self.ordinary.is_empty() {
                    0
                } else {
                    self.priority_streak + 1
                };
                return Some((waiter, Priority::High));
            }
        }

        let waiter = self.ordinary.pop_front()?;
        self.priority_streak = 0;
        Some((waiter, Priority::Normal))
    }
}

/// Permission to run one resolution. Dropping it hands the gate to the next
/// waiter.
pub struct GateTicket {
    gate: Arc<GateShared>,
    id: u64,
    priority: Priority,
    token: CancellationToken,
    armed: bool,
}

impl GateTicket {
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Runs `work` under this ticket, aborting it if the gate cancels the
    /// in-flight resolution.
    pub async fn run<F, T>(&self, work: F) -> SessionResult<T>
    where
        F: Future<Output = SessionResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(SessionError::ResolutionCancelled),
            result = work => result,
        }
    }

    pub fn release(self) {
        drop(self)
    }
}

impl Drop for GateTicket {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            self.gate.release(self.id);
        }
    }
}

impl fmt::Debug for GateTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateTicket")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
