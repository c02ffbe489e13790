//! # Audio Module
//!
//! Queue and playback scheduling for one voice session per guild.
//!
//! ## Architecture
//!
//! ### [`session`] - Session actor
//! - Owns the queue, the playback state machine and the inactivity timer
//! - Exposes [`SessionHandle`] for enqueue, skip, queue edits and disconnect
//! - Reports to [`SessionHooks`] in event order
//!
//! ### [`gate`] - Resolution gate
//! - Runs at most one metadata/stream resolution at a time
//! - Lets the play path overtake queued enqueues, with a bounded streak
//!
//! ### [`queue`] - Track queue
//! - Bounded list with a cursor; played tracks stay visible
//! - Loop mode wraps the cursor
//!
//! ### [`transport`] - Playback transport
//! - [`PlaybackTransport`] abstracts the audio sink
//! - [`SongbirdTransport`] plays into a songbird voice call
//!
//! ### [`manager`] - Session registry
//! - One session per guild, dropped from the map on disconnect

pub mod gate;
pub mod hooks;
pub mod manager;
pub mod queue;
pub mod session;
pub mod state;
pub mod tasks;
pub mod timer;
pub mod track;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use gate::{GateTicket, Priority, ResolutionGate};
pub use hooks::SessionHooks;
pub use manager::SessionManager;
pub use queue::{TrackQueue, MAX_QUEUE_LEN};
pub use session::{QueueSnapshot, Session, SessionHandle, SessionOptions, RETRY_BUDGET};
pub use state::PlaybackState;
pub use timer::INACTIVITY_TIMEOUT;
pub use track::Track;
pub use transport::{CompletionCallback, PlaybackTransport, SongbirdTransport};
