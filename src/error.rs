//! Error types for the session scheduler.
//!
//! The core reports typed errors so callers can tell a failed lookup from a
//! cancelled one or a bad queue index. Application code at the edges (config,
//! command handlers, `main`) keeps using `anyhow`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The resolver failed or returned nothing playable
    #[error("Could not resolve track: {0}")]
    ResolutionFailed(String),

    /// The resolution was cancelled (disconnect or explicit cancel)
    #[error("Resolution cancelled")]
    ResolutionCancelled,

    #[error("Index {index} is out of range (queue has {len} tracks)")]
    OutOfRange { index: usize, len: usize },

    /// The transport reported an error while playing
    #[error("Playback failed: {0}")]
    PlaybackFailed(String),

    /// The session is disconnecting or already gone
    #[error("Not connected to a voice channel")]
    NotConnected,
}

impl SessionError {
    pub fn resolution(err: impl std::fmt::Display) -> Self {
        Self::ResolutionFailed(err.to_string())
    }

    pub fn playback(err: impl std::fmt::Display) -> Self {
        Self::PlaybackFailed(err.to_string())
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
