//! Discord music bot built around a per-guild session scheduler.
//!
//! - [`audio`]: queue, resolution gate, playback state machine and sessions
//! - [`sources`]: metadata/stream resolution (yt-dlp)
//! - [`bot`]: serenity event handler and prefix commands
//! - [`ui`]: embeds

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod sources;
pub mod ui;

pub use error::{SessionError, SessionResult};
