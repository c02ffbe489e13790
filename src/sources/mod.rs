//! # Sources
//!
//! Metadata and stream resolution. The session only knows the
//! [`MetadataResolver`] trait; [`ytdlp::YtDlpResolver`] is the implementation
//! the bot ships with.

pub mod ytdlp;

use async_trait::async_trait;
use std::fmt;

use crate::error::SessionResult;

pub use ytdlp::YtDlpResolver;

/// Shown when the source does not report a duration
pub const UNKNOWN_DURATION: &str = "??:??";

/// Shown when the source has no thumbnail
pub const DEFAULT_THUMBNAIL: &str =
    "https://redthread.uoregon.edu/files/original/affd16fd5264cab9197da4cd1a996f820e601ee4.png";

/// Turns a query (search terms or URL) into playable tracks.
///
/// Implementations may be slow and must tolerate being cancelled: the session
/// drops the returned future when a resolution is aborted.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn resolve(&self, query: &str) -> SessionResult<Resolution>;

    /// Name of the backing service, for logs
    fn source_name(&self) -> &'static str;
}

/// Opaque reference to a playable stream (a direct media URL for yt-dlp).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamHandle(String);

impl StreamHandle {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Display information for a track. Fixed once the track is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: String,
    /// Human readable length, e.g. `3:42`
    pub duration: String,
    pub thumbnail: String,
    /// Canonical page URL, also used to re-resolve the stream
    pub url: String,
}

impl TrackMetadata {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            duration: UNKNOWN_DURATION.to_string(),
            thumbnail: DEFAULT_THUMBNAIL.to_string(),
            url: url.into(),
        }
    }

    pub fn with_duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = duration.into();
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = thumbnail.into();
        self
    }

    #[cfg(test)]
    pub(crate) fn titled(title: &str) -> Self {
        Self::new(title, format!("https://example.com/{}", title))
    }
}

/// Metadata plus the stream, when the resolver already produced one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTrack {
    pub metadata: TrackMetadata,
    pub stream: Option<StreamHandle>,
}

impl ResolvedTrack {
    pub fn new(metadata: TrackMetadata, stream: StreamHandle) -> Self {
        Self {
            metadata,
            stream: Some(stream),
        }
    }

    /// Playlist entries usually come without a stream; it is fetched later.
    pub fn unresolved(metadata: TrackMetadata) -> Self {
        Self {
            metadata,
            stream: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Track(ResolvedTrack),
    Playlist(Vec<ResolvedTrack>),
}

impl Resolution {
    pub fn into_tracks(self) -> Vec<ResolvedTrack> {
        match self {
            Resolution::Track(track) => vec![track],
            Resolution::Playlist(entries) => entries,
        }
    }

    pub fn into_first(self) -> Option<ResolvedTrack> {
        self.into_tracks().into_iter().next()
    }
}
