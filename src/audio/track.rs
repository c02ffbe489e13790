use parking_lot::RwLock;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::debug;

use crate::sources::{ResolvedTrack, StreamHandle, TrackMetadata};

/// A queued item. Metadata is fixed at creation; the stream handle is filled in
/// by whichever resolution (enqueue, prefetch or the play path) gets there first.
#[derive(Debug)]
pub struct Track {
    source: String,
    metadata: TrackMetadata,
    stream: RwLock<Option<StreamHandle>>,
    resolving: AtomicBool,
}

impl Track {
    pub fn new(source: impl Into<String>, resolved: ResolvedTrack) -> Self {
        Self {
            source: source.into(),
            metadata: resolved.metadata,
            stream: RwLock::new(resolved.stream),
            resolving: AtomicBool::new(false),
        }
    }

    /// The query this track was enqueued with.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn title(&self) -> &str {
        &self.metadata.title
    }

    pub fn duration(&self) -> &str {
        &self.metadata.duration
    }

    pub fn thumbnail(&self) -> &str {
        &self.metadata.thumbnail
    }

    pub fn url(&self) -> &str {
        &self.metadata.url
    }

    pub fn stream(&self) -> Option<StreamHandle> {
        self.stream.read().clone()
    }

    pub fn has_stream(&self) -> bool {
        self.stream.read().is_some()
    }

    pub fn is_resolving(&self) -> bool {
        self.resolving.load(Ordering::Acquire)
    }

    /// Marks the track as resolving. Returns `None` when another resolution
    /// already holds the flag.
    pub fn begin_resolving(self: &Arc<Self>) -> Option<ResolvingGuard> {
        self.resolving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ResolvingGuard {
                track: Arc::clone(self),
            })
    }

    /// Stores the stream unless one is already present. Returns the handle the
    /// track ends up with.
    pub(crate) fn set_stream(&self, stream: StreamHandle) -> StreamHandle {
        let mut slot = self.stream.write();
        match slot.as_ref() {
            Some(existing) => existing.clone(),
            None => {
                debug!("Stream resolved for '{}'", self.metadata.title);
                *slot = Some(stream.clone());
                stream
            }
        }
    }
}

/// Holds a track's `resolving` flag. The flag drops back to false however the
/// resolution ends, including cancellation.
#[derive(Debug)]
pub struct ResolvingGuard {
    track: Arc<Track>,
}

impl ResolvingGuard {
    pub fn finish(self, stream: StreamHandle) -> StreamHandle {
        self.track.set_stream(stream)
    }
}

impl Drop for ResolvingGuard {
    fn drop(&mut self) {
        self.track.resolving.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholder(title: &str) -> Arc<Track> {
        Arc::new(Track::new(title, ResolvedTrack::unresolved(TrackMetadata::titled(title))))
    }

    #[test]
    fn test_resolving_flag_is_exclusive() {
        let track = placeholder("a");
        let guard = track.begin_resolving().expect("first resolution");
        assert!(track.is_resolving());
        assert!(track.begin_resolving().is_none());

        drop(guard);
        assert!(!track.is_resolving());
        assert!(!track.has_stream());
    }

    #[test]
    fn test_stream_is_kept_once_set() {
        let track = placeholder("a");
        let first = track.begin_resolving().unwrap().finish(StreamHandle::new("first"));
        let second = track.begin_resolving().unwrap().finish(StreamHandle::new("second"));

        assert_eq!(first, StreamHandle::new("first"));
        assert_eq!(second, StreamHandle::new("first"));
        assert_eq!(track.stream(), Some(StreamHandle::new("first")));
        assert!(!track.is_resolving());
    }
}
