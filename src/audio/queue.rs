use std::{collections::VecDeque, sync::Arc};
use tracing::{debug, info};

use crate::{
    audio::track::Track,
    error::{SessionError, SessionResult},
};

/// Most tracks a session keeps. Older entries are evicted from the front.
pub const MAX_QUEUE_LEN: usize = 32;

/// Ordered list of tracks with a cursor pointing at the next one to play.
///
/// Played tracks stay in the list so the queue display can show history.
#[derive(Debug)]
pub struct TrackQueue {
    items: VecDeque<Arc<Track>>,
    cursor: usize,
    /// Index of the track the last `advance` handed out
    playing: Option<usize>,
    looping: bool,
    capacity: usize,
}

impl Default for TrackQueue {
    fn default() -> Self {
        Self::with_capacity(MAX_QUEUE_LEN)
    }
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            cursor: 0,
            playing: None,
            looping: false,
            capacity: capacity.max(1),
        }
    }

    /// Adds a track at the end. Returns how many old tracks were evicted.
    pub fn append(&mut self, track: Arc<Track>) -> usize {
        info!("➕ Queued: {} (from '{}')", track.title(), track.source());
        self.items.push_back(track);

        let mut evicted = 0;
        while self.items.len() > self.capacity {
            if let Some(old) = self.items.pop_front() {
                debug!("Queue full, evicting '{}'", old.title());
            }
            self.cursor = self.cursor.saturating_sub(1);
            self.playing = self.playing.and_then(|index| index.checked_sub(1));
            evicted += 1;
        }
        evicted
    }

    /// Track at the cursor, if any is left to play.
    pub fn peek_next(&self) -> Option<Arc<Track>> {
        self.items.get(self.next_index()?).cloned()
    }

    /// Returns the next track and moves the cursor past it.
    pub fn advance(&mut self) -> Option<Arc<Track>> {
        let index = self.next_index()?;
        let track = self.items.get(index).cloned()?;

        self.playing = Some(index);
        self.cursor = index + 1;
        if self.looping && self.cursor >= self.items.len() {
            self.cursor = 0;
        }
        Some(track)
    }

    pub fn remove(&mut self, index: usize) -> SessionResult<Arc<Track>> {
        let len = self.items.len();
        let track = self
            .items
            .remove(index)
            .ok_or(SessionError::OutOfRange { index, len })?;

        if index < self.cursor && self.cursor > 0 {
            self.cursor -= 1;
        }
        self.playing = match self.playing {
            Some(playing) if playing == index => None,
            Some(playing) if index < playing => Some(playing - 1),
            other => other,
        };
        debug!("❌ Removed '{}' at position {}", track.title(), index);
        Ok(track)
    }

    /// Empties the queue. Returns the number of tracks removed.
    pub fn clear(&mut self) -> usize {
        let cleared = self.items.len();
        self.items.clear();
        self.cursor = 0;
        self.playing = None;
        info!("🗑️ Queue cleared ({} tracks)", cleared);
        cleared
    }

    /// The track last handed out by `advance`, with its index. `None` once it
    /// was removed or evicted. Only meaningful while a track is playing; the
    /// session gates this on its state.
    pub fn current(&self) -> Option<(usize, Arc<Track>)> {
        let index = self.playing?;
        self.items.get(index).map(|track| (index, Arc::clone(track)))
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.looping = !self.looping;
        if self.looping {
            info!("🔁 Queue loop enabled");
        } else {
            info!("➡️ Queue loop disabled");
        }
        self.looping
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn tracks(&self) -> Vec<Arc<Track>> {
        self.items.iter().cloned().collect()
    }

    /// Index of the next track to play. With loop on, an exhausted cursor
    /// starts over at the front.
    fn next_index(&self) -> Option<usize> {
        if self.cursor < self.items.len() {
            Some(self.cursor)
        } else if self.looping && !self.items.is_empty() {
            Some(0)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{ResolvedTrack, TrackMetadata};
    use pretty_assertions::assert_eq;

    fn track(title: &str) -> Arc<Track> {
        Arc::new(Track::new(title, ResolvedTrack::unresolved(TrackMetadata::titled(title))))
    }

    fn titles(queue: &TrackQueue) -> Vec<String> {
        queue.tracks().iter().map(|t| t.title().to_string()).collect()
    }

    #[test]
    fn test_advance_walks_in_insertion_order() {
        let mut queue = TrackQueue::new();
        queue.append(track("a"));
        queue.append(track("b"));

        assert_eq!(queue.peek_next().unwrap().title(), "a");
        assert_eq!(queue.advance().unwrap().title(), "a");
        assert_eq!(queue.cursor(), 1);
        assert_eq!(queue.current().unwrap().0, 0);
        assert_eq!(queue.advance().unwrap().title(), "b");
        assert!(queue.advance().is_none());
        assert_eq!(queue.cursor(), 2);
        assert!(queue.peek_next().is_none());
    }

    #[test]
    fn test_loop_wraps_cursor() {
        let mut queue = TrackQueue::new();
        queue.append(track("a"));
        queue.append(track("b"));
        assert!(queue.toggle_loop());

        queue.advance();
        assert_eq!(queue.advance().unwrap().title(), "b");
        assert_eq!(queue.cursor(), 0);
        assert_eq!(queue.current().unwrap().0, 1);
        assert_eq!(queue.advance().unwrap().title(), "a");
    }

    #[test]
    fn test_current_survives_append_after_loop_wrap() {
        let mut queue = TrackQueue::new();
        queue.append(track("a"));
        queue.append(track("b"));
        queue.toggle_loop();
        queue.advance();
        queue.advance();

        queue.append(track("c"));
        let (index, current) = queue.current().unwrap();
        assert_eq!(index, 1);
        assert_eq!(current.title(), "b");
        assert_eq!(queue.peek_next().unwrap().title(), "a");
    }

    #[test]
    fn test_current_follows_eviction_and_removal() {
        let mut queue = TrackQueue::with_capacity(2);
        queue.append(track("a"));
        queue.append(track("b"));
        queue.toggle_loop();
        queue.advance();
        queue.advance();

        queue.append(track("c"));
        assert_eq!(titles(&queue), vec!["b", "c"]);
        assert_eq!(queue.current().unwrap().1.title(), "b");

        queue.remove(1).unwrap();
        assert_eq!(queue.current().unwrap().0, 0);
        queue.remove(0).unwrap();
        assert!(queue.current().is_none());
    }

    #[test]
    fn test_loop_enabled_on_exhausted_queue_restarts() {
        let mut queue = TrackQueue::new();
        queue.append(track("a"));
        queue.advance();
        assert!(queue.advance().is_none());

        queue.toggle_loop();
        assert_eq!(queue.advance().unwrap().title(), "a");
        assert_eq!(queue.cursor(), 0);
    }

    #[test]
    fn test_capacity_eviction_shifts_cursor() {
        let mut queue = TrackQueue::new();
        for i in 0..MAX_QUEUE_LEN {
            queue.append(track(&format!("t{}", i)));
        }
        queue.advance();
        queue.advance();
        assert_eq!(queue.cursor(), 2);

        let evicted = queue.append(track("overflow"));
        assert_eq!(evicted, 1);
        assert_eq!(queue.len(), MAX_QUEUE_LEN);
        assert_eq!(queue.cursor(), 1);
        assert_eq!(queue.tracks()[0].title(), "t1");
        assert_eq!(queue.peek_next().unwrap().title(), "t2");
    }

    #[test]
    fn test_eviction_never_moves_cursor_below_zero() {
        let mut queue = TrackQueue::with_capacity(2);
        queue.append(track("a"));
        queue.append(track("b"));
        queue.append(track("c"));

        assert_eq!(queue.cursor(), 0);
        assert_eq!(titles(&queue), vec!["b", "c"]);
    }

    #[test]
    fn test_remove_before_cursor_shifts_it() {
        let mut queue = TrackQueue::new();
        for name in ["a", "b", "c"] {
            queue.append(track(name));
        }
        queue.advance();
        queue.advance();

        let removed = queue.remove(0).unwrap();
        assert_eq!(removed.title(), "a");
        assert_eq!(queue.cursor(), 1);
        assert_eq!(queue.peek_next().unwrap().title(), "c");

        queue.remove(1).unwrap();
        assert_eq!(queue.cursor(), 1);
        assert_eq!(titles(&queue), vec!["b"]);
    }

    #[test]
    fn test_remove_out_of_range() {
        let mut queue = TrackQueue::new();
        queue.append(track("a"));

        assert_eq!(
            queue.remove(3).unwrap_err(),
            SessionError::OutOfRange { index: 3, len: 1 }
        );
    }

    #[test]
    fn test_clear_resets_cursor() {
        let mut queue = TrackQueue::new();
        queue.append(track("a"));
        queue.advance();

        assert_eq!(queue.clear(), 1);
        assert_eq!(queue.cursor(), 0);
        assert!(queue.current().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_cursor_stays_in_bounds_under_random_operations() {
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        let mut queue = TrackQueue::with_capacity(8);

        for step in 0..5_000 {
            match rng.u8(0..10) {
                0..=3 => {
                    queue.append(track(&format!("t{}", step)));
                }
                4..=6 => {
                    queue.advance();
                }
                7 => {
                    let index = rng.usize(0..=queue.len());
                    let _ = queue.remove(index);
                }
                8 => {
                    queue.toggle_loop();
                }
                _ => {
                    if rng.u8(0..8) == 0 {
                        queue.clear();
                    }
                }
            }
            assert!(
                queue.cursor() <= queue.len(),
                "cursor {} past len {} at step {}",
                queue.cursor(),
                queue.len(),
                step
            );
        }
    }
}
