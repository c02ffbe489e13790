use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};

use crate::audio::{QueueSnapshot, Track};

/// Standard palette for the bot's embeds
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 Music Session Bot";

/// Longest queue listing shown in one embed
const QUEUE_PAGE: usize = 15;

fn track_embed(title: &str, track: &Track) -> CreateEmbed {
    CreateEmbed::default()
        .title(title)
        .description(format!("**{}**", track.title()))
        .url(track.url())
        .field("⏱️ Duration", track.duration(), true)
        .thumbnail(track.thumbnail())
        .timestamp(Timestamp::now())
}

pub fn now_playing_embed(track: &Track) -> CreateEmbed {
    track_embed("🎵 Now Playing", track)
        .color(colors::SUCCESS_GREEN)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// `position` is 1-based.
pub fn queued_embed(track: &Track, position: usize) -> CreateEmbed {
    track_embed("➕ Queued", track)
        .color(colors::INFO_BLUE)
        .field("📍 Position", position.to_string(), true)
        .footer(CreateEmbedFooter::new("Plays automatically when its turn comes"))
}

pub fn disconnected_embed(reason: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("👋 Disconnected")
        .description(reason)
        .color(colors::NEUTRAL_GRAY)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn queue_embed(snapshot: &QueueSnapshot) -> CreateEmbed {
    let description = if snapshot.tracks.is_empty() {
        "The queue is empty".to_string()
    } else {
        let mut lines: Vec<String> = snapshot
            .tracks
            .iter()
            .enumerate()
            .take(QUEUE_PAGE)
            .map(|(index, track)| {
                let marker = if snapshot.current == Some(index) { "▶️" } else { "▫️" };
                format!("{} `{}.` {} `[{}]`", marker, index + 1, track.title(), track.duration())
            })
            .collect();
        if snapshot.tracks.len() > QUEUE_PAGE {
            lines.push(format!("…and {} more", snapshot.tracks.len() - QUEUE_PAGE));
        }
        lines.join("\n")
    };

    let loop_label = if snapshot.looping { "🔁 On" } else { "➡️ Off" };
    CreateEmbed::default()
        .title("📜 Queue")
        .description(description)
        .color(colors::MUSIC_PURPLE)
        .field("Tracks", snapshot.tracks.len().to_string(), true)
        .field("Loop", loop_label, true)
        .field("State", snapshot.state.to_string(), true)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn error_embed(description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("❌ Error")
        .description(description)
        .color(colors::ERROR_RED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::PlaybackState,
        sources::{ResolvedTrack, StreamHandle, TrackMetadata},
    };
    use serde_json::Value;
    use std::sync::Arc;

    fn track(title: &str) -> Arc<Track> {
        Arc::new(Track::new(
            title,
            ResolvedTrack::new(
                TrackMetadata::titled(title).with_duration("3:00"),
                StreamHandle::new("stream"),
            ),
        ))
    }

    fn json(embed: CreateEmbed) -> Value {
        serde_json::to_value(embed).unwrap()
    }

    #[test]
    fn test_now_playing_embed() {
        let value = json(now_playing_embed(&track("Song")));
        assert_eq!(value["title"], "🎵 Now Playing");
        assert_eq!(value["description"], "**Song**");
        assert_eq!(value["url"], "https://example.com/Song");
        assert_eq!(value["fields"][0]["value"], "3:00");
    }

    #[test]
    fn test_queue_embed_marks_current_track() {
        let snapshot = QueueSnapshot {
            current: Some(1),
            tracks: vec![track("a"), track("b"), track("c")],
            looping: true,
            state: PlaybackState::Active,
        };

        let value = json(queue_embed(&snapshot));
        let description = value["description"].as_str().unwrap();
        let lines: Vec<&str> = description.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("▶️ `2.` b"));
        assert!(lines[0].starts_with("▫️"));
        assert_eq!(value["fields"][1]["value"], "🔁 On");
        assert_eq!(value["fields"][2]["value"], "playing");
    }

    #[test]
    fn test_long_queue_is_truncated() {
        let snapshot = QueueSnapshot {
            current: None,
            tracks: (0..20).map(|i| track(&format!("t{}", i))).collect(),
            looping: false,
            state: PlaybackState::Idle,
        };

        let value = json(queue_embed(&snapshot));
        let description = value["description"].as_str().unwrap();
        assert_eq!(description.lines().count(), QUEUE_PAGE + 1);
        assert!(description.ends_with("…and 5 more"));
    }

    #[test]
    fn test_error_embed() {
        let value = json(error_embed("Playback failed: decoder"));
        assert_eq!(value["title"], "❌ Error");
        assert_eq!(value["description"], "Playback failed: decoder");
    }
}
