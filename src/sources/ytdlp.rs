use async_trait::async_trait;
use serde::Deserialize;
use std::{process::Stdio, time::Duration};
use tracing::{debug, info, warn};
use url::Url;

use super::{MetadataResolver, Resolution, ResolvedTrack, StreamHandle, TrackMetadata};
use crate::{
    config::Config,
    error::{SessionError, SessionResult},
};

/// Resolver backed by the `yt-dlp` executable.
///
/// Plain search terms resolve to the first YouTube result. Playlist URLs are
/// listed flat (no stream URLs), so their entries get their streams resolved
/// later by the session.
pub struct YtDlpResolver {
    binary: String,
    timeout: Duration,
    max_playlist_size: usize,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>, timeout: Duration, max_playlist_size: usize) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            max_playlist_size: max_playlist_size.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.ytdlp_path.clone(),
            config.resolve_timeout,
            config.max_playlist_size,
        )
    }

    /// True for URLs that should be listed as a playlist rather than played
    /// as a single video.
    pub fn is_playlist_url(query: &str) -> bool {
        match Url::parse(query) {
            Ok(url) => {
                url.path().starts_with("/playlist")
                    || (url.query_pairs().any(|(key, _)| key == "list")
                        && !url.query_pairs().any(|(key, _)| key == "v"))
            }
            Err(_) => false,
        }
    }

    fn target_for(query: &str) -> String {
        if Url::parse(query).is_ok() {
            query.to_string()
        } else {
            format!("ytsearch1:{}", query.trim())
        }
    }

    async fn run(&self, query: &str, playlist: bool) -> SessionResult<Vec<u8>> {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(["--dump-single-json", "--no-warnings", "--socket-timeout", "30"]);

        if playlist {
            cmd.args(["--flat-playlist", "--yes-playlist"]);
        } else {
            cmd.args(["--no-playlist", "--format", "bestaudio/best"]);
        }

        if let Some(cookies) = find_cookies_file().await {
            cmd.args(["--cookies", &cookies]);
        }

        cmd.arg(Self::target_for(query))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                SessionError::ResolutionFailed(format!(
                    "yt-dlp timed out after {}",
                    humantime::format_duration(self.timeout)
                ))
            })?
            .map_err(|e| SessionError::resolution(format!("could not run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SessionError::ResolutionFailed(
                stderr.trim().lines().last().unwrap_or("yt-dlp failed").to_string(),
            ));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl MetadataResolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> SessionResult<Resolution> {
        let playlist = Self::is_playlist_url(query);
        info!("🔍 Resolving '{}' with yt-dlp (playlist: {})", query, playlist);

        let stdout = self.run(query, playlist).await?;
        let info: YtDlpInfo = serde_json::from_slice(&stdout)
            .map_err(|e| SessionError::resolution(format!("unexpected yt-dlp output: {}", e)))?;

        let resolution = into_resolution(query, info, playlist, self.max_playlist_size)?;
        debug!("Resolved '{}' into {} track(s)", query, match &resolution {
            Resolution::Track(_) => 1,
            Resolution::Playlist(entries) => entries.len(),
        });
        Ok(resolution)
    }

    fn source_name(&self) -> &'static str {
        "yt-dlp"
    }
}

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
    duration_string: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<YtDlpThumbnail>,
    #[serde(default)]
    entries: Option<Vec<Option<YtDlpInfo>>>,
}

#[derive(Debug, Deserialize)]
struct YtDlpThumbnail {
    url: String,
}

impl YtDlpInfo {
    fn metadata(&self, fallback_title: &str, page_url: String) -> TrackMetadata {
        let mut metadata =
            TrackMetadata::new(self.title.clone().unwrap_or_else(|| fallback_title.to_string()), page_url);

        if let Some(label) = &self.duration_string {
            metadata = metadata.with_duration(label.clone());
        } else if let Some(seconds) = self.duration {
            metadata = metadata.with_duration(format_duration(seconds));
        }

        let thumbnail = self
            .thumbnail
            .clone()
            .or_else(|| self.thumbnails.last().map(|t| t.url.clone()));
        if let Some(thumbnail) = thumbnail {
            metadata = metadata.with_thumbnail(thumbnail);
        }
        metadata
    }

    /// A fully extracted video: `url` is the media stream.
    fn into_resolved(self, query: &str) -> SessionResult<ResolvedTrack> {
        let page_url = self.webpage_url.clone().unwrap_or_else(|| query.to_string());
        let metadata = self.metadata(query, page_url);
        let stream = self.url.ok_or_else(|| {
            SessionError::ResolutionFailed(format!("no audio stream for '{}'", metadata.title))
        })?;
        Ok(ResolvedTrack::new(metadata, StreamHandle::new(stream)))
    }

    /// A flat playlist entry: `url` is the video page.
    fn into_placeholder(self, query: &str) -> Option<ResolvedTrack> {
        let page_url = self.webpage_url.clone().or_else(|| self.url.clone())?;
        Some(ResolvedTrack::unresolved(self.metadata(query, page_url)))
    }
}

fn into_resolution(
    query: &str,
    mut info: YtDlpInfo,
    playlist: bool,
    max_entries: usize,
) -> SessionResult<Resolution> {
    let Some(entries) = info.entries.take() else {
        return info.into_resolved(query).map(Resolution::Track);
    };

    let mut entries = entries.into_iter().flatten();
    if !playlist {
        // Search results: keep the top hit only
        let first = entries
            .next()
            .ok_or_else(|| SessionError::ResolutionFailed(format!("no results for '{}'", query)))?;
        return first.into_resolved(query).map(Resolution::Track);
    }

    let tracks: Vec<ResolvedTrack> = entries
        .filter_map(|entry| entry.into_placeholder(query))
        .take(max_entries)
        .collect();

    if tracks.is_empty() {
        warn!("Playlist '{}' has no playable entries", query);
        return Err(SessionError::ResolutionFailed(format!(
            "playlist '{}' is empty",
            query
        )));
    }
    Ok(Resolution::Playlist(tracks))
}

/// Formats seconds as `m:ss` or `h:mm:ss`.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Looks for a cookies file yt-dlp can use for age-gated videos.
async fn find_cookies_file() -> Option<String> {
    let candidates = [
        format!(
            "{}/.config/yt-dlp/cookies.txt",
            std::env::var("HOME").unwrap_or_default()
        ),
        "/app/.config/yt-dlp/cookies.txt".to_string(),
        "./cookies.txt".to_string(),
    ];

    for path in candidates {
        if tokio::fs::metadata(&path).await.is_ok() {
            debug!("🍪 Using cookies from {}", path);
            return Some(path);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(json: &str) -> YtDlpInfo {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_playlist_url_detection() {
        assert!(YtDlpResolver::is_playlist_url(
            "https://www.youtube.com/playlist?list=PL123"
        ));
        assert!(YtDlpResolver::is_playlist_url(
            "https://music.youtube.com/browse?list=OLAK5"
        ));
        assert!(!YtDlpResolver::is_playlist_url(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL123"
        ));
        assert!(!YtDlpResolver::is_playlist_url("never gonna give you up"));
    }

    #[test]
    fn test_search_terms_become_ytsearch() {
        assert_eq!(YtDlpResolver::target_for("  lofi beats "), "ytsearch1:lofi beats");
        assert_eq!(
            YtDlpResolver::target_for("https://youtu.be/abc"),
            "https://youtu.be/abc"
        );
    }

    #[test]
    fn test_single_video_keeps_stream() {
        let info = parse(
            r#"{
                "title": "Song",
                "webpage_url": "https://www.youtube.com/watch?v=abc",
                "url": "https://media.example/abc.webm",
                "duration_string": "3:42",
                "thumbnail": "https://img.example/abc.jpg"
            }"#,
        );

        let resolution = into_resolution("song", info, false, 32).unwrap();
        assert_eq!(
            resolution,
            Resolution::Track(ResolvedTrack::new(
                TrackMetadata::new("Song", "https://www.youtube.com/watch?v=abc")
                    .with_duration("3:42")
                    .with_thumbnail("https://img.example/abc.jpg"),
                StreamHandle::new("https://media.example/abc.webm"),
            ))
        );
    }

    #[test]
    fn test_search_results_use_first_entry() {
        let info = parse(
            r#"{
                "title": "song",
                "entries": [
                    {"title": "First", "webpage_url": "https://y/1", "url": "https://m/1", "duration": 61},
                    {"title": "Second", "webpage_url": "https://y/2", "url": "https://m/2"}
                ]
            }"#,
        );

        let track = into_resolution("song", info, false, 32)
            .unwrap()
            .into_first()
            .unwrap();
        assert_eq!(track.metadata.title, "First");
        assert_eq!(track.metadata.duration, "1:01");
        assert_eq!(track.stream, Some(StreamHandle::new("https://m/1")));
    }

    #[test]
    fn test_empty_search_is_an_error() {
        let info = parse(r#"{"title": "nothing", "entries": []}"#);
        assert!(matches!(
            into_resolution("nothing", info, false, 32),
            Err(SessionError::ResolutionFailed(_))
        ));
    }

    #[test]
    fn test_flat_playlist_entries_are_placeholders() {
        let info = parse(
            r#"{
                "title": "Mix",
                "entries": [
                    {"title": "One", "url": "https://www.youtube.com/watch?v=1", "duration": 3725,
                     "thumbnails": [{"url": "https://img/small"}, {"url": "https://img/large"}]},
                    null,
                    {"title": "Two", "url": "https://www.youtube.com/watch?v=2"},
                    {"title": "Three", "url": "https://www.youtube.com/watch?v=3"}
                ]
            }"#,
        );

        let tracks = into_resolution("https://www.youtube.com/playlist?list=PL", info, true, 2)
            .unwrap()
            .into_tracks();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].stream, None);
        assert_eq!(tracks[0].metadata.url, "https://www.youtube.com/watch?v=1");
        assert_eq!(tracks[0].metadata.duration, "1:02:05");
        assert_eq!(tracks[0].metadata.thumbnail, "https://img/large");
        assert_eq!(tracks[1].metadata.title, "Two");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "0:00");
        assert_eq!(format_duration(59.6), "1:00");
        assert_eq!(format_duration(3600.0), "1:00:00");
    }
}
