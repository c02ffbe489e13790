use anyhow::{Context, Result};
use std::time::Duration;

use crate::audio::MAX_QUEUE_LEN;

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Resolution
    pub ytdlp_path: String,
    pub resolve_timeout: Duration,
    pub max_playlist_size: usize,

    // Audio
    pub default_volume: f32,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source. `load` uses the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let config = Self {
            discord_token: var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            command_prefix: var("COMMAND_PREFIX").unwrap_or(defaults.command_prefix),

            ytdlp_path: var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            resolve_timeout: match var("RESOLVE_TIMEOUT") {
                Some(raw) => humantime::parse_duration(raw.trim())
                    .with_context(|| format!("RESOLVE_TIMEOUT '{}' is not a duration", raw))?,
                None => defaults.resolve_timeout,
            },
            max_playlist_size: match var("MAX_PLAYLIST_SIZE") {
                Some(raw) => raw.trim().parse().context("MAX_PLAYLIST_SIZE must be a number")?,
                None => defaults.max_playlist_size,
            },

            default_volume: match var("DEFAULT_VOLUME") {
                Some(raw) => raw.trim().parse().context("DEFAULT_VOLUME must be a number")?,
                None => defaults.default_volume,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Sanity checks on the loaded values.
    ///
    /// - Volume between 0.0 and 2.0
    /// - Playlist size between 1 and the queue capacity
    /// - A non-empty command prefix and a non-zero resolve timeout
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.default_volume) {
            anyhow::bail!(
                "Default volume must be between 0.0 and 2.0, got: {}",
                self.default_volume
            );
        }

        if self.max_playlist_size == 0 || self.max_playlist_size > MAX_QUEUE_LEN {
            anyhow::bail!(
                "Max playlist size must be between 1 and {}, got: {}",
                MAX_QUEUE_LEN,
                self.max_playlist_size
            );
        }

        if self.command_prefix.trim().is_empty() {
            anyhow::bail!("Command prefix cannot be empty");
        }

        if self.resolve_timeout.is_zero() {
            anyhow::bail!("Resolve timeout must be greater than 0");
        }

        Ok(())
    }

    /// Configuration summary for logs. Leaves the token out.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Commands: prefix '{}'\n  \
            Resolver: {} (timeout {}, playlists up to {})\n  \
            Audio: {}% vol",
            self.command_prefix,
            self.ytdlp_path,
            humantime::format_duration(self.resolve_timeout),
            self.max_playlist_size,
            (self.default_volume * 100.0).round() as u32,
        )
    }
}

/// Fallbacks for everything except the token.
impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            command_prefix: "-".to_string(),

            ytdlp_path: "yt-dlp".to_string(),
            resolve_timeout: Duration::from_secs(30),
            max_playlist_size: MAX_QUEUE_LEN,

            default_volume: 0.25,
        }
    }
}
