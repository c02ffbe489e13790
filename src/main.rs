use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tracing::{error, info};

use music_session_bot::{
    audio::{SessionManager, SessionOptions},
    bot::MusicBot,
    config::Config,
    sources::YtDlpResolver,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("music_session_bot=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting Music Session Bot v{}", env!("CARGO_PKG_VERSION"));

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    let config = Config::load()?;
    info!("{}", config.summary());

    let resolver = Arc::new(YtDlpResolver::from_config(&config));
    let sessions = Arc::new(SessionManager::new(resolver, SessionOptions::default()));

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = MusicBot::new(config.clone(), sessions.clone());
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to register Ctrl+C handler");
        info!("⚠️ Shutdown signal received, closing...");
        sessions.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

/// Checks that the external tools playback depends on are installed.
async fn health_check() -> Result<()> {
    dotenvy::dotenv().ok();
    let ytdlp = std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string());

    let yt_dlp = async_process::Command::new(&ytdlp)
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Missing dependencies (yt-dlp or ffmpeg)");
    }
}
