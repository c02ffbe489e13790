//! # Bot Module
//!
//! Discord front end: reads prefix commands from text channels, joins voice
//! channels through songbird and drives one [`SessionHandle`] per guild.
//!
//! Session notifications (now playing, errors, disconnects) go to the text
//! channel the last command came from.

use anyhow::{anyhow, Result};
use dashmap::DashMap;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Http, Message, Ready, UserId, VoiceState},
    async_trait,
    builder::{CreateEmbed, CreateMessage},
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;

use crate::{
    audio::{SessionHandle, SessionHooks, SessionManager, SongbirdTransport},
    bot::commands::BotCommand,
    config::Config,
    ui::embeds,
};

pub struct MusicBot {
    config: Arc<Config>,
    sessions: Arc<SessionManager>,
    /// Text channel each guild's notifications go to
    text_channels: Arc<DashMap<GuildId, ChannelId>>,
    http_client: reqwest::Client,
}

impl MusicBot {
    pub fn new(config: Config, sessions: Arc<SessionManager>) -> Self {
        Self {
            config: Arc::new(config),
            sessions,
            text_channels: Arc::new(DashMap::new()),
            http_client: reqwest::Client::new(),
        }
    }

    async fn run_command(&self, ctx: &Context, msg: &Message, command: BotCommand) -> Result<()> {
        let guild_id = msg
            .guild_id
            .ok_or_else(|| anyhow!("This only works in a server"))?;

        match command {
            BotCommand::Join => {
                self.join(ctx, msg, guild_id).await?;
            }
            BotCommand::Move => {
                if self.sessions.get(guild_id).is_none() {
                    anyhow::bail!("Bot must be connected to a voice channel before moving!");
                }
                let channel_id = author_channel(ctx, msg, guild_id)?;
                move_call(ctx, guild_id, channel_id).await?;
                self.text_channels.insert(guild_id, msg.channel_id);
            }
            BotCommand::Play(query) => {
                let session = match self.sessions.get(guild_id) {
                    Some(session) => session,
                    None => self.join(ctx, msg, guild_id).await?,
                };
                self.text_channels.insert(guild_id, msg.channel_id);

                let was_active = session.is_active().await;
                let track = session.enqueue(&query).await?;

                if was_active {
                    let snapshot = session.current_queue().await?;
                    let position = snapshot
                        .tracks
                        .iter()
                        .position(|t| Arc::ptr_eq(t, &track))
                        .map_or(snapshot.tracks.len(), |index| index + 1);
                    send_embed(&ctx.http, msg.channel_id, embeds::queued_embed(&track, position)).await;
                }
            }
            BotCommand::Skip => {
                if !self.session(guild_id)?.skip().await? {
                    anyhow::bail!("Nothing is playing");
                }
            }
            BotCommand::Queue => {
                let snapshot = self.session(guild_id)?.current_queue().await?;
                send_embed(&ctx.http, msg.channel_id, embeds::queue_embed(&snapshot)).await;
            }
            BotCommand::Disconnect => {
                if !self.sessions.disconnect(guild_id, "Disconnected by command").await {
                    anyhow::bail!("Bot is not connected to a voice channel!");
                }
            }
            BotCommand::Remove(position) => {
                let removed = self.session(guild_id)?.remove_from_queue(position - 1).await?;
                msg.channel_id
                    .say(&ctx.http, format!("❌ Removed **{}**", removed.title()))
                    .await?;
            }
            BotCommand::Clear => {
                let cleared = self.session(guild_id)?.clear_queue().await?;
                msg.channel_id
                    .say(&ctx.http, format!("🗑️ Cleared {} track(s)", cleared))
                    .await?;
            }
            BotCommand::Loop => {
                let looping = self.session(guild_id)?.toggle_loop().await?;
                let text = if looping { "🔁 Loop enabled" } else { "➡️ Loop disabled" };
                msg.channel_id.say(&ctx.http, text).await?;
            }
        }
        Ok(())
    }

    fn session(&self, guild_id: GuildId) -> Result<SessionHandle> {
        self.sessions
            .get(guild_id)
            .ok_or_else(|| anyhow!("Bot is not connected to a voice channel!"))
    }

    /// Joins the author's voice channel and starts the guild's session, or
    /// moves the existing call there.
    async fn join(&self, ctx: &Context, msg: &Message, guild_id: GuildId) -> Result<SessionHandle> {
        let channel_id = author_channel(ctx, msg, guild_id)?;
        let manager = songbird_manager(ctx).await?;

        if let Some(session) = self.sessions.get(guild_id) {
            if let Some(call) = manager.get(guild_id) {
                let current = call.lock().await.current_channel();
                if current == Some(songbird::id::ChannelId::from(channel_id)) {
                    anyhow::bail!("Already in vc");
                }
            }
            move_call(ctx, guild_id, channel_id).await?;
            return Ok(session);
        }

        let call = manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| anyhow!("Could not join the voice channel: {}", e))?;
        if let Err(e) = call.lock().await.deafen(true).await {
            warn!("Could not self-deafen in guild {}: {}", guild_id, e);
        }
        info!("🔊 Joined channel {} in guild {}", channel_id, guild_id);

        self.text_channels.insert(guild_id, msg.channel_id);
        let transport = SongbirdTransport::new(
            guild_id,
            manager,
            call,
            self.http_client.clone(),
            self.config.default_volume,
        );
        Ok(self
            .sessions
            .get_or_start(guild_id, Arc::new(transport), self.hooks(ctx.http.clone())))
    }

    /// Hooks that post session events to the guild's text channel.
    fn hooks(&self, http: Arc<Http>) -> SessionHooks {
        let on_play = (http.clone(), self.text_channels.clone());
        let on_error = (http.clone(), self.text_channels.clone());
        let on_disconnect = (http, self.text_channels.clone());

        SessionHooks::new()
            .on_play(move |track, session| {
                let (http, channels) = on_play.clone();
                async move {
                    if let Some(channel) = text_channel(&channels, session.guild_id()) {
                        send_embed(&http, channel, embeds::now_playing_embed(&track)).await;
                    }
                }
            })
            .on_error(move |session, err| {
                let (http, channels) = on_error.clone();
                async move {
                    if let Some(channel) = text_channel(&channels, session.guild_id()) {
                        send_embed(&http, channel, embeds::error_embed(&err.to_string())).await;
                    }
                }
            })
            .on_disconnect(move |session, reason| {
                let (http, channels) = on_disconnect.clone();
                async move {
                    if let Some((_, channel)) = channels.remove(&session.guild_id()) {
                        send_embed(&http, channel, embeds::disconnected_embed(&reason)).await;
                    }
                }
            })
    }

    /// Why the bot should leave after a voice state change in its guild, if
    /// it should.
    fn leave_reason(&self, ctx: &Context, guild_id: GuildId, bot_id: UserId, new: &VoiceState) -> Option<&'static str> {
        if new.user_id == bot_id && new.channel_id.is_none() {
            return Some("Disconnected from voice");
        }

        let guild = ctx.cache.guild(guild_id)?;
        let bot_channel = guild.voice_states.get(&bot_id).and_then(|vs| vs.channel_id)?;

        if guild.afk_metadata.as_ref().map(|afk| afk.afk_channel_id) == Some(bot_channel) {
            return Some("Moved to the AFK channel");
        }

        let listeners = guild
            .voice_states
            .values()
            .filter(|vs| vs.channel_id == Some(bot_channel) && vs.user_id != bot_id)
            .count();
        (listeners == 0).then_some("Left alone in the voice channel")
    }
}

/// Voice channel the message author is sitting in.
fn author_channel(ctx: &Context, msg: &Message, guild_id: GuildId) -> Result<ChannelId> {
    ctx.cache
        .guild(guild_id)
        .and_then(|guild| guild.voice_states.get(&msg.author.id).and_then(|vs| vs.channel_id))
        .ok_or_else(|| anyhow!("You must be in a voice channel!"))
}

async fn songbird_manager(ctx: &Context) -> Result<Arc<songbird::Songbird>> {
    songbird::get(ctx)
        .await
        .ok_or_else(|| anyhow!("Songbird is not initialised"))
}

/// Moves the guild's existing call to `channel_id`.
async fn move_call(ctx: &Context, guild_id: GuildId, channel_id: ChannelId) -> Result<()> {
    let manager = songbird_manager(ctx).await?;
    manager
        .join(guild_id, channel_id)
        .await
        .map_err(|e| anyhow!("Could not move to the voice channel: {}", e))?;
    info!("🔀 Moved to channel {} in guild {}", channel_id, guild_id);
    Ok(())
}

fn text_channel(channels: &DashMap<GuildId, ChannelId>, guild_id: GuildId) -> Option<ChannelId> {
    channels.get(&guild_id).map(|entry| *entry.value())
}

async fn send_embed(http: &Http, channel: ChannelId, embed: CreateEmbed) {
    if let Err(e) = channel.send_message(http, CreateMessage::new().embed(embed)).await {
        warn!("Could not send embed to channel {}: {}", channel, e);
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} servers", ready.guilds.len());
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(parsed) = BotCommand::parse(&self.config.command_prefix, &msg.content) else {
            return;
        };
        debug!("Command from {}: {:?}", msg.author.name, parsed);

        let outcome = match parsed {
            Ok(command) => self.run_command(&ctx, &msg, command).await,
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = msg.react(&ctx, '👍').await {
                    debug!("Could not react to command: {}", e);
                }
            }
            Err(e) => {
                warn!("Command '{}' failed: {}", msg.content, e);
                if let Err(e) = msg.react(&ctx, '👎').await {
                    debug!("Could not react to command: {}", e);
                }
                if let Err(e) = msg.channel_id.say(&ctx.http, e.to_string()).await {
                    error!("Could not send error message: {}", e);
                }
            }
        }
    }

    async fn voice_state_update(&self, ctx: Context, _old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        if !self.sessions.contains(guild_id) {
            return;
        }

        let bot_id = ctx.cache.current_user().id;
        if let Some(reason) = self.leave_reason(&ctx, guild_id, bot_id, &new) {
            info!("🚪 Leaving guild {}: {}", guild_id, reason);
            self.sessions.disconnect(guild_id, reason).await;
        }
    }
}
