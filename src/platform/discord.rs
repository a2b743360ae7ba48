use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::builder::GetMessages;
use serenity::cache::Cache;
use serenity::client::{Context, EventHandler};
use serenity::http::Http;
use serenity::model::channel::ChannelType;
use serenity::model::gateway::{GatewayIntents, Ready};
use serenity::model::id::{ChannelId, GuildId};
use serenity::model::user::User;
use serenity::model::Timestamp;
use serenity::Client;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use crate::platform::{ChannelInfo, ChannelKind, ChatSource, SourceMessage};

/// How long to wait for `cache_ready` before starting with a partial guild cache.
const CACHE_READY_TIMEOUT: Duration = Duration::from_secs(60);

fn to_utc(timestamp: Timestamp) -> DateTime<Utc> {
    *timestamp
}

/// Full tag (`name#1234`, or just `name` for migrated accounts) of the bot.
fn login_line(user: &User) -> String {
    format!("Bot is online! Logged in as {}", user.tag())
}

fn parse_snowflake(raw: &str) -> Result<u64> {
    let id: u64 = raw
        .parse()
        .with_context(|| format!("Invalid Discord id: {}", raw))?;
    if id == 0 {
        bail!("Invalid Discord id: 0");
    }
    Ok(id)
}

/// Chat source backed by the process-wide serenity HTTP client and cache.
/// Built once when the gateway is ready and reused by every sync run.
#[derive(Clone)]
pub struct DiscordSource {
    http: Arc<Http>,
    cache: Arc<Cache>,
}

impl DiscordSource {
    pub fn from_context(ctx: &Context) -> Self {
        Self {
            http: ctx.http.clone(),
            cache: ctx.cache.clone(),
        }
    }
}

#[async_trait]
impl ChatSource for DiscordSource {
    async fn guild_ids(&self) -> Result<Vec<String>> {
        let mut guilds = self.cache.guilds();
        guilds.sort();
        Ok(guilds.iter().map(|g| g.get().to_string()).collect())
    }

    async fn channels(&self, guild_id: &str) -> Result<Vec<ChannelInfo>> {
        let guild = GuildId::new(parse_snowflake(guild_id)?);
        let channels = guild
            .channels(&self.http)
            .await
            .with_context(|| format!("Failed to list channels of guild {}", guild_id))?;

        let mut channels: Vec<_> = channels.into_values().collect();
        channels.sort_by_key(|c| (c.position, c.id));

        Ok(channels
            .into_iter()
            .map(|c| ChannelInfo {
                id: c.id.get().to_string(),
                name: c.name,
                kind: if c.kind == ChannelType::Text {
                    ChannelKind::Text
                } else {
                    ChannelKind::Other
                },
            })
            .collect())
    }

    async fn recent_messages(&self, channel_id: &str, limit: u8) -> Result<Vec<SourceMessage>> {
        let channel = ChannelId::new(parse_snowflake(channel_id)?);
        let messages = channel
            .messages(&self.http, GetMessages::new().limit(limit))
            .await
            .with_context(|| format!("Failed to fetch messages from channel {}", channel_id))?;

        Ok(messages
            .into_iter()
            .map(|m| SourceMessage {
                id: m.id.get().to_string(),
                author_tag: m.author.tag(),
                author_avatar_url: m.author.face(),
                created_at: to_utc(m.timestamp),
                content: m.content,
            })
            .collect())
    }
}

/// Hands a value to the waiting side exactly once, whichever caller opens it first.
pub struct ReadyGate<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for ReadyGate<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T: Send + 'static> ReadyGate<T> {
    pub fn new(tx: oneshot::Sender<T>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Returns false if the gate was already opened or the receiver is gone.
    pub async fn open(&self, value: T) -> bool {
        let Some(tx) = self.slot.lock().await.take() else {
            return false;
        };
        tx.send(value).is_ok()
    }

    /// Open the gate after `delay` unless something else opened it first.
    pub fn open_after<F>(&self, delay: Duration, make: F) -> tokio::task::JoinHandle<bool>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let gate = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if gate.slot.lock().await.is_none() {
                return false;
            }
            gate.open(make()).await
        })
    }
}

/// Gateway event handler. Its only job is to hand a `DiscordSource` to the
/// sync loop the first time the connection is usable.
struct Handler {
    gate: ReadyGate<DiscordSource>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{}", login_line(&ready.user));
        // cache_ready never fires without guilds, so start straight away.
        if ready.guilds.is_empty() {
            self.gate.open(DiscordSource::from_context(&ctx)).await;
            return;
        }
        // A guild that stays unavailable also keeps cache_ready from firing.
        self.gate.open_after(CACHE_READY_TIMEOUT, move || {
            warn!(
                "Guild cache not ready after {:?}; starting sync with a partial cache",
                CACHE_READY_TIMEOUT
            );
            DiscordSource::from_context(&ctx)
        });
    }

    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        info!("Guild cache ready ({} guild(s))", guilds.len());
        // Reconnects re-emit these events; only the first opening counts.
        self.gate.open(DiscordSource::from_context(&ctx)).await;
    }
}

/// Connect to the Discord gateway and keep the session alive until the
/// process ends. `on_ready` receives the chat source once.
pub async fn run(bot_token: &str, on_ready: oneshot::Sender<DiscordSource>) -> Result<()> {
    let intents =
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT;

    let handler = Handler {
        gate: ReadyGate::new(on_ready),
    };

    let mut client = Client::builder(bot_token, intents)
        .event_handler(handler)
        .await
        .context("Failed to create Discord client")?;

    info!("Connecting to Discord...");
    client.start().await.context("Discord client error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_timestamp_keeps_millis() {
        let timestamp = Timestamp::from_millis(1_462_015_105_796).unwrap();
        assert_eq!(
            to_utc(timestamp).to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "2016-04-30T11:18:25.796Z"
        );
    }

    #[test]
    fn test_login_line_uses_full_tag() {
        let mut user = User::default();
        user.name = "testimonial-bot".to_string();
        user.discriminator = std::num::NonZeroU16::new(42);
        assert_eq!(
            login_line(&user),
            "Bot is online! Logged in as testimonial-bot#0042"
        );

        user.discriminator = None;
        assert_eq!(login_line(&user), "Bot is online! Logged in as testimonial-bot");
    }

    #[tokio::test]
    async fn test_gate_opens_once() {
        let (tx, rx) = oneshot::channel();
        let gate = ReadyGate::new(tx);

        assert!(gate.open(1u32).await);
        assert!(!gate.clone().open(2).await);
        assert_eq!(rx.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_gate_fallback_fires_when_nothing_else_opens() {
        let (tx, rx) = oneshot::channel();
        let gate = ReadyGate::new(tx);

        let fallback = gate.open_after(Duration::from_millis(10), || 7u32);
        assert!(fallback.await.unwrap());
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_gate_fallback_yields_to_earlier_open() {
        let (tx, rx) = oneshot::channel();
        let gate = ReadyGate::new(tx);

        let fallback = gate.open_after(Duration::from_millis(50), || 7u32);
        assert!(gate.open(3).await);
        assert!(!fallback.await.unwrap());
        assert_eq!(rx.await.unwrap(), 3);
    }

    #[test]
    fn test_parse_snowflake() {
        assert_eq!(parse_snowflake("175928847299117063").unwrap(), 175928847299117063);
        assert!(parse_snowflake("0").is_err());
        assert!(parse_snowflake("general").is_err());
        assert!(parse_snowflake("").is_err());
    }
}
