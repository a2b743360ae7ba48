pub mod discord;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A message read from the chat platform. Never mutated after fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMessage {
    /// Platform message ID as string; doubles as the de-duplication key
    pub id: String,
    /// Display tag of the author (e.g. "name" or "name#1234")
    pub author_tag: String,
    /// Author avatar URL, custom or the platform default
    pub author_avatar_url: String,
    /// The message text, possibly empty
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
}

/// Read-only view of the chat platform the sync job needs.
#[async_trait]
pub trait ChatSource: Send + Sync {
    /// Guilds the bot has joined, ordered so the first one is the one to use.
    async fn guild_ids(&self) -> Result<Vec<String>>;

    async fn channels(&self, guild_id: &str) -> Result<Vec<ChannelInfo>>;

    /// Up to `limit` most recent messages, newest first.
    async fn recent_messages(&self, channel_id: &str, limit: u8) -> Result<Vec<SourceMessage>>;
}
