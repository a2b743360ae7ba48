pub mod contentful;
pub mod richtext;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::platform::SourceMessage;
use crate::store::richtext::Node;

/// Failure talking to the content store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Non-success response. `details` holds field-level validation info when
    /// the store sent any.
    #[error("content store returned {status}: {message}")]
    Api {
        status: u16,
        message: String,
        details: Option<Value>,
    },
    #[error("unexpected response from content store: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::Api { status, .. } => Some(*status),
            StoreError::Transport(e) => e.status().map(|s| s.as_u16()),
            StoreError::Decode(_) => None,
        }
    }

    pub fn details(&self) -> Option<&Value> {
        match self {
            StoreError::Api { details, .. } => details.as_ref(),
            _ => None,
        }
    }
}

/// Identity of a created entry; the version is required to publish it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRef {
    pub id: String,
    pub version: u64,
}

/// Field set of one testimonial entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TestimonialFields {
    pub source_id: String,
    pub content: Node,
    pub timestamp: DateTime<Utc>,
    pub avatar_url: Option<String>,
}

impl TestimonialFields {
    pub fn from_message(message: &SourceMessage, include_avatar: bool) -> Self {
        Self {
            source_id: message.id.clone(),
            content: Node::document_from_plain_text(&message.content),
            timestamp: message.created_at,
            avatar_url: include_avatar.then(|| message.author_avatar_url.clone()),
        }
    }

    /// ISO-8601 in UTC with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`.
    pub fn iso_timestamp(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Number of testimonial entries whose source-id field equals `source_id`.
    async fn count_by_source_id(&self, source_id: &str) -> Result<usize, StoreError>;

    /// Create a draft entry.
    async fn create_entry(&self, fields: &TestimonialFields) -> Result<EntryRef, StoreError>;

    async fn publish_entry(&self, entry: &EntryRef) -> Result<(), StoreError>;
}
