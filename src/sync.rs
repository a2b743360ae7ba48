use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::config::{DuplicateCheckPolicy, SyncConfig};
use crate::platform::{ChannelKind, ChatSource, SourceMessage};
use crate::store::{ContentStore, StoreError, TestimonialFields};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("bot is not in any guilds")]
    NoGuild,
    #[error("channel #{0} not found")]
    ChannelNotFound(String),
    #[error("chat platform error: {0:#}")]
    Chat(anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Settings one run needs, lifted out of the process config.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub channel_name: String,
    pub quiet_period: chrono::Duration,
    pub batch_size: u8,
    pub include_avatar: bool,
    pub duplicate_check: DuplicateCheckPolicy,
}

impl SyncSettings {
    pub fn new(channel_name: &str, sync: &SyncConfig) -> anyhow::Result<Self> {
        Ok(Self {
            channel_name: channel_name.to_string(),
            quiet_period: sync.quiet_period()?,
            batch_size: sync.batch_size,
            include_avatar: sync.include_avatar,
            duplicate_check: sync.duplicate_check,
        })
    }
}

/// What happened to the messages of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub fetched: usize,
    pub too_recent: usize,
    pub empty: usize,
    pub duplicates: usize,
    /// Duplicate lookups that failed, whatever the policy did with them.
    pub lookup_failures: usize,
    pub published: Vec<String>,
}

enum Eligibility {
    Eligible,
    TooRecent,
    Empty,
}

fn eligibility(message: &SourceMessage, cutoff: DateTime<Utc>) -> Eligibility {
    if message.created_at >= cutoff {
        Eligibility::TooRecent
    } else if message.content.is_empty() {
        Eligibility::Empty
    } else {
        Eligibility::Eligible
    }
}

/// Mirrors testimonial messages from one chat channel into the content store.
pub struct TestimonialSync {
    chat: Arc<dyn ChatSource>,
    store: Arc<dyn ContentStore>,
    settings: SyncSettings,
}

impl TestimonialSync {
    pub fn new(
        chat: Arc<dyn ChatSource>,
        store: Arc<dyn ContentStore>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            chat,
            store,
            settings,
        }
    }

    /// Run once against the current time, logging the outcome.
    pub async fn run(&self) -> Result<RunReport, SyncError> {
        info!("Starting to process testimonials...");
        let result = self.run_at(Utc::now()).await;
        match &result {
            Ok(report) => info!(
                "Testimonial processing complete: {} fetched, {} published, {} duplicate(s), \
                 {} too recent, {} empty, {} failed lookup(s)",
                report.fetched,
                report.published.len(),
                report.duplicates,
                report.too_recent,
                report.empty,
                report.lookup_failures
            ),
            Err(e) => log_failure(e),
        }
        result
    }

    /// One pass over the channel as of `now`. Stops at the first write failure.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RunReport, SyncError> {
        let channel_id = self.resolve_channel().await?;

        let messages = self
            .chat
            .recent_messages(&channel_id, self.settings.batch_size)
            .await
            .map_err(SyncError::Chat)?;
        info!("Found {} messages in the channel.", messages.len());

        let cutoff = now
            .checked_sub_signed(self.settings.quiet_period)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut report = RunReport {
            fetched: messages.len(),
            ..Default::default()
        };

        for message in &messages {
            match eligibility(message, cutoff) {
                Eligibility::TooRecent => {
                    report.too_recent += 1;
                    continue;
                }
                Eligibility::Empty => {
                    report.empty += 1;
                    continue;
                }
                Eligibility::Eligible => {}
            }

            if self.already_stored(message, &mut report).await {
                continue;
            }

            info!("Processing message from {}...", message.author_tag);
            let fields = TestimonialFields::from_message(message, self.settings.include_avatar);

            let entry = self.store.create_entry(&fields).await?;
            info!("Successfully posted testimonial to Contentful: {}", entry.id);

            self.store.publish_entry(&entry).await?;
            info!("Successfully published testimonial with ID: {}", entry.id);

            report.published.push(entry.id);
        }

        Ok(report)
    }

    /// First guild, then the text channel whose name matches exactly.
    async fn resolve_channel(&self) -> Result<String, SyncError> {
        let guilds = self.chat.guild_ids().await.map_err(SyncError::Chat)?;
        let guild_id = guilds.first().ok_or(SyncError::NoGuild)?;

        let channels = self
            .chat
            .channels(guild_id)
            .await
            .map_err(SyncError::Chat)?;

        channels
            .into_iter()
            .find(|c| c.kind == ChannelKind::Text && c.name == self.settings.channel_name)
            .map(|c| c.id)
            .ok_or_else(|| SyncError::ChannelNotFound(self.settings.channel_name.clone()))
    }

    /// Whether the message must be skipped as already present. Lookup failures
    /// are resolved by the duplicate-check policy.
    async fn already_stored(&self, message: &SourceMessage, report: &mut RunReport) -> bool {
        match self.store.count_by_source_id(&message.id).await {
            Ok(0) => false,
            Ok(_) => {
                info!(
                    "Skipping message {} as it already exists in Contentful.",
                    message.id
                );
                report.duplicates += 1;
                true
            }
            Err(e) => {
                report.lookup_failures += 1;
                let status = e
                    .status()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "n/a".to_string());
                match self.settings.duplicate_check {
                    DuplicateCheckPolicy::FailOpen => {
                        error!(
                            "Error checking for existing testimonial {} (status {}): {}; \
                             processing it anyway",
                            message.id, status, e
                        );
                        false
                    }
                    DuplicateCheckPolicy::FailClosed => {
                        warn!(
                            "Error checking for existing testimonial {} (status {}): {}; \
                             skipping until next run",
                            message.id, status, e
                        );
                        true
                    }
                }
            }
        }
    }
}

fn log_failure(err: &SyncError) {
    match err {
        SyncError::NoGuild | SyncError::ChannelNotFound(_) => error!("Error: {}.", err),
        SyncError::Store(store_err) => match store_err.details() {
            Some(details) => error!(
                "An error occurred during testimonial processing: {}",
                serde_json::to_string_pretty(details).unwrap_or_else(|_| details.to_string())
            ),
            None => error!("An error occurred during testimonial processing: {}", store_err),
        },
        SyncError::Chat(_) => error!("An error occurred during testimonial processing: {}", err),
    }
}
