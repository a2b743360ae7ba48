use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// What to do with a message when the duplicate lookup itself fails.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateCheckPolicy {
    /// Treat the failed lookup as "not found" and create the entry anyway.
    #[default]
    FailOpen,
    /// Skip the message until a later run can confirm it is new.
    FailClosed,
}

impl std::fmt::Display for DuplicateCheckPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DuplicateCheckPolicy::FailOpen => write!(f, "fail_open"),
            DuplicateCheckPolicy::FailClosed => write!(f, "fail_closed"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_discord_config")]
    pub discord: DiscordConfig,
    #[serde(default = "default_contentful_config")]
    pub contentful: ContentfulConfig,
    #[serde(default = "default_sync_config")]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_channel_name")]
    pub channel_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentfulConfig {
    #[serde(default)]
    pub space_id: String,
    /// Content Delivery API token, used for the duplicate lookup.
    #[serde(default)]
    pub access_token: String,
    /// Content Management API token, used to create and publish entries.
    #[serde(default)]
    pub management_token: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default)]
    pub cdn_base_url: String,
    #[serde(default)]
    pub management_base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ContentfulConfig {
    pub fn effective_cdn_base_url(&self) -> &str {
        if self.cdn_base_url.is_empty() {
            "https://cdn.contentful.com"
        } else {
            self.cdn_base_url.trim_end_matches('/')
        }
    }

    pub fn effective_management_base_url(&self) -> &str {
        if self.management_base_url.is_empty() {
            "https://api.contentful.com"
        } else {
            self.management_base_url.trim_end_matches('/')
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Minutes between scheduled runs (30 by default, 360 for the 6-hour deployment).
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// Messages younger than this are left for a later run.
    #[serde(default = "default_quiet_period_minutes")]
    pub quiet_period_minutes: u64,
    /// Number of recent messages fetched per run (Discord caps this at 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: u8,
    #[serde(default = "default_include_avatar")]
    pub include_avatar: bool,
    #[serde(default)]
    pub duplicate_check: DuplicateCheckPolicy,
}

/// One week.
const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;
/// Three days.
const MAX_QUIET_PERIOD_MINUTES: u64 = 3 * 24 * 60;

impl SyncConfig {
    pub fn interval(&self) -> Result<Duration> {
        self.interval_minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .with_context(|| format!("sync.interval_minutes out of range: {}", self.interval_minutes))
    }

    pub fn quiet_period(&self) -> Result<chrono::Duration> {
        i64::try_from(self.quiet_period_minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .with_context(|| {
                format!(
                    "sync.quiet_period_minutes out of range: {}",
                    self.quiet_period_minutes
                )
            })
    }
}

fn default_channel_name() -> String {
    "server-testimonials-for-website".to_string()
}

fn default_content_type() -> String {
    "userTestimonial".to_string()
}

fn default_locale() -> String {
    "en-US".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_interval_minutes() -> u64 {
    30
}

fn default_quiet_period_minutes() -> u64 {
    10
}

fn default_batch_size() -> u8 {
    100
}

fn default_include_avatar() -> bool {
    true
}

fn default_discord_config() -> DiscordConfig {
    DiscordConfig {
        bot_token: String::new(),
        channel_name: default_channel_name(),
    }
}

fn default_contentful_config() -> ContentfulConfig {
    ContentfulConfig {
        space_id: String::new(),
        access_token: String::new(),
        management_token: String::new(),
        content_type: default_content_type(),
        locale: default_locale(),
        cdn_base_url: String::new(),
        management_base_url: String::new(),
        request_timeout_secs: default_request_timeout_secs(),
    }
}

fn default_sync_config() -> SyncConfig {
    SyncConfig {
        interval_minutes: default_interval_minutes(),
        quiet_period_minutes: default_quiet_period_minutes(),
        batch_size: default_batch_size(),
        include_avatar: default_include_avatar(),
        duplicate_check: DuplicateCheckPolicy::default(),
    }
}

impl Config {
    /// Load the optional TOML file, overlay the process environment and validate.
    /// A missing file is not an error: every setting has a default or an env source.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::from_toml_str("")?
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid configuration")
    }

    /// Overlay values from an environment lookup. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("DISCORD_BOT_TOKEN") {
            self.discord.bot_token = v;
        }
        if let Some(v) = get("TESTIMONIALS_CHANNEL_NAME") {
            self.discord.channel_name = v;
        }
        if let Some(v) = get("CONTENTFUL_SPACE_ID") {
            self.contentful.space_id = v;
        }
        if let Some(v) = get("CONTENTFUL_ACCESS_TOKEN") {
            self.contentful.access_token = v;
        }
        if let Some(v) = get("CONTENTFUL_MANAGEMENT_TOKEN") {
            self.contentful.management_token = v;
        }
        if let Some(v) = get("CONTENTFUL_CONTENT_TYPE") {
            self.contentful.content_type = v;
        }
        if let Some(v) = get("SYNC_INTERVAL_MINUTES") {
            self.sync.interval_minutes = v
                .trim()
                .parse()
                .with_context(|| format!("SYNC_INTERVAL_MINUTES is not a number: {}", v))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("DISCORD_BOT_TOKEN", &self.discord.bot_token),
            ("CONTENTFUL_SPACE_ID", &self.contentful.space_id),
            ("CONTENTFUL_ACCESS_TOKEN", &self.contentful.access_token),
            ("CONTENTFUL_MANAGEMENT_TOKEN", &self.contentful.management_token),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                bail!("Missing required setting {}", name);
            }
        }

        if self.discord.channel_name.is_empty() {
            bail!("discord.channel_name must not be empty");
        }
        if !(1..=100).contains(&self.sync.batch_size) {
            bail!(
                "sync.batch_size must be between 1 and 100, got {}",
                self.sync.batch_size
            );
        }
        if !(1..=MAX_INTERVAL_MINUTES).contains(&self.sync.interval_minutes) {
            bail!(
                "sync.interval_minutes must be between 1 and {}, got {}",
                MAX_INTERVAL_MINUTES,
                self.sync.interval_minutes
            );
        }
        if self.sync.quiet_period_minutes > MAX_QUIET_PERIOD_MINUTES {
            bail!(
                "sync.quiet_period_minutes must be at most {}, got {}",
                MAX_QUIET_PERIOD_MINUTES,
                self.sync.quiet_period_minutes
            );
        }
        Ok(())
    }
}
