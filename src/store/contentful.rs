use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::IgnoredAny;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use crate::config::ContentfulConfig;
use crate::store::richtext::Node;
use crate::store::{ContentStore, EntryRef, StoreError, TestimonialFields};

const MANAGEMENT_CONTENT_TYPE: &str = "application/vnd.contentful.management.v1+json";

/// Field ids of the testimonial content type.
const FIELD_SOURCE_ID: &str = "userId";

/// A field value wrapped in Contentful's `{ "<locale>": value }` envelope.
struct Localized<'a, T> {
    locale: &'a str,
    value: T,
}

impl<T: Serialize> Serialize for Localized<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.locale, &self.value)?;
        map.end()
    }
}

#[derive(Serialize)]
struct EntryBody<'a> {
    fields: EntryFields<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EntryFields<'a> {
    user_id: Localized<'a, &'a str>,
    message_content: Localized<'a, &'a Node>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_avatar: Option<Localized<'a, &'a str>>,
    timestamp: Localized<'a, String>,
}

#[derive(Deserialize)]
struct EntryCollection {
    #[serde(default)]
    items: Vec<IgnoredAny>,
}

#[derive(Deserialize)]
struct EntryResponse {
    sys: EntrySys,
}

#[derive(Deserialize)]
struct EntrySys {
    id: String,
    version: u64,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<Value>,
}

/// Client for the Content Delivery API (reads) and Content Management API (writes).
pub struct ContentfulClient {
    client: reqwest::Client,
    config: ContentfulConfig,
}

impl ContentfulClient {
    pub fn new(config: ContentfulConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    fn delivery_entries_url(&self) -> String {
        format!(
            "{}/spaces/{}/entries",
            self.config.effective_cdn_base_url(),
            self.config.space_id
        )
    }

    fn management_entries_url(&self) -> String {
        format!(
            "{}/spaces/{}/entries",
            self.config.effective_management_base_url(),
            self.config.space_id
        )
    }

    fn publish_url(&self, entry_id: &str) -> String {
        format!("{}/{}/published", self.management_entries_url(), entry_id)
    }
}

/// Build the JSON body of a create-entry request.
pub fn entry_body(fields: &TestimonialFields, locale: &str) -> Result<Value, StoreError> {
    let body = EntryBody {
        fields: EntryFields {
            user_id: Localized {
                locale,
                value: fields.source_id.as_str(),
            },
            message_content: Localized {
                locale,
                value: &fields.content,
            },
            user_avatar: fields
                .avatar_url
                .as_deref()
                .map(|value| Localized { locale, value }),
            timestamp: Localized {
                locale,
                value: fields.iso_timestamp(),
            },
        },
    };
    serde_json::to_value(body).map_err(|e| StoreError::Decode(format!("entry body: {}", e)))
}

/// Turn a non-success response into a `StoreError::Api`, keeping any
/// validation details the store sent back.
async fn api_error(response: reqwest::Response) -> StoreError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    parse_api_error(status.as_u16(), &text)
}

fn parse_api_error(status: u16, text: &str) -> StoreError {
    let body: ErrorBody = serde_json::from_str(text).unwrap_or_default();
    let message = body.message.unwrap_or_else(|| {
        if text.is_empty() {
            format!("HTTP {}", status)
        } else {
            text.to_string()
        }
    });
    StoreError::Api {
        status,
        message,
        details: body.details,
    }
}

#[async_trait]
impl ContentStore for ContentfulClient {
    async fn count_by_source_id(&self, source_id: &str) -> Result<usize, StoreError> {
        let url = self.delivery_entries_url();
        let field_filter = format!("fields.{}", FIELD_SOURCE_ID);
        debug!("Contentful GET {} ({}={})", url, field_filter, source_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.access_token)
            .query(&[
                ("content_type", self.config.content_type.as_str()),
                (field_filter.as_str(), source_id),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let collection: EntryCollection = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("entry collection: {}", e)))?;
        Ok(collection.items.len())
    }

    async fn create_entry(&self, fields: &TestimonialFields) -> Result<EntryRef, StoreError> {
        let url = self.management_entries_url();
        debug!("Contentful POST {} (source {})", url, fields.source_id);

        let body = entry_body(fields, &self.config.locale)?;
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.management_token)
            .header(reqwest::header::CONTENT_TYPE, MANAGEMENT_CONTENT_TYPE)
            .header("X-Contentful-Content-Type", &self.config.content_type)
            .body(body.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let created: EntryResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("created entry: {}", e)))?;
        Ok(EntryRef {
            id: created.sys.id,
            version: created.sys.version,
        })
    }

    async fn publish_entry(&self, entry: &EntryRef) -> Result<(), StoreError> {
        let url = self.publish_url(&entry.id);
        debug!("Contentful PUT {} (version {})", url, entry.version);

        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.config.management_token)
            .header("X-Contentful-Version", entry.version.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }
}
