//! HTTP Remote Tier
//!
//! Per-user remote store over a REST interface to a managed database table
//! (PostgREST dialect). Rows are keyed by `(user_id, cache_key)`; the user is
//! fixed per store instance, so one instance serves one authenticated session.
//!
//! Every request carries the project's public `apikey` header and the
//! session's bearer token. Status codes map onto the tier error taxonomy:
//!
//! | status              | error            |
//! |---------------------|------------------|
//! | 401, 403            | `Auth`           |
//! | 408, 429, 5xx       | `Network`        |
//! | 413, 507            | `QuotaExceeded`  |
//! | other non-2xx       | `Internal`       |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::cache::{CacheEntry, ContentType};
use crate::domain::{Tier, TierStore};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the HTTP remote store
#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
    /// REST endpoint base, e.g. `https://project.example.co/rest/v1`
    pub base_url: String,
    /// Public project key sent as the `apikey` header
    pub api_key: Option<String>,
    /// Table holding cache rows
    pub table: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for HttpRemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321/rest/v1".to_string(),
            api_key: None,
            table: "cache_entries".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Wire format
// =============================================================================

/// One row of the remote cache table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRow {
    pub user_id: String,
    pub cache_key: String,
    pub value: Value,
    pub content_type: ContentType,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RemoteRow {
    /// Build the row for `entry` owned by `user_id`
    pub fn from_entry(user_id: &str, entry: CacheEntry) -> Self {
        Self {
            user_id: user_id.to_string(),
            cache_key: entry.key,
            value: entry.value,
            content_type: entry.content_type,
            created_at: entry.created_at,
            expires_at: entry.expires_at,
        }
    }

    /// Convert back into a remote-tier entry
    pub fn into_entry(self) -> CacheEntry {
        CacheEntry::with_timestamps(
            self.cache_key,
            self.value,
            self.content_type,
            self.created_at,
            self.expires_at,
        )
        .in_tier(Tier::Remote)
    }
}

#[derive(Debug, Deserialize)]
struct KeyRow {
    cache_key: String,
}

/// Map a non-success status onto the tier error taxonomy
pub fn classify_status(status: StatusCode, body: &str) -> Error {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };

    match status.as_u16() {
        401 | 403 => Error::Auth(detail),
        408 | 429 => Error::Network(detail),
        413 | 507 => Error::QuotaExceeded {
            tier: Tier::Remote.to_string(),
            needed: 0,
            available: 0,
        },
        _ if status.is_server_error() => Error::Network(detail),
        _ => Error::Internal(format!("Remote store rejected request: {}", detail)),
    }
}

// =============================================================================
// Store
// =============================================================================

/// REST-backed remote tier for one user
pub struct HttpRemoteStore {
    config: HttpRemoteConfig,
    client: Client,
    user_id: String,
    access_token: RwLock<String>,
}

impl HttpRemoteStore {
    /// Create a store for `user_id` authenticated with `access_token`
    pub fn new(
        config: HttpRemoteConfig,
        user_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            user_id: user_id.into(),
            access_token: RwLock::new(access_token.into()),
        })
    }

    /// User whose rows this store reads and writes
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Replace the bearer token after a session refresh
    pub fn set_access_token(&self, token: impl Into<String>) {
        *self.access_token.write() = token.into();
    }

    fn table_url(&self) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.table
        )
    }

    /// URL selecting this user's row for `key`
    fn row_url(&self, key: &str) -> String {
        format!(
            "{}?user_id=eq.{}&cache_key=eq.{}",
            self.table_url(),
            urlencoding::encode(&self.user_id),
            urlencoding::encode(key)
        )
    }

    /// URL listing this user's keys starting with `prefix`
    fn prefix_url(&self, prefix: &str) -> String {
        format!(
            "{}?user_id=eq.{}&cache_key=like.{}&select=cache_key",
            self.table_url(),
            urlencoding::encode(&self.user_id),
            urlencoding::encode(&format!("{}*", prefix))
        )
    }

    /// URL listing keys starting with `prefix` whose row was written after `since`
    fn modified_url(&self, prefix: &str, since: DateTime<Utc>) -> String {
        format!(
            "{}&created_at=gt.{}",
            self.prefix_url(prefix),
            urlencoding::encode(&since.to_rfc3339_opts(SecondsFormat::Micros, true))
        )
    }

    async fn fetch_keys(&self, url: String, prefix: &str) -> Result<Vec<String>> {
        let request = self.client.get(url);
        let response = Self::check(self.authorize(request).send().await?).await?;
        let rows: Vec<KeyRow> = response.json().await?;
        // `like` also treats `*` inside the prefix as a wildcard
        Ok(rows
            .into_iter()
            .map(|r| r.cache_key)
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.bearer_auth(self.access_token.read().as_str());
        match &self.config.api_key {
            Some(key) => request.header("apikey", key),
            None => request,
        }
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

#[async_trait]
impl TierStore for HttpRemoteStore {
    fn tier(&self) -> Tier {
        Tier::Remote
    }

    #[instrument(skip(self), fields(user_id = %self.user_id))]
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let request = self.client.get(self.row_url(key));
        let response = Self::check(self.authorize(request).send().await?).await?;
        let rows: Vec<RemoteRow> = response.json().await?;
        Ok(rows.into_iter().next().map(RemoteRow::into_entry))
    }

    #[instrument(skip(self, entry), fields(user_id = %self.user_id, key = %entry.key))]
    async fn set(&self, entry: CacheEntry) -> Result<()> {
        let row = RemoteRow::from_entry(&self.user_id, entry);
        let request = self
            .client
            .post(format!("{}?on_conflict=user_id,cache_key", self.table_url()))
            .header("Prefer", "resolution=merge-duplicates")
            .json(&row);
        Self::check(self.authorize(request).send().await?).await?;
        debug!("Uploaded remote entry");
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %self.user_id))]
    async fn delete(&self, key: &str) -> Result<bool> {
        let request = self
            .client
            .delete(self.row_url(key))
            .header("Prefer", "return=representation");
        let response = Self::check(self.authorize(request).send().await?).await?;
        let rows: Vec<KeyRow> = response.json().await?;
        Ok(!rows.is_empty())
    }

    #[instrument(skip(self), fields(user_id = %self.user_id))]
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.fetch_keys(self.prefix_url(prefix), prefix).await
    }

    #[instrument(skip(self), fields(user_id = %self.user_id))]
    async fn list_modified_since(
        &self,
        prefix: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>> {
        let url = match since {
            Some(since) => self.modified_url(prefix, since),
            None => self.prefix_url(prefix),
        };
        self.fetch_keys(url, prefix).await
    }
}
