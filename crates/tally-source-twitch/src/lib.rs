// # Twitch Count Source
//
// Counts the subscribers of one Twitch channel through the Helix API.
//
// ## Behavior
//
// - One `get()` walks every page of `GET /helix/subscriptions` for the
//   configured broadcaster, following `pagination.cursor` until Twitch
//   stops returning one
// - The count is the number of subscription entries across all pages
// - Any non-2xx status aborts the walk and is returned as a typed error
// - No retries and no caching: the orchestrator owns both
//
// ## Security Requirements
//
// - Access token NEVER appears in logs or `Debug` output
// - Construction fails fast on empty credentials
//
// ## API Reference
//
// - Get Broadcaster Subscriptions: https://dev.twitch.tv/docs/api/reference/#get-broadcaster-subscriptions

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::IgnoredAny;
use std::collections::HashSet;
use std::time::Duration;
use tally_core::config::SourceKind;
use tally_core::traits::{CountSource, CountSourceFactory};
use tally_core::{Error, Result};

/// Helix API base URL
const TWITCH_API_BASE: &str = "https://api.twitch.tv/helix";

/// Default HTTP timeout for a single page request (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest page Helix will return
const PAGE_SIZE: &str = "100";

/// Upper bound on pages walked by one `get()`
///
/// Repeated cursors are caught separately; this only stops an API that
/// keeps minting fresh cursors.
const MAX_PAGES: usize = 10_000;

/// One page of `GET /helix/subscriptions`
///
/// Only the number of entries matters, so their contents are skipped.
#[derive(Debug, Deserialize)]
struct SubscriptionsPage {
    #[serde(default)]
    data: Vec<IgnoredAny>,
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    cursor: Option<String>,
}

impl SubscriptionsPage {
    /// Cursor for the next page, if any
    ///
    /// Helix sends an empty object (or an empty cursor) on the last page.
    fn next_cursor(&self) -> Option<&str> {
        self.pagination.cursor.as_deref().filter(|c| !c.is_empty())
    }
}

/// Parse a page body into its entry count and next cursor
fn parse_page(body: &str) -> Result<(u64, Option<String>)> {
    let page: SubscriptionsPage = serde_json::from_str(body)
        .map_err(|e| Error::provider("twitch", format!("Failed to parse response: {}", e)))?;

    Ok((page.data.len() as u64, page.next_cursor().map(str::to_string)))
}

/// Twitch subscriber count source
///
/// All identity (client, token, channel) is bound at construction; the
/// source is stateless between calls.
pub struct TwitchSource {
    /// Application client ID (sent as `Client-ID`)
    client_id: String,

    /// OAuth access token
    /// ⚠️ NEVER log this value
    access_token: String,

    /// Channel whose subscriptions are counted
    broadcaster_id: String,

    /// API base, overridable for tests and proxies
    api_base: String,

    client: reqwest::Client,
}

// Custom Debug implementation that hides the access token
impl std::fmt::Debug for TwitchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwitchSource")
            .field("client_id", &self.client_id)
            .field("access_token", &"<REDACTED>")
            .field("broadcaster_id", &self.broadcaster_id)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl TwitchSource {
    /// Create a new Twitch source
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if any credential is empty or the HTTP
    /// client cannot be built.
    pub fn new(
        client_id: impl Into<String>,
        access_token: impl Into<String>,
        broadcaster_id: impl Into<String>,
    ) -> Result<Self> {
        let client_id = client_id.into();
        let access_token = access_token.into();
        let broadcaster_id = broadcaster_id.into();

        if client_id.is_empty() {
            return Err(Error::config("Twitch client ID cannot be empty"));
        }
        if access_token.is_empty() {
            return Err(Error::config("Twitch access token cannot be empty"));
        }
        if broadcaster_id.is_empty() {
            return Err(Error::config("Twitch broadcaster ID cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client_id,
            access_token,
            broadcaster_id,
            api_base: TWITCH_API_BASE.to_string(),
            client,
        })
    }

    /// Point the source at a different API base (no trailing slash)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Fetch one page of subscriptions
    ///
    /// # API Call
    ///
    /// ```http
    /// GET /helix/subscriptions?broadcaster_id=<id>&first=100&after=<cursor>
    /// Client-ID: <client id>
    /// Authorization: Bearer <token>
    /// ```
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<(u64, Option<String>)> {
        let url = format!("{}/subscriptions", self.api_base);

        let mut query = vec![
            ("broadcaster_id", self.broadcaster_id.as_str()),
            ("first", PAGE_SIZE),
        ];
        if let Some(cursor) = cursor {
            query.push(("after", cursor));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .header("Client-ID", &self.client_id)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| Error::http(format!("twitch request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("twitch response unreadable: {}", e)))?;

        if !status.is_success() {
            return Err(Error::from_status("twitch", status.as_u16(), &body));
        }

        parse_page(&body)
    }
}

#[async_trait]
impl CountSource for TwitchSource {
    async fn get(&self) -> Result<u64> {
        let mut total = 0u64;
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        for page in 0..MAX_PAGES {
            let (count, next) = self.fetch_page(cursor.as_deref()).await?;
            total = total.saturating_add(count);

            tracing::trace!("twitch page {}: {} subscription(s)", page, count);

            match next {
                Some(next) => {
                    if !seen.insert(next.clone()) {
                        return Err(Error::provider("twitch", "Pagination cursor repeated"));
                    }
                    cursor = Some(next);
                }
                None => {
                    tracing::debug!("twitch: {} subscription(s) across {} page(s)", total, page + 1);
                    return Ok(total);
                }
            }
        }

        Err(Error::provider(
            "twitch",
            format!("Gave up after {} pages", MAX_PAGES),
        ))
    }

    fn source_kind(&self) -> &'static str {
        "twitch"
    }
}

/// Factory for creating Twitch sources
pub struct TwitchFactory;

impl CountSourceFactory for TwitchFactory {
    fn create(&self, kind: &SourceKind) -> Result<Box<dyn CountSource>> {
        match kind {
            SourceKind::Twitch {
                client_id,
                access_token,
                broadcaster_id,
            } => Ok(Box::new(TwitchSource::new(
                client_id.clone(),
                access_token.clone(),
                broadcaster_id.clone(),
            )?)),
            _ => Err(Error::config("Invalid config for Twitch source")),
        }
    }
}

/// Register the Twitch source with a registry
///
/// # Example
///
/// ```rust
/// use tally_core::SourceRegistry;
///
/// let registry = SourceRegistry::new();
/// tally_source_twitch::register(&registry);
/// assert!(registry.has_source("twitch"));
/// ```
pub fn register(registry: &tally_core::SourceRegistry) {
    registry.register_source("twitch", Box::new(TwitchFactory));
}
