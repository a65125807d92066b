// # Patreon Count Source
//
// Counts the active patrons of one Patreon campaign through the v2 API.
//
// One `get()` walks `GET /campaigns/{id}/members` page by page, following
// `meta.pagination.cursors.next`, and counts members whose
// `patron_status` is `active_patron`. Declined and former patrons are
// listed by the API too and are skipped.
//
// The creator access token NEVER appears in logs or `Debug` output.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tally_core::config::SourceKind;
use tally_core::traits::{CountSource, CountSourceFactory};
use tally_core::{Error, Result};

const PATREON_API_BASE: &str = "https://www.patreon.com/api/oauth2/v2";

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Member fields requested on every page
const MEMBER_FIELDS: &str = "patron_status,currently_entitled_amount_cents";

const ACTIVE_PATRON: &str = "active_patron";

/// Backstop for an API that keeps minting fresh cursors
const MAX_PAGES: usize = 10_000;

#[derive(Debug, Deserialize)]
struct MembersPage {
    #[serde(default)]
    data: Vec<Member>,
    #[serde(default)]
    meta: Meta,
}

#[derive(Debug, Deserialize)]
struct Member {
    #[serde(default)]
    attributes: MemberAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct MemberAttributes {
    patron_status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(default)]
    pagination: PageInfo,
}

#[derive(Debug, Default, Deserialize)]
struct PageInfo {
    #[serde(default)]
    cursors: Cursors,
}

#[derive(Debug, Default, Deserialize)]
struct Cursors {
    next: Option<String>,
}

impl MembersPage {
    fn active_patrons(&self) -> u64 {
        self.data
            .iter()
            .filter(|m| m.attributes.patron_status.as_deref() == Some(ACTIVE_PATRON))
            .count() as u64
    }

    fn next_cursor(&self) -> Option<&str> {
        self.meta
            .pagination
            .cursors
            .next
            .as_deref()
            .filter(|c| !c.is_empty())
    }
}

/// Parse a page body into its active patron count and next cursor
fn parse_page(body: &str) -> Result<(u64, Option<String>)> {
    let page: MembersPage = serde_json::from_str(body)
        .map_err(|e| Error::provider("patreon", format!("Failed to parse response: {}", e)))?;

    Ok((page.active_patrons(), page.next_cursor().map(str::to_string)))
}

/// Patreon active patron count source
pub struct PatreonSource {
    /// Creator access token
    /// ⚠️ NEVER log this value
    token: String,
    campaign_id: String,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for PatreonSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatreonSource")
            .field("token", &"<REDACTED>")
            .field("campaign_id", &self.campaign_id)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl PatreonSource {
    /// Create a new Patreon source
    ///
    /// Fails with `Error::Config` on an empty token or campaign ID.
    pub fn new(token: impl Into<String>, campaign_id: impl Into<String>) -> Result<Self> {
        let token = token.into();
        let campaign_id = campaign_id.into();

        if token.is_empty() {
            return Err(Error::config("Patreon token cannot be empty"));
        }
        if campaign_id.is_empty() {
            return Err(Error::config("Patreon campaign ID cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            token,
            campaign_id,
            api_base: PATREON_API_BASE.to_string(),
            client,
        })
    }

    /// Point the source at a different API base (no trailing slash)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    async fn fetch_page(&self, cursor: Option<&str>) -> Result<(u64, Option<String>)> {
        let url = format!("{}/campaigns/{}/members", self.api_base, self.campaign_id);

        let mut query = vec![("fields[member]", MEMBER_FIELDS)];
        if let Some(cursor) = cursor {
            query.push(("page[cursor]", cursor));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::http(format!("patreon request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("patreon response unreadable: {}", e)))?;

        if !status.is_success() {
            return Err(Error::from_status("patreon", status.as_u16(), &body));
        }

        parse_page(&body)
    }
}

#[async_trait]
impl CountSource for PatreonSource {
    async fn get(&self) -> Result<u64> {
        let mut active = 0u64;
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        for page in 0..MAX_PAGES {
            let (count, next) = self.fetch_page(cursor.as_deref()).await?;
            active = active.saturating_add(count);

            match next {
                Some(next) => {
                    if !seen.insert(next.clone()) {
                        return Err(Error::provider("patreon", "Pagination cursor repeated"));
                    }
                    cursor = Some(next);
                }
                None => {
                    tracing::debug!(
                        "patreon: {} active patron(s) across {} page(s)",
                        active,
                        page + 1
                    );
                    return Ok(active);
                }
            }
        }

        Err(Error::provider(
            "patreon",
            format!("Gave up after {} pages", MAX_PAGES),
        ))
    }

    fn source_kind(&self) -> &'static str {
        "patreon"
    }
}

/// Factory for creating Patreon sources
pub struct PatreonFactory;

impl CountSourceFactory for PatreonFactory {
    fn create(&self, kind: &SourceKind) -> Result<Box<dyn CountSource>> {
        match kind {
            SourceKind::Patreon { token, campaign_id } => Ok(Box::new(PatreonSource::new(
                token.clone(),
                campaign_id.clone(),
            )?)),
            _ => Err(Error::config("Invalid config for Patreon source")),
        }
    }
}

/// Register the Patreon source with a registry
pub fn register(registry: &tally_core::SourceRegistry) {
    registry.register_source("patreon", Box::new(PatreonFactory));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_only_active_patrons() {
        let body = r#"{
            "data": [
                {"id": "a", "type": "member", "attributes": {"patron_status": "active_patron", "currently_entitled_amount_cents": 500}},
                {"id": "b", "type": "member", "attributes": {"patron_status": "declined_patron", "currently_entitled_amount_cents": 0}},
                {"id": "c", "type": "member", "attributes": {"patron_status": null, "currently_entitled_amount_cents": 0}},
                {"id": "d", "type": "member", "attributes": {"patron_status": "former_patron", "currently_entitled_amount_cents": 0}},
                {"id": "e", "type": "member", "attributes": {"patron_status": "active_patron", "currently_entitled_amount_cents": 300}}
            ],
            "meta": {"pagination": {"cursors": {"next": "03AHk"}, "total": 5}}
        }"#;

        let (count, next) = parse_page(body).unwrap();
        assert_eq!(count, 2);
        assert_eq!(next.as_deref(), Some("03AHk"));
    }

    #[test]
    fn test_last_page_has_no_cursor() {
        let body = r#"{"data": [], "meta": {"pagination": {"total": 0}}}"#;
        assert_eq!(parse_page(body).unwrap(), (0, None));

        let body = r#"{"data": [], "meta": {"pagination": {"cursors": {"next": null}}}}"#;
        assert_eq!(parse_page(body).unwrap(), (0, None));
    }

    #[test]
    fn test_member_without_attributes_is_not_counted() {
        let body = r#"{"data": [{"id": "x", "type": "member"}]}"#;
        assert_eq!(parse_page(body).unwrap(), (0, None));
    }

    #[test]
    fn test_parse_garbage_is_provider_error() {
        let err = parse_page("not json").unwrap_err();
        assert!(matches!(err, Error::Provider { ref provider, .. } if provider == "patreon"));
    }

    #[test]
    fn test_empty_credentials_rejected() {
        assert!(PatreonSource::new("", "123").is_err());
        assert!(PatreonSource::new("token", "").is_err());
    }

    #[test]
    fn test_token_not_exposed_in_debug() {
        let source = PatreonSource::new("creator_secret_987", "123").unwrap();
        let debug_str = format!("{:?}", source);
        assert!(!debug_str.contains("creator_secret_987"));
        assert!(debug_str.contains("PatreonSource"));
    }

    #[test]
    fn test_factory() {
        let config = SourceKind::Patreon {
            token: "token".to_string(),
            campaign_id: "123".to_string(),
        };
        assert_eq!(PatreonFactory.create(&config).unwrap().source_kind(), "patreon");

        let wrong = SourceKind::Custom {
            factory: "patreon".to_string(),
            config: serde_json::json!({}),
        };
        assert!(PatreonFactory.create(&wrong).is_err());
    }

    #[test]
    fn test_register() {
        let registry = tally_core::SourceRegistry::new();
        register(&registry);
        assert!(registry.has_source("patreon"));
        assert!(!registry.has_source("twitch"));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_http_error() {
        let source = PatreonSource::new("token", "123")
            .unwrap()
            .with_api_base("http://127.0.0.1:9/api/oauth2/v2/");
        assert!(matches!(source.get().await, Err(Error::Http(_))));
    }
}
