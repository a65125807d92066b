//! Contract Test: Campaign Members Paging
//!
//! This test drives `PatreonSource::get()` against a local stand-in for
//! the Patreon v2 members endpoint.
//!
//! Constraints verified:
//! - Pages are followed through `meta.pagination.cursors.next` and only
//!   `active_patron` members are counted
//! - The bearer token and member fields are sent on every page
//! - 401/403 map to `Authentication`, 429 to `RateLimited`, anything else
//!   to `Http`
//! - A cursor seen earlier in the walk fails the poll instead of looping

use serde_json::json;
use tally_core::traits::CountSource;
use tally_core::Error;
use tally_source_patreon::PatreonSource;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MEMBERS: &str = "/api/oauth2/v2/campaigns/4242/members";
const FIELDS: &str = "patron_status,currently_entitled_amount_cents";

fn source(server: &MockServer) -> PatreonSource {
    PatreonSource::new("creator-token", "4242")
        .unwrap()
        .with_api_base(format!("{}/api/oauth2/v2", server.uri()))
}

fn page(statuses: &[Option<&str>], next: Option<&str>) -> ResponseTemplate {
    let data: Vec<_> = statuses
        .iter()
        .enumerate()
        .map(|(i, status)| {
            json!({
                "id": i.to_string(),
                "type": "member",
                "attributes": {"patron_status": status, "currently_entitled_amount_cents": 500},
            })
        })
        .collect();
    let cursors = match next {
        Some(next) => json!({ "next": next }),
        None => json!({ "next": null }),
    };
    ResponseTemplate::new(200).set_body_json(json!({
        "data": data,
        "meta": {"pagination": {"cursors": cursors, "total": statuses.len()}},
    }))
}

#[tokio::test]
async fn test_counts_active_patrons_across_pages() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(MEMBERS))
        .and(query_param("fields[member]", FIELDS))
        .and(query_param_is_missing("page[cursor]"))
        .and(header("Authorization", "Bearer creator-token"))
        .respond_with(page(
            &[Some("active_patron"), Some("declined_patron"), Some("active_patron")],
            Some("c2"),
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(MEMBERS))
        .and(query_param("fields[member]", FIELDS))
        .and(query_param("page[cursor]", "c2"))
        .respond_with(page(&[None, Some("former_patron"), Some("active_patron")], None))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(source(&server).get().await.unwrap(), 3);
}

fn kind(err: &Error) -> &'static str {
    match err {
        Error::Authentication(_) => "authentication",
        Error::RateLimited(_) => "rate_limited",
        Error::Http(_) => "http",
        _ => "other",
    }
}

#[tokio::test]
async fn test_status_codes_map_to_typed_errors() {
    for (status, expected) in [
        (401u16, "authentication"),
        (403, "authentication"),
        (429, "rate_limited"),
        (404, "http"),
    ] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(MEMBERS))
            .respond_with(ResponseTemplate::new(status).set_body_string("denied"))
            .expect(1)
            .mount(&server)
            .await;

        let err = source(&server).get().await.unwrap_err();
        assert_eq!(kind(&err), expected, "HTTP {} mapped to {:?}", status, err);
    }
}

#[tokio::test]
async fn test_cursor_cycle_is_detected() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(MEMBERS))
        .and(query_param_is_missing("page[cursor]"))
        .respond_with(page(&[Some("active_patron")], Some("A")))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(MEMBERS))
        .and(query_param("page[cursor]", "A"))
        .respond_with(page(&[Some("active_patron")], Some("B")))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(MEMBERS))
        .and(query_param("page[cursor]", "B"))
        .respond_with(page(&[Some("active_patron")], Some("A")))
        .expect(1)
        .mount(&server)
        .await;

    let err = source(&server).get().await.unwrap_err();
    assert!(
        matches!(
            err,
            Error::Provider { ref provider, ref message }
                if provider == "patreon" && message == "Pagination cursor repeated"
        ),
        "got {:?}",
        err
    );
}
