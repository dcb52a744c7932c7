//! Mastodon REST client against a mock instance.

use mastodon_client::{MastodonClient, MastodonError, StatusLookup};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn status_json(id: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "uri": format!("https://example.social/users/alice/statuses/{id}"),
        "url": format!("https://example.social/@alice/{id}"),
        "created_at": "2024-05-01T12:00:00.000Z",
        "content": "<p>AfD sticker<br>Hauptstraße 5, Springfield</p>",
        "account": { "id": "7", "username": "alice", "acct": "alice" },
        "media_attachments": [
            { "id": "m1", "type": "image", "url": "https://example.social/m1.jpg" }
        ],
        "mentions": [
            { "id": "9", "username": "heatmap", "acct": "heatmap" }
        ],
        "tags": [ { "name": "sticker_report" } ]
    })
}

fn client(server: &MockServer, token: &str) -> MastodonClient {
    MastodonClient::new(reqwest::Client::new(), &server.uri(), token)
}

#[tokio::test]
async fn timeline_sends_bearer_and_parses_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/timelines/tag/sticker_report"))
        .and(header("Authorization", "Bearer secret"))
        .and(query_param("limit", "40"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            status_json("101"),
            status_json("100")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let statuses = client(&server, "secret")
        .hashtag_timeline("#sticker_report")
        .await
        .unwrap();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].id, "101");
    assert!(statuses[0].media_attachments[0].is_image());
    assert_eq!(statuses[0].mentions[0].acct, "heatmap");
    assert_eq!(statuses[0].link(), "https://example.social/@alice/101");
}

#[tokio::test]
async fn favourites_are_accounts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/statuses/100/favourited_by"))
        .and(query_param("limit", "60"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "id": "1", "username": "mod", "acct": "Mod@other.social" }
        ])))
        .mount(&server)
        .await;

    let favs = client(&server, "secret").favourited_by("100").await.unwrap();
    assert_eq!(favs.len(), 1);
    assert_eq!(favs[0].acct, "Mod@other.social");
}

#[tokio::test]
async fn authenticated_404_means_gone() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/statuses/100"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let lookup = client(&server, "secret").status("100").await.unwrap();
    assert!(matches!(lookup, StatusLookup::Gone));
}

#[tokio::test]
async fn unauthenticated_404_is_ambiguous() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/statuses/100"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let lookup = client(&server, "").status("100").await.unwrap();
    assert!(matches!(lookup, StatusLookup::Ambiguous { status: 404 }));
}

#[tokio::test]
async fn server_error_lookup_is_ambiguous() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/statuses/100"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let lookup = client(&server, "secret").status("100").await.unwrap();
    assert!(matches!(lookup, StatusLookup::Ambiguous { status: 502 }));
}

#[tokio::test]
async fn found_status_is_returned() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/statuses/100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_json("100")))
        .mount(&server)
        .await;

    match client(&server, "secret").status("100").await.unwrap() {
        StatusLookup::Found(s) => assert_eq!(s.id, "100"),
        other => panic!("expected Found, got {other:?}"),
    }
}

#[tokio::test]
async fn reply_posts_in_thread() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/statuses"))
        .and(body_partial_json(serde_json::json!({
            "in_reply_to_id": "100",
            "visibility": "public"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_json("200")))
        .expect(1)
        .mount(&server)
        .await;

    let reply = client(&server, "secret")
        .reply("100", "@alice please add a location")
        .await
        .unwrap();
    assert_eq!(reply.id, "200");
}

#[tokio::test]
async fn rate_limit_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .mount(&server)
        .await;

    let err = client(&server, "secret")
        .hashtag_timeline("sticker_report")
        .await
        .unwrap_err();
    assert!(matches!(err, MastodonError::RateLimited { retry_after_secs: Some(30) }));
}

#[tokio::test]
async fn api_error_carries_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/accounts/verify_credentials"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
        .mount(&server)
        .await;

    let err = client(&server, "bad").verify_credentials().await.unwrap_err();
    match err {
        MastodonError::Api { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "invalid token");
        }
        other => panic!("unexpected error {other:?}"),
    }
}
