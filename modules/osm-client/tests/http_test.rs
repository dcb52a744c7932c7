//! HTTP behaviour of the Overpass and Nominatim clients against a mock server.

use osm_client::{LatLon, NominatimClient, OsmError, OverpassClient};
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn http() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent("heatmap-test/0.1")
        .build()
        .unwrap()
}

#[tokio::test]
async fn nominatim_parses_string_coordinates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "Hauptstraße 5, Springfield"))
        .and(query_param("format", "json"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "lat": "52.5200", "lon": "13.4050", "display_name": "Hauptstraße 5" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = NominatimClient::new(http(), &server.uri());
    let hit = client.search("Hauptstraße 5, Springfield").await.unwrap();
    assert_eq!(hit, Some(LatLon::new(52.52, 13.405)));
}

#[tokio::test]
async fn nominatim_empty_answer_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    let client = NominatimClient::new(http(), &server.uri());
    assert_eq!(client.search("nowhere").await.unwrap(), None);
}

#[tokio::test]
async fn nominatim_429_reports_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let client = NominatimClient::new(http(), &server.uri());
    let err = client.search("x").await.unwrap_err();
    assert!(matches!(err, OsmError::RateLimited { retry_after_secs: Some(7) }));
}

#[tokio::test]
async fn overpass_fails_over_to_next_endpoint() {
    let bad = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(504))
        .expect(1)
        .mount(&bad)
        .await;

    let good = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/interpreter"))
        .and(body_string_contains("node"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "elements": [
                { "type": "node", "id": 1, "lat": 52.5, "lon": 13.4 }
            ]
        })))
        .expect(1)
        .mount(&good)
        .await;

    let client = OverpassClient::new(
        http(),
        vec![
            format!("{}/api/interpreter", bad.uri()),
            format!("{}/api/interpreter", good.uri()),
        ],
    );
    let nodes = client
        .intersection_nodes("Springfield", "Hauptstraße", "Am Markt")
        .await
        .unwrap();
    assert_eq!(nodes, vec![LatLon::new(52.5, 13.4)]);
}

#[tokio::test]
async fn overpass_all_endpoints_down_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let client = OverpassClient::new(http(), vec![server.uri()]);
    let err = client.building_near(LatLon::new(52.5, 13.4), 6).await.unwrap_err();
    assert!(matches!(err, OsmError::Api { status: 500, .. }));
}

#[tokio::test]
async fn overpass_rate_limit_wins_over_other_failures() {
    let limited = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&limited)
        .await;
    let down = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&down)
        .await;

    let client = OverpassClient::new(http(), vec![limited.uri(), down.uri()]);
    let err = client.query("[out:json];").await.unwrap_err();
    assert!(err.is_rate_limited());
}

#[tokio::test]
async fn overpass_without_endpoints() {
    let client = OverpassClient::new(http(), Vec::new());
    assert!(matches!(client.query("x").await, Err(OsmError::NoEndpoints)));
}

#[tokio::test]
async fn highways_keep_tags_and_geometry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "elements": [{
                "type": "way",
                "id": 42,
                "tags": { "highway": "footway", "name": "Parkweg" },
                "geometry": [ { "lat": 52.5, "lon": 13.4 }, { "lat": 52.5, "lon": 13.401 } ]
            }]
        })))
        .mount(&server)
        .await;

    let client = OverpassClient::new(http(), vec![server.uri()]);
    let ways = client
        .highways(LatLon::new(52.5, 13.4005), 120, false)
        .await
        .unwrap();
    assert_eq!(ways.len(), 1);
    assert_eq!(ways[0].tag("highway"), Some("footway"));
    assert_eq!(ways[0].points.len(), 2);
}
