// Adapters from the HTTP clients to the pipeline traits.
//
// OsmGateway paces every Overpass/Nominatim call through one shared Throttle
// and turns 429s into a bounded sleep followed by an error, so the calling
// geocode tier falls through instead of hammering the service.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tracing::warn;

use heatmap_common::{host_of, GeoPoint};
use mastodon_client::{MastodonClient, MastodonError, Status, StatusLookup};
use osm_client::{LatLon, NominatimClient, OsmError, OverpassClient, TaggedNode, TaggedWay};

use crate::infra::throttle::{backoff_delay, Throttle};
use crate::traits::{AddressSearch, MapData, MapNode, MapWay, SocialPost, SocialSource, SourceLookup};

/// The one HTTP client every provider shares.
pub fn http_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

fn to_latlon(p: GeoPoint) -> LatLon {
    LatLon::new(p.lat, p.lon)
}

fn to_geo(p: LatLon) -> GeoPoint {
    GeoPoint::new(p.lat, p.lon)
}

impl From<TaggedNode> for MapNode {
    fn from(n: TaggedNode) -> Self {
        MapNode {
            point: to_geo(n.point),
            tags: n.tags,
        }
    }
}

impl From<TaggedWay> for MapWay {
    fn from(w: TaggedWay) -> Self {
        MapWay {
            points: w.points.into_iter().map(to_geo).collect(),
            tags: w.tags,
        }
    }
}

// ---------------------------------------------------------------------------
// OSM
// ---------------------------------------------------------------------------

pub struct OsmGateway {
    overpass: OverpassClient,
    nominatim: NominatimClient,
    throttle: Arc<Throttle>,
    max_backoff: Duration,
}

impl OsmGateway {
    pub fn new(
        overpass: OverpassClient,
        nominatim: NominatimClient,
        throttle: Arc<Throttle>,
        max_backoff: Duration,
    ) -> Self {
        Self {
            overpass,
            nominatim,
            throttle,
            max_backoff,
        }
    }

    async fn call<T, Fut>(&self, what: &'static str, fut: impl FnOnce() -> Fut) -> Result<T>
    where
        Fut: Future<Output = osm_client::Result<T>>,
    {
        self.throttle.wait().await;
        match fut().await {
            Ok(v) => Ok(v),
            Err(OsmError::RateLimited { retry_after_secs }) => {
                let delay = backoff_delay(retry_after_secs, self.max_backoff);
                warn!(call = what, delay_secs = delay.as_secs(), "Rate limited, backing off");
                tokio::time::sleep(delay).await;
                Err(anyhow!("{what}: rate limited"))
            }
            Err(e) => Err(anyhow::Error::new(e).context(what)),
        }
    }
}

#[async_trait]
impl MapData for OsmGateway {
    async fn intersection_nodes(&self, area: &str, street_a: &str, street_b: &str) -> Result<Vec<GeoPoint>> {
        let nodes = self
            .call("overpass intersection_nodes", || {
                self.overpass.intersection_nodes(area, street_a, street_b)
            })
            .await?;
        Ok(nodes.into_iter().map(to_geo).collect())
    }

    async fn street_geometries(
        &self,
        area: &str,
        street_a: &str,
        street_b: &str,
    ) -> Result<(Vec<GeoPoint>, Vec<GeoPoint>)> {
        let pair = self
            .call("overpass street_geometries", || {
                self.overpass.street_geometries(area, street_a, street_b)
            })
            .await?;
        Ok((
            pair.a.into_iter().map(to_geo).collect(),
            pair.b.into_iter().map(to_geo).collect(),
        ))
    }

    async fn street_furniture(&self, center: GeoPoint, radius_m: u32) -> Result<Vec<MapNode>> {
        let nodes = self
            .call("overpass street_furniture", || {
                self.overpass.street_furniture(to_latlon(center), radius_m)
            })
            .await?;
        Ok(nodes.into_iter().map(MapNode::from).collect())
    }

    async fn building_near(&self, center: GeoPoint, radius_m: u32) -> Result<bool> {
        self.call("overpass building_near", || {
            self.overpass.building_near(to_latlon(center), radius_m)
        })
        .await
    }

    async fn highways(&self, center: GeoPoint, radius_m: u32, walk_only: bool) -> Result<Vec<MapWay>> {
        let ways = self
            .call("overpass highways", || {
                self.overpass.highways(to_latlon(center), radius_m, walk_only)
            })
            .await?;
        Ok(ways.into_iter().map(MapWay::from).collect())
    }
}

#[async_trait]
impl AddressSearch for OsmGateway {
    async fn search(&self, query: &str) -> Result<Option<GeoPoint>> {
        let hit = self
            .call("nominatim search", || self.nominatim.search(query))
            .await?;
        Ok(hit.map(to_geo))
    }
}

// ---------------------------------------------------------------------------
// Mastodon
// ---------------------------------------------------------------------------

pub struct MastodonGateway {
    client: MastodonClient,
    max_backoff: Duration,
}

impl MastodonGateway {
    pub fn new(client: MastodonClient, max_backoff: Duration) -> Self {
        Self { client, max_backoff }
    }

    async fn backoff_on_limit<T>(&self, what: &'static str, res: mastodon_client::Result<T>) -> Result<T> {
        match res {
            Ok(v) => Ok(v),
            Err(MastodonError::RateLimited { retry_after_secs }) => {
                let delay = backoff_delay(retry_after_secs, self.max_backoff);
                warn!(call = what, delay_secs = delay.as_secs(), "Rate limited, backing off");
                tokio::time::sleep(delay).await;
                Err(anyhow!("{what}: rate limited"))
            }
            Err(e) => Err(anyhow::Error::new(e).context(what)),
        }
    }
}

/// Flatten a wire status into the pipeline's view of a post.
pub fn social_post(status: &Status) -> SocialPost {
    let images = status
        .media_attachments
        .iter()
        .filter(|m| m.is_image())
        .filter_map(|m| m.url.clone().or_else(|| m.preview_url.clone()))
        .collect();

    SocialPost {
        id: status.id.clone(),
        url: status.link().to_string(),
        origin_host: host_of(&status.uri).unwrap_or_default(),
        author: status.account.acct.clone(),
        created_at: status.created_at,
        content: status.content.clone(),
        images,
        mentions: status.mentions.iter().map(|m| m.acct.clone()).collect(),
    }
}

#[async_trait]
impl SocialSource for MastodonGateway {
    async fn timeline(&self, tag: &str) -> Result<Vec<SocialPost>> {
        let statuses = self
            .backoff_on_limit("mastodon timeline", self.client.hashtag_timeline(tag).await)
            .await?;
        Ok(statuses.iter().map(social_post).collect())
    }

    async fn favourited_by(&self, status_id: &str) -> Result<Vec<String>> {
        let accounts = self
            .backoff_on_limit("mastodon favourited_by", self.client.favourited_by(status_id).await)
            .await?;
        Ok(accounts.into_iter().map(|a| a.acct).collect())
    }

    async fn lookup(&self, status_id: &str) -> Result<SourceLookup> {
        let lookup = self
            .backoff_on_limit("mastodon status", self.client.status(status_id).await)
            .await?;
        Ok(match lookup {
            StatusLookup::Found(status) => SourceLookup::Found(Box::new(social_post(&status))),
            StatusLookup::Gone => SourceLookup::Gone,
            StatusLookup::Ambiguous { .. } => SourceLookup::Ambiguous,
        })
    }

    async fn reply(&self, status_id: &str, text: &str) -> Result<()> {
        self.backoff_on_limit("mastodon reply", self.client.reply(status_id, text).await)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heatmap_common::GeocodeMethod;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::pipeline::geocode::GeocodeResolver;
    use crate::pipeline::location::LocationQuery;

    fn status() -> Status {
        serde_json::from_value(serde_json::json!({
            "id": "100",
            "uri": "https://Remote.Example/users/bob/statuses/555",
            "url": "https://remote.example/@bob/555",
            "created_at": "2024-05-01T12:00:00Z",
            "content": "<p>hi</p>",
            "account": { "id": "1", "username": "bob", "acct": "bob@remote.example" },
            "media_attachments": [
                { "id": "a", "type": "image", "url": "https://remote.example/a.jpg" },
                { "id": "b", "type": "video", "url": "https://remote.example/b.mp4" },
                { "id": "c", "type": "image", "preview_url": "https://remote.example/c_small.jpg" }
            ],
            "mentions": [ { "id": "2", "username": "heatmap", "acct": "heatmap" } ]
        }))
        .unwrap()
    }

    #[test]
    fn flattens_status() {
        let post = social_post(&status());
        assert_eq!(post.id, "100");
        assert_eq!(post.origin_host, "remote.example");
        assert_eq!(post.url, "https://remote.example/@bob/555");
        assert_eq!(
            post.images,
            vec!["https://remote.example/a.jpg", "https://remote.example/c_small.jpg"]
        );
        assert_eq!(post.mentions, vec!["heatmap"]);
        assert_eq!(post.author, "bob@remote.example");
    }

    #[tokio::test]
    async fn rate_limited_overpass_backs_off_then_falls_through_to_search() {
        let overpass = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .expect(2)
            .mount(&overpass)
            .await;

        let nominatim = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "intersection of Kantstraße and Leibnizstraße, Berlin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "lat": "52.5058", "lon": "13.3035" }
            ])))
            .expect(1)
            .mount(&nominatim)
            .await;

        let http = reqwest::Client::new();
        let max_backoff = Duration::from_millis(40);
        let gateway = OsmGateway::new(
            OverpassClient::new(http.clone(), vec![format!("{}/api/interpreter", overpass.uri())]),
            NominatimClient::new(http, &nominatim.uri()),
            Arc::new(Throttle::new(Duration::ZERO)),
            max_backoff,
        );
        let resolver = GeocodeResolver::new(&gateway, &gateway, 400, 250.0);
        let query = LocationQuery::Intersection {
            a: "Kantstraße".into(),
            b: "Leibnizstraße".into(),
            city: "Berlin".into(),
        };

        let started = tokio::time::Instant::now();
        let r = resolver.resolve(&query).await.unwrap().unwrap();

        assert_eq!(r.method, GeocodeMethod::AddressSearch);
        assert!((r.point.lat - 52.5058).abs() < 1e-9);
        // both Overpass tiers waited, capped well below Retry-After
        let elapsed = started.elapsed();
        assert!(elapsed >= max_backoff * 2, "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(30), "{elapsed:?}");
    }
}
