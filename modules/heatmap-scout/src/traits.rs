// Trait seams between the pipeline and the outside world.
//
// MapData: OSM lookups used by the geocode ladder and the snapper.
// AddressSearch: free-text geocoding (Nominatim).
// SocialSource: the hashtag timelines, favourites and status lookups.
//
// Real implementations live in infra::gateway; in-memory ones in testing.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use heatmap_common::GeoPoint;

pub type Tags = HashMap<String, String>;

/// A tagged OSM node.
#[derive(Debug, Clone, PartialEq)]
pub struct MapNode {
    pub point: GeoPoint,
    pub tags: Tags,
}

/// A tagged OSM way with its full geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct MapWay {
    pub points: Vec<GeoPoint>,
    pub tags: Tags,
}

impl MapWay {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(|s| s.as_str())
    }
}

#[async_trait]
pub trait MapData: Send + Sync {
    /// Nodes shared by two named streets inside `area`.
    async fn intersection_nodes(&self, area: &str, street_a: &str, street_b: &str) -> Result<Vec<GeoPoint>>;

    /// Geometry points of two named streets inside `area`, one set per street.
    async fn street_geometries(
        &self,
        area: &str,
        street_a: &str,
        street_b: &str,
    ) -> Result<(Vec<GeoPoint>, Vec<GeoPoint>)>;

    /// Benches, waste baskets and street lamps within `radius_m`.
    async fn street_furniture(&self, center: GeoPoint, radius_m: u32) -> Result<Vec<MapNode>>;

    /// Whether any building lies within `radius_m`.
    async fn building_near(&self, center: GeoPoint, radius_m: u32) -> Result<bool>;

    /// Highways within `radius_m`; `walk_only` restricts to walkable types.
    async fn highways(&self, center: GeoPoint, radius_m: u32, walk_only: bool) -> Result<Vec<MapWay>>;
}

#[async_trait]
pub trait AddressSearch: Send + Sync {
    /// Best match for a free-text query, if any.
    async fn search(&self, query: &str) -> Result<Option<GeoPoint>>;
}

/// A post as the pipeline sees it, independent of the wire format.
#[derive(Debug, Clone, PartialEq)]
pub struct SocialPost {
    pub id: String,
    pub url: String,
    /// Host of the instance the post was written on.
    pub origin_host: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    /// Raw HTML body.
    pub content: String,
    /// Image attachment URLs.
    pub images: Vec<String>,
    /// `acct` of every mentioned account.
    pub mentions: Vec<String>,
}

/// Result of asking the home instance whether a post still exists.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceLookup {
    Found(Box<SocialPost>),
    Gone,
    Ambiguous,
}

#[async_trait]
pub trait SocialSource: Send + Sync {
    /// Recent posts carrying `tag`.
    async fn timeline(&self, tag: &str) -> Result<Vec<SocialPost>>;

    /// `acct` of every account that favourited the post.
    async fn favourited_by(&self, status_id: &str) -> Result<Vec<String>>;

    async fn lookup(&self, status_id: &str) -> Result<SourceLookup>;

    async fn reply(&self, status_id: &str, text: &str) -> Result<()>;
}
