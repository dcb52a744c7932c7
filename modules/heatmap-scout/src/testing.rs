// Test mocks for the heatmap pipeline.
//
// Three mocks matching the three trait boundaries:
// - MockMapData (MapData): registered streets, furniture, buildings, highways
// - MockAddressSearch (AddressSearch): HashMap-based query→point
// - MockSocial (SocialSource): per-tag timelines, favourites, lookups, replies
//
// Plus helpers for building SocialPost, MapNode and MapWay values.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use heatmap_common::{GeoPoint, LocalFrame};

use crate::traits::{AddressSearch, MapData, MapNode, MapWay, SocialPost, SocialSource, SourceLookup, Tags};

// ---------------------------------------------------------------------------
// Test constants
// ---------------------------------------------------------------------------

/// Host of the instance the mocks pretend to be.
pub const HOME_HOST: &str = "social.example";

/// Springfield town square.
pub const SPRINGFIELD: GeoPoint = GeoPoint { lat: 52.52, lon: 13.405 };

const WALK_HIGHWAYS: [&str; 5] = ["footway", "path", "pedestrian", "steps", "cycleway"];

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

fn tags(kv: &[(&str, &str)]) -> Tags {
    kv.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

pub fn map_node(point: GeoPoint, kv: &[(&str, &str)]) -> MapNode {
    MapNode { point, tags: tags(kv) }
}

/// A way tagged `highway=<highway>` through `(lat, lon)` vertices.
pub fn map_way(highway: &str, pts: &[(f64, f64)]) -> MapWay {
    MapWay {
        points: pts.iter().map(|(lat, lon)| GeoPoint::new(*lat, *lon)).collect(),
        tags: tags(&[("highway", highway)]),
    }
}

/// Fixed creation time used by [`post`].
pub fn posted_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// A post on the home instance with one image. `text` lines become `<br>`s.
pub fn post(id: &str, text: &str) -> SocialPost {
    let body = text.lines().collect::<Vec<_>>().join("<br>");
    SocialPost {
        id: id.to_string(),
        url: format!("https://{HOME_HOST}/@alice/{id}"),
        origin_host: HOME_HOST.to_string(),
        author: "alice".to_string(),
        created_at: posted_at(),
        content: format!("<p>{body}</p>"),
        images: vec![format!("https://{HOME_HOST}/media/{id}.jpg")],
        mentions: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// MockMapData
// ---------------------------------------------------------------------------

fn street_key(a: &str, b: &str) -> (String, String) {
    (a.to_lowercase(), b.to_lowercase())
}

/// In-memory OSM. Unregistered lookups return empty results; `.failing()`
/// makes every call error. Spatial queries filter by distance the way
/// Overpass `around:` would.
pub struct MockMapData {
    intersections: HashMap<(String, String), Vec<GeoPoint>>,
    geometries: HashMap<(String, String), (Vec<GeoPoint>, Vec<GeoPoint>)>,
    furniture: Vec<MapNode>,
    buildings: Vec<GeoPoint>,
    highways: Vec<MapWay>,
    failing: bool,
    calls: AtomicUsize,
}

impl MockMapData {
    pub fn new() -> Self {
        Self {
            intersections: HashMap::new(),
            geometries: HashMap::new(),
            furniture: Vec::new(),
            buildings: Vec::new(),
            highways: Vec::new(),
            failing: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn on_intersection(mut self, a: &str, b: &str, nodes: Vec<GeoPoint>) -> Self {
        self.intersections.insert(street_key(a, b), nodes);
        self
    }

    pub fn on_geometries(mut self, a: &str, b: &str, pts_a: Vec<GeoPoint>, pts_b: Vec<GeoPoint>) -> Self {
        self.geometries.insert(street_key(a, b), (pts_a, pts_b));
        self
    }

    pub fn on_furniture(mut self, node: MapNode) -> Self {
        self.furniture.push(node);
        self
    }

    pub fn on_building(mut self, center: GeoPoint) -> Self {
        self.buildings.push(center);
        self
    }

    pub fn on_highway(mut self, way: MapWay) -> Self {
        self.highways.push(way);
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Number of calls made so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self, what: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            bail!("MockMapData: {what} failed");
        }
        Ok(())
    }
}

impl Default for MockMapData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MapData for MockMapData {
    async fn intersection_nodes(&self, _area: &str, street_a: &str, street_b: &str) -> Result<Vec<GeoPoint>> {
        self.enter("intersection_nodes")?;
        Ok(self
            .intersections
            .get(&street_key(street_a, street_b))
            .cloned()
            .unwrap_or_default())
    }

    async fn street_geometries(
        &self,
        _area: &str,
        street_a: &str,
        street_b: &str,
    ) -> Result<(Vec<GeoPoint>, Vec<GeoPoint>)> {
        self.enter("street_geometries")?;
        Ok(self
            .geometries
            .get(&street_key(street_a, street_b))
            .cloned()
            .unwrap_or_default())
    }

    async fn street_furniture(&self, center: GeoPoint, radius_m: u32) -> Result<Vec<MapNode>> {
        self.enter("street_furniture")?;
        Ok(self
            .furniture
            .iter()
            .filter(|n| center.distance_m(&n.point) <= radius_m as f64)
            .cloned()
            .collect())
    }

    async fn building_near(&self, center: GeoPoint, radius_m: u32) -> Result<bool> {
        self.enter("building_near")?;
        Ok(self
            .buildings
            .iter()
            .any(|b| center.distance_m(b) <= radius_m as f64))
    }

    async fn highways(&self, center: GeoPoint, radius_m: u32, walk_only: bool) -> Result<Vec<MapWay>> {
        self.enter("highways")?;
        let frame = LocalFrame::new(center);
        Ok(self
            .highways
            .iter()
            .filter(|w| !walk_only || w.tag("highway").is_some_and(|h| WALK_HIGHWAYS.contains(&h)))
            .filter(|w| {
                frame
                    .nearest_on_polyline(&w.points, &center)
                    .is_some_and(|hit| hit.distance_m <= radius_m as f64)
            })
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockAddressSearch
// ---------------------------------------------------------------------------

/// HashMap-based address search. Unregistered queries find nothing; while
/// failing, every query errors.
pub struct MockAddressSearch {
    results: HashMap<String, GeoPoint>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockAddressSearch {
    pub fn new() -> Self {
        Self {
            results: HashMap::new(),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn on_search(mut self, query: &str, point: GeoPoint) -> Self {
        self.results.insert(query.to_string(), point);
        self
    }

    pub fn failing(self) -> Self {
        self.set_failing(true);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockAddressSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AddressSearch for MockAddressSearch {
    async fn search(&self, query: &str) -> Result<Option<GeoPoint>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            bail!("MockAddressSearch: {query} failed");
        }
        Ok(self.results.get(query).copied())
    }
}

// ---------------------------------------------------------------------------
// MockSocial
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockSocialInner {
    timelines: HashMap<String, Vec<SocialPost>>,
    failing_tags: HashSet<String>,
    favourites: HashMap<String, Vec<String>>,
    lookups: HashMap<String, SourceLookup>,
    lookup_calls: Vec<String>,
    replies: Vec<(String, String)>,
}

/// Stateful social network mock. Timelines and favourites can be changed
/// between cycles through the `set_*` methods. Unregistered lookups are
/// ambiguous.
#[derive(Default)]
pub struct MockSocial {
    inner: Mutex<MockSocialInner>,
}

impl MockSocial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_timeline(self, tag: &str, posts: Vec<SocialPost>) -> Self {
        self.set_timeline(tag, posts);
        self
    }

    pub fn on_failing_timeline(self, tag: &str) -> Self {
        self.inner.lock().unwrap().failing_tags.insert(tag.to_string());
        self
    }

    pub fn on_favourites(self, status_id: &str, accounts: &[&str]) -> Self {
        self.set_favourites(status_id, accounts);
        self
    }

    pub fn on_lookup(self, status_id: &str, lookup: SourceLookup) -> Self {
        self.set_lookup(status_id, lookup);
        self
    }

    pub fn set_timeline(&self, tag: &str, posts: Vec<SocialPost>) {
        self.inner.lock().unwrap().timelines.insert(tag.to_string(), posts);
    }

    pub fn set_favourites(&self, status_id: &str, accounts: &[&str]) {
        self.inner
            .lock()
            .unwrap()
            .favourites
            .insert(status_id.to_string(), accounts.iter().map(|a| a.to_string()).collect());
    }

    pub fn set_lookup(&self, status_id: &str, lookup: SourceLookup) {
        self.inner.lock().unwrap().lookups.insert(status_id.to_string(), lookup);
    }

    /// Status ids passed to `lookup`, in call order.
    pub fn lookups(&self) -> Vec<String> {
        self.inner.lock().unwrap().lookup_calls.clone()
    }

    /// `(status_id, text)` of every reply sent.
    pub fn replies(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().replies.clone()
    }
}

#[async_trait]
impl SocialSource for MockSocial {
    async fn timeline(&self, tag: &str) -> Result<Vec<SocialPost>> {
        let inner = self.inner.lock().unwrap();
        if inner.failing_tags.contains(tag) {
            bail!("MockSocial: timeline {tag} failed");
        }
        Ok(inner.timelines.get(tag).cloned().unwrap_or_default())
    }

    async fn favourited_by(&self, status_id: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .favourites
            .get(status_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn lookup(&self, status_id: &str) -> Result<SourceLookup> {
        let mut inner = self.inner.lock().unwrap();
        inner.lookup_calls.push(status_id.to_string());
        Ok(inner
            .lookups
            .get(status_id)
            .cloned()
            .unwrap_or(SourceLookup::Ambiguous))
    }

    async fn reply(&self, status_id: &str, text: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .replies
            .push((status_id.to_string(), text.to_string()));
        Ok(())
    }
}
