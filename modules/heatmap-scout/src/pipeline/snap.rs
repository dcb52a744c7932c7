//! Moves resolved points onto public, walkable ground.
//!
//! Order of preference: street furniture right next to the point, then the
//! nearest walkway, then the nearest road with a sideways offset onto the
//! pavement. Points that still land next to a building get pushed away from
//! it. A snap that would move the point too far is rejected.

use tracing::{debug, warn};

use heatmap_common::{GeoPoint, LocalFrame, PolylineHit, Vec2};

use crate::traits::{MapData, MapNode, MapWay, Tags};

const POI_RADIUS_M: u32 = 15;
const POI_BUILDING_CLEARANCE_M: u32 = 4;
const HIGHWAY_RADIUS_M: u32 = 120;
const WALK_RADIUS_M: u32 = 220;
const MAX_WALK_DETOUR_M: f64 = 45.0;
const ROAD_OFFSET_M: f64 = 10.0;
const BUILDING_RADIUS_M: u32 = 6;
const BUILDING_PUSH_ROAD_M: f64 = 14.0;
const BUILDING_PUSH_WALK_M: f64 = 4.0;

const WALK_HIGHWAYS: [&str; 5] = ["footway", "path", "pedestrian", "steps", "cycleway"];
const ROAD_HIGHWAYS: [&str; 7] = [
    "living_street",
    "residential",
    "service",
    "unclassified",
    "tertiary",
    "secondary",
    "primary",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WayKind {
    Walk,
    Road,
}

impl WayKind {
    pub fn of(highway: &str) -> Option<Self> {
        if WALK_HIGHWAYS.contains(&highway) {
            Some(WayKind::Walk)
        } else if ROAD_HIGHWAYS.contains(&highway) {
            Some(WayKind::Road)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapOutcome {
    pub point: GeoPoint,
    /// Empty when the point was left alone.
    pub note: String,
}

impl SnapOutcome {
    fn unchanged(point: GeoPoint) -> Self {
        Self {
            point,
            note: String::new(),
        }
    }
}

fn tag_lower(tags: &Tags, key: &str) -> String {
    tags.get(key).map(|v| v.trim().to_lowercase()).unwrap_or_default()
}

/// Tags that keep the public off a way or node.
pub fn is_public(tags: &Tags) -> bool {
    if matches!(tag_lower(tags, "access").as_str(), "private" | "no") {
        return false;
    }
    if matches!(tag_lower(tags, "foot").as_str(), "no" | "private") {
        return false;
    }
    if tag_lower(tags, "highway") == "service"
        && matches!(tag_lower(tags, "service").as_str(), "driveway" | "parking_aisle")
    {
        return false;
    }
    !matches!(tag_lower(tags, "indoor").as_str(), "yes" | "1" | "true")
}

fn furniture_kind(tags: &Tags) -> &'static str {
    if tag_lower(tags, "leisure") == "bench" {
        "bench"
    } else if matches!(tag_lower(tags, "amenity").as_str(), "waste_basket" | "waste_disposal") {
        "waste"
    } else if tag_lower(tags, "highway") == "street_lamp" {
        "lamp"
    } else {
        "poi"
    }
}

#[derive(Debug, Clone)]
struct WayHit {
    hit: PolylineHit,
    highway: String,
    kind: WayKind,
}

/// Public, categorized ways projected onto; walkways beat roads, then nearest.
fn best_way(frame: &LocalFrame, origin: &GeoPoint, ways: &[MapWay], only: Option<WayKind>) -> Option<WayHit> {
    let mut best: Option<WayHit> = None;

    for way in ways {
        if way.points.len() < 2 || !is_public(&way.tags) {
            continue;
        }
        let highway = tag_lower(&way.tags, "highway");
        let Some(kind) = WayKind::of(&highway) else {
            continue;
        };
        if only.is_some_and(|k| k != kind) {
            continue;
        }
        let Some(hit) = frame.nearest_on_polyline(&way.points, origin) else {
            continue;
        };

        let better = match &best {
            None => true,
            Some(b) if b.kind == WayKind::Road && kind == WayKind::Walk => true,
            Some(b) => b.kind == kind && hit.distance_m < b.hit.distance_m,
        };
        if better {
            best = Some(WayHit { hit, highway, kind });
        }
    }

    best
}

pub struct WaySnapper<'a> {
    map: &'a dyn MapData,
    max_displacement_m: f64,
}

impl<'a> WaySnapper<'a> {
    pub fn new(map: &'a dyn MapData, max_displacement_m: f64) -> Self {
        Self {
            map,
            max_displacement_m,
        }
    }

    /// Snap `origin`, never moving it further than the configured maximum.
    pub async fn snap(&self, origin: GeoPoint) -> SnapOutcome {
        let proposed = self.propose(origin).await;
        if proposed.note.is_empty() {
            return proposed;
        }

        let moved = origin.distance_m(&proposed.point);
        if moved > self.max_displacement_m {
            warn!(
                lat = origin.lat,
                lon = origin.lon,
                moved_m = moved,
                note = proposed.note.as_str(),
                "Snap rejected, displacement too large"
            );
            return SnapOutcome {
                point: origin,
                note: format!("snap_rejected:{moved:.0}m"),
            };
        }

        debug!(moved_m = moved, note = proposed.note.as_str(), "Snapped");
        proposed
    }

    async fn building_near(&self, p: GeoPoint, radius_m: u32) -> bool {
        match self.map.building_near(p, radius_m).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Building lookup failed");
                false
            }
        }
    }

    async fn highways(&self, origin: GeoPoint, radius_m: u32, walk_only: bool) -> Vec<MapWay> {
        self.map
            .highways(origin, radius_m, walk_only)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, walk_only, "Highway lookup failed");
                Vec::new()
            })
    }

    async fn nearest_furniture(&self, origin: GeoPoint) -> Option<(GeoPoint, &'static str)> {
        let nodes: Vec<MapNode> = match self.map.street_furniture(origin, POI_RADIUS_M).await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "Street furniture lookup failed");
                return None;
            }
        };

        nodes
            .iter()
            .filter(|n| n.point.is_valid() && is_public(&n.tags))
            .map(|n| (n, origin.distance_m(&n.point)))
            .filter(|(_, d)| *d <= POI_RADIUS_M as f64)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(n, _)| (n.point, furniture_kind(&n.tags)))
    }

    async fn propose(&self, origin: GeoPoint) -> SnapOutcome {
        if let Some((poi, kind)) = self.nearest_furniture(origin).await {
            if !self.building_near(poi, POI_BUILDING_CLEARANCE_M).await {
                return SnapOutcome {
                    point: poi,
                    note: format!("snap_poi:{kind}"),
                };
            }
        }

        let frame = LocalFrame::new(origin);
        let ways = self.highways(origin, HIGHWAY_RADIUS_M, false).await;
        let Some(mut best) = best_way(&frame, &origin, &ways, None) else {
            return SnapOutcome::unchanged(origin);
        };

        if best.kind == WayKind::Road {
            let walks = self.highways(origin, WALK_RADIUS_M, true).await;
            if let Some(walk) = best_way(&frame, &origin, &walks, Some(WayKind::Walk)) {
                if walk.hit.distance_m <= MAX_WALK_DETOUR_M {
                    best = walk;
                }
            }
        }

        // Perpendicular to the way, on the side of the original point.
        let on_way = frame.project(&best.hit.point);
        let mut normal: Vec2 = best.hit.direction.normal();
        if on_way.scale(-1.0).dot(normal) < 0.0 {
            normal = normal.scale(-1.0);
        }

        let (mut xy, mut note) = match best.kind {
            WayKind::Road => (
                on_way.plus(normal.scale(ROAD_OFFSET_M)),
                format!("snap_road_offset:{}", best.highway),
            ),
            WayKind::Walk => (on_way, format!("snap_walk:{}", best.highway)),
        };

        if self.building_near(frame.unproject(xy), BUILDING_RADIUS_M).await {
            let push = match best.kind {
                WayKind::Road => BUILDING_PUSH_ROAD_M,
                WayKind::Walk => BUILDING_PUSH_WALK_M,
            };
            xy = xy.plus(normal.scale(push));
            note.push_str("|avoid_building");
        }

        SnapOutcome {
            point: frame.unproject(xy),
            note,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{map_node, map_way, MockMapData};

    const ORIGIN: GeoPoint = GeoPoint { lat: 52.5, lon: 13.4 };
    const M_PER_DEG_LAT: f64 = 111_195.0;

    /// East-west way `north_m` meters north of the origin.
    fn way_north(highway: &str, north_m: f64) -> MapWay {
        let lat = ORIGIN.lat + north_m / M_PER_DEG_LAT;
        map_way(highway, &[(lat, 13.398), (lat, 13.402)])
    }

    #[tokio::test]
    async fn no_ways_leaves_point_alone() {
        let map = MockMapData::new();
        let out = WaySnapper::new(&map, 50.0).snap(ORIGIN).await;
        assert_eq!(out.point, ORIGIN);
        assert_eq!(out.note, "");
    }

    #[tokio::test]
    async fn failing_map_leaves_point_alone() {
        let map = MockMapData::new().failing();
        let out = WaySnapper::new(&map, 50.0).snap(ORIGIN).await;
        assert_eq!(out, SnapOutcome::unchanged(ORIGIN));
    }

    #[tokio::test]
    async fn bench_nearby_wins() {
        let bench = GeoPoint::new(ORIGIN.lat + 8.0 / M_PER_DEG_LAT, ORIGIN.lon);
        let map = MockMapData::new()
            .on_furniture(map_node(bench, &[("leisure", "bench")]))
            .on_highway(way_north("footway", 5.0));
        let out = WaySnapper::new(&map, 50.0).snap(ORIGIN).await;
        assert_eq!(out.note, "snap_poi:bench");
        assert_eq!(out.point, bench);
    }

    #[tokio::test]
    async fn furniture_next_to_building_is_skipped() {
        let bench = GeoPoint::new(ORIGIN.lat + 8.0 / M_PER_DEG_LAT, ORIGIN.lon);
        let map = MockMapData::new()
            .on_furniture(map_node(bench, &[("leisure", "bench")]))
            .on_building(bench)
            .on_highway(way_north("footway", -20.0));
        let out = WaySnapper::new(&map, 50.0).snap(ORIGIN).await;
        assert!(out.note.starts_with("snap_walk:footway"), "{}", out.note);
    }

    #[tokio::test]
    async fn private_furniture_is_ignored() {
        let bench = GeoPoint::new(ORIGIN.lat + 8.0 / M_PER_DEG_LAT, ORIGIN.lon);
        let map = MockMapData::new().on_furniture(map_node(bench, &[("leisure", "bench"), ("access", "private")]));
        let out = WaySnapper::new(&map, 50.0).snap(ORIGIN).await;
        assert_eq!(out.note, "");
    }

    #[tokio::test]
    async fn walkway_preferred_over_closer_road() {
        let map = MockMapData::new()
            .on_highway(way_north("residential", 5.0))
            .on_highway(way_north("footway", -30.0));
        let out = WaySnapper::new(&map, 50.0).snap(ORIGIN).await;
        assert_eq!(out.note, "snap_walk:footway");
        let south_m = (ORIGIN.lat - out.point.lat) * M_PER_DEG_LAT;
        assert!((south_m - 30.0).abs() < 0.5, "{south_m}");
    }

    #[tokio::test]
    async fn road_gets_offset_toward_origin() {
        let map = MockMapData::new().on_highway(way_north("residential", 25.0));
        let out = WaySnapper::new(&map, 50.0).snap(ORIGIN).await;
        assert_eq!(out.note, "snap_road_offset:residential");
        // 25 m north, offset 10 m back toward the origin
        let north_m = (out.point.lat - ORIGIN.lat) * M_PER_DEG_LAT;
        assert!((north_m - 15.0).abs() < 0.5, "{north_m}");
    }

    #[tokio::test]
    async fn building_pushes_further() {
        let road_lat = ORIGIN.lat + 25.0 / M_PER_DEG_LAT;
        let offset_point = GeoPoint::new(ORIGIN.lat + 15.0 / M_PER_DEG_LAT, ORIGIN.lon);
        let map = MockMapData::new()
            .on_highway(map_way("residential", &[(road_lat, 13.398), (road_lat, 13.402)]))
            .on_building(offset_point);
        let out = WaySnapper::new(&map, 50.0).snap(ORIGIN).await;
        assert_eq!(out.note, "snap_road_offset:residential|avoid_building");
        let north_m = (out.point.lat - ORIGIN.lat) * M_PER_DEG_LAT;
        assert!((north_m - 1.0).abs() < 0.5, "{north_m}");
    }

    #[tokio::test]
    async fn private_and_unknown_ways_are_ignored() {
        let mut private = way_north("footway", 5.0);
        private.tags.insert("access".into(), "private".into());
        let mut driveway = way_north("service", 8.0);
        driveway.tags.insert("service".into(), "driveway".into());
        let map = MockMapData::new()
            .on_highway(private)
            .on_highway(way_north("motorway", 3.0))
            .on_highway(driveway);
        let out = WaySnapper::new(&map, 50.0).snap(ORIGIN).await;
        assert_eq!(out, SnapOutcome::unchanged(ORIGIN));
    }

    #[tokio::test]
    async fn large_displacement_is_rejected() {
        let map = MockMapData::new().on_highway(way_north("footway", 100.0));
        let out = WaySnapper::new(&map, 50.0).snap(ORIGIN).await;
        assert_eq!(out.point, ORIGIN);
        assert_eq!(out.note, "snap_rejected:100m");
    }

    #[tokio::test]
    async fn never_exceeds_max_displacement() {
        for north in [5.0, 20.0, 45.0, 80.0, 110.0] {
            let map = MockMapData::new().on_highway(way_north("residential", north));
            let out = WaySnapper::new(&map, 30.0).snap(ORIGIN).await;
            assert!(ORIGIN.distance_m(&out.point) <= 30.0 + 1e-6, "north={north} note={}", out.note);
        }
    }

    #[test]
    fn public_tags() {
        let tags = |kv: &[(&str, &str)]| -> Tags { kv.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect() };
        assert!(is_public(&tags(&[("highway", "footway")])));
        assert!(!is_public(&tags(&[("foot", "no")])));
        assert!(!is_public(&tags(&[("indoor", "yes")])));
        assert!(!is_public(&tags(&[("highway", "service"), ("service", "parking_aisle")])));
        assert!(is_public(&tags(&[("highway", "service"), ("service", "alley")])));
    }
}
