//! Small-scale geometry helpers.
//!
//! Everything here works on WGS84 lat/lon degrees. Distances between points
//! use the haversine formula; projection work (polyline snapping, sideways
//! offsets) happens in a local equirectangular frame in meters, which is
//! accurate enough for the few hundred meters the snapper ever looks at.

use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Both components finite and inside the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        haversine_m(self.lat, self.lon, other.lat, other.lon)
    }

    pub fn midpoint(&self, other: &GeoPoint) -> GeoPoint {
        GeoPoint::new((self.lat + other.lat) / 2.0, (self.lon + other.lon) / 2.0)
    }
}

/// Haversine great-circle distance between two lat/lon points in meters.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_M * c
}

/// Planar vector in meters (x = east, y = north).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn dot(&self, other: Vec2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Left-hand normal of a direction vector.
    pub fn normal(&self) -> Vec2 {
        Vec2::new(-self.y, self.x)
    }

    pub fn scale(&self, k: f64) -> Vec2 {
        Vec2::new(self.x * k, self.y * k)
    }

    pub fn plus(&self, other: Vec2) -> Vec2 {
        Vec2::new(self.x + other.x, self.y + other.y)
    }

    pub fn minus(&self, other: Vec2) -> Vec2 {
        Vec2::new(self.x - other.x, self.y - other.y)
    }
}

/// Equirectangular projection anchored at `origin`.
#[derive(Debug, Clone, Copy)]
pub struct LocalFrame {
    pub origin: GeoPoint,
    cos_lat0: f64,
}

impl LocalFrame {
    pub fn new(origin: GeoPoint) -> Self {
        Self {
            origin,
            cos_lat0: origin.lat.to_radians().cos(),
        }
    }

    pub fn project(&self, p: &GeoPoint) -> Vec2 {
        Vec2::new(
            (p.lon - self.origin.lon).to_radians() * EARTH_RADIUS_M * self.cos_lat0,
            (p.lat - self.origin.lat).to_radians() * EARTH_RADIUS_M,
        )
    }

    pub fn unproject(&self, v: Vec2) -> GeoPoint {
        GeoPoint::new(
            self.origin.lat + (v.y / EARTH_RADIUS_M).to_degrees(),
            self.origin.lon + (v.x / (EARTH_RADIUS_M * self.cos_lat0)).to_degrees(),
        )
    }

    /// Nearest point on a polyline to `query`.
    ///
    /// Returns `None` when the polyline has no non-degenerate segment.
    pub fn nearest_on_polyline(&self, pts: &[GeoPoint], query: &GeoPoint) -> Option<PolylineHit> {
        let q = self.project(query);
        let mut best: Option<PolylineHit> = None;

        for seg in pts.windows(2) {
            let a = self.project(&seg[0]);
            let b = self.project(&seg[1]);
            let d = b.minus(a);
            let seg2 = d.dot(d);
            if seg2 <= 1e-9 {
                continue;
            }

            let t = (q.minus(a).dot(d) / seg2).clamp(0.0, 1.0);
            let p = a.plus(d.scale(t));
            let dist = q.minus(p).norm();

            if best.as_ref().map_or(true, |b| dist < b.distance_m) {
                let seg_len = seg2.sqrt();
                best = Some(PolylineHit {
                    point: self.unproject(p),
                    distance_m: dist,
                    direction: d.scale(1.0 / seg_len),
                });
            }
        }

        best
    }
}

/// Result of projecting a point onto a polyline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolylineHit {
    pub point: GeoPoint,
    pub distance_m: f64,
    /// Unit direction of the segment the hit lies on.
    pub direction: Vec2,
}

/// Keep at most `max` points, sampled evenly and always including both ends.
pub fn subsample(points: &[GeoPoint], max: usize) -> Vec<GeoPoint> {
    if max == 0 {
        return Vec::new();
    }
    if points.len() <= max {
        return points.to_vec();
    }
    if max == 1 {
        return vec![points[0]];
    }
    let last = points.len() - 1;
    (0..max)
        .map(|i| points[i * last / (max - 1)])
        .collect()
}

/// Brute-force closest pair across two point sets.
///
/// Returns the midpoint of the pair and its separation in meters.
pub fn closest_pair_midpoint(a: &[GeoPoint], b: &[GeoPoint]) -> Option<(GeoPoint, f64)> {
    let mut best: Option<(GeoPoint, GeoPoint, f64)> = None;
    for pa in a {
        for pb in b {
            let d = pa.distance_m(pb);
            if best.as_ref().map_or(true, |(_, _, bd)| d < *bd) {
                best = Some((*pa, *pb, d));
            }
        }
    }
    best.map(|(pa, pb, d)| (pa.midpoint(&pb), d))
}
