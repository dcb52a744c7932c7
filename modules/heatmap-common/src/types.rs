use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::geo::GeoPoint;

/// Category placeholder for reports that did not name one.
pub const UNKNOWN_CATEGORY: &str = "unknown";

pub fn is_unknown_category(category: &str) -> bool {
    let c = category.trim();
    c.is_empty() || c.eq_ignore_ascii_case(UNKNOWN_CATEGORY)
}

// --- Geocoding ---

/// How a coordinate was obtained. Each method carries a fixed accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocodeMethod {
    Gps,
    ExactNode,
    NearestGeometry,
    AddressSearch,
    SingleStreet,
}

impl GeocodeMethod {
    /// Self-reported positional uncertainty in meters.
    pub fn accuracy_m(self) -> u32 {
        match self {
            GeocodeMethod::Gps => 10,
            GeocodeMethod::ExactNode => 15,
            GeocodeMethod::NearestGeometry => 40,
            GeocodeMethod::AddressSearch => 50,
            GeocodeMethod::SingleStreet => 500,
        }
    }
}

impl fmt::Display for GeocodeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeocodeMethod::Gps => write!(f, "gps"),
            GeocodeMethod::ExactNode => write!(f, "exact_node"),
            GeocodeMethod::NearestGeometry => write!(f, "nearest_geometry"),
            GeocodeMethod::AddressSearch => write!(f, "address_search"),
            GeocodeMethod::SingleStreet => write!(f, "single_street"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeCacheEntry {
    pub lat: f64,
    pub lon: f64,
    pub method: GeocodeMethod,
    pub accuracy_m: u32,
    /// Unix seconds of the first successful resolution.
    pub ts: i64,
}

impl GeocodeCacheEntry {
    pub fn new(point: GeoPoint, method: GeocodeMethod, at: DateTime<Utc>) -> Self {
        Self {
            lat: point.lat,
            lon: point.lon,
            method,
            accuracy_m: method.accuracy_m(),
            ts: at.timestamp(),
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

/// Query string -> resolution. Entries never expire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeocodeCache {
    entries: BTreeMap<String, GeocodeCacheEntry>,
}

impl GeocodeCache {
    pub fn get(&self, query: &str) -> Option<&GeocodeCacheEntry> {
        self.entries.get(query)
    }

    pub fn insert(&mut self, query: impl Into<String>, entry: GeocodeCacheEntry) {
        self.entries.insert(query.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// --- Reports ---

/// What the reporter says happened at the spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportEvent {
    Present,
    Removed,
}

impl ReportEvent {
    /// Hashtags mentioning removal (`sticker_removed`, ...) report a removal.
    pub fn from_tag(tag: &str) -> Self {
        if tag.to_ascii_lowercase().contains("removed") {
            ReportEvent::Removed
        } else {
            ReportEvent::Present
        }
    }
}

impl fmt::Display for ReportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportEvent::Present => write!(f, "present"),
            ReportEvent::Removed => write!(f, "removed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Medium {
    Sticker,
    Graffiti,
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Medium::Sticker => write!(f, "sticker"),
            Medium::Graffiti => write!(f, "graffiti"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateStatus {
    NeedsInfo,
    Pending,
    Published,
    Dropped,
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateStatus::NeedsInfo => write!(f, "NEEDS_INFO"),
            CandidateStatus::Pending => write!(f, "PENDING"),
            CandidateStatus::Published => write!(f, "PUBLISHED"),
            CandidateStatus::Dropped => write!(f, "DROPPED"),
        }
    }
}

/// Why a candidate could not move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    MissingImage,
    MissingMention,
    MissingLocation,
    GeocodeFailed,
    /// Every geocode provider that was tried errored. Retried each cycle.
    GeocoderUnavailable,
    LocationConflict,
    SourceDeleted,
}

impl FailureReason {
    /// Reasons caused by our side rather than the post.
    pub fn is_transient(self) -> bool {
        matches!(self, FailureReason::GeocoderUnavailable)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::MissingImage => write!(f, "missing_image"),
            FailureReason::MissingMention => write!(f, "missing_mention"),
            FailureReason::MissingLocation => write!(f, "missing_location"),
            FailureReason::GeocodeFailed => write!(f, "geocode_failed"),
            FailureReason::GeocoderUnavailable => write!(f, "geocoder_unavailable"),
            FailureReason::LocationConflict => write!(f, "location_conflict"),
            FailureReason::SourceDeleted => write!(f, "source_deleted"),
        }
    }
}

/// Pointer back to the social post a report came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub status_id: String,
    pub url: String,
    /// Host of the instance the post originates from.
    pub instance: String,
}

impl SourceRef {
    pub fn item_id(&self) -> String {
        format!("masto-{}", self.status_id)
    }
}

/// Lowercased host of a URL, if it parses and has one.
pub fn host_of(raw: &str) -> Option<String> {
    url::Url::parse(raw)
        .ok()?
        .host_str()
        .map(|h| h.to_ascii_lowercase())
}

/// A located point with the method that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved {
    pub point: GeoPoint,
    pub method: GeocodeMethod,
}

impl Resolved {
    pub fn accuracy_m(&self) -> u32 {
        self.method.accuracy_m()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateReport {
    pub id: String,
    pub source: SourceRef,
    pub status: CandidateStatus,
    pub event: ReportEvent,
    pub tag: String,
    pub created_at: DateTime<Utc>,
    pub created_date: NaiveDate,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub accuracy_m: Option<u32>,
    #[serde(default)]
    pub method: Option<GeocodeMethod>,
    #[serde(default)]
    pub location_text: String,
    #[serde(default)]
    pub snap_note: String,
    pub category: String,
    #[serde(default)]
    pub medium: Option<Medium>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub media: Vec<String>,
    #[serde(default)]
    pub reason: Option<FailureReason>,
    pub fingerprint: String,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_probed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub replied_for: Option<FailureReason>,
}

impl CandidateReport {
    /// Move to PENDING. Only ever called with coordinates in hand.
    pub fn mark_pending(&mut self, resolved: Resolved, snap_note: String) {
        self.status = CandidateStatus::Pending;
        self.location = Some(resolved.point);
        self.accuracy_m = Some(resolved.accuracy_m());
        self.method = Some(resolved.method);
        self.snap_note = snap_note;
        self.reason = None;
    }

    pub fn mark_needs_info(&mut self, reason: FailureReason) {
        self.status = CandidateStatus::NeedsInfo;
        self.location = None;
        self.accuracy_m = None;
        self.method = None;
        self.snap_note.clear();
        self.reason = Some(reason);
    }

    pub fn mark_dropped(&mut self, reason: FailureReason) {
        self.status = CandidateStatus::Dropped;
        self.reason = Some(reason);
    }

    /// PENDING with a valid point; the only state dedup accepts.
    pub fn is_publishable(&self) -> bool {
        self.status == CandidateStatus::Pending
            && self.location.map_or(false, |p| p.is_valid())
    }
}

/// SHA-256 over the post text and media ids, used to spot edits.
pub fn content_fingerprint(text: &str, media: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    for m in media {
        hasher.update(b"\0");
        hasher.update(m.as_bytes());
    }
    hex::encode(hasher.finalize())
}

// --- Published features (GeoJSON) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    Present,
    Removed,
    Unknown,
}

impl From<ReportEvent> for FeatureStatus {
    fn from(event: ReportEvent) -> Self {
        match event {
            ReportEvent::Present => FeatureStatus::Present,
            ReportEvent::Removed => FeatureStatus::Removed,
        }
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureStatus::Present => write!(f, "present"),
            FeatureStatus::Removed => write!(f, "removed"),
            FeatureStatus::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeatureKind {
    #[default]
    Feature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CollectionKind {
    #[default]
    FeatureCollection,
}

/// GeoJSON geometry. Coordinates are `[lon, lat]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: [f64; 2] },
}

impl Geometry {
    pub fn point(p: GeoPoint) -> Self {
        Geometry::Point {
            coordinates: [p.lon, p.lat],
        }
    }

    pub fn location(&self) -> GeoPoint {
        match self {
            Geometry::Point { coordinates } => GeoPoint::new(coordinates[1], coordinates[0]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureProperties {
    pub id: String,
    pub status: FeatureStatus,
    pub category: String,
    #[serde(default)]
    pub medium: Option<Medium>,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
    pub seen_count: u32,
    #[serde(default)]
    pub removed_at: Option<NaiveDate>,
    pub accuracy_m: u32,
    pub radius_m: u32,
    #[serde(default)]
    pub media: Vec<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub geocode_method: Option<GeocodeMethod>,
    #[serde(default)]
    pub snap_note: String,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default)]
    pub source_deleted: bool,
    /// Last time the first source was checked for deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probed: Option<DateTime<Utc>>,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedFeature {
    #[serde(rename = "type", default)]
    pub kind: FeatureKind,
    pub geometry: Geometry,
    pub properties: FeatureProperties,
}

impl PublishedFeature {
    /// Build a fresh feature from an approved candidate.
    ///
    /// Returns `None` when the candidate has no valid coordinates.
    pub fn from_candidate(c: &CandidateReport) -> Option<Self> {
        let point = c.location.filter(|p| p.is_valid())?;
        let accuracy_m = c
            .accuracy_m
            .or_else(|| c.method.map(|m| m.accuracy_m()))
            .unwrap_or(GeocodeMethod::SingleStreet.accuracy_m());
        let status = FeatureStatus::from(c.event);

        Some(Self {
            kind: FeatureKind::Feature,
            geometry: Geometry::point(point),
            properties: FeatureProperties {
                id: c.id.clone(),
                status,
                category: c.category.clone(),
                medium: c.medium,
                first_seen: c.created_date,
                last_seen: c.created_date,
                seen_count: 1,
                removed_at: (status == FeatureStatus::Removed).then_some(c.created_date),
                accuracy_m,
                radius_m: accuracy_m,
                media: dedup_preserving_order(&c.media),
                notes: c.note.clone(),
                geocode_method: c.method,
                snap_note: c.snap_note.clone(),
                sources: vec![c.source.clone()],
                source_deleted: false,
                last_probed: None,
                lat: point.lat,
                lon: point.lon,
            },
        })
    }

    pub fn id(&self) -> &str {
        &self.properties.id
    }

    pub fn location(&self) -> GeoPoint {
        self.geometry.location()
    }

    pub fn has_source(&self, status_id: &str) -> bool {
        self.properties
            .sources
            .iter()
            .any(|s| s.status_id == status_id)
    }
}

fn dedup_preserving_order(items: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default)]
    pub kind: CollectionKind,
    #[serde(default)]
    pub features: Vec<PublishedFeature>,
}

impl FeatureCollection {
    pub fn find_by_source(&self, status_id: &str) -> Option<usize> {
        self.features.iter().position(|f| f.has_source(status_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candidate() -> CandidateReport {
        let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        CandidateReport {
            id: "masto-1".into(),
            source: SourceRef {
                status_id: "1".into(),
                url: "https://example.social/@a/1".into(),
                instance: "example.social".into(),
            },
            status: CandidateStatus::Pending,
            event: ReportEvent::Present,
            tag: "sticker_report".into(),
            created_at,
            created_date: created_at.date_naive(),
            location: Some(GeoPoint::new(52.52, 13.405)),
            accuracy_m: Some(50),
            method: Some(GeocodeMethod::AddressSearch),
            location_text: "Hauptstraße 5, Springfield".into(),
            snap_note: String::new(),
            category: "AfD".into(),
            medium: Some(Medium::Sticker),
            note: String::new(),
            media: vec!["a.jpg".into(), "a.jpg".into(), "b.jpg".into()],
            reason: None,
            fingerprint: "x".into(),
            attempts: 1,
            last_probed: None,
            replied_for: None,
        }
    }

    #[test]
    fn accuracy_tiers_are_ordered() {
        assert!(GeocodeMethod::Gps.accuracy_m() < GeocodeMethod::ExactNode.accuracy_m());
        assert!(GeocodeMethod::ExactNode.accuracy_m() < GeocodeMethod::NearestGeometry.accuracy_m());
        assert!(GeocodeMethod::NearestGeometry.accuracy_m() < GeocodeMethod::AddressSearch.accuracy_m());
        assert!(GeocodeMethod::AddressSearch.accuracy_m() < GeocodeMethod::SingleStreet.accuracy_m());
    }

    #[test]
    fn event_from_tag() {
        assert_eq!(ReportEvent::from_tag("sticker_removed"), ReportEvent::Removed);
        assert_eq!(ReportEvent::from_tag("graffiti_report"), ReportEvent::Present);
    }

    #[test]
    fn feature_geometry_is_lon_lat() {
        let f = PublishedFeature::from_candidate(&candidate()).unwrap();
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["type"], "Feature");
        assert_eq!(json["geometry"]["type"], "Point");
        assert_eq!(json["geometry"]["coordinates"][0], 13.405);
        assert_eq!(json["geometry"]["coordinates"][1], 52.52);
        assert_eq!(json["properties"]["lat"], 52.52);
        assert_eq!(json["properties"]["status"], "present");
        assert_eq!(json["properties"]["first_seen"], "2024-05-01");
    }

    #[test]
    fn new_feature_dedups_media_and_sets_radius() {
        let f = PublishedFeature::from_candidate(&candidate()).unwrap();
        assert_eq!(f.properties.media, vec!["a.jpg", "b.jpg"]);
        assert_eq!(f.properties.radius_m, 50);
        assert_eq!(f.properties.seen_count, 1);
        assert!(f.has_source("1"));
    }

    #[test]
    fn removed_candidate_sets_removed_at() {
        let mut c = candidate();
        c.event = ReportEvent::Removed;
        let f = PublishedFeature::from_candidate(&c).unwrap();
        assert_eq!(f.properties.status, FeatureStatus::Removed);
        assert_eq!(f.properties.removed_at, Some(c.created_date));
    }

    #[test]
    fn candidate_without_location_has_no_feature() {
        let mut c = candidate();
        c.mark_needs_info(FailureReason::MissingLocation);
        assert!(PublishedFeature::from_candidate(&c).is_none());
        assert!(!c.is_publishable());
    }

    #[test]
    fn status_serializes_screaming() {
        let json = serde_json::to_string(&CandidateStatus::NeedsInfo).unwrap();
        assert_eq!(json, "\"NEEDS_INFO\"");
    }

    #[test]
    fn collection_parses_from_geojson() {
        let raw = r#"{"type":"FeatureCollection","features":[{"type":"Feature",
            "geometry":{"type":"Point","coordinates":[13.4,52.5]},
            "properties":{"id":"masto-9","status":"unknown","category":"unknown",
            "first_seen":"2024-01-01","last_seen":"2024-01-02","seen_count":3,
            "accuracy_m":40,"radius_m":40,"lat":52.5,"lon":13.4}}]}"#;
        let fc: FeatureCollection = serde_json::from_str(raw).unwrap();
        assert_eq!(fc.features.len(), 1);
        assert_eq!(fc.features[0].location(), GeoPoint::new(52.5, 13.4));
        assert_eq!(fc.features[0].properties.status, FeatureStatus::Unknown);
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let a = content_fingerprint("hello", &[]);
        let b = content_fingerprint("hello", &["m1".to_string()]);
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(a, content_fingerprint("hello", &[]));
    }

    #[test]
    fn host_is_lowercased() {
        assert_eq!(host_of("https://Chaos.Social/@a/1").as_deref(), Some("chaos.social"));
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn unknown_category_detection() {
        assert!(is_unknown_category("Unknown"));
        assert!(is_unknown_category("  "));
        assert!(!is_unknown_category("AfD"));
    }
}
