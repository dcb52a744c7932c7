//! Location extraction from report text.
//!
//! A post can carry explicit coordinates (decimal or degrees/minutes/seconds)
//! and/or a line of text describing a place. Text is normalized and matched
//! against a small set of shapes, each rendered into a canonical query string
//! that doubles as the geocode cache key.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use heatmap_common::GeoPoint;

static RE_COORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\d.\-])(-?\d{1,2}\.\d+)\s*,\s*(-?\d{1,3}\.\d+)").unwrap()
});
static RE_DMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(\d{1,3})\s*[°º]\s*(\d{1,2})\s*['’′]\s*(\d{1,2}(?:[.,]\d+)?)\s*["”″]?\s*([NSEW])"#).unwrap()
});

static RE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:ort|location|place|standort)\s*:\s*").unwrap());
static RE_LEADING_MENTIONS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:@[\w.]+(?:@[\w.\-]+)?\s+)+").unwrap());
static RE_PURE_MENTIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@[\w.]+(?:@[\w.\-]+)?(?:\s+@[\w.]+(?:@[\w.\-]+)?)*$").unwrap()
});
static RE_STR_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(\w)str(?:\.|\b)").unwrap());
static RE_STR_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b([Ss])tr(?:\.|\b)").unwrap());
static RE_PL_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(\w)pl(?:\.|\b)").unwrap());
static RE_PL_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b([Pp])l(?:\.|\b)").unwrap());
static RE_DOT_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.,").unwrap());
static RE_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static RE_INTERSECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*intersection of\s+(.+?)\s+and\s+(.+?)\s*,\s*(.+?)\s*$").unwrap()
});
static RE_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s+(\d+[a-zA-Z]?)\s*,\s*(.+?)\s*$").unwrap());
static RE_CROSS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.+?)\s*(?:/| x | & )\s*(.+?)\s*,\s*(.+?)\s*$").unwrap()
});
static RE_STREET_CITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s*,\s*(.+?)\s*$").unwrap());
static RE_STREET_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\d|stra(?:ß|ss)e|weg\b|platz\b|allee\b|gasse\b|ring\b|damm\b|ufer\b|chaussee\b|markt\b|brücke\b|\b(?:street|st|road|rd|avenue|ave|lane|square|boulevard)\b",
    )
    .unwrap()
});

/// Crossing separators recognized in free text.
const CROSS_SEPARATORS: [&str; 3] = [" / ", " x ", " & "];

/// A normalized place description. Rendering and re-parsing is stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocationQuery {
    Address { street: String, number: String, city: String },
    StreetCity { street: String, city: String },
    Intersection { a: String, b: String, city: String },
}

impl LocationQuery {
    /// Parse an already normalized line. Shapes are tried in a fixed order:
    /// intersection, address, crossing, street + city.
    pub fn parse(line: &str) -> Option<Self> {
        if let Some(c) = RE_INTERSECTION.captures(line) {
            return Some(LocationQuery::Intersection {
                a: c[1].trim().to_string(),
                b: c[2].trim().to_string(),
                city: c[3].trim().to_string(),
            });
        }
        if let Some(c) = RE_ADDRESS.captures(line) {
            return Some(LocationQuery::Address {
                street: c[1].trim().to_string(),
                number: c[2].trim().to_string(),
                city: c[3].trim().to_string(),
            });
        }
        if let Some(c) = RE_CROSS.captures(line) {
            return Some(LocationQuery::Intersection {
                a: c[1].trim().to_string(),
                b: c[2].trim().to_string(),
                city: c[3].trim().to_string(),
            });
        }
        if let Some(c) = RE_STREET_CITY.captures(line) {
            return Some(LocationQuery::StreetCity {
                street: c[1].trim().to_string(),
                city: c[2].trim().to_string(),
            });
        }
        None
    }

    /// A bare `<words>, <words>` line with nothing street-like in it, such
    /// as a note ("half torn, faded").
    pub fn is_weak(&self) -> bool {
        match self {
            LocationQuery::StreetCity { street, .. } => !RE_STREET_WORD.is_match(street),
            _ => false,
        }
    }

    pub fn city(&self) -> &str {
        match self {
            LocationQuery::Address { city, .. }
            | LocationQuery::StreetCity { city, .. }
            | LocationQuery::Intersection { city, .. } => city,
        }
    }
}

impl fmt::Display for LocationQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationQuery::Address { street, number, city } => write!(f, "{street} {number}, {city}"),
            LocationQuery::StreetCity { street, city } => write!(f, "{street}, {city}"),
            LocationQuery::Intersection { a, b, city } => write!(f, "intersection of {a} and {b}, {city}"),
        }
    }
}

/// Everything location-related found in a post.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationSignals {
    pub coords: Option<GeoPoint>,
    pub query: Option<LocationQuery>,
}

impl LocationSignals {
    pub fn is_empty(&self) -> bool {
        self.coords.is_none() && self.query.is_none()
    }
}

/// Extract coordinates and the first text query from plain text.
pub fn parse_location(text: &str) -> LocationSignals {
    LocationSignals {
        coords: parse_coords(text),
        query: parse_query(text),
    }
}

/// First valid coordinate pair: DMS notation, then decimal `lat, lon`.
pub fn parse_coords(text: &str) -> Option<GeoPoint> {
    parse_dms(text).or_else(|| parse_decimal(text))
}

fn parse_decimal(text: &str) -> Option<GeoPoint> {
    RE_COORDS.captures_iter(text).find_map(|c| {
        let lat: f64 = c[1].parse().ok()?;
        let lon: f64 = c[2].parse().ok()?;
        let p = GeoPoint::new(lat, lon);
        p.is_valid().then_some(p)
    })
}

fn parse_dms(text: &str) -> Option<GeoPoint> {
    let mut lat: Option<f64> = None;
    let mut lon: Option<f64> = None;

    for c in RE_DMS.captures_iter(text) {
        let deg: f64 = c[1].parse().ok()?;
        let min: f64 = c[2].parse().ok()?;
        let sec: f64 = c[3].replace(',', ".").parse().ok()?;
        let hemi = c[4].to_ascii_uppercase();

        let mut dd = deg + min / 60.0 + sec / 3600.0;
        if hemi == "S" || hemi == "W" {
            dd = -dd;
        }

        match hemi.as_str() {
            "N" | "S" if lat.is_none() && (-90.0..=90.0).contains(&dd) => lat = Some(dd),
            "E" | "W" if lon.is_none() && (-180.0..=180.0).contains(&dd) => lon = Some(dd),
            _ => {}
        }

        if let (Some(lat), Some(lon)) = (lat, lon) {
            return Some(GeoPoint::new(lat, lon));
        }
    }
    None
}

fn is_coordinate_line(line: &str) -> bool {
    RE_DMS.is_match(line) || parse_decimal(line).is_some()
}

/// Scan lines for the first one that reads like a place. A weak
/// `<words>, <words>` line is only used when nothing better follows.
///
/// Hashtag lines, pure-mention lines and coordinate lines are skipped.
pub fn parse_query(text: &str) -> Option<LocationQuery> {
    let mut weak = None;
    let lines = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !l.starts_with('#'))
        .filter(|l| !RE_PURE_MENTIONS.is_match(l))
        .filter(|l| !is_coordinate_line(l));

    for line in lines {
        let Some(q) = LocationQuery::parse(&repair_crossing(&normalize_line(line))) else {
            continue;
        };
        if !q.is_weak() {
            return Some(q);
        }
        weak.get_or_insert(q);
    }
    weak
}

/// Prefix, mention, abbreviation and whitespace cleanup of one line.
pub fn normalize_line(line: &str) -> String {
    let s = RE_LEADING_MENTIONS.replace(line.trim(), "");
    let s = RE_PREFIX.replace(&s, "");
    let s = RE_STR_SUFFIX.replace_all(&s, "${1}straße");
    let s = RE_STR_WORD.replace_all(&s, "${1}traße");
    let s = RE_PL_SUFFIX.replace_all(&s, "${1}platz");
    let s = RE_PL_WORD.replace_all(&s, "${1}latz");
    let s = RE_DOT_COMMA.replace_all(&s, ",");
    let s = RE_WS.replace_all(&s, " ");
    s.trim().to_string()
}

/// `A / B Hamburg` -> `A / B, Hamburg`: a crossing without a comma gets one
/// before its last word.
pub fn repair_crossing(line: &str) -> String {
    if line.contains(',') || !CROSS_SEPARATORS.iter().any(|sep| line.contains(sep)) {
        return line.to_string();
    }
    match line.rsplit_once(' ') {
        Some((head, city)) if !head.trim().is_empty() && !city.trim().is_empty() => {
            format!("{}, {}", head.trim(), city.trim())
        }
        _ => line.to_string(),
    }
}
