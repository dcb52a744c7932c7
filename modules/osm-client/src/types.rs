use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

pub type Tags = HashMap<String, String>;

// --- Overpass ---

#[derive(Debug, Deserialize)]
pub struct OverpassResponse {
    #[serde(default)]
    pub elements: Vec<Element>,
}

/// One element of an Overpass `[out:json]` answer.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    Node {
        id: i64,
        #[serde(default)]
        lat: Option<f64>,
        #[serde(default)]
        lon: Option<f64>,
        #[serde(default)]
        tags: Tags,
    },
    Way {
        id: i64,
        #[serde(default)]
        tags: Tags,
        /// Present with `out geom`; may contain nulls for clipped nodes.
        #[serde(default)]
        geometry: Vec<Option<LatLon>>,
    },
    Relation {
        id: i64,
        #[serde(default)]
        tags: Tags,
    },
    #[serde(other)]
    Other,
}

/// A node with coordinates and tags.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedNode {
    pub id: i64,
    pub point: LatLon,
    pub tags: Tags,
}

/// A way with its full geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedWay {
    pub id: i64,
    pub tags: Tags,
    pub points: Vec<LatLon>,
}

impl TaggedWay {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(|s| s.as_str())
    }
}

impl Element {
    pub fn into_node(self) -> Option<TaggedNode> {
        match self {
            Element::Node {
                id,
                lat: Some(lat),
                lon: Some(lon),
                tags,
            } => Some(TaggedNode {
                id,
                point: LatLon::new(lat, lon),
                tags,
            }),
            _ => None,
        }
    }

    /// Ways whose geometry is complete; clipped ways are skipped.
    pub fn into_way(self) -> Option<TaggedWay> {
        match self {
            Element::Way { id, tags, geometry } => {
                let points: Option<Vec<LatLon>> = geometry.into_iter().collect();
                points.map(|points| TaggedWay { id, tags, points })
            }
            _ => None,
        }
    }
}

/// Point sets of two named streets, used to locate their crossing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreetPair {
    pub a: Vec<LatLon>,
    pub b: Vec<LatLon>,
}

// --- Nominatim ---

/// Nominatim returns coordinates as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct NominatimPlace {
    pub lat: String,
    pub lon: String,
    #[serde(default)]
    pub display_name: Option<String>,
}
