use tracing::{debug, warn};

use crate::error::{OsmError, Result};
use crate::types::{Element, LatLon, OverpassResponse, StreetPair, TaggedNode, TaggedWay};

/// Highway values that count as walkable.
pub const WALK_HIGHWAYS: &str = "footway|path|pedestrian|steps|cycleway";

pub struct OverpassClient {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl OverpassClient {
    pub fn new(client: reqwest::Client, endpoints: Vec<String>) -> Self {
        Self {
            client,
            endpoints: endpoints
                .into_iter()
                .map(|e| e.trim_end_matches('/').to_string())
                .collect(),
        }
    }

    /// Run a raw QL query, failing over across endpoints in order.
    ///
    /// Non-success answers and network errors move on to the next endpoint.
    /// If every endpoint failed and one of them was rate limiting, the rate
    /// limit is returned so the caller can back off.
    pub async fn query(&self, ql: &str) -> Result<Vec<Element>> {
        let mut last_err: Option<OsmError> = None;
        let mut rate_limit: Option<OsmError> = None;

        for endpoint in &self.endpoints {
            match self.query_endpoint(endpoint, ql).await {
                Ok(elements) => {
                    debug!(endpoint = endpoint.as_str(), elements = elements.len(), "Overpass query ok");
                    return Ok(elements);
                }
                Err(e) => {
                    warn!(endpoint = endpoint.as_str(), error = %e, "Overpass endpoint failed");
                    if e.is_rate_limited() {
                        rate_limit = Some(e);
                    } else {
                        last_err = Some(e);
                    }
                }
            }
        }

        Err(rate_limit.or(last_err).unwrap_or(OsmError::NoEndpoints))
    }

    async fn query_endpoint(&self, endpoint: &str, ql: &str) -> Result<Vec<Element>> {
        let resp = self
            .client
            .post(endpoint)
            .form(&[("data", ql)])
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(OsmError::RateLimited {
                retry_after_secs: retry_after(&resp),
            });
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(OsmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp.text().await?;
        let parsed: OverpassResponse = serde_json::from_str(&body)?;
        Ok(parsed.elements)
    }

    /// Nodes shared by two named highways inside the named area.
    pub async fn intersection_nodes(&self, area: &str, street_a: &str, street_b: &str) -> Result<Vec<LatLon>> {
        let elements = self.query(&intersection_node_ql(area, street_a, street_b)).await?;
        Ok(elements
            .into_iter()
            .filter_map(Element::into_node)
            .map(|n| n.point)
            .collect())
    }

    /// Geometry points of two named highways inside the named area.
    pub async fn street_geometries(&self, area: &str, street_a: &str, street_b: &str) -> Result<StreetPair> {
        let elements = self.query(&street_geometry_ql(area, street_a, street_b)).await?;
        let ways: Vec<TaggedWay> = elements.into_iter().filter_map(Element::into_way).collect();
        Ok(split_streets(ways, street_a, street_b))
    }

    /// Benches, waste baskets and street lamps around a point.
    pub async fn street_furniture(&self, center: LatLon, radius_m: u32) -> Result<Vec<TaggedNode>> {
        let elements = self.query(&street_furniture_ql(center, radius_m)).await?;
        Ok(elements.into_iter().filter_map(Element::into_node).collect())
    }

    pub async fn building_near(&self, center: LatLon, radius_m: u32) -> Result<bool> {
        let elements = self.query(&building_ql(center, radius_m)).await?;
        Ok(elements
            .iter()
            .any(|e| matches!(e, Element::Way { .. } | Element::Relation { .. })))
    }

    /// Highways with geometry around a point; `walk_only` restricts to walkable types.
    pub async fn highways(&self, center: LatLon, radius_m: u32, walk_only: bool) -> Result<Vec<TaggedWay>> {
        let elements = self.query(&highway_ql(center, radius_m, walk_only)).await?;
        Ok(elements.into_iter().filter_map(Element::into_way).collect())
    }
}

fn retry_after(resp: &reqwest::Response) -> Option<u64> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Quote a value for use inside a QL string literal.
pub fn quote_ql(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' | '\r' => out.push(' '),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn area_clause(area: &str) -> String {
    format!(
        "area[\"name\"={}][\"boundary\"=\"administrative\"]->.a;",
        quote_ql(area)
    )
}

pub fn intersection_node_ql(area: &str, a: &str, b: &str) -> String {
    format!(
        "[out:json][timeout:25];\n{}\nway(area.a)[\"highway\"][\"name\"={}]->.w1;\nway(area.a)[\"highway\"][\"name\"={}]->.w2;\nnode(w.w1)(w.w2);\nout body;",
        area_clause(area),
        quote_ql(a),
        quote_ql(b)
    )
}

pub fn street_geometry_ql(area: &str, a: &str, b: &str) -> String {
    format!(
        "[out:json][timeout:25];\n{}\nway(area.a)[\"highway\"][\"name\"={}]->.wa;\nway(area.a)[\"highway\"][\"name\"={}]->.wb;\n.wa out tags geom;\n.wb out tags geom;",
        area_clause(area),
        quote_ql(a),
        quote_ql(b)
    )
}

pub fn street_furniture_ql(c: LatLon, r: u32) -> String {
    format!(
        "[out:json][timeout:25];\n(\n  node(around:{r},{lat},{lon})[\"leisure\"=\"bench\"];\n  node(around:{r},{lat},{lon})[\"amenity\"~\"^(waste_basket|waste_disposal)$\"];\n  node(around:{r},{lat},{lon})[\"highway\"=\"street_lamp\"];\n);\nout body;",
        lat = c.lat,
        lon = c.lon
    )
}

pub fn building_ql(c: LatLon, r: u32) -> String {
    format!(
        "[out:json][timeout:25];\n(\n  way(around:{r},{lat},{lon})[\"building\"];\n  relation(around:{r},{lat},{lon})[\"building\"];\n);\nout ids;",
        lat = c.lat,
        lon = c.lon
    )
}

pub fn highway_ql(c: LatLon, r: u32, walk_only: bool) -> String {
    let filter = if walk_only {
        format!("[\"highway\"~\"^({WALK_HIGHWAYS})$\"]")
    } else {
        "[\"highway\"]".to_string()
    };
    format!(
        "[out:json][timeout:25];\n(\n  way(around:{r},{lat},{lon}){filter};\n);\nout tags geom;",
        lat = c.lat,
        lon = c.lon
    )
}

/// Assign ways to the two streets by exact name. A street with no named
/// way stays empty, so no crossing is derived from one street alone.
fn split_streets(ways: Vec<TaggedWay>, a: &str, b: &str) -> StreetPair {
    let mut pair = StreetPair::default();
    for way in &ways {
        let name = way.tag("name").map(str::trim).unwrap_or_default();
        if name == a {
            pair.a.extend(way.points.iter().copied());
        } else if name == b {
            pair.b.extend(way.points.iter().copied());
        }
    }

    pair
}
