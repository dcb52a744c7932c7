use tracing::debug;

use crate::error::{OsmError, Result};
use crate::types::{LatLon, NominatimPlace};

pub struct NominatimClient {
    client: reqwest::Client,
    base_url: String,
}

impl NominatimClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Free-text search. Returns the best hit, or `None` when nothing matched.
    pub async fn search(&self, query: &str) -> Result<Option<LatLon>> {
        let url = format!("{}/search", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            return Err(OsmError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(OsmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let places: Vec<NominatimPlace> = resp.json().await?;
        let Some(best) = places.into_iter().next() else {
            debug!(query, "Nominatim returned no results");
            return Ok(None);
        };

        let lat = parse_coord(&best.lat)?;
        let lon = parse_coord(&best.lon)?;
        Ok(Some(LatLon::new(lat, lon)))
    }
}

fn parse_coord(raw: &str) -> Result<f64> {
    raw.trim()
        .parse()
        .map_err(|_| OsmError::Parse(format!("invalid coordinate '{raw}'")))
}
