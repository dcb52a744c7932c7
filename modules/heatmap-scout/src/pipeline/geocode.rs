//! Query -> coordinates through an ordered ladder of providers.
//!
//! Each tier has a fixed confidence (see `GeocodeMethod::accuracy_m`). Tiers
//! are tried in order; the first that yields a valid point wins. A failing
//! provider only skips its tier.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use heatmap_common::{
    closest_pair_midpoint, subsample, GeocodeCache, GeocodeCacheEntry, GeocodeMethod, GeoPoint, Resolved,
};

use crate::pipeline::location::LocationQuery;
use crate::traits::{AddressSearch, MapData};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    ExactNode,
    NearestGeometry,
    AddressSearch,
    SingleStreet,
}

/// The ladder, highest confidence first.
pub const LADDER: [Tier; 4] = [
    Tier::ExactNode,
    Tier::NearestGeometry,
    Tier::AddressSearch,
    Tier::SingleStreet,
];

impl Tier {
    pub fn method(self) -> GeocodeMethod {
        match self {
            Tier::ExactNode => GeocodeMethod::ExactNode,
            Tier::NearestGeometry => GeocodeMethod::NearestGeometry,
            Tier::AddressSearch => GeocodeMethod::AddressSearch,
            Tier::SingleStreet => GeocodeMethod::SingleStreet,
        }
    }

    /// Only address search applies to non-intersection queries.
    pub fn applies_to(self, query: &LocationQuery) -> bool {
        match self {
            Tier::AddressSearch => true,
            _ => matches!(query, LocationQuery::Intersection { .. }),
        }
    }
}

/// Outcome of a cache-aware resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup {
    Cached(Resolved),
    Fresh(Resolved),
    /// Providers answered and none knew the place.
    Failed,
    /// Nothing resolved and at least one provider errored.
    Unavailable,
}

impl Lookup {
    pub fn resolved(self) -> Option<Resolved> {
        match self {
            Lookup::Cached(r) | Lookup::Fresh(r) => Some(r),
            Lookup::Failed | Lookup::Unavailable => None,
        }
    }
}

pub struct GeocodeResolver<'a> {
    map: &'a dyn MapData,
    search: &'a dyn AddressSearch,
    max_points_per_street: usize,
    max_gap_m: f64,
}

impl<'a> GeocodeResolver<'a> {
    pub fn new(
        map: &'a dyn MapData,
        search: &'a dyn AddressSearch,
        max_points_per_street: usize,
        max_gap_m: f64,
    ) -> Self {
        Self {
            map,
            search,
            max_points_per_street,
            max_gap_m,
        }
    }

    /// Run a single tier. `Ok(None)` means the provider answered but found nothing.
    pub async fn attempt(&self, tier: Tier, query: &LocationQuery) -> anyhow::Result<Option<GeoPoint>> {
        match (tier, query) {
            (Tier::ExactNode, LocationQuery::Intersection { a, b, city }) => {
                let nodes = self.map.intersection_nodes(city, a, b).await?;
                Ok(nodes.into_iter().find(|p| p.is_valid()))
            }
            (Tier::NearestGeometry, LocationQuery::Intersection { a, b, city }) => {
                let (pts_a, pts_b) = self.map.street_geometries(city, a, b).await?;
                let pts_a = subsample(&pts_a, self.max_points_per_street);
                let pts_b = subsample(&pts_b, self.max_points_per_street);
                match closest_pair_midpoint(&pts_a, &pts_b) {
                    Some((mid, gap)) if gap <= self.max_gap_m => Ok(Some(mid)),
                    Some((_, gap)) => {
                        debug!(query = %query, gap_m = gap, "Streets too far apart for a crossing");
                        Ok(None)
                    }
                    None => Ok(None),
                }
            }
            (Tier::AddressSearch, q) => self.search.search(&q.to_string()).await,
            (Tier::SingleStreet, LocationQuery::Intersection { a, b, city }) => {
                for street in [a, b] {
                    if let Some(p) = self.search.search(&format!("{street}, {city}")).await? {
                        return Ok(Some(p));
                    }
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Walk the ladder; the first tier with a valid point wins. `Ok(None)`
    /// only when every tier answered; if some tier errored and none found
    /// the place, the last error is returned so the caller can retry later.
    pub async fn resolve(&self, query: &LocationQuery) -> anyhow::Result<Option<Resolved>> {
        let mut last_err = None;
        for tier in LADDER.into_iter().filter(|t| t.applies_to(query)) {
            match self.attempt(tier, query).await {
                Ok(Some(point)) if point.is_valid() => {
                    info!(query = %query, method = %tier.method(), lat = point.lat, lon = point.lon, "Geocoded");
                    return Ok(Some(Resolved {
                        point,
                        method: tier.method(),
                    }));
                }
                Ok(_) => debug!(query = %query, tier = ?tier, "Tier found nothing"),
                Err(e) => {
                    warn!(query = %query, tier = ?tier, error = %e, "Geocode tier failed");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(e.context(format!("No tier resolved {query}"))),
            None => Ok(None),
        }
    }

    /// Read-through cache keyed by the rendered query. Only successes are stored.
    pub async fn resolve_cached(&self, cache: &mut GeocodeCache, query: &LocationQuery, now: DateTime<Utc>) -> Lookup {
        let key = query.to_string();
        if let Some(entry) = cache.get(&key) {
            return Lookup::Cached(Resolved {
                point: entry.point(),
                method: entry.method,
            });
        }

        match self.resolve(query).await {
            Ok(Some(resolved)) => {
                cache.insert(key, GeocodeCacheEntry::new(resolved.point, resolved.method, now));
                Lookup::Fresh(resolved)
            }
            Ok(None) => Lookup::Failed,
            Err(_) => Lookup::Unavailable,
        }
    }
}
