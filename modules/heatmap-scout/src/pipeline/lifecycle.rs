//! Report lifecycle: intake checks, retries, approval, staleness and
//! source deletion.
//!
//! ```text
//! intake ──► NEEDS_INFO ──(edited post)──► re-checked
//!    │            │
//!    ▼            ▼ (confirmed deleted)
//! PENDING ──► DROPPED
//!    │
//!    ▼ (allow-listed favourite)
//! PUBLISHED ──► feature (present/removed) ──(stale)──► unknown
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};

use heatmap_common::{
    content_fingerprint, CandidateReport, CandidateStatus, DeletionPolicy, FailureReason, FeatureCollection,
    FeatureStatus, GeocodeCache, GeocodeMethod, PipelineSettings, ReportEvent, Resolved, SourceRef,
};

use crate::pipeline::geocode::{GeocodeResolver, Lookup};
use crate::pipeline::location::parse_location;
use crate::pipeline::post::{has_image, has_required_mention, parse_details, qualified_handle, strip_html};
use crate::pipeline::snap::WaySnapper;
use crate::traits::{AddressSearch, MapData, SocialPost};

/// Drives candidates from intake to PENDING or NEEDS_INFO.
pub struct ReportLifecycle<'a> {
    settings: &'a PipelineSettings,
    resolver: GeocodeResolver<'a>,
    snapper: WaySnapper<'a>,
}

impl<'a> ReportLifecycle<'a> {
    pub fn new(settings: &'a PipelineSettings, map: &'a dyn MapData, search: &'a dyn AddressSearch) -> Self {
        Self {
            settings,
            resolver: GeocodeResolver::new(
                map,
                search,
                settings.max_geom_points_per_street,
                settings.max_intersection_gap_m,
            ),
            snapper: WaySnapper::new(map, settings.max_snap_displacement_m),
        }
    }

    /// Build and evaluate a candidate for a post seen for the first time.
    pub async fn intake(
        &self,
        post: &SocialPost,
        tag: &str,
        cache: &mut GeocodeCache,
        now: DateTime<Utc>,
    ) -> CandidateReport {
        let source = SourceRef {
            status_id: post.id.clone(),
            url: post.url.clone(),
            instance: post.origin_host.clone(),
        };
        let mut candidate = CandidateReport {
            id: source.item_id(),
            source,
            status: CandidateStatus::NeedsInfo,
            event: ReportEvent::from_tag(tag),
            tag: tag.to_string(),
            created_at: post.created_at,
            created_date: post.created_at.date_naive(),
            location: None,
            accuracy_m: None,
            method: None,
            location_text: String::new(),
            snap_note: String::new(),
            category: String::new(),
            medium: None,
            note: String::new(),
            media: Vec::new(),
            reason: None,
            fingerprint: String::new(),
            attempts: 0,
            last_probed: None,
            replied_for: None,
        };
        self.evaluate(&mut candidate, post, cache, now).await;
        candidate
    }

    /// Re-check a NEEDS_INFO candidate whose post changed since the last look,
    /// or that is stuck for a transient reason. Returns whether anything was
    /// re-evaluated.
    pub async fn retry(
        &self,
        candidate: &mut CandidateReport,
        post: &SocialPost,
        cache: &mut GeocodeCache,
        now: DateTime<Utc>,
    ) -> bool {
        if candidate.status != CandidateStatus::NeedsInfo {
            return false;
        }
        let transient = candidate.reason.is_some_and(FailureReason::is_transient);
        if !transient && !has_changed(candidate, post) {
            return false;
        }
        debug!(candidate = candidate.id.as_str(), transient, "Re-checking");
        self.evaluate(candidate, post, cache, now).await;
        true
    }

    async fn evaluate(
        &self,
        c: &mut CandidateReport,
        post: &SocialPost,
        cache: &mut GeocodeCache,
        now: DateTime<Utc>,
    ) {
        let text = strip_html(&post.content);
        let details = parse_details(&text, &c.tag);

        c.attempts += 1;
        c.category = details.category;
        c.medium = details.medium;
        c.note = details.note;
        c.media = post.images.clone();
        c.fingerprint = fingerprint(post);

        if !has_image(post) {
            return needs_info(c, FailureReason::MissingImage);
        }
        if !has_required_mention(post, &text, &self.settings.required_mentions) {
            return needs_info(c, FailureReason::MissingMention);
        }

        let signals = parse_location(&text);
        if signals.is_empty() {
            return needs_info(c, FailureReason::MissingLocation);
        }

        let resolved = match (signals.coords, &signals.query) {
            (Some(point), query) => {
                c.location_text = format!("{}, {}", point.lat, point.lon);
                if let Some(query) = query {
                    let lookup = self.resolver.resolve_cached(cache, query, now).await;
                    if lookup == Lookup::Unavailable {
                        return needs_info(c, FailureReason::GeocoderUnavailable);
                    }
                    if let Some(text_hit) = lookup.resolved() {
                        let gap = point.distance_m(&text_hit.point);
                        if gap > self.settings.location_conflict_threshold_m {
                            info!(
                                candidate = c.id.as_str(),
                                query = %query,
                                gap_m = gap,
                                "Coordinates and address disagree"
                            );
                            return needs_info(c, FailureReason::LocationConflict);
                        }
                    }
                }
                Resolved {
                    point,
                    method: GeocodeMethod::Gps,
                }
            }
            (None, Some(query)) => {
                c.location_text = query.to_string();
                match self.resolver.resolve_cached(cache, query, now).await {
                    Lookup::Cached(r) | Lookup::Fresh(r) => r,
                    Lookup::Failed => return needs_info(c, FailureReason::GeocodeFailed),
                    Lookup::Unavailable => return needs_info(c, FailureReason::GeocoderUnavailable),
                }
            }
            (None, None) => return needs_info(c, FailureReason::MissingLocation),
        };

        let (point, snap_note) = if self.should_snap(resolved.method) {
            let out = self.snapper.snap(resolved.point).await;
            (out.point, out.note)
        } else {
            (resolved.point, String::new())
        };

        c.mark_pending(
            Resolved {
                point,
                method: resolved.method,
            },
            snap_note,
        );
        info!(
            candidate = c.id.as_str(),
            method = %resolved.method,
            category = c.category.as_str(),
            snap = c.snap_note.as_str(),
            "Candidate pending approval"
        );
    }

    fn should_snap(&self, method: GeocodeMethod) -> bool {
        self.settings.snap_enabled && (method != GeocodeMethod::Gps || self.settings.snap_gps)
    }
}

fn needs_info(c: &mut CandidateReport, reason: FailureReason) {
    info!(candidate = c.id.as_str(), reason = %reason, "Candidate needs info");
    c.mark_needs_info(reason);
}

pub fn fingerprint(post: &SocialPost) -> String {
    content_fingerprint(&post.content, &post.images)
}

pub fn has_changed(candidate: &CandidateReport, post: &SocialPost) -> bool {
    candidate.fingerprint != fingerprint(post)
}

/// The first allow-listed reviewer among `favourited_by`. Handles are
/// compared fully qualified: a bare entry or account means one on
/// `home_host`. An empty allow-list approves nothing.
pub fn approving_reviewer(favourited_by: &[String], allowed: &[String], home_host: &str) -> Option<String> {
    let allowed: Vec<String> = allowed
        .iter()
        .filter_map(|a| qualified_handle(a, home_host))
        .collect();
    favourited_by
        .iter()
        .find(|acct| qualified_handle(acct, home_host).is_some_and(|h| allowed.contains(&h)))
        .cloned()
}

/// `present` features not seen for `stale_after_days` become `unknown`.
/// Returns how many changed.
pub fn sweep_stale(features: &mut FeatureCollection, today: NaiveDate, stale_after_days: i64) -> usize {
    let mut changed = 0;
    for f in &mut features.features {
        let props = &mut f.properties;
        if props.status != FeatureStatus::Present {
            continue;
        }
        let age = (today - props.last_seen).num_days();
        if age >= stale_after_days {
            debug!(feature = props.id.as_str(), age_days = age, "Feature went stale");
            props.status = FeatureStatus::Unknown;
            changed += 1;
        }
    }
    changed
}

/// Something whose source post can be probed for deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    /// Index into the pending queue.
    Candidate(usize),
    /// Index into the feature collection.
    Feature(usize),
}

/// Up to `batch` probe targets, least recently probed first (never-probed
/// first of all). Only posts from the home instance are eligible: other
/// instances cannot authoritatively confirm a deletion.
pub fn select_probes(
    pending: &[CandidateReport],
    features: &FeatureCollection,
    home_host: &str,
    batch: usize,
) -> Vec<ProbeTarget> {
    let home = home_host.to_ascii_lowercase();
    let mut targets: Vec<(Option<DateTime<Utc>>, ProbeTarget)> = Vec::new();

    for (i, c) in pending.iter().enumerate() {
        let open = matches!(c.status, CandidateStatus::NeedsInfo | CandidateStatus::Pending);
        if open && c.source.instance.eq_ignore_ascii_case(&home) {
            targets.push((c.last_probed, ProbeTarget::Candidate(i)));
        }
    }
    for (i, f) in features.features.iter().enumerate() {
        if f.properties.source_deleted {
            continue;
        }
        if let Some(src) = f.properties.sources.first() {
            if src.instance.eq_ignore_ascii_case(&home) {
                targets.push((f.properties.last_probed, ProbeTarget::Feature(i)));
            }
        }
    }

    // None sorts before Some; the sort is stable so ties keep queue order.
    targets.sort_by_key(|(probed, _)| *probed);
    targets.into_iter().take(batch).map(|(_, t)| t).collect()
}

/// Apply a confirmed deletion of a published feature's source.
/// Returns `true` when the feature should be removed from the collection.
pub fn apply_feature_deletion(features: &mut FeatureCollection, idx: usize, policy: DeletionPolicy) -> bool {
    let Some(f) = features.features.get_mut(idx) else {
        return false;
    };
    match policy {
        DeletionPolicy::Demote => {
            info!(feature = f.properties.id.as_str(), "Source deleted, demoting feature");
            f.properties.status = FeatureStatus::Unknown;
            f.properties.source_deleted = true;
            false
        }
        DeletionPolicy::Drop => {
            info!(feature = f.properties.id.as_str(), "Source deleted, dropping feature");
            true
        }
    }
}

/// What a reporter is told when their post is stuck.
pub fn reply_text(reason: FailureReason) -> Option<&'static str> {
    match reason {
        FailureReason::MissingImage => Some("Missing photo. Please repost with one photo of the sticker or graffiti."),
        FailureReason::MissingMention => Some("Please mention the heatmap account so the report can be picked up."),
        FailureReason::MissingLocation => Some(
            "Missing location. Add coordinates or a line like \"Street 5, City\" or \"Street A / Street B, City\".",
        ),
        FailureReason::GeocodeFailed => {
            Some("Could not find this location. Please check the street and city spelling or add coordinates.")
        }
        FailureReason::LocationConflict => {
            Some("The coordinates and the address in this post point to different places. Please correct one of them.")
        }
        FailureReason::GeocoderUnavailable | FailureReason::SourceDeleted => None,
    }
}
