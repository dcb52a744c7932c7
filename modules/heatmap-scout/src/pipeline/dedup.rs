//! One feature per physical spot.
//!
//! An approved candidate either folds into the first existing feature it
//! matches (distance inside either radius, compatible category) or becomes
//! a new feature. Matching walks the collection in stored order.

use tracing::{debug, info};

use heatmap_common::{
    is_unknown_category, CandidateReport, FeatureCollection, FeatureStatus, PublishedFeature, ReportEvent,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupOutcome {
    /// Folded into the feature at this index.
    Merged(usize),
    /// Appended as a new feature at this index.
    Inserted(usize),
    /// The candidate's source is already part of the feature at this index.
    AlreadyPublished(usize),
    /// No valid coordinates; nothing was touched.
    Rejected,
}

/// Equal ignoring case, or either side unknown.
pub fn categories_compatible(a: &str, b: &str) -> bool {
    is_unknown_category(a) || is_unknown_category(b) || a.trim().eq_ignore_ascii_case(b.trim())
}

/// Index of the first feature the candidate belongs to.
pub fn find_match(features: &FeatureCollection, candidate: &CandidateReport) -> Option<usize> {
    let point = candidate.location?;
    let radius = candidate.accuracy_m.unwrap_or(0) as f64;

    features.features.iter().position(|f| {
        let limit = radius.max(f.properties.radius_m as f64);
        f.location().distance_m(&point) <= limit && categories_compatible(&f.properties.category, &candidate.category)
    })
}

/// Fold a candidate into an existing feature.
pub fn merge(feature: &mut PublishedFeature, candidate: &CandidateReport) {
    let props = &mut feature.properties;

    // An older post approved late must not make the feature look older.
    props.last_seen = props.last_seen.max(candidate.created_date);
    props.seen_count += 1;

    match candidate.event {
        ReportEvent::Present => {
            props.status = FeatureStatus::Present;
            props.removed_at = None;
        }
        ReportEvent::Removed => {
            props.status = FeatureStatus::Removed;
            props.removed_at = Some(candidate.created_date);
        }
    }

    if is_unknown_category(&props.category) && !is_unknown_category(&candidate.category) {
        props.category = candidate.category.clone();
    }
    if props.medium.is_none() {
        props.medium = candidate.medium;
    }

    if let Some(acc) = candidate.accuracy_m {
        props.accuracy_m = props.accuracy_m.min(acc);
        props.radius_m = props.radius_m.min(acc);
    }

    for m in &candidate.media {
        if !props.media.contains(m) {
            props.media.push(m.clone());
        }
    }

    props.sources.push(candidate.source.clone());

    let note = candidate.note.trim();
    if !note.is_empty() && !props.notes.contains(note) {
        if props.notes.is_empty() {
            props.notes = note.to_string();
        } else {
            props.notes = format!("{} | {note}", props.notes);
        }
    }
}

/// Merge or insert an approved candidate.
pub fn fold(features: &mut FeatureCollection, candidate: &CandidateReport) -> DedupOutcome {
    if let Some(idx) = features.find_by_source(&candidate.source.status_id) {
        debug!(candidate = candidate.id.as_str(), feature = features.features[idx].id(), "Source already published");
        return DedupOutcome::AlreadyPublished(idx);
    }

    if let Some(idx) = find_match(features, candidate) {
        let feature = &mut features.features[idx];
        merge(feature, candidate);
        info!(
            candidate = candidate.id.as_str(),
            feature = feature.id(),
            seen_count = feature.properties.seen_count,
            "Merged into existing feature"
        );
        return DedupOutcome::Merged(idx);
    }

    let Some(feature) = PublishedFeature::from_candidate(candidate) else {
        return DedupOutcome::Rejected;
    };
    info!(
        feature = feature.id(),
        category = feature.properties.category.as_str(),
        status = %feature.properties.status,
        "Published new feature"
    );
    features.features.push(feature);
    DedupOutcome::Inserted(features.features.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use heatmap_common::{
        CandidateStatus, GeoPoint, GeocodeMethod, Medium, Resolved, SourceRef,
    };

    fn candidate(id: &str, category: &str, point: GeoPoint, day: u32) -> CandidateReport {
        let created_at = Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap();
        let mut c = CandidateReport {
            id: format!("masto-{id}"),
            source: SourceRef {
                status_id: id.into(),
                url: format!("https://social.example/@alice/{id}"),
                instance: "social.example".into(),
            },
            status: CandidateStatus::NeedsInfo,
            event: ReportEvent::Present,
            tag: "sticker_report".into(),
            created_at,
            created_date: created_at.date_naive(),
            location: None,
            accuracy_m: None,
            method: None,
            location_text: String::new(),
            snap_note: String::new(),
            category: category.into(),
            medium: Some(Medium::Sticker),
            note: String::new(),
            media: vec![format!("https://social.example/media/{id}.jpg")],
            reason: None,
            fingerprint: String::new(),
            attempts: 1,
            last_probed: None,
            replied_for: None,
        };
        c.mark_pending(
            Resolved {
                point,
                method: GeocodeMethod::AddressSearch,
            },
            String::new(),
        );
        c
    }

    const SPOT: GeoPoint = GeoPoint { lat: 52.52, lon: 13.405 };

    #[test]
    fn same_category_same_spot_merges() {
        let mut fc = FeatureCollection::default();
        assert_eq!(fold(&mut fc, &candidate("1", "AfD", SPOT, 1)), DedupOutcome::Inserted(0));
        assert_eq!(fold(&mut fc, &candidate("2", "afd", SPOT, 3)), DedupOutcome::Merged(0));

        let props = &fc.features[0].properties;
        assert_eq!(fc.features.len(), 1);
        assert_eq!(props.seen_count, 2);
        assert_eq!(props.last_seen, NaiveDate::from_ymd_opt(2024, 5, 3).unwrap());
        assert_eq!(props.sources.len(), 2);
        assert_eq!(props.media.len(), 2);
    }

    #[test]
    fn late_approved_older_post_keeps_last_seen() {
        let mut fc = FeatureCollection::default();
        fold(&mut fc, &candidate("5", "AfD", SPOT, 10));
        assert_eq!(fold(&mut fc, &candidate("2", "AfD", SPOT, 2)), DedupOutcome::Merged(0));

        let props = &fc.features[0].properties;
        assert_eq!(props.seen_count, 2);
        assert_eq!(props.last_seen, NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
    }

    #[test]
    fn different_categories_never_merge() {
        let mut fc = FeatureCollection::default();
        fold(&mut fc, &candidate("1", "AfD", SPOT, 1));
        assert_eq!(fold(&mut fc, &candidate("2", "III. Weg", SPOT, 1)), DedupOutcome::Inserted(1));
    }

    #[test]
    fn unknown_is_promoted() {
        let mut fc = FeatureCollection::default();
        fold(&mut fc, &candidate("1", "unknown", SPOT, 1));
        fold(&mut fc, &candidate("2", "AfD", SPOT, 2));
        assert_eq!(fc.features.len(), 1);
        assert_eq!(fc.features[0].properties.category, "AfD");
    }

    #[test]
    fn outside_radius_inserts() {
        let mut fc = FeatureCollection::default();
        fold(&mut fc, &candidate("1", "AfD", SPOT, 1));
        // ~111 m north, radius is 50 m
        let far = GeoPoint::new(SPOT.lat + 0.001, SPOT.lon);
        assert_eq!(fold(&mut fc, &candidate("2", "AfD", far, 1)), DedupOutcome::Inserted(1));
    }

    #[test]
    fn larger_radius_on_either_side_matches() {
        let mut fc = FeatureCollection::default();
        let mut coarse = candidate("1", "AfD", SPOT, 1);
        coarse.accuracy_m = Some(500);
        fold(&mut fc, &coarse);
        assert_eq!(fc.features[0].properties.radius_m, 500);

        let near = GeoPoint::new(SPOT.lat + 0.002, SPOT.lon);
        assert_eq!(fold(&mut fc, &candidate("2", "AfD", near, 2)), DedupOutcome::Merged(0));
        assert_eq!(fc.features[0].properties.radius_m, 50);
        assert_eq!(fc.features[0].properties.accuracy_m, 50);
    }

    #[test]
    fn first_match_in_stored_order_wins() {
        let mut fc = FeatureCollection::default();
        fold(&mut fc, &candidate("1", "AfD", SPOT, 1));
        let east = GeoPoint::new(SPOT.lat, SPOT.lon + 0.0012);
        fold(&mut fc, &candidate("2", "AfD", east, 1));
        assert_eq!(fc.features.len(), 2);

        let between = GeoPoint::new(SPOT.lat, SPOT.lon + 0.0006);
        assert_eq!(fold(&mut fc, &candidate("3", "AfD", between, 2)), DedupOutcome::Merged(0));
    }

    #[test]
    fn removal_then_sighting_revives() {
        let mut fc = FeatureCollection::default();
        fold(&mut fc, &candidate("1", "AfD", SPOT, 1));

        let mut gone = candidate("2", "AfD", SPOT, 4);
        gone.event = ReportEvent::Removed;
        fold(&mut fc, &gone);
        assert_eq!(fc.features[0].properties.status, FeatureStatus::Removed);
        assert_eq!(fc.features[0].properties.removed_at, NaiveDate::from_ymd_opt(2024, 5, 4));

        fold(&mut fc, &candidate("3", "AfD", SPOT, 9));
        assert_eq!(fc.features[0].properties.status, FeatureStatus::Present);
        assert_eq!(fc.features[0].properties.removed_at, None);
        assert_eq!(fc.features[0].properties.seen_count, 3);
    }

    #[test]
    fn republished_source_is_a_no_op() {
        let mut fc = FeatureCollection::default();
        let c = candidate("1", "AfD", SPOT, 1);
        fold(&mut fc, &c);
        assert_eq!(fold(&mut fc, &c), DedupOutcome::AlreadyPublished(0));
        assert_eq!(fc.features[0].properties.seen_count, 1);
    }

    #[test]
    fn notes_append_once() {
        let mut fc = FeatureCollection::default();
        let mut a = candidate("1", "AfD", SPOT, 1);
        a.note = "on lamp post".into();
        let mut b = candidate("2", "AfD", SPOT, 2);
        b.note = "half torn".into();
        let mut c = candidate("3", "AfD", SPOT, 3);
        c.note = "half torn".into();
        fold(&mut fc, &a);
        fold(&mut fc, &b);
        fold(&mut fc, &c);
        assert_eq!(fc.features[0].properties.notes, "on lamp post | half torn");
    }

    #[test]
    fn candidate_without_location_is_rejected() {
        let mut fc = FeatureCollection::default();
        let mut c = candidate("1", "AfD", SPOT, 1);
        c.location = None;
        assert_eq!(fold(&mut fc, &c), DedupOutcome::Rejected);
        assert!(fc.features.is_empty());
    }
}
