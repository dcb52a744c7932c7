use std::collections::BTreeMap;

use heatmap_common::FailureReason;

/// Stats from one poll cycle.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleStats {
    pub posts_seen: u32,
    pub tags_failed: u32,
    pub new_candidates: u32,
    pub retried: u32,
    pub pending: u32,
    pub needs_info: u32,
    pub by_reason: BTreeMap<String, u32>,
    pub approvals_checked: u32,
    pub approval_errors: u32,
    pub published_new: u32,
    pub merged: u32,
    pub probes: u32,
    pub sources_deleted: u32,
    pub went_stale: u32,
    pub replies_sent: u32,
    pub features_total: u32,
    pub queue_len: u32,
}

impl CycleStats {
    pub fn record_needs_info(&mut self, reason: FailureReason) {
        self.needs_info += 1;
        *self.by_reason.entry(reason.to_string()).or_default() += 1;
    }
}

impl std::fmt::Display for CycleStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Heatmap Cycle Complete ===")?;
        writeln!(f, "Posts seen:         {}", self.posts_seen)?;
        writeln!(f, "Tags failed:        {}", self.tags_failed)?;
        writeln!(f, "New candidates:     {}", self.new_candidates)?;
        writeln!(f, "Retried:            {}", self.retried)?;
        writeln!(f, "Pending:            {}", self.pending)?;
        writeln!(f, "Needs info:         {}", self.needs_info)?;
        for (reason, count) in &self.by_reason {
            writeln!(f, "  {reason}: {count}")?;
        }
        writeln!(f, "Approvals checked:  {}", self.approvals_checked)?;
        writeln!(f, "Approval errors:    {}", self.approval_errors)?;
        writeln!(f, "Published (new):    {}", self.published_new)?;
        writeln!(f, "Merged:             {}", self.merged)?;
        writeln!(f, "Deletion probes:    {}", self.probes)?;
        writeln!(f, "Sources deleted:    {}", self.sources_deleted)?;
        writeln!(f, "Went stale:         {}", self.went_stale)?;
        writeln!(f, "Replies sent:       {}", self.replies_sent)?;
        writeln!(f, "\nFeatures:           {}", self.features_total)?;
        write!(f, "Queue:              {}", self.queue_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_reasons() {
        let mut stats = CycleStats::default();
        stats.record_needs_info(FailureReason::GeocodeFailed);
        stats.record_needs_info(FailureReason::GeocodeFailed);
        stats.record_needs_info(FailureReason::MissingImage);

        let out = stats.to_string();
        assert!(out.contains("Needs info:         3"));
        assert!(out.contains("  geocode_failed: 2"));
        assert!(out.contains("  missing_image: 1"));
    }

    #[test]
    fn summary_starts_on_the_first_line() {
        let out = CycleStats::default().to_string();
        assert!(out.starts_with("=== Heatmap Cycle Complete ===\n"), "{out:?}");
    }
}
