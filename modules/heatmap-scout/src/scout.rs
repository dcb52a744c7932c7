use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use heatmap_common::{CandidateStatus, FailureReason, PipelineSettings};

use crate::pipeline::dedup::{fold, DedupOutcome};
use crate::pipeline::lifecycle::{
    apply_feature_deletion, approving_reviewer, reply_text, select_probes, sweep_stale, ProbeTarget,
    ReportLifecycle,
};
use crate::pipeline::stats::CycleStats;
use crate::store::{State, StateStore};
use crate::traits::{AddressSearch, MapData, SocialPost, SocialSource, SourceLookup};

/// Mastodon ids are decimal snowflakes: shorter is older.
fn status_id_order(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

pub struct Scout {
    settings: PipelineSettings,
    home_host: String,
    social: Arc<dyn SocialSource>,
    map: Arc<dyn MapData>,
    search: Arc<dyn AddressSearch>,
}

impl Scout {
    pub fn new(
        settings: PipelineSettings,
        home_host: impl Into<String>,
        social: Arc<dyn SocialSource>,
        map: Arc<dyn MapData>,
        search: Arc<dyn AddressSearch>,
    ) -> Self {
        Self {
            settings,
            home_host: home_host.into(),
            social,
            map,
            search,
        }
    }

    /// Load, run one cycle, persist.
    pub async fn run_once(&self, store: &StateStore) -> Result<CycleStats> {
        let mut state = store.load()?;
        let stats = self.run_cycle(&mut state, Utc::now()).await;
        store.save(&state)?;
        info!("{stats}");
        Ok(stats)
    }

    /// One poll cycle against in-memory state. Never fails: provider errors
    /// are logged and retried next cycle.
    pub async fn run_cycle(&self, state: &mut State, now: DateTime<Utc>) -> CycleStats {
        let mut stats = CycleStats::default();

        let posts = self.collect_posts(&mut stats).await;
        self.ingest(state, posts, now, &mut stats).await;
        self.check_approvals(state, &mut stats).await;
        self.probe_deletions(state, now, &mut stats).await;

        stats.went_stale = sweep_stale(&mut state.features, now.date_naive(), self.settings.stale_after_days) as u32;

        if self.settings.send_replies {
            self.send_replies(state, &mut stats).await;
        }

        state
            .pending
            .retain(|c| matches!(c.status, CandidateStatus::NeedsInfo | CandidateStatus::Pending));

        stats.features_total = state.features.features.len() as u32;
        stats.queue_len = state.pending.len() as u32;
        stats
    }

    /// Every configured tag's timeline, one entry per post, oldest first.
    async fn collect_posts(&self, stats: &mut CycleStats) -> Vec<(String, SocialPost)> {
        let mut seen = HashSet::new();
        let mut posts = Vec::new();

        for tag in &self.settings.hashtags {
            match self.social.timeline(tag).await {
                Ok(batch) => {
                    info!(tag = tag.as_str(), posts = batch.len(), "Fetched timeline");
                    for post in batch {
                        if seen.insert(post.id.clone()) {
                            posts.push((tag.clone(), post));
                        }
                    }
                }
                Err(e) => {
                    warn!(tag = tag.as_str(), error = %e, "Timeline fetch failed");
                    stats.tags_failed += 1;
                }
            }
        }

        posts.sort_by(|a, b| status_id_order(&a.1.id, &b.1.id));
        stats.posts_seen = posts.len() as u32;
        posts
    }

    async fn ingest(
        &self,
        state: &mut State,
        posts: Vec<(String, SocialPost)>,
        now: DateTime<Utc>,
        stats: &mut CycleStats,
    ) {
        let lifecycle = ReportLifecycle::new(&self.settings, self.map.as_ref(), self.search.as_ref());
        let State {
            cache,
            pending,
            features,
        } = state;

        for (tag, post) in posts {
            if features.find_by_source(&post.id).is_some() {
                continue;
            }

            let idx = match pending.iter().position(|c| c.source.status_id == post.id) {
                Some(idx) => {
                    if !lifecycle.retry(&mut pending[idx], &post, cache, now).await {
                        continue;
                    }
                    stats.retried += 1;
                    idx
                }
                None => {
                    let candidate = lifecycle.intake(&post, &tag, cache, now).await;
                    pending.push(candidate);
                    stats.new_candidates += 1;
                    pending.len() - 1
                }
            };

            let c = &pending[idx];
            match (c.status, c.reason) {
                (CandidateStatus::Pending, _) => stats.pending += 1,
                (CandidateStatus::NeedsInfo, Some(reason)) => stats.record_needs_info(reason),
                _ => {}
            }
        }
    }

    /// Favourite lookups run concurrently; results are applied in queue order.
    async fn check_approvals(&self, state: &mut State, stats: &mut CycleStats) {
        let targets: Vec<(usize, String)> = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_publishable())
            .map(|(i, c)| (i, c.source.status_id.clone()))
            .collect();
        if targets.is_empty() {
            return;
        }

        let social = self.social.as_ref();
        let results: Vec<(usize, Result<Vec<String>>)> = stream::iter(targets)
            .map(|(idx, status_id)| async move { (idx, social.favourited_by(&status_id).await) })
            .buffered(self.settings.approval_concurrency.max(1))
            .collect()
            .await;

        for (idx, result) in results {
            stats.approvals_checked += 1;
            let favourites = match result {
                Ok(f) => f,
                Err(e) => {
                    warn!(candidate = state.pending[idx].id.as_str(), error = %e, "Approval check failed");
                    stats.approval_errors += 1;
                    continue;
                }
            };
            let Some(reviewer) = approving_reviewer(&favourites, &self.settings.allowed_reviewers, &self.home_host) else {
                continue;
            };

            let candidate = &mut state.pending[idx];
            info!(candidate = candidate.id.as_str(), reviewer = reviewer.as_str(), "Approved");
            match fold(&mut state.features, candidate) {
                DedupOutcome::Inserted(_) => stats.published_new += 1,
                DedupOutcome::Merged(_) => stats.merged += 1,
                DedupOutcome::AlreadyPublished(_) => {}
                DedupOutcome::Rejected => continue,
            }
            candidate.status = CandidateStatus::Published;
        }
    }

    async fn probe_deletions(&self, state: &mut State, now: DateTime<Utc>, stats: &mut CycleStats) {
        let targets = select_probes(
            &state.pending,
            &state.features,
            &self.home_host,
            self.settings.deletion_probe_batch,
        );
        let mut dropped_features = Vec::new();

        for target in targets {
            let status_id = match &target {
                ProbeTarget::Candidate(i) => state.pending[*i].source.status_id.clone(),
                ProbeTarget::Feature(i) => match state.features.features[*i].properties.sources.first() {
                    Some(src) => src.status_id.clone(),
                    None => continue,
                },
            };

            stats.probes += 1;
            let lookup = self.social.lookup(&status_id).await;

            match &target {
                ProbeTarget::Candidate(i) => state.pending[*i].last_probed = Some(now),
                ProbeTarget::Feature(i) => state.features.features[*i].properties.last_probed = Some(now),
            }

            match lookup {
                Ok(SourceLookup::Gone) => {
                    stats.sources_deleted += 1;
                    match target {
                        ProbeTarget::Candidate(i) => {
                            info!(candidate = state.pending[i].id.as_str(), "Source deleted, dropping candidate");
                            state.pending[i].mark_dropped(FailureReason::SourceDeleted);
                        }
                        ProbeTarget::Feature(i) => {
                            if apply_feature_deletion(&mut state.features, i, self.settings.deletion_policy) {
                                dropped_features.push(i);
                            }
                        }
                    }
                }
                Ok(SourceLookup::Found(_)) | Ok(SourceLookup::Ambiguous) => {}
                Err(e) => warn!(status_id = status_id.as_str(), error = %e, "Deletion probe failed"),
            }
        }

        dropped_features.sort_unstable();
        for i in dropped_features.into_iter().rev() {
            state.features.features.remove(i);
        }
    }

    /// One reply per (post, reason).
    async fn send_replies(&self, state: &mut State, stats: &mut CycleStats) {
        for c in state.pending.iter_mut() {
            if c.status != CandidateStatus::NeedsInfo {
                continue;
            }
            let Some(reason) = c.reason else {
                continue;
            };
            if c.replied_for == Some(reason) {
                continue;
            }
            let Some(text) = reply_text(reason) else {
                continue;
            };

            match self.social.reply(&c.source.status_id, text).await {
                Ok(()) => {
                    c.replied_for = Some(reason);
                    stats.replies_sent += 1;
                }
                Err(e) => warn!(candidate = c.id.as_str(), error = %e, "Reply failed"),
            }
        }
    }
}
