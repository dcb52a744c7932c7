use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::info;

use crate::error::HeatmapError;
use crate::types::host_of;

pub const DEFAULT_USER_AGENT: &str = "heatmap-scout/0.1 (+https://github.com/heatmap-scout)";

pub const DEFAULT_OVERPASS_ENDPOINTS: &[&str] = &[
    "https://overpass-api.de/api/interpreter",
    "https://overpass.kumi.systems/api/interpreter",
    "https://overpass.openstreetmap.ru/api/interpreter",
];

pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

/// What happens to a published feature whose source post is confirmed gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletionPolicy {
    /// Keep the feature, mark it `unknown` and flag `source_deleted`.
    #[default]
    Demote,
    /// Remove the feature from the collection.
    Drop,
}

impl FromStr for DeletionPolicy {
    type Err = HeatmapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "demote" => Ok(DeletionPolicy::Demote),
            "drop" => Ok(DeletionPolicy::Drop),
            other => Err(HeatmapError::Config(format!(
                "unknown deletion policy '{other}' (expected demote or drop)"
            ))),
        }
    }
}

impl fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeletionPolicy::Demote => write!(f, "demote"),
            DeletionPolicy::Drop => write!(f, "drop"),
        }
    }
}

/// Tunables of the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub hashtags: Vec<String>,
    /// Posts must mention one of these (`@heatmap`, ...). Empty disables the check.
    pub required_mentions: Vec<String>,
    /// Accounts whose favourite approves a report: `user` for the home
    /// instance, `user@host` for any other.
    pub allowed_reviewers: Vec<String>,
    pub stale_after_days: i64,
    pub location_conflict_threshold_m: f64,
    pub snap_enabled: bool,
    pub snap_gps: bool,
    pub max_snap_displacement_m: f64,
    pub max_geom_points_per_street: usize,
    pub max_intersection_gap_m: f64,
    pub deletion_policy: DeletionPolicy,
    pub deletion_probe_batch: usize,
    pub approval_concurrency: usize,
    pub politeness_delay_ms: u64,
    pub max_backoff_secs: u64,
    pub send_replies: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            hashtags: vec![
                "sticker_report".into(),
                "sticker_removed".into(),
                "graffiti_report".into(),
                "graffiti_removed".into(),
            ],
            required_mentions: Vec::new(),
            allowed_reviewers: Vec::new(),
            stale_after_days: 30,
            location_conflict_threshold_m: 500.0,
            snap_enabled: true,
            snap_gps: false,
            max_snap_displacement_m: 50.0,
            max_geom_points_per_street: 400,
            max_intersection_gap_m: 250.0,
            deletion_policy: DeletionPolicy::Demote,
            deletion_probe_batch: 10,
            approval_concurrency: 4,
            politeness_delay_ms: 1000,
            max_backoff_secs: 60,
            send_replies: false,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Social network
    pub instance_url: String,
    pub access_token: String,

    // Outbound HTTP
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub overpass_endpoints: Vec<String>,
    pub nominatim_url: String,

    // Storage and loop
    pub data_dir: PathBuf,
    pub poll_interval_secs: u64,

    pub pipeline: PipelineSettings,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing or malformed.
    pub fn from_env() -> Self {
        let defaults = PipelineSettings::default();

        let pipeline = PipelineSettings {
            hashtags: list_env("HASHTAGS").unwrap_or(defaults.hashtags),
            required_mentions: list_env("REQUIRED_MENTIONS").unwrap_or_default(),
            allowed_reviewers: list_env("ALLOWED_REVIEWERS").unwrap_or_default(),
            stale_after_days: parsed_env("STALE_AFTER_DAYS", defaults.stale_after_days),
            location_conflict_threshold_m: parsed_env(
                "LOCATION_CONFLICT_THRESHOLD_M",
                defaults.location_conflict_threshold_m,
            ),
            snap_enabled: parsed_env("SNAP_ENABLED", defaults.snap_enabled),
            snap_gps: parsed_env("SNAP_GPS", defaults.snap_gps),
            max_snap_displacement_m: parsed_env(
                "MAX_SNAP_DISPLACEMENT_M",
                defaults.max_snap_displacement_m,
            ),
            max_geom_points_per_street: parsed_env(
                "MAX_GEOM_POINTS_PER_STREET",
                defaults.max_geom_points_per_street,
            ),
            max_intersection_gap_m: parsed_env(
                "MAX_INTERSECTION_GAP_M",
                defaults.max_intersection_gap_m,
            ),
            deletion_policy: parsed_env("DELETION_POLICY", defaults.deletion_policy),
            deletion_probe_batch: parsed_env("DELETION_PROBE_BATCH", defaults.deletion_probe_batch),
            approval_concurrency: parsed_env("APPROVAL_CONCURRENCY", defaults.approval_concurrency)
                .max(1),
            politeness_delay_ms: parsed_env("POLITENESS_DELAY_MS", defaults.politeness_delay_ms),
            max_backoff_secs: parsed_env("MAX_BACKOFF_SECS", defaults.max_backoff_secs),
            send_replies: parsed_env("SEND_REPLIES", defaults.send_replies),
        };

        Self {
            instance_url: required_env("INSTANCE_URL").trim_end_matches('/').to_string(),
            access_token: required_env("ACCESS_TOKEN"),
            user_agent: env::var("USER_AGENT").unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            http_timeout_secs: parsed_env("HTTP_TIMEOUT_SECS", 25),
            overpass_endpoints: list_env("OVERPASS_ENDPOINTS").unwrap_or_else(|| {
                DEFAULT_OVERPASS_ENDPOINTS
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            }),
            nominatim_url: env::var("NOMINATIM_URL")
                .unwrap_or_else(|_| DEFAULT_NOMINATIM_URL.to_string()),
            data_dir: PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string())),
            poll_interval_secs: parsed_env("POLL_INTERVAL_SECS", 300),
            pipeline,
        }
    }

    /// Host of the home instance, used to tell origin posts from federated copies.
    pub fn instance_host(&self) -> Option<String> {
        host_of(&self.instance_url)
    }

    /// Log the effective configuration without the access token.
    pub fn log_redacted(&self) {
        info!(
            instance = self.instance_url.as_str(),
            access_token = redact(&self.access_token),
            user_agent = self.user_agent.as_str(),
            data_dir = %self.data_dir.display(),
            poll_interval_secs = self.poll_interval_secs,
            http_timeout_secs = self.http_timeout_secs,
            overpass_endpoints = self.overpass_endpoints.len(),
            "Config loaded"
        );
        let p = &self.pipeline;
        info!(
            hashtags = ?p.hashtags,
            required_mentions = ?p.required_mentions,
            reviewers = p.allowed_reviewers.len(),
            stale_after_days = p.stale_after_days,
            snap_enabled = p.snap_enabled,
            snap_gps = p.snap_gps,
            deletion_policy = %p.deletion_policy,
            send_replies = p.send_replies,
            "Pipeline settings"
        );
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{key} is malformed: {e}")),
        _ => default,
    }
}

/// Comma-separated list; `None` when unset.
fn list_env(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().map(|raw| split_list(&raw))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_start_matches('#').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
