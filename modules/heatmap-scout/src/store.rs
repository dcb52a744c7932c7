//! The three documents a cycle loads at the start and writes back at the end.
//!
//! Writes go to a temp file in the target directory that is then renamed
//! over the old document, so a crash never leaves a half-written file.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use heatmap_common::{CandidateReport, FeatureCollection, GeocodeCache};

pub const CACHE_FILE: &str = "cache_geocode.json";
pub const PENDING_FILE: &str = "pending.json";
pub const REPORTS_FILE: &str = "reports.geojson";

/// In-memory state for one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct State {
    pub cache: GeocodeCache,
    pub pending: Vec<CandidateReport>,
    pub features: FeatureCollection,
}

/// Read a JSON document; a missing or blank file yields the default value.
pub fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Pretty JSON with a trailing newline, written atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut body = serde_json::to_string_pretty(value)?;
    body.push('\n');

    let mut tmp = NamedTempFile::new_in(dir).with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(body.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    debug!(path = %path.display(), bytes = body.len(), "Wrote document");
    Ok(())
}

pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub fn load(&self) -> Result<State> {
        let state = State {
            cache: read_json(&self.path(CACHE_FILE))?,
            pending: read_json(&self.path(PENDING_FILE))?,
            features: read_json(&self.path(REPORTS_FILE))?,
        };
        info!(
            dir = %self.dir.display(),
            cached = state.cache.len(),
            pending = state.pending.len(),
            features = state.features.features.len(),
            "Loaded state"
        );
        Ok(state)
    }

    pub fn save(&self, state: &State) -> Result<()> {
        write_json_atomic(&self.path(CACHE_FILE), &state.cache)?;
        write_json_atomic(&self.path(PENDING_FILE), &state.pending)?;
        write_json_atomic(&self.path(REPORTS_FILE), &state.features)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use heatmap_common::{GeoPoint, GeocodeCacheEntry, GeocodeMethod};

    #[test]
    fn missing_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateStore::new(dir.path()).load().unwrap();
        assert_eq!(state, State::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("data"));

        let mut state = State::default();
        state.cache.insert(
            "Hauptstraße 5, Springfield",
            GeocodeCacheEntry::new(GeoPoint::new(52.52, 13.405), GeocodeMethod::AddressSearch, Utc::now()),
        );
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.cache, state.cache);
        assert!(loaded.pending.is_empty());
    }

    #[test]
    fn documents_are_pretty_with_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.save(&State::default()).unwrap();

        let raw = fs::read_to_string(store.path(REPORTS_FILE)).unwrap();
        assert!(raw.ends_with("}\n"));
        assert!(raw.contains("\"type\": \"FeatureCollection\""));
        assert_eq!(fs::read_to_string(store.path(PENDING_FILE)).unwrap(), "[]\n");

        // no temp files left behind
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names.len(), 3, "{names:?}");
    }

    #[test]
    fn corrupt_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PENDING_FILE), "{ not json").unwrap();
        let err = StateStore::new(dir.path()).load().unwrap_err();
        assert!(err.to_string().contains(PENDING_FILE));
    }
}
