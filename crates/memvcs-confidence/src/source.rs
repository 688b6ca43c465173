//! Source reliability tracking. Grounded on `confidence.py`'s
//! `SourceTracker`.

use std::collections::HashMap;

use chrono::Utc;
use memvcs_storage::StorageAdapter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const SOURCES_PATH: &str = "sources.json";
const UNKNOWN_SOURCE_RELIABILITY: f64 = 0.5;
const VERIFIED_DELTA: f64 = 0.01;
const ERROR_DELTA: f64 = -0.05;
const RELIABILITY_MIN: f64 = 0.1;
const RELIABILITY_MAX: f64 = 1.0;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error(transparent)]
    Storage(#[from] memvcs_storage::StorageError),
    #[error("malformed sources.json: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub name: String,
    pub reliability: f64,
    pub source_type: String,
    pub contributions: u64,
    pub verified_count: u64,
    pub error_count: u64,
    pub registered_at: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SourcesFile {
    #[serde(default)]
    sources: HashMap<String, SourceRecord>,
}

/// Tracks how reliable each memory source has proven over time, nudging a
/// source's reliability up on verification and down on recorded error.
pub struct SourceTracker {
    sources: HashMap<String, SourceRecord>,
}

impl SourceTracker {
    pub fn load(storage: &dyn StorageAdapter) -> Result<Self, SourceError> {
        let sources = match storage.read(SOURCES_PATH) {
            Ok(bytes) => {
                let file: SourcesFile = serde_json::from_slice(&bytes)
                    .map_err(|e| SourceError::Malformed(e.to_string()))?;
                file.sources
            }
            Err(memvcs_storage::StorageError::NotFound(_)) => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { sources })
    }

    fn save(&self, storage: &dyn StorageAdapter) -> Result<(), SourceError> {
        let file = SourcesFile {
            sources: self.sources.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)
            .map_err(|e| SourceError::Malformed(e.to_string()))?;
        storage.write(SOURCES_PATH, &bytes)?;
        Ok(())
    }

    pub fn register_source(
        &mut self,
        storage: &dyn StorageAdapter,
        source_id: &str,
        name: &str,
        initial_reliability: f64,
        source_type: &str,
    ) -> Result<SourceRecord, SourceError> {
        let record = SourceRecord {
            name: name.to_string(),
            reliability: initial_reliability.clamp(RELIABILITY_MIN, RELIABILITY_MAX),
            source_type: source_type.to_string(),
            contributions: 0,
            verified_count: 0,
            error_count: 0,
            registered_at: Utc::now().to_rfc3339(),
        };
        self.sources.insert(source_id.to_string(), record.clone());
        self.save(storage)?;
        Ok(record)
    }

    pub fn get_reliability(&self, source_id: &str) -> f64 {
        self.sources
            .get(source_id)
            .map(|s| s.reliability)
            .unwrap_or(UNKNOWN_SOURCE_RELIABILITY)
    }

    pub fn update_reliability(
        &mut self,
        storage: &dyn StorageAdapter,
        source_id: &str,
        delta: f64,
    ) -> Result<f64, SourceError> {
        let Some(source) = self.sources.get_mut(source_id) else {
            return Ok(UNKNOWN_SOURCE_RELIABILITY);
        };
        source.reliability = (source.reliability + delta).clamp(RELIABILITY_MIN, RELIABILITY_MAX);
        let new_reliability = source.reliability;
        self.save(storage)?;
        Ok(new_reliability)
    }

    pub fn record_verification(
        &mut self,
        storage: &dyn StorageAdapter,
        source_id: &str,
        verified: bool,
    ) -> Result<(), SourceError> {
        if !self.sources.contains_key(source_id) {
            debug!(source_id, "verification recorded for unknown source");
            return Ok(());
        }
        let delta = if verified {
            let source = self.sources.get_mut(source_id).unwrap();
            source.verified_count += 1;
            VERIFIED_DELTA
        } else {
            let source = self.sources.get_mut(source_id).unwrap();
            source.error_count += 1;
            ERROR_DELTA
        };
        self.update_reliability(storage, source_id, delta)?;
        Ok(())
    }

    pub fn get_all_sources(&self) -> &HashMap<String, SourceRecord> {
        &self.sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memvcs_storage::LocalStorageAdapter;
    use tempfile::tempdir;

    fn storage() -> LocalStorageAdapter {
        let dir = tempdir().unwrap();
        let storage = LocalStorageAdapter::new(dir.path()).unwrap();
        std::mem::forget(dir);
        storage
    }

    #[test]
    fn unknown_source_defaults_to_half_reliability() {
        let tracker = SourceTracker::load(&storage()).unwrap();
        assert_eq!(tracker.get_reliability("nobody"), 0.5);
    }

    #[test]
    fn reliability_clamps_to_bounds() {
        let storage = storage();
        let mut tracker = SourceTracker::load(&storage).unwrap();
        tracker
            .register_source(&storage, "s1", "agent-a", 0.95, "agent")
            .unwrap();
        for _ in 0..20 {
            tracker.update_reliability(&storage, "s1", 0.5).unwrap();
        }
        assert_eq!(tracker.get_reliability("s1"), RELIABILITY_MAX);

        for _ in 0..40 {
            tracker.update_reliability(&storage, "s1", -0.5).unwrap();
        }
        assert_eq!(tracker.get_reliability("s1"), RELIABILITY_MIN);
    }

    #[test]
    fn verification_nudges_reliability_and_persists() {
        let storage = storage();
        let mut tracker = SourceTracker::load(&storage).unwrap();
        tracker
            .register_source(&storage, "s1", "agent-a", 0.8, "agent")
            .unwrap();
        tracker.record_verification(&storage, "s1", true).unwrap();
        assert!((tracker.get_reliability("s1") - 0.81).abs() < 1e-9);
        tracker.record_verification(&storage, "s1", false).unwrap();
        assert!((tracker.get_reliability("s1") - 0.76).abs() < 1e-9);

        let reloaded = SourceTracker::load(&storage).unwrap();
        assert!((reloaded.get_reliability("s1") - 0.76).abs() < 1e-9);
    }
}
