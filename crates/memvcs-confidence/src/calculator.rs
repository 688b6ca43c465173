//! Confidence scoring. Grounded on `confidence.py`'s `ConfidenceCalculator`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use memvcs_storage::StorageAdapter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decay::DecayModel;
use crate::source::{SourceError, SourceTracker};

const SCORES_PATH: &str = "confidence_scores.json";
const DEFAULT_SOURCE_RELIABILITY: f64 = 0.8;
const CORROBORATION_STEP: f64 = 0.05;
const CORROBORATION_CAP: f64 = 0.2;
const CONTRADICTION_STEP: f64 = 0.1;
const CONTRADICTION_CAP: f64 = 0.3;

#[derive(Error, Debug)]
pub enum ConfidenceError {
    #[error(transparent)]
    Storage(#[from] memvcs_storage::StorageError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("malformed confidence_scores.json: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfidenceFactors {
    pub source_reliability: f64,
    pub corroboration_count: u32,
    pub age_days: f64,
    pub access_frequency: u64,
    pub contradiction_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub score: f64,
    pub factors: ConfidenceFactors,
    pub decay_rate: f64,
    pub computed_at: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ScoresFile {
    #[serde(default)]
    scores: HashMap<String, ConfidenceScore>,
}

fn age_in_days(created_at: Option<&str>) -> f64 {
    let Some(created_at) = created_at else {
        return 0.0;
    };
    match DateTime::parse_from_rfc3339(created_at) {
        Ok(created) => {
            let delta = Utc::now().signed_duration_since(created.with_timezone(&Utc));
            (delta.num_seconds() as f64 / 86400.0).max(0.0)
        }
        Err(_) => 0.0,
    }
}

/// Combines source reliability, corroboration/contradiction evidence, and
/// temporal decay into a single `[0.0, 1.0]` confidence score per memory
/// path, persisted alongside a running `SourceTracker`.
pub struct ConfidenceCalculator {
    decay_model: DecayModel,
    source_tracker: SourceTracker,
    scores: HashMap<String, ConfidenceScore>,
}

impl ConfidenceCalculator {
    pub fn load(storage: &dyn StorageAdapter, decay_model: DecayModel) -> Result<Self, ConfidenceError> {
        let scores = match storage.read(SCORES_PATH) {
            Ok(bytes) => {
                let file: ScoresFile = serde_json::from_slice(&bytes)
                    .map_err(|e| ConfidenceError::Malformed(e.to_string()))?;
                file.scores
            }
            Err(memvcs_storage::StorageError::NotFound(_)) => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        let source_tracker = SourceTracker::load(storage)?;
        Ok(Self {
            decay_model,
            source_tracker,
            scores,
        })
    }

    pub fn source_tracker_mut(&mut self) -> &mut SourceTracker {
        &mut self.source_tracker
    }

    fn save(&self, storage: &dyn StorageAdapter) -> Result<(), ConfidenceError> {
        let file = ScoresFile {
            scores: self.scores.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)
            .map_err(|e| ConfidenceError::Malformed(e.to_string()))?;
        storage.write(SCORES_PATH, &bytes)?;
        Ok(())
    }

    pub fn calculate_score(
        &mut self,
        storage: &dyn StorageAdapter,
        path: &str,
        source_id: Option<&str>,
        created_at: Option<&str>,
    ) -> Result<ConfidenceScore, ConfidenceError> {
        let source_reliability = source_id
            .map(|id| self.source_tracker.get_reliability(id))
            .unwrap_or(DEFAULT_SOURCE_RELIABILITY);
        let age_days = age_in_days(created_at);

        let existing = self.scores.get(path);
        let corroboration_count = existing.map(|s| s.factors.corroboration_count).unwrap_or(0);
        let contradiction_count = existing.map(|s| s.factors.contradiction_count).unwrap_or(0);
        let access_frequency = existing.map(|s| s.factors.access_frequency).unwrap_or(0);

        let factors = ConfidenceFactors {
            source_reliability,
            corroboration_count,
            age_days,
            access_frequency,
            contradiction_count,
        };

        let corroboration_boost = (corroboration_count as f64 * CORROBORATION_STEP).min(CORROBORATION_CAP);
        let contradiction_penalty = (contradiction_count as f64 * CONTRADICTION_STEP).min(CONTRADICTION_CAP);
        let base_score = (source_reliability + corroboration_boost - contradiction_penalty).clamp(0.0, 1.0);

        let decay_factor = self.decay_model.calculate_decay(age_days);
        let final_score = base_score * decay_factor;

        let score = ConfidenceScore {
            score: final_score,
            factors,
            decay_rate: std::f64::consts::LN_2 / self.decay_model.half_life_days,
            computed_at: Utc::now().to_rfc3339(),
        };
        self.scores.insert(path.to_string(), score.clone());
        self.save(storage)?;
        Ok(score)
    }

    pub fn get_score(&self, path: &str) -> Option<&ConfidenceScore> {
        self.scores.get(path)
    }

    pub fn add_corroboration(&mut self, storage: &dyn StorageAdapter, path: &str) -> Result<(), ConfidenceError> {
        if let Some(score) = self.scores.get_mut(path) {
            score.factors.corroboration_count += 1;
            self.save(storage)?;
        }
        Ok(())
    }

    pub fn add_contradiction(&mut self, storage: &dyn StorageAdapter, path: &str) -> Result<(), ConfidenceError> {
        if let Some(score) = self.scores.get_mut(path) {
            score.factors.contradiction_count += 1;
            self.save(storage)?;
        }
        Ok(())
    }

    pub fn record_access(&mut self, storage: &dyn StorageAdapter, path: &str) -> Result<(), ConfidenceError> {
        let score = self.scores.entry(path.to_string()).or_insert_with(|| ConfidenceScore {
            score: DEFAULT_SOURCE_RELIABILITY,
            factors: ConfidenceFactors::default(),
            decay_rate: std::f64::consts::LN_2 / self.decay_model.half_life_days,
            computed_at: Utc::now().to_rfc3339(),
        });
        score.factors.access_frequency += 1;
        self.save(storage)?;
        Ok(())
    }

    pub fn get_low_confidence_memories(&self, threshold: f64) -> Vec<(&str, f64)> {
        let mut low: Vec<(&str, f64)> = self
            .scores
            .iter()
            .filter(|(_, score)| score.score < threshold)
            .map(|(path, score)| (path.as_str(), score.score))
            .collect();
        low.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        low
    }

    pub fn get_expiring_soon(&self, days: f64, threshold: f64) -> Vec<(&str, f64)> {
        let mut expiring: Vec<(&str, f64)> = self
            .scores
            .iter()
            .filter_map(|(path, score)| {
                if score.score <= threshold {
                    return None;
                }
                let days_until = self.decay_model.days_until_threshold(score.score, threshold)?;
                if days_until <= days {
                    Some((path.as_str(), days_until))
                } else {
                    None
                }
            })
            .collect();
        expiring.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        expiring
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
    fn fresh_memory_from_reliable_source_scores_high() {
        let storage = storage();
        let mut calc = ConfidenceCalculator::load(&storage, DecayModel::default()).unwrap();
        calc.source_tracker_mut()
            .register_source(&storage, "s1", "trusted", 0.95, "agent")
            .unwrap();
        let now = Utc::now().to_rfc3339();
        let score = calc
            .calculate_score(&storage, "current/episodic/a.md", Some("s1"), Some(&now))
            .unwrap();
        assert!(score.score > 0.9);
        assert!(score.score <= 1.0);
    }

    #[test]
    fn corroboration_raises_and_contradiction_lowers_score() {
        let storage = storage();
        let mut calc = ConfidenceCalculator::load(&storage, DecayModel::default()).unwrap();
        let now = Utc::now().to_rfc3339();
        calc.calculate_score(&storage, "m", None, Some(&now)).unwrap();
        calc.add_corroboration(&storage, "m").unwrap();
        calc.add_corroboration(&storage, "m").unwrap();
        let boosted = calc.calculate_score(&storage, "m", None, Some(&now)).unwrap();

        calc.add_contradiction(&storage, "m").unwrap();
        calc.add_contradiction(&storage, "m").unwrap();
        calc.add_contradiction(&storage, "m").unwrap();
        let penalized = calc.calculate_score(&storage, "m", None, Some(&now)).unwrap();

        assert!(boosted.score > 0.8);
        assert!(penalized.score < boosted.score);
    }

    #[test]
    fn score_stays_within_unit_interval_across_extreme_inputs() {
        let storage = storage();
        let mut calc = ConfidenceCalculator::load(&storage, DecayModel::default()).unwrap();
        let old = (Utc::now() - chrono::Duration::days(10_000)).to_rfc3339();
        let score = calc
            .calculate_score(&storage, "ancient", None, Some(&old))
            .unwrap();
        assert!((0.0..=1.0).contains(&score.score));
    }

    #[test]
    fn low_confidence_and_expiring_are_sorted_ascending() {
        let storage = storage();
        let mut calc = ConfidenceCalculator::load(&storage, DecayModel::default()).unwrap();
        let now = Utc::now().to_rfc3339();
        let old = (Utc::now() - chrono::Duration::days(45)).to_rfc3339();
        calc.calculate_score(&storage, "fresh", None, Some(&now)).unwrap();
        calc.calculate_score(&storage, "stale", None, Some(&old)).unwrap();

        let low = calc.get_low_confidence_memories(0.9);
        assert!(low.windows(2).all(|w| w[0].1 <= w[1].1));
    }
}
