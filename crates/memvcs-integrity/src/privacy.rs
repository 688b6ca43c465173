//! Differential-privacy budget accounting and the Gaussian noise mechanism.
//!
//! Grounded on `privacy_budget.py`'s `load_budget`/`spend_epsilon`/
//! `add_noise`: a persisted `(epsilon_spent, epsilon_max, delta)` tuple,
//! atomic spend with no partial mutation on denial, and noise scaled by
//! the analytic Gaussian mechanism rather than a naive Laplace draw.

use memvcs_storage::StorageAdapter;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

const BUDGET_PATH: &str = "privacy_budget.json";

#[derive(Error, Debug)]
pub enum PrivacyError {
    #[error(transparent)]
    Storage(#[from] memvcs_storage::StorageError),
    #[error("malformed privacy_budget.json: {0}")]
    Malformed(String),
    #[error("epsilon, delta and sensitivity must be positive")]
    InvalidParameters,
}

/// `{ epsilon_spent, epsilon_max, delta }`, persisted under
/// `privacy_budget.json`. `epsilon_spent` only ever grows; a denied spend
/// never mutates it (I6).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrivacyBudget {
    pub epsilon_spent: f64,
    pub epsilon_max: f64,
    pub delta: f64,
}

impl PrivacyBudget {
    pub fn new(epsilon_max: f64, delta: f64) -> Self {
        Self {
            epsilon_spent: 0.0,
            epsilon_max,
            delta,
        }
    }

    pub fn remaining(&self) -> f64 {
        (self.epsilon_max - self.epsilon_spent).max(0.0)
    }

    pub fn load(storage: &dyn StorageAdapter, epsilon_max: f64, delta: f64) -> Result<Self, PrivacyError> {
        match storage.read(BUDGET_PATH) {
            Ok(bytes) => {
                let budget: PrivacyBudget = serde_json::from_slice(&bytes)
                    .map_err(|e| PrivacyError::Malformed(e.to_string()))?;
                Ok(budget)
            }
            Err(memvcs_storage::StorageError::NotFound(_)) => {
                let budget = PrivacyBudget::new(epsilon_max, delta);
                budget.save(storage)?;
                Ok(budget)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, storage: &dyn StorageAdapter) -> Result<(), PrivacyError> {
        let bytes =
            serde_json::to_vec_pretty(self).map_err(|e| PrivacyError::Malformed(e.to_string()))?;
        storage.write(BUDGET_PATH, &bytes)?;
        Ok(())
    }

    /// Try to spend `epsilon_cost` against the budget. Returns `true` and
    /// persists the new total on success; returns `false` and leaves the
    /// stored budget untouched on denial (I6/P6).
    pub fn spend(&mut self, storage: &dyn StorageAdapter, epsilon_cost: f64) -> Result<bool, PrivacyError> {
        if epsilon_cost <= 0.0 {
            return Err(PrivacyError::InvalidParameters);
        }
        if self.epsilon_spent + epsilon_cost > self.epsilon_max {
            warn!(
                epsilon_cost,
                epsilon_spent = self.epsilon_spent,
                epsilon_max = self.epsilon_max,
                "privacy budget denied"
            );
            return Ok(false);
        }
        self.epsilon_spent += epsilon_cost;
        self.save(storage)?;
        info!(
            epsilon_cost,
            epsilon_spent = self.epsilon_spent,
            "privacy budget spent"
        );
        Ok(true)
    }
}

/// Analytic Gaussian mechanism: draws zero-mean noise with
/// `sigma = sensitivity * sqrt(2 * ln(1.25 / delta)) / epsilon` and adds it
/// to `value`. The RNG is seeded from the OS on every call — this must
/// never be made deterministic, or repeated queries against the same
/// value would leak it exactly.
pub fn gaussian_noise(value: f64, sensitivity: f64, epsilon: f64, delta: f64) -> Result<f64, PrivacyError> {
    if sensitivity <= 0.0 || epsilon <= 0.0 || delta <= 0.0 || delta >= 1.0 {
        return Err(PrivacyError::InvalidParameters);
    }
    let sigma = sensitivity * (2.0 * (1.25 / delta).ln()).sqrt() / epsilon;
    let normal = Normal::new(0.0, sigma).map_err(|_| PrivacyError::InvalidParameters)?;
    let noise = normal.sample(&mut rand::thread_rng());
    Ok(value + noise)
}

/// Noisy count used to size DP sampling without revealing the exact
/// cluster/session size: non-negative, rounded to the nearest integer.
pub fn noisy_count(true_count: usize, epsilon: f64, delta: f64) -> Result<usize, PrivacyError> {
    let noised = gaussian_noise(true_count as f64, 1.0, epsilon, delta)?;
    Ok(noised.round().max(0.0) as usize)
}

/// Uniform sampling without replacement, used to pick which facts make it
/// into a distilled summary once the noisy sample size is known.
pub fn sample_without_replacement<T: Clone>(items: &[T], sample_size: usize) -> Vec<T> {
    if sample_size >= items.len() {
        return items.to_vec();
    }
    let mut pool: Vec<T> = items.to_vec();
    let mut rng = rand::thread_rng();
    let mut out = Vec::with_capacity(sample_size);
    for _ in 0..sample_size {
        let idx = rng.gen_range(0..pool.len());
        out.push(pool.swap_remove(idx));
    }
    out
}
