//! Temporal decay models. Grounded on `confidence.py`'s `DecayModel`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayKind {
    Exponential,
    Linear,
    Step,
}

/// Maps an age into a decay factor in `[0.0, 1.0]`, parameterized by a
/// single half-life. `Exponential` halves every `half_life_days`; `Linear`
/// reaches zero at twice the half-life; `Step` drops in two discrete cliffs
/// at one and two half-lives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecayModel {
    pub kind: DecayKind,
    pub half_life_days: f64,
}

impl Default for DecayModel {
    fn default() -> Self {
        Self {
            kind: DecayKind::Exponential,
            half_life_days: 30.0,
        }
    }
}

impl DecayModel {
    pub fn new(kind: DecayKind, half_life_days: f64) -> Self {
        Self {
            kind,
            half_life_days,
        }
    }

    fn decay_constant(&self) -> f64 {
        std::f64::consts::LN_2 / self.half_life_days
    }

    pub fn calculate_decay(&self, age_days: f64) -> f64 {
        if age_days <= 0.0 {
            return 1.0;
        }
        match self.kind {
            DecayKind::Exponential => (-self.decay_constant() * age_days).exp(),
            DecayKind::Linear => {
                let max_age = self.half_life_days * 2.0;
                (1.0 - age_days / max_age).max(0.0)
            }
            DecayKind::Step => {
                if age_days < self.half_life_days {
                    1.0
                } else if age_days < self.half_life_days * 2.0 {
                    0.5
                } else {
                    0.2
                }
            }
        }
    }

    /// Days until `current_score` decays below `threshold`, or `None` when
    /// the model has no closed form for it (`Step`).
    pub fn days_until_threshold(&self, current_score: f64, threshold: f64) -> Option<f64> {
        if current_score <= threshold {
            return Some(0.0);
        }
        match self.kind {
            DecayKind::Exponential => {
                Some((current_score / threshold).ln() / self.decay_constant())
            }
            DecayKind::Linear => {
                let max_age = self.half_life_days * 2.0;
                Some(max_age * (current_score - threshold))
            }
            DecayKind::Step => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_at_zero_age_is_one() {
        for kind in [DecayKind::Exponential, DecayKind::Linear, DecayKind::Step] {
            let model = DecayModel::new(kind, 30.0);
            assert_eq!(model.calculate_decay(0.0), 1.0);
        }
    }

    #[test]
    fn exponential_halves_at_half_life() {
        let model = DecayModel::new(DecayKind::Exponential, 30.0);
        let decay = model.calculate_decay(30.0);
        assert!((decay - 0.5).abs() < 1e-9);
    }

    #[test]
    fn linear_hits_zero_at_double_half_life() {
        let model = DecayModel::new(DecayKind::Linear, 30.0);
        assert_eq!(model.calculate_decay(60.0), 0.0);
        assert_eq!(model.calculate_decay(90.0), 0.0);
    }

    #[test]
    fn step_drops_at_boundaries() {
        let model = DecayModel::new(DecayKind::Step, 30.0);
        assert_eq!(model.calculate_decay(10.0), 1.0);
        assert_eq!(model.calculate_decay(40.0), 0.5);
        assert_eq!(model.calculate_decay(100.0), 0.2);
    }

    #[test]
    fn decay_is_monotonically_non_increasing_with_age() {
        let model = DecayModel::default();
        let mut previous = 1.0;
        for day in (0..200).step_by(5) {
            let decay = model.calculate_decay(day as f64);
            assert!(decay <= previous + 1e-9);
            previous = decay;
        }
    }

    #[test]
    fn days_until_threshold_roundtrips_through_decay() {
        let model = DecayModel::new(DecayKind::Exponential, 30.0);
        let days = model.days_until_threshold(1.0, 0.5).unwrap();
        assert!((days - 30.0).abs() < 1e-6);
    }
}
