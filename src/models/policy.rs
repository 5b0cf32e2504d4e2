//! Symptom-based risk adjustment

use crate::types::{ProbabilityVector, RiskClass, SymptomFlags};
use serde::Deserialize;

/// Escalation policy applied to the ensemble probabilities.
///
/// Under-triage costs more than over-triage, so symptoms only ever move
/// probability mass towards [`RiskClass::High`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RiskPolicy {
    /// Minimum number of flags before the per-flag boost applies
    pub min_danger_flags: u8,
    /// High-risk boost per flag once `min_danger_flags` is reached
    pub per_flag_boost: f64,
    /// Extra high-risk factor when bleeding and growth co-occur
    pub bleed_growth_boost: f64,
    /// High-risk share above which the verdict is always HIGH
    pub escalation_floor: f64,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            min_danger_flags: 2,
            per_flag_boost: 0.15,
            bleed_growth_boost: 1.25,
            escalation_floor: 0.30,
        }
    }
}

/// Outcome of applying the policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustment {
    /// Normalized probabilities after symptom boosts
    pub probabilities: ProbabilityVector,
    /// Final class
    pub risk: RiskClass,
    /// Number of symptom flags set
    pub danger_count: u8,
    /// The escalation floor overrode the argmax
    pub escalated: bool,
}

impl RiskPolicy {
    /// Rewrite the probabilities for the reported symptoms and pick the final class.
    pub fn adjust(&self, probabilities: &ProbabilityVector, symptoms: &SymptomFlags) -> Adjustment {
        let danger_count = symptoms.danger_count();
        let mut boosted = *probabilities;

        if danger_count >= self.min_danger_flags {
            boosted[RiskClass::High] *= 1.0 + self.per_flag_boost * f64::from(danger_count);
        }
        if symptoms.bleed && symptoms.grew {
            boosted[RiskClass::High] *= self.bleed_growth_boost;
        }

        let adjusted = boosted.normalized();
        let tentative = adjusted.argmax();

        let (risk, escalated) = if adjusted[RiskClass::High] > self.escalation_floor {
            (RiskClass::High, tentative != RiskClass::High)
        } else {
            (tentative, false)
        };

        Adjustment {
            probabilities: adjusted,
            risk,
            danger_count,
            escalated,
        }
    }
}
