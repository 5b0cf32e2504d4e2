//! Triage verdict assembled from the adjusted class probabilities

use crate::types::risk::{ProbabilityVector, RiskClass};
use crate::types::symptoms::SymptomFlags;
use serde::Serialize;
use std::fmt;

/// Static recommendation content for a risk tier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub action: &'static str,
    pub details: &'static [&'static str],
    pub urgency: &'static str,
}

static RECOMMENDATIONS: [Recommendation; 3] = [
    Recommendation {
        action: "Self-monitor at home",
        details: &[
            "Keep the area clean and moisturised",
            "Take photos monthly to track any changes",
            "Use sunscreen SPF 30+ daily",
            "Re-check in 3 months or if symptoms change",
        ],
        urgency: "No immediate action needed",
    },
    Recommendation {
        action: "Schedule a dermatology appointment",
        details: &[
            "Book a consultation within 2 weeks",
            "Avoid scratching or irritating the area",
            "Note any changes in size, colour or shape",
            "A biopsy may be recommended",
        ],
        urgency: "Consult a dermatologist within 2 weeks",
    },
    Recommendation {
        action: "Seek urgent medical attention",
        details: &[
            "See a dermatologist within 48 hours",
            "Do not delay — early detection saves lives",
            "Avoid sun exposure on the affected area",
            "Bring this report to your appointment",
        ],
        urgency: "Urgent — see a doctor within 48 hours",
    },
];

impl Recommendation {
    /// Recommendation for a risk tier
    pub fn for_class(class: RiskClass) -> &'static Recommendation {
        &RECOMMENDATIONS[class.index()]
    }
}

/// Per-class percentages, rounded to one decimal
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskScores {
    pub low_risk: f64,
    pub medium_risk: f64,
    pub high_risk: f64,
}

impl RiskScores {
    pub fn from_probabilities(probabilities: &ProbabilityVector) -> Self {
        Self {
            low_risk: percent(probabilities[RiskClass::Low]),
            medium_risk: percent(probabilities[RiskClass::Medium]),
            high_risk: percent(probabilities[RiskClass::High]),
        }
    }

    pub fn total(&self) -> f64 {
        self.low_risk + self.medium_risk + self.high_risk
    }
}

/// Symptom flags echoed back with the derived danger count
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SymptomEcho {
    pub itch: bool,
    pub bleed: bool,
    pub grew: bool,
    pub elevation: bool,
    #[serde(rename = "danger_flags")]
    pub danger_count: u8,
}

impl From<SymptomFlags> for SymptomEcho {
    fn from(flags: SymptomFlags) -> Self {
        Self {
            itch: flags.itch,
            bleed: flags.bleed,
            grew: flags.grew,
            elevation: flags.elevation,
            danger_count: flags.danger_count(),
        }
    }
}

/// Structured triage result.
///
/// Field names form the contract consumed by persistence and explanation layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    /// Marker and label of the final class
    pub prediction: String,

    /// Final risk tier
    pub risk_level: RiskClass,

    /// Probability of the final class as a percentage
    pub confidence: f64,

    /// Adjusted per-class percentages
    pub scores: RiskScores,

    /// Static next steps for the final class
    pub recommendation: &'static Recommendation,

    /// Symptom flags the policy saw
    pub symptoms_used: SymptomEcho,
}

impl Verdict {
    /// Build a verdict from the final class and adjusted probabilities
    pub fn assemble(
        risk_level: RiskClass,
        probabilities: &ProbabilityVector,
        symptoms: SymptomFlags,
    ) -> Self {
        Self {
            prediction: risk_level.prediction(),
            risk_level,
            confidence: percent(probabilities[risk_level]),
            scores: RiskScores::from_probabilities(probabilities),
            recommendation: Recommendation::for_class(risk_level),
            symptoms_used: SymptomEcho::from(symptoms),
        }
    }
}

/// Plain-text report, the block handed to explanation generators
impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symptoms = &self.symptoms_used;
        writeln!(f, "Prediction: {}", self.prediction)?;
        writeln!(f, "Risk Level: {} (0=Low, 1=Medium, 2=High)", self.risk_level.index())?;
        writeln!(f, "Confidence: {:.1}%", self.confidence)?;
        writeln!(
            f,
            "Scores: Low={:.1}%, Medium={:.1}%, High={:.1}%",
            self.scores.low_risk, self.scores.medium_risk, self.scores.high_risk
        )?;
        writeln!(f, "Recommended Action: {}", self.recommendation.action)?;
        writeln!(f, "Urgency: {}", self.recommendation.urgency)?;
        writeln!(f, "Details: {}", self.recommendation.details.join(", "))?;
        writeln!(f, "Danger Flags: {}", symptoms.danger_count)?;
        write!(
            f,
            "Itch: {}, Bleed: {}, Grew: {}, Elevation: {}",
            symptoms.itch, symptoms.bleed, symptoms.grew, symptoms.elevation
        )
    }
}

/// Probability as a percentage rounded to one decimal place, ties to even
fn percent(probability: f64) -> f64 {
    (probability * 1000.0).round_ties_even() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_low_risk() {
        let probabilities = ProbabilityVector::new(0.70, 0.20, 0.10);
        let verdict = Verdict::assemble(RiskClass::Low, &probabilities, SymptomFlags::default());

        assert_eq!(verdict.risk_level, RiskClass::Low);
        assert_eq!(verdict.confidence, 70.0);
        assert_eq!(
            verdict.scores,
            RiskScores {
                low_risk: 70.0,
                medium_risk: 20.0,
                high_risk: 10.0
            }
        );
        assert_eq!(verdict.recommendation.action, "Self-monitor at home");
        assert_eq!(verdict.symptoms_used.danger_count, 0);
    }

    #[test]
    fn test_confidence_follows_final_class() {
        // Escalated verdicts report the high-risk share, not the argmax
        let probabilities = ProbabilityVector::new(0.42, 0.17, 0.41);
        let verdict = Verdict::assemble(RiskClass::High, &probabilities, SymptomFlags::default());
        assert_eq!(verdict.confidence, 41.0);
        assert_eq!(verdict.recommendation.urgency, "Urgent — see a doctor within 48 hours");
    }

    #[test]
    fn test_verdict_json_shape() {
        let flags = SymptomFlags::new(false, true, true, false);
        let verdict = Verdict::assemble(
            RiskClass::Medium,
            &ProbabilityVector::new(0.3, 0.5, 0.2),
            flags,
        );

        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["risk_level"], 1);
        assert_eq!(json["prediction"], "🟡 Medium Risk (Pre-cancer / Watch)");
        assert_eq!(json["scores"]["medium_risk"], 50.0);
        assert_eq!(json["recommendation"]["details"].as_array().unwrap().len(), 4);
        assert_eq!(json["symptoms_used"]["danger_flags"], 2);
        assert_eq!(json["symptoms_used"]["bleed"], true);
    }

    #[test]
    fn test_report_text() {
        let verdict = Verdict::assemble(
            RiskClass::Low,
            &ProbabilityVector::new(0.7, 0.2, 0.1),
            SymptomFlags::new(true, false, false, false),
        );
        let report = verdict.to_string();
        assert!(report.contains("Risk Level: 0"));
        assert!(report.contains("Scores: Low=70.0%, Medium=20.0%, High=10.0%"));
        assert!(report.contains("Itch: true, Bleed: false"));
    }

    #[test]
    fn test_percent_rounding() {
        assert_eq!(percent(0.410526), 41.1);
        assert_eq!(percent(0.0), 0.0);
        assert_eq!(percent(1.0), 100.0);
        // Exact halves go to the even neighbour
        assert_eq!(percent(0.0625), 6.2);
        assert_eq!(percent(0.0375), 3.8);
        assert_eq!(percent(0.5), 50.0);
    }

    #[test]
    fn test_recommendation_copy() {
        let low = Recommendation::for_class(RiskClass::Low);
        assert_eq!(low.action, "Self-monitor at home");
        assert_eq!(
            low.details,
            [
                "Keep the area clean and moisturised",
                "Take photos monthly to track any changes",
                "Use sunscreen SPF 30+ daily",
                "Re-check in 3 months or if symptoms change",
            ]
        );
        assert_eq!(low.urgency, "No immediate action needed");

        let medium = Recommendation::for_class(RiskClass::Medium);
        assert_eq!(medium.action, "Schedule a dermatology appointment");
        assert_eq!(
            medium.details,
            [
                "Book a consultation within 2 weeks",
                "Avoid scratching or irritating the area",
                "Note any changes in size, colour or shape",
                "A biopsy may be recommended",
            ]
        );
        assert_eq!(medium.urgency, "Consult a dermatologist within 2 weeks");

        let high = Recommendation::for_class(RiskClass::High);
        assert_eq!(high.action, "Seek urgent medical attention");
        assert_eq!(
            high.details,
            [
                "See a dermatologist within 48 hours",
                "Do not delay — early detection saves lives",
                "Avoid sun exposure on the affected area",
                "Bring this report to your appointment",
            ]
        );
        assert_eq!(high.urgency, "Urgent — see a doctor within 48 hours");
    }
}
