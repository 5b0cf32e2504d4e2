//! Type definitions for the triage engine

pub mod risk;
pub mod symptoms;
pub mod verdict;

pub use risk::{ProbabilityVector, RiskClass, NUM_CLASSES};
pub use symptoms::SymptomFlags;
pub use verdict::{Recommendation, RiskScores, SymptomEcho, Verdict};
