//! DermSight Triage Library
//!
//! Skin-lesion risk triage: tolerant checkpoint loading, multi-view ensemble
//! inference over an EfficientNet classifier, and symptom-based risk
//! adjustment into a structured verdict.

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod preprocess;
pub mod service;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::AppConfig;
pub use error::{Result, TriageError};
pub use models::cache::{EngineRegistry, EngineSettings, ModelHandle};
pub use service::{Assessment, TriageService};
pub use types::{ProbabilityVector, RiskClass, SymptomFlags, Verdict};
