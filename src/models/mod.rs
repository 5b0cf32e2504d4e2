//! Model loading, inference and risk adjustment

pub mod aggregator;
pub mod cache;
pub mod inference;
pub mod loader;
pub mod policy;
pub mod topology;

pub use aggregator::ViewAggregator;
pub use cache::{EngineRegistry, EngineSettings, ModelHandle};
pub use inference::{EnsembleEngine, EnsemblePrediction};
pub use loader::{CheckpointLoader, CheckpointParameters, ExtractionStrategy};
pub use policy::{Adjustment, RiskPolicy};
pub use topology::{BackboneVariant, Classifier, ParameterSchema};
