//! Multi-view ensemble inference over a single classifier

use crate::error::Result;
use crate::models::aggregator::ViewAggregator;
use crate::models::topology::Classifier;
use crate::preprocess::{Preprocessor, View};
use crate::types::{ProbabilityVector, NUM_CLASSES};
use candle_core::{DType, Device, Module, D};
use candle_nn::ops::softmax;
use tracing::debug;

/// Result of ensemble inference
#[derive(Debug, Clone)]
pub struct EnsemblePrediction {
    /// Mean of the per-view probabilities
    pub probabilities: ProbabilityVector,
    /// Probabilities of each evaluated view
    pub views: Vec<(View, ProbabilityVector)>,
    /// 1 minus the largest per-class standard deviation across views
    pub agreement: f64,
}

/// Runs the classifier over deterministic views of an image.
///
/// Forward passes only read the bound parameters, so one engine can serve
/// concurrent requests without locking.
#[derive(Debug, Clone)]
pub struct EnsembleEngine {
    classifier: Classifier,
    preprocessor: Preprocessor,
    device: Device,
}

impl EnsembleEngine {
    pub fn new(classifier: Classifier, preprocessor: Preprocessor, device: Device) -> Self {
        Self {
            classifier,
            preprocessor,
            device,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Class probabilities for encoded image bytes, averaged over every view
    pub fn predict(&self, image_bytes: &[u8]) -> Result<EnsemblePrediction> {
        let views = &View::ALL;
        let batch = self.preprocessor.batch(image_bytes, views, &self.device)?;

        let logits = self.classifier.forward(&batch)?;
        let rows = softmax(&logits, D::Minus1)?
            .to_dtype(DType::F64)?
            .to_vec2::<f64>()?;

        let per_view: Vec<(View, ProbabilityVector)> = views
            .iter()
            .zip(rows)
            .map(|(&view, row)| {
                let mut values = [0.0; NUM_CLASSES];
                for (slot, p) in values.iter_mut().zip(row) {
                    *slot = p;
                }
                (view, ProbabilityVector::from_array(values))
            })
            .collect();

        for (view, p) in &per_view {
            debug!(view = view.name(), probabilities = ?p.as_array(), "View probabilities");
        }

        let vectors: Vec<ProbabilityVector> = per_view.iter().map(|(_, p)| *p).collect();
        Ok(EnsemblePrediction {
            probabilities: ViewAggregator::mean(&vectors),
            agreement: ViewAggregator::agreement(&vectors),
            views: per_view,
        })
    }
}
