//! Triage entry point: image bytes and symptoms in, verdict out

use crate::error::Result;
use crate::models::cache::{EngineRegistry, ModelHandle};
use crate::models::inference::EnsemblePrediction;
use crate::models::policy::{Adjustment, RiskPolicy};
use crate::types::{SymptomFlags, Verdict};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Everything produced while triaging one case
#[derive(Debug, Clone)]
pub struct Assessment {
    pub verdict: Verdict,
    /// Policy outcome the verdict was assembled from
    pub adjustment: Adjustment,
    /// Raw ensemble output before symptom adjustment
    pub prediction: EnsemblePrediction,
}

/// Classifies lesion images against one configured checkpoint
#[derive(Clone)]
pub struct TriageService {
    registry: Arc<EngineRegistry>,
    checkpoint: PathBuf,
    policy: RiskPolicy,
}

impl TriageService {
    pub fn new(registry: Arc<EngineRegistry>, checkpoint: impl Into<PathBuf>, policy: RiskPolicy) -> Self {
        Self {
            registry,
            checkpoint: checkpoint.into(),
            policy,
        }
    }

    pub fn checkpoint(&self) -> &Path {
        &self.checkpoint
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    /// Load the model handle now instead of on the first request
    pub fn warm_up(&self) -> Result<Arc<ModelHandle>> {
        self.registry.obtain(&self.checkpoint)
    }

    /// Classify an image and return the verdict
    pub fn classify(&self, image_bytes: &[u8], symptoms: SymptomFlags) -> Result<Verdict> {
        Ok(self.assess(image_bytes, symptoms)?.verdict)
    }

    /// Classify an image and return the verdict with the intermediate results
    pub fn assess(&self, image_bytes: &[u8], symptoms: SymptomFlags) -> Result<Assessment> {
        let handle = self.registry.obtain(&self.checkpoint)?;
        let prediction = handle.engine().predict(image_bytes)?;
        let adjustment = self.policy.adjust(&prediction.probabilities, &symptoms);
        let verdict = Verdict::assemble(adjustment.risk, &adjustment.probabilities, symptoms);

        info!(
            risk_level = %verdict.risk_level,
            confidence = verdict.confidence,
            danger_flags = adjustment.danger_count,
            escalated = adjustment.escalated,
            agreement = prediction.agreement,
            "Verdict assembled"
        );

        Ok(Assessment {
            verdict,
            adjustment,
            prediction,
        })
    }
}
