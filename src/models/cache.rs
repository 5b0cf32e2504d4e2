//! Loaded model handles, built at most once per checkpoint path

use crate::error::Result;
use crate::models::inference::EnsembleEngine;
use crate::models::loader::{default_strip_prefixes, CheckpointLoader, ExtractionStrategy};
use crate::models::topology::{default_parameters, BackboneVariant, Classifier, ParameterSchema};
use crate::preprocess::Preprocessor;
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Prefix of the parameters a pretrained backbone artifact may provide
const BACKBONE_PREFIX: &str = "features.";

/// How model handles are built
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Feature extractor size
    pub backbone: BackboneVariant,
    /// Optional artifact with pretrained feature-extractor weights
    pub pretrained_backbone: Option<PathBuf>,
    /// Seed for the default parameter initialization
    pub init_seed: u64,
    /// Wrapper prefixes stripped from checkpoint parameter names
    pub strip_prefixes: Vec<String>,
    /// Largest accepted encoded image
    pub max_image_bytes: usize,
    /// Run on CUDA device 0 when available
    pub accelerator: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backbone: BackboneVariant::default(),
            pretrained_backbone: None,
            init_seed: 42,
            strip_prefixes: default_strip_prefixes(),
            max_image_bytes: 10 * 1024 * 1024,
            accelerator: false,
        }
    }
}

impl EngineSettings {
    pub fn device(&self) -> Result<Device> {
        if self.accelerator {
            Ok(Device::cuda_if_available(0)?)
        } else {
            Ok(Device::Cpu)
        }
    }
}

/// A classifier with checkpoint parameters bound, ready for inference
#[derive(Debug)]
pub struct ModelHandle {
    engine: EnsembleEngine,
    checkpoint: PathBuf,
    strategy: ExtractionStrategy,
    matched: usize,
    missing: usize,
}

impl ModelHandle {
    /// Build the topology and bind parameters: seeded defaults, then the
    /// pretrained backbone if configured, then the checkpoint.
    pub fn load(checkpoint: &Path, settings: &EngineSettings) -> Result<Self> {
        let start = Instant::now();
        let device = settings.device()?;
        let config = settings.backbone.config();
        let schema = Classifier::schema(&config, &device)?;
        let loader = CheckpointLoader::new(settings.strip_prefixes.clone(), device.clone());

        let mut parameters = default_parameters(&schema, settings.init_seed, &device)?;

        if let Some(backbone_path) = &settings.pretrained_backbone {
            let backbone_schema: ParameterSchema = schema
                .iter()
                .filter(|(name, _)| name.starts_with(BACKBONE_PREFIX))
                .map(|(name, shape)| (name.to_string(), shape.to_vec()))
                .collect();
            let pretrained = loader.load(backbone_path, &backbone_schema)?;
            info!(
                path = %backbone_path.display(),
                matched = pretrained.matched(),
                "Pretrained backbone applied"
            );
            parameters.extend(pretrained.tensors);
        }

        let loaded = loader.load(checkpoint, &schema)?;
        if !loaded.missing.is_empty() {
            warn!(
                path = %checkpoint.display(),
                missing = loaded.missing.len(),
                "Checkpoint is partial, missing parameters keep their initial values"
            );
        }
        let matched = loaded.matched();
        let missing = loaded.missing.len();
        let strategy = loaded.strategy;
        parameters.extend(loaded.tensors);

        let classifier = Classifier::new(
            &config,
            VarBuilder::from_tensors(parameters, DType::F32, &device),
        )?;
        let preprocessor = Preprocessor::new(settings.max_image_bytes);
        let engine = EnsembleEngine::new(classifier, preprocessor, device);

        info!(
            path = %checkpoint.display(),
            backbone = ?settings.backbone,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Model handle ready"
        );

        Ok(Self {
            engine,
            checkpoint: checkpoint.to_path_buf(),
            strategy,
            matched,
            missing,
        })
    }

    pub fn engine(&self) -> &EnsembleEngine {
        &self.engine
    }

    pub fn checkpoint(&self) -> &Path {
        &self.checkpoint
    }

    /// Strategy that recognized the checkpoint
    pub fn extraction_strategy(&self) -> ExtractionStrategy {
        self.strategy
    }

    /// Parameters taken from the checkpoint
    pub fn matched_parameters(&self) -> usize {
        self.matched
    }

    /// Parameters left at their initial values
    pub fn missing_parameters(&self) -> usize {
        self.missing
    }
}

type HandleCell = Arc<OnceCell<Arc<ModelHandle>>>;

/// Registry of loaded model handles keyed by checkpoint path.
///
/// Each path gets its own init cell: the registry lock is only held to find
/// or insert the cell, so loading one checkpoint never blocks lookups of
/// another. Handles are never evicted.
#[derive(Debug)]
pub struct EngineRegistry {
    settings: EngineSettings,
    handles: Mutex<HashMap<PathBuf, HandleCell>>,
}

impl EngineRegistry {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Handle for `checkpoint`, loading it on first use.
    ///
    /// Concurrent callers for the same path wait on a single load and all
    /// receive the same handle. A failed load is not cached: the error goes
    /// to the caller and the path's cell is dropped unless another caller
    /// is still waiting on it.
    pub fn obtain<P: AsRef<Path>>(&self, checkpoint: P) -> Result<Arc<ModelHandle>> {
        let key = cache_key(checkpoint.as_ref());
        let cell = {
            let mut handles = self.handles.lock();
            Arc::clone(handles.entry(key.clone()).or_default())
        };

        match cell.get_or_try_init(|| ModelHandle::load(&key, &self.settings).map(Arc::new)) {
            Ok(handle) => Ok(Arc::clone(handle)),
            Err(e) => {
                self.discard_empty(&key, &cell);
                Err(e)
            }
        }
    }

    fn discard_empty(&self, key: &Path, cell: &HandleCell) {
        let mut handles = self.handles.lock();
        // One reference in the map and one here: nobody else can retry on it
        let unused = handles.get(key).is_some_and(|current| {
            Arc::ptr_eq(current, cell) && current.get().is_none() && Arc::strong_count(cell) == 2
        });
        if unused {
            handles.remove(key);
        }
    }

    /// Number of paths with a loaded handle
    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .values()
            .filter(|cell| cell.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cache_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
