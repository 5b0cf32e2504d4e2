//! Configuration management for the triage engine

use crate::models::cache::EngineSettings;
use crate::models::loader::default_strip_prefixes;
use crate::models::policy::RiskPolicy;
use crate::models::topology::BackboneVariant;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat, FileSourceFile};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Location of the configuration file when none is given
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
/// Prefix of environment overrides, e.g. `DERMSIGHT__ENGINE__CHECKPOINT_PATH`
pub const ENV_PREFIX: &str = "DERMSIGHT";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub policy: RiskPolicy,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// Model configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Trained classifier checkpoint
    pub checkpoint_path: PathBuf,
    /// `efficientnet_b0` .. `efficientnet_b3`, or `{ scaled = { width_mult, depth_mult } }`
    pub backbone: BackboneVariant,
    /// Pretrained feature-extractor weights applied before the checkpoint
    pub pretrained_backbone: Option<PathBuf>,
    /// Seed for parameters the checkpoint does not provide
    pub init_seed: u64,
    /// Wrapper prefixes stripped from checkpoint parameter names
    pub strip_prefixes: Vec<String>,
    /// Largest accepted encoded image in bytes
    pub max_image_bytes: usize,
    /// Use CUDA when available
    pub accelerator: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let settings = EngineSettings::default();
        Self {
            checkpoint_path: PathBuf::from("models/skin_cancer_model.pth"),
            backbone: settings.backbone,
            pretrained_backbone: settings.pretrained_backbone,
            init_seed: settings.init_seed,
            strip_prefixes: default_strip_prefixes(),
            max_image_bytes: settings.max_image_bytes,
            accelerator: settings.accelerator,
        }
    }
}

impl EngineConfig {
    /// Settings for building model handles
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            backbone: self.backbone,
            pretrained_backbone: self.pretrained_backbone.clone(),
            init_seed: self.init_seed,
            strip_prefixes: self.strip_prefixes.clone(),
            max_image_bytes: self.max_image_bytes,
            accelerator: self.accelerator,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Images classified concurrently by the CLI
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { workers: 2 }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl AppConfig {
    /// Load `config/config.toml` if present, then environment overrides
    pub fn load() -> Result<Self> {
        Self::from_sources(
            File::from(Path::new(DEFAULT_CONFIG_PATH)).required(false),
            environment(),
        )
    }

    /// Load configuration from a specific path, then environment overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_sources(File::from(path.as_ref()), environment())
    }

    fn from_sources(file: File<FileSourceFile, FileFormat>, env: Environment) -> Result<Self> {
        let config = Config::builder()
            .add_source(file)
            .add_source(env)
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX).separator("__")
}
