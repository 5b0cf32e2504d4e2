//! DermSight Triage - command line entry point
//!
//! Classifies lesion photos against the configured checkpoint and prints one
//! JSON report per image. Images are processed concurrently on a bounded
//! worker pool; decoding and forward passes run on blocking threads.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use dermsight_triage::{
    config::{AppConfig, LogFormat, LoggingConfig},
    metrics::TriageMetrics,
    models::cache::EngineRegistry,
    service::TriageService,
    types::{RiskClass, SymptomFlags, Verdict},
};
use futures::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "dermsight-triage", version, about = "Skin lesion risk triage")]
struct Cli {
    /// Lesion images to classify (JPEG or PNG)
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Configuration file (defaults to config/config.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Checkpoint to load, overriding the configured one
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Free-text symptom description, e.g. "it bleeds and has grown"
    #[arg(short, long)]
    symptoms: Option<String>,

    /// The lesion itches
    #[arg(long)]
    itch: bool,

    /// The lesion bleeds
    #[arg(long)]
    bleed: bool,

    /// The lesion has grown
    #[arg(long)]
    grew: bool,

    /// The lesion is raised
    #[arg(long)]
    elevation: bool,

    /// Print the plain-text report instead of JSON
    #[arg(long)]
    text: bool,
}

impl Cli {
    fn symptom_flags(&self) -> SymptomFlags {
        let explicit = SymptomFlags::new(self.itch, self.bleed, self.grew, self.elevation);
        match &self.symptoms {
            Some(description) => SymptomFlags::from_description(description).union(explicit),
            None => explicit,
        }
    }
}

/// One triaged image
#[derive(Serialize)]
struct CaseReport {
    case_id: Uuid,
    image: PathBuf,
    created_at: DateTime<Utc>,
    verdict: Verdict,
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from_path(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => AppConfig::load()?,
    };
    init_logging(&config.logging)?;

    info!("Starting DermSight triage");

    let checkpoint = cli
        .checkpoint
        .clone()
        .unwrap_or_else(|| config.engine.checkpoint_path.clone());
    let symptoms = cli.symptom_flags();
    info!(
        checkpoint = %checkpoint.display(),
        backbone = ?config.engine.backbone,
        danger_flags = symptoms.danger_count(),
        images = cli.images.len(),
        "Configuration loaded"
    );

    let registry = Arc::new(EngineRegistry::new(config.engine.settings()));
    let service = Arc::new(TriageService::new(
        Arc::clone(&registry),
        checkpoint,
        config.policy.clone(),
    ));

    // Load failures are fatal: surface them once before any image is read
    let warm = Arc::clone(&service);
    let handle = tokio::task::spawn_blocking(move || warm.warm_up())
        .await
        .context("Model loading task panicked")?
        .context("Failed to load model")?;
    info!(
        checkpoint = %handle.checkpoint().display(),
        extraction = ?handle.extraction_strategy(),
        matched = handle.matched_parameters(),
        missing = handle.missing_parameters(),
        "Model ready"
    );

    let metrics = Arc::new(TriageMetrics::new());
    let semaphore = Arc::new(Semaphore::new(config.pipeline.workers.max(1)));
    let text = cli.text;

    let tasks: Vec<_> = cli
        .images
        .iter()
        .cloned()
        .map(|image| {
            tokio::spawn(triage_image(
                image,
                Arc::clone(&service),
                Arc::clone(&metrics),
                Arc::clone(&semaphore),
                symptoms,
                text,
            ))
        })
        .collect();

    let mut failure = None;
    for joined in join_all(tasks).await {
        match joined.context("Worker task panicked").and_then(|result| result) {
            Ok(()) => {}
            Err(e) => {
                error!(error = %format!("{e:#}"), "Triage aborted");
                failure.get_or_insert(e);
            }
        }
    }

    metrics.print_summary();

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Classify one image file and print its report.
///
/// Unreadable or undecodable images are logged and counted; only errors
/// that make the model unusable are returned.
async fn triage_image(
    image: PathBuf,
    service: Arc<TriageService>,
    metrics: Arc<TriageMetrics>,
    semaphore: Arc<Semaphore>,
    symptoms: SymptomFlags,
    text: bool,
) -> Result<()> {
    let _permit = semaphore
        .acquire_owned()
        .await
        .context("Worker pool closed")?;
    let start = Instant::now();

    let bytes = match tokio::fs::read(&image).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(image = %image.display(), error = %e, "Failed to read image");
            metrics.record_failure();
            return Ok(());
        }
    };

    let assessment = tokio::task::spawn_blocking(move || service.assess(&bytes, symptoms))
        .await
        .context("Classification task panicked")?;

    let assessment = match assessment {
        Ok(assessment) => assessment,
        Err(e) if e.is_fatal() => return Err(anyhow::Error::new(e).context("Model unavailable")),
        Err(e) => {
            warn!(image = %image.display(), error = %e, "Image rejected");
            metrics.record_failure();
            return Ok(());
        }
    };

    let processing_time = start.elapsed();
    metrics.record_case(
        processing_time,
        assessment.verdict.risk_level,
        assessment.adjustment.probabilities[RiskClass::High],
        assessment.adjustment.escalated,
        assessment.prediction.agreement,
    );
    info!(
        image = %image.display(),
        risk_level = %assessment.verdict.risk_level,
        processing_time_ms = processing_time.as_millis() as u64,
        "Case triaged"
    );

    let report = CaseReport {
        case_id: Uuid::new_v4(),
        image,
        created_at: Utc::now(),
        verdict: assessment.verdict,
    };
    if text {
        println!(
            "Case {} ({})\n{}\n",
            report.case_id,
            report.image.display(),
            report.verdict
        );
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
