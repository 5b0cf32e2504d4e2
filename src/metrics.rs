//! Triage statistics for a run of the engine.

use crate::types::RiskClass;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Number of buckets in the high-risk probability histogram
const HIGH_RISK_BUCKETS: usize = 10;
/// Width of the widest risk label
const LABEL_WIDTH: usize = 32;

/// Metrics collector for triage runs
pub struct TriageMetrics {
    /// Cases that produced a verdict
    pub cases_processed: AtomicU64,
    /// Cases that failed with a per-request error
    pub cases_failed: AtomicU64,
    /// Verdicts where the escalation floor overrode the argmax
    pub escalations: AtomicU64,
    /// Verdicts per risk level, indexed by class
    verdicts_by_level: [AtomicU64; 3],
    /// Processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Adjusted high-risk probability distribution buckets
    high_risk_buckets: RwLock<[u64; HIGH_RISK_BUCKETS]>,
    /// Agreement between ensemble views, per case
    view_agreements: RwLock<Vec<f64>>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl TriageMetrics {
    pub fn new() -> Self {
        Self {
            cases_processed: AtomicU64::new(0),
            cases_failed: AtomicU64::new(0),
            escalations: AtomicU64::new(0),
            verdicts_by_level: Default::default(),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            high_risk_buckets: RwLock::new([0; HIGH_RISK_BUCKETS]),
            view_agreements: RwLock::new(Vec::with_capacity(1000)),
            start_time: Instant::now(),
        }
    }

    /// Record a completed case
    pub fn record_case(
        &self,
        processing_time: Duration,
        risk: RiskClass,
        high_risk_probability: f64,
        escalated: bool,
        agreement: f64,
    ) {
        self.cases_processed.fetch_add(1, Ordering::Relaxed);
        self.verdicts_by_level[risk.index()].fetch_add(1, Ordering::Relaxed);
        if escalated {
            self.escalations.fetch_add(1, Ordering::Relaxed);
        }

        {
            let mut times = self.processing_times.write();
            times.push(processing_time.as_micros() as u64);
            // Keep only the most recent samples
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }

        let bucket = ((high_risk_probability * HIGH_RISK_BUCKETS as f64) as usize)
            .min(HIGH_RISK_BUCKETS - 1);
        self.high_risk_buckets.write()[bucket] += 1;

        let mut agreements = self.view_agreements.write();
        agreements.push(agreement);
        if agreements.len() > 1000 {
            agreements.drain(0..500);
        }
    }

    /// Record a case that failed before producing a verdict
    pub fn record_failure(&self) {
        self.cases_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn verdicts_for(&self, risk: RiskClass) -> u64 {
        self.verdicts_by_level[risk.index()].load(Ordering::Relaxed)
    }

    pub fn get_processing_stats(&self) -> ProcessingStats {
        let mut sorted = self.processing_times.read().clone();
        if sorted.is_empty() {
            return ProcessingStats::default();
        }
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();
        let percentile = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: percentile(0.95),
            p99_us: percentile(0.99),
            max_us: sorted[count - 1],
        }
    }

    pub fn get_avg_agreement(&self) -> f64 {
        let agreements = self.view_agreements.read();
        if agreements.is_empty() {
            return 0.0;
        }
        agreements.iter().sum::<f64>() / agreements.len() as f64
    }

    /// Cases per second since creation
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.cases_processed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_high_risk_distribution(&self) -> [u64; HIGH_RISK_BUCKETS] {
        *self.high_risk_buckets.read()
    }

    pub fn print_summary(&self) {
        let cases = self.cases_processed.load(Ordering::Relaxed);
        let failed = self.cases_failed.load(Ordering::Relaxed);
        let escalations = self.escalations.load(Ordering::Relaxed);
        let escalation_rate = if cases > 0 {
            (escalations as f64 / cases as f64) * 100.0
        } else {
            0.0
        };

        let processing = self.get_processing_stats();
        let throughput = self.get_throughput();
        let agreement = self.get_avg_agreement();
        let distribution = self.get_high_risk_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║               LESION TRIAGE - METRICS SUMMARY                ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Cases Processed: {:>8}  │  Throughput: {:>6.2} cases/s    ║",
            cases, throughput
        );
        info!(
            "║ Cases Failed:    {:>8}  │  Escalated: {:>5} ({:>5.1}%)    ║",
            failed, escalations, escalation_rate
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Processing Time (ms): mean={:>6.1} p50={:>6.1} p95={:>6.1} max={:>6.1}",
            processing.mean_us as f64 / 1000.0,
            processing.p50_us as f64 / 1000.0,
            processing.p95_us as f64 / 1000.0,
            processing.max_us as f64 / 1000.0
        );
        info!(
            "║ View Agreement: {:>5.1}% (higher = views agree more)          ║",
            agreement * 100.0
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Verdicts by Risk Level:                                      ║");
        for class in RiskClass::ALL {
            let count = self.verdicts_for(class);
            let pct = if cases > 0 {
                (count as f64 / cases as f64) * 100.0
            } else {
                0.0
            };
            info!("{}", level_row(class, count, pct));
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Adjusted High-Risk Probability:                              ║");
        let total: u64 = distribution.iter().sum();
        for (i, &count) in distribution.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for TriageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary row for one risk level, padded to the box width
fn level_row(class: RiskClass, count: u64, pct: f64) -> String {
    format!(
        "║   {:<width$}: {:>6} ({:>5.1}%)          ║",
        class.label(),
        count,
        pct,
        width = LABEL_WIDTH
    )
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}
