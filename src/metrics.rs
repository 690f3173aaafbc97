//! Performance metrics and outcome statistics for the recognition pipeline.

use crate::error::ErrorKind;
use crate::types::classification::ClassificationResult;
use crate::types::session::SessionStatus;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Pipeline stage names used for per-stage timing
pub mod stage {
    pub const PREPROCESS: &str = "preprocess";
    pub const MODEL_LOAD: &str = "model_load";
    pub const INFERENCE: &str = "inference";
    pub const NUTRITION: &str = "nutrition";
}

/// Metrics collector for pipeline performance
pub struct PipelineMetrics {
    /// Sessions started
    pub sessions_started: AtomicU64,
    /// Sessions that ended with an accepted prediction
    pub sessions_succeeded: AtomicU64,
    /// Sessions below the confidence threshold
    pub sessions_rejected: AtomicU64,
    /// Sessions aborted by a fatal error
    pub sessions_failed: AtomicU64,
    /// Sessions discarded because a newer request for the same user arrived
    pub sessions_superseded: AtomicU64,
    /// Nutrition lookups that returned a record
    pub nutrition_hits: AtomicU64,
    /// Nutrition lookups that came back empty or failed
    pub nutrition_misses: AtomicU64,
    /// Failures by error kind
    failures_by_kind: RwLock<HashMap<String, u64>>,
    /// Accepted predictions by label
    label_counts: RwLock<HashMap<String, u64>>,
    /// End-to-end session latencies (in microseconds)
    latencies: RwLock<Vec<u64>>,
    /// Per-stage durations (in microseconds)
    stage_times: RwLock<HashMap<String, Vec<u64>>>,
    /// Classifier confidence distribution buckets
    confidence_buckets: RwLock<[u64; 10]>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl PipelineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            sessions_started: AtomicU64::new(0),
            sessions_succeeded: AtomicU64::new(0),
            sessions_rejected: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            sessions_superseded: AtomicU64::new(0),
            nutrition_hits: AtomicU64::new(0),
            nutrition_misses: AtomicU64::new(0),
            failures_by_kind: RwLock::new(HashMap::new()),
            label_counts: RwLock::new(HashMap::new()),
            latencies: RwLock::new(Vec::with_capacity(1000)),
            stage_times: RwLock::new(HashMap::new()),
            confidence_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    pub fn record_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_superseded(&self) {
        self.sessions_superseded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session that reached a terminal state
    pub fn record_outcome(&self, status: SessionStatus, latency: Duration) {
        match status {
            SessionStatus::Succeeded => &self.sessions_succeeded,
            SessionStatus::Rejected => &self.sessions_rejected,
            SessionStatus::Failed => &self.sessions_failed,
            _ => return,
        }
        .fetch_add(1, Ordering::Relaxed);

        if let Ok(mut latencies) = self.latencies.write() {
            latencies.push(latency.as_micros() as u64);
            // Keep only the most recent samples
            if latencies.len() > 10000 {
                latencies.drain(0..5000);
            }
        }
    }

    /// Record a classifier decision
    pub fn record_classification(&self, classification: &ClassificationResult) {
        let bucket = (classification.confidence.clamp(0.0, 1.0) * 10.0).min(9.0) as usize;
        if let Ok(mut buckets) = self.confidence_buckets.write() {
            buckets[bucket] += 1;
        }

        if classification.accepted {
            if let Ok(mut counts) = self.label_counts.write() {
                *counts.entry(classification.label.clone()).or_insert(0) += 1;
            }
        }
    }

    pub fn record_failure(&self, kind: ErrorKind) {
        if let Ok(mut by_kind) = self.failures_by_kind.write() {
            *by_kind.entry(kind.as_str().to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_nutrition(&self, found: bool) {
        if found {
            self.nutrition_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.nutrition_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record how long one pipeline stage took
    pub fn record_stage_time(&self, stage: &str, duration: Duration) {
        if let Ok(mut times) = self.stage_times.write() {
            let stage_times = times.entry(stage.to_string()).or_default();
            stage_times.push(duration.as_micros() as u64);
            if stage_times.len() > 1000 {
                stage_times.drain(0..500);
            }
        }
    }

    /// End-to-end latency statistics
    pub fn get_latency_stats(&self) -> LatencyStats {
        let Ok(latencies) = self.latencies.read() else {
            return LatencyStats::default();
        };
        if latencies.is_empty() {
            return LatencyStats::default();
        }

        let mut sorted = latencies.clone();
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();

        LatencyStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[percentile_index(count, 0.95)],
            p99_us: sorted[percentile_index(count, 0.99)],
            max_us: sorted[count - 1],
        }
    }

    /// Per-stage timing statistics
    pub fn get_stage_stats(&self) -> HashMap<String, StageStats> {
        let mut stats = HashMap::new();
        let Ok(times) = self.stage_times.read() else {
            return stats;
        };

        for (stage, stage_times) in times.iter() {
            if stage_times.is_empty() {
                continue;
            }

            let mut sorted = stage_times.clone();
            sorted.sort_unstable();

            let count = sorted.len();
            let sum: u64 = sorted.iter().sum();

            stats.insert(
                stage.clone(),
                StageStats {
                    calls: count as u64,
                    mean_us: sum / count as u64,
                    p50_us: sorted[count / 2],
                    p99_us: sorted[percentile_index(count, 0.99)],
                },
            );
        }

        stats
    }

    /// Share of finished sessions that produced an accepted prediction
    pub fn acceptance_rate(&self) -> f64 {
        let succeeded = self.sessions_succeeded.load(Ordering::Relaxed);
        let rejected = self.sessions_rejected.load(Ordering::Relaxed);
        let decided = succeeded + rejected;
        if decided > 0 {
            succeeded as f64 / decided as f64
        } else {
            0.0
        }
    }

    /// Sessions finished per second since startup
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let finished = self.sessions_succeeded.load(Ordering::Relaxed)
            + self.sessions_rejected.load(Ordering::Relaxed)
            + self.sessions_failed.load(Ordering::Relaxed);
        if elapsed > 0.0 {
            finished as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_confidence_distribution(&self) -> [u64; 10] {
        self.confidence_buckets
            .read()
            .map(|buckets| *buckets)
            .unwrap_or_default()
    }

    pub fn get_failures_by_kind(&self) -> HashMap<String, u64> {
        self.failures_by_kind
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn get_label_counts(&self) -> HashMap<String, u64> {
        self.label_counts
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let started = self.sessions_started.load(Ordering::Relaxed);
        let succeeded = self.sessions_succeeded.load(Ordering::Relaxed);
        let rejected = self.sessions_rejected.load(Ordering::Relaxed);
        let failed = self.sessions_failed.load(Ordering::Relaxed);
        let superseded = self.sessions_superseded.load(Ordering::Relaxed);
        let hits = self.nutrition_hits.load(Ordering::Relaxed);
        let misses = self.nutrition_misses.load(Ordering::Relaxed);

        let latency = self.get_latency_stats();
        let failures = self.get_failures_by_kind();
        let confidence = self.get_confidence_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║          FOOD RECOGNITION PIPELINE - METRICS SUMMARY         ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Sessions Started: {:>8}  │  Throughput: {:>6.2} sessions/s ║",
            started,
            self.get_throughput()
        );
        info!(
            "║ Succeeded: {:>6}  Rejected: {:>6}  Failed: {:>6}  Stale: {:>4} ║",
            succeeded, rejected, failed, superseded
        );
        info!(
            "║ Acceptance Rate: {:>5.1}%  │  Nutrition hits/misses: {:>4}/{:<4} ║",
            self.acceptance_rate() * 100.0,
            hits,
            misses
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Latency (μs): mean={:>7} p50={:>7} p95={:>7} p99={:>7} ║",
            latency.mean_us, latency.p50_us, latency.p95_us, latency.p99_us
        );
        if !failures.is_empty() {
            info!("╠══════════════════════════════════════════════════════════════╣");
            info!("║ Failures by Kind:                                            ║");
            for (kind, count) in &failures {
                info!("║   {:12}: {:>6}                                        ║", kind, count);
            }
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Confidence Distribution:                                     ║");
        let total: u64 = confidence.iter().sum();
        for (i, &count) in confidence.iter().enumerate() {
            let pct = if total > 0 {
                (count as f64 / total as f64) * 100.0
            } else {
                0.0
            };
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

        let stage_stats = self.get_stage_stats();
        if !stage_stats.is_empty() {
            info!("Stage Times (μs):");
            for (stage, stats) in &stage_stats {
                info!(
                    "  {}: mean={} p50={} p99={} (calls={})",
                    stage, stats.mean_us, stats.p50_us, stats.p99_us, stats.calls
                );
            }
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn percentile_index(count: usize, quantile: f64) -> usize {
    ((count as f64 * quantile) as usize).min(count - 1)
}

/// End-to-end latency statistics
#[derive(Debug, Default)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Per-stage timing statistics
#[derive(Debug)]
pub struct StageStats {
    pub calls: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p99_us: u64,
}

/// Periodically logs a metrics summary
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
