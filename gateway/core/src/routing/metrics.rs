//! Dispatch Metrics
//!
//! Observability for tier dispatch:
//! - Attempt latencies per tier
//! - Success, timeout and error counts per tier
//! - Fallbacks, exhaustion and overload rejections
//! - Dispatches currently in flight
//!
//! Metrics are diagnostic only and never feed back into routing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use super::fallback::AttemptOutcome;

// ============================================================================
// Histogram for Latency Tracking
// ============================================================================

/// A histogram for tracking latency distributions
#[derive(Debug)]
pub struct Histogram {
    /// Bucket upper bounds (milliseconds)
    buckets: Vec<f64>,
    /// Count per bucket
    counts: Vec<AtomicU64>,
    /// Total count
    total_count: AtomicU64,
    /// Sum of all values
    sum: AtomicU64,
    /// Maximum value seen
    max: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with the given bucket boundaries
    #[must_use]
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            total_count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    /// Default buckets spanning fast-tier answers to ten-minute solves
    #[must_use]
    pub fn latency_default() -> Self {
        Self::new(vec![
            10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 60000.0,
            120_000.0, 300_000.0, 600_000.0,
        ])
    }

    /// Record a value in milliseconds
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn record(&self, value: f64) {
        if self.buckets.is_empty() {
            return;
        }
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.buckets.len() - 1);

        self.counts[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.total_count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value as u64, Ordering::Relaxed);
        self.max.fetch_max(value as u64, Ordering::Relaxed);
    }

    /// Record a duration
    #[allow(clippy::cast_precision_loss)]
    pub fn record_duration(&self, duration: Duration) {
        self.record(duration.as_millis() as f64);
    }

    /// Get histogram snapshot
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> HistogramSnapshot {
        let counts: Vec<u64> = self
            .counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();
        let total = self.total_count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);

        HistogramSnapshot {
            buckets: self.buckets.clone(),
            counts,
            total,
            max: self.max.load(Ordering::Relaxed),
            mean: if total > 0 {
                sum as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

/// Snapshot of histogram data
#[derive(Clone, Debug, Serialize)]
pub struct HistogramSnapshot {
    #[serde(skip)]
    pub buckets: Vec<f64>,
    #[serde(skip)]
    pub counts: Vec<u64>,
    pub total: u64,
    pub max: u64,
    pub mean: f64,
}

impl HistogramSnapshot {
    /// Get percentile value (bucket upper bound)
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn percentile(&self, p: f64) -> f64 {
        if self.total == 0 {
            return 0.0;
        }

        let target = ((self.total as f64 * p).ceil() as u64).max(1);
        let mut cumulative = 0u64;

        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return self.buckets[i];
            }
        }

        *self.buckets.last().unwrap_or(&0.0)
    }
}

// ============================================================================
// Counter
// ============================================================================

/// A simple atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Per-Tier Metrics
// ============================================================================

/// Metrics for a single tier
#[derive(Debug)]
pub struct TierMetrics {
    /// Attempts sent to this tier
    pub attempts: Counter,
    /// Attempts that returned a result
    pub successes: Counter,
    /// Attempts that exceeded the deadline
    pub timeouts: Counter,
    /// Attempts that failed otherwise
    pub errors: Counter,
    /// Attempt latency
    pub latency: Histogram,
}

impl TierMetrics {
    fn new() -> Self {
        Self {
            attempts: Counter::default(),
            successes: Counter::default(),
            timeouts: Counter::default(),
            errors: Counter::default(),
            latency: Histogram::latency_default(),
        }
    }

    fn summary(&self, tier_id: &str) -> TierMetricsSummary {
        let latency = self.latency.snapshot();
        TierMetricsSummary {
            tier_id: tier_id.to_string(),
            attempts: self.attempts.get(),
            successes: self.successes.get(),
            timeouts: self.timeouts.get(),
            errors: self.errors.get(),
            latency_p50_ms: latency.percentile(0.5),
            latency_p99_ms: latency.percentile(0.99),
            latency_max_ms: latency.max,
        }
    }
}

/// Summary of tier metrics
#[derive(Clone, Debug, Serialize)]
pub struct TierMetricsSummary {
    pub tier_id: String,
    pub attempts: u64,
    pub successes: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
    pub latency_max_ms: u64,
}

// ============================================================================
// Dispatch Metrics
// ============================================================================

/// Centralized metrics for the dispatcher
#[derive(Debug)]
pub struct DispatchMetrics {
    tiers: DashMap<String, Arc<TierMetrics>>,

    pub dispatches: Counter,
    pub completed: Counter,
    pub fallbacks: Counter,
    pub exhausted: Counter,
    pub rejected_oversize: Counter,
    pub overloaded: Counter,
    pub in_flight: Counter,

    started_at: Instant,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchMetrics {
    /// Create new metrics collector
    #[must_use]
    pub fn new() -> Self {
        Self {
            tiers: DashMap::new(),
            dispatches: Counter::default(),
            completed: Counter::default(),
            fallbacks: Counter::default(),
            exhausted: Counter::default(),
            rejected_oversize: Counter::default(),
            overloaded: Counter::default(),
            in_flight: Counter::default(),
            started_at: Instant::now(),
        }
    }

    /// Get or create metrics for a tier
    #[must_use]
    pub fn tier(&self, tier_id: &str) -> Arc<TierMetrics> {
        if let Some(metrics) = self.tiers.get(tier_id) {
            return Arc::clone(&metrics);
        }
        Arc::clone(
            &self
                .tiers
                .entry(tier_id.to_string())
                .or_insert_with(|| Arc::new(TierMetrics::new())),
        )
    }

    /// Record one tier attempt
    pub fn record_attempt(&self, tier_id: &str, elapsed: Duration, outcome: &AttemptOutcome) {
        let tier = self.tier(tier_id);
        tier.attempts.inc();
        tier.latency.record_duration(elapsed);
        match outcome {
            AttemptOutcome::Success => tier.successes.inc(),
            AttemptOutcome::Timeout => tier.timeouts.inc(),
            AttemptOutcome::Error(_) => tier.errors.inc(),
        }
    }

    /// Point-in-time summary
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut tiers: Vec<TierMetricsSummary> = self
            .tiers
            .iter()
            .map(|entry| entry.value().summary(entry.key()))
            .collect();
        tiers.sort_by(|a, b| a.tier_id.cmp(&b.tier_id));

        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            dispatches: self.dispatches.get(),
            completed: self.completed.get(),
            fallbacks: self.fallbacks.get(),
            exhausted: self.exhausted.get(),
            rejected_oversize: self.rejected_oversize.get(),
            overloaded: self.overloaded.get(),
            in_flight: self.in_flight.get(),
            tiers,
        }
    }
}

/// Serializable dispatcher metrics
#[derive(Clone, Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub dispatches: u64,
    pub completed: u64,
    pub fallbacks: u64,
    pub exhausted: u64,
    pub rejected_oversize: u64,
    pub overloaded: u64,
    pub in_flight: u64,
    pub tiers: Vec<TierMetricsSummary>,
}
