//! Batch-level metrics for the evaluator

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Evaluator counters and batch latency percentiles
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Batches that ran to completion or failure
    pub total_batches: u64,

    /// Permissions evaluated successfully
    pub total_permissions: u64,

    /// Permissions that evaluated to PERMIT
    pub permitted: u64,

    /// Permissions that evaluated to DENY
    pub denied: u64,

    /// Failed batches
    pub error_count: u64,

    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,
    pub avg_latency_ms: f64,
}

impl EngineMetrics {
    /// Share of evaluated permissions that were permitted
    pub fn permit_rate(&self) -> f64 {
        let total = self.permitted + self.denied;
        if total == 0 {
            0.0
        } else {
            self.permitted as f64 / total as f64
        }
    }
}

/// Metrics collector shared by the scheduler
pub struct MetricsCollector {
    metrics: Arc<RwLock<EngineMetrics>>,

    /// Recent batch latencies in milliseconds
    latency_samples: Arc<RwLock<Vec<f64>>>,

    max_samples: usize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(max_samples: usize) -> Self {
        Self {
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::with_capacity(max_samples))),
            max_samples: max_samples.max(1),
        }
    }

    /// Record a completed batch
    pub async fn record_batch(&self, permitted: u64, denied: u64, latency: Duration) {
        {
            let mut metrics = self.metrics.write().await;
            metrics.total_batches += 1;
            metrics.total_permissions += permitted + denied;
            metrics.permitted += permitted;
            metrics.denied += denied;
        }
        self.record_latency(latency).await;
    }

    /// Record a failed batch
    pub async fn record_error(&self, latency: Duration) {
        {
            let mut metrics = self.metrics.write().await;
            metrics.total_batches += 1;
            metrics.error_count += 1;
        }
        self.record_latency(latency).await;
    }

    async fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.write().await;
        samples.push(latency_ms);

        if samples.len() > self.max_samples {
            let excess = samples.len() - self.max_samples;
            samples.drain(0..excess);
        }

        let mut sorted = samples.clone();
        sorted.sort_by(f64::total_cmp);

        let mut metrics = self.metrics.write().await;
        metrics.avg_latency_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;
        metrics.latency_p50_ms = Self::percentile(&sorted, 0.50);
        metrics.latency_p90_ms = Self::percentile(&sorted, 0.90);
        metrics.latency_p99_ms = Self::percentile(&sorted, 0.99);
    }

    /// Current metrics snapshot
    pub async fn get_metrics(&self) -> EngineMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn reset(&self) {
        *self.metrics.write().await = EngineMetrics::default();
        self.latency_samples.write().await.clear();
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_batch() {
        let collector = MetricsCollector::new();

        collector.record_batch(3, 1, Duration::from_millis(4)).await;
        collector.record_batch(0, 2, Duration::from_millis(8)).await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.total_batches, 2);
        assert_eq!(metrics.total_permissions, 6);
        assert_eq!(metrics.permitted, 3);
        assert_eq!(metrics.denied, 3);
        assert!((metrics.permit_rate() - 0.5).abs() < f64::EPSILON);
        assert!((metrics.avg_latency_ms - 6.0).abs() < 0.5);
    }

    #[tokio::test]
    async fn test_record_error_and_reset() {
        let collector = MetricsCollector::new();

        collector.record_error(Duration::from_millis(1)).await;
        assert_eq!(collector.get_metrics().await.error_count, 1);

        collector.reset().await;
        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.total_batches, 0);
        assert_eq!(metrics.latency_p99_ms, 0.0);
    }

    #[tokio::test]
    async fn test_sample_window_is_bounded() {
        let collector = MetricsCollector::with_capacity(2);

        collector.record_batch(1, 0, Duration::from_millis(100)).await;
        collector.record_batch(1, 0, Duration::from_millis(2)).await;
        collector.record_batch(1, 0, Duration::from_millis(4)).await;

        let metrics = collector.get_metrics().await;
        assert!((metrics.avg_latency_ms - 3.0).abs() < 0.5);
    }
}
