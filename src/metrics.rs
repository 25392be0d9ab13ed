//! Rolling latency window and throughput counters for one engine instance.
//!
//! Mirrors the upstream `PerformanceMonitor`: a capped window of the last
//! 1000 per-order latency samples plus monotonic order/trade counters since
//! start, from which average/percentile/throughput figures are derived on
//! demand rather than maintained incrementally.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

const WINDOW_CAPACITY: usize = 1000;

/// A point-in-time derived view of [`Metrics`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub order_count: u64,
    pub trade_count: u64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub orders_per_sec: f64,
    pub trades_per_sec: f64,
    pub elapsed_secs: f64,
}

/// Latency and throughput tracking for a single [`crate::engine::MatchingEngine`].
///
/// Recording a sample (`record_order_latency`) never blocks on I/O and never
/// suspends, so it is safe to call from inside the book's critical section.
pub struct Metrics {
    order_latencies_ms: Mutex<VecDeque<f64>>,
    order_count: AtomicU64,
    trade_count: AtomicU64,
    started_at: Instant,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            order_latencies_ms: Mutex::new(VecDeque::with_capacity(WINDOW_CAPACITY)),
            order_count: AtomicU64::new(0),
            trade_count: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Records the processing latency of one `submit`/`cancel` call.
    pub fn record_order_latency(&self, latency_ms: f64) {
        self.order_count.fetch_add(1, Ordering::Relaxed);
        let mut window = self.order_latencies_ms.lock().expect("metrics mutex poisoned");
        if window.len() >= WINDOW_CAPACITY {
            window.pop_front();
        }
        window.push_back(latency_ms);
    }

    /// Records that `n` trades were emitted by one submission.
    pub fn record_trades(&self, n: u64) {
        self.trade_count.fetch_add(n, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let elapsed_secs = self.started_at.elapsed().as_secs_f64();
        let order_count = self.order_count.load(Ordering::Relaxed);
        let trade_count = self.trade_count.load(Ordering::Relaxed);

        let window = self.order_latencies_ms.lock().expect("metrics mutex poisoned");
        let mut sorted: Vec<f64> = window.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("latency samples are never NaN"));
        drop(window);

        let avg = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64
        };

        MetricsSnapshot {
            order_count,
            trade_count,
            avg_latency_ms: avg,
            p50_latency_ms: percentile(&sorted, 50),
            p95_latency_ms: percentile(&sorted, 95),
            p99_latency_ms: percentile(&sorted, 99),
            min_latency_ms: sorted.first().copied().unwrap_or(0.0),
            max_latency_ms: sorted.last().copied().unwrap_or(0.0),
            orders_per_sec: rate(order_count, elapsed_secs),
            trades_per_sec: rate(trade_count, elapsed_secs),
            elapsed_secs,
        }
    }

    /// Renders [`MetricsSnapshot`] as a short Markdown-ish report, mirroring
    /// the upstream `PerformanceMonitor.generate_report`.
    #[must_use]
    pub fn performance_report(&self) -> String {
        let s = self.snapshot();
        if s.order_count == 0 {
            return "# Performance Report\n\nNo orders processed yet.\n".to_string();
        }

        let mut recommendations = Vec::new();
        if s.avg_latency_ms > 10.0 {
            recommendations.push("- Order processing latency is above 10ms; investigate contention on the book lock.");
        }
        if s.orders_per_sec > 0.0 && s.orders_per_sec < 1000.0 {
            recommendations.push("- Throughput is below 1000 orders/sec; check persistence/broadcast queue depths.");
        }
        if recommendations.is_empty() {
            recommendations.push("- System performing within expected bounds.");
        }

        format!(
            "# Performance Report\n\n\
             ## Throughput\n\
             - orders/sec: {:.2}\n\
             - trades/sec: {:.2}\n\
             - total orders: {}\n\
             - total trades: {}\n\n\
             ## Latency (ms)\n\
             - avg: {:.3}\n\
             - p50: {:.3}\n\
             - p95: {:.3}\n\
             - p99: {:.3}\n\
             - min: {:.3}\n\
             - max: {:.3}\n\n\
             ## Recommendations\n\
             {}\n",
            s.orders_per_sec,
            s.trades_per_sec,
            s.order_count,
            s.trade_count,
            s.avg_latency_ms,
            s.p50_latency_ms,
            s.p95_latency_ms,
            s.p99_latency_ms,
            s.min_latency_ms,
            s.max_latency_ms,
            recommendations.join("\n"),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn rate(count: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        count as f64 / elapsed_secs
    } else {
        0.0
    }
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[f64], pct: u8) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = (sorted.len() * pct as usize / 100).min(sorted.len() - 1);
    sorted[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_metrics_report_without_samples() {
        let metrics = Metrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.order_count, 0);
        assert_eq!(snapshot.avg_latency_ms, 0.0);
        assert!(metrics.performance_report().contains("No orders processed"));
    }

    #[test]
    fn tracks_average_and_percentiles() {
        let metrics = Metrics::new();
        for ms in [1.0, 2.0, 3.0, 4.0, 5.0] {
            metrics.record_order_latency(ms);
        }
        metrics.record_trades(3);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.order_count, 5);
        assert_eq!(snapshot.trade_count, 3);
        assert_eq!(snapshot.min_latency_ms, 1.0);
        assert_eq!(snapshot.max_latency_ms, 5.0);
        assert!((snapshot.avg_latency_ms - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn window_caps_at_1000_samples() {
        let metrics = Metrics::new();
        for i in 0..1500 {
            metrics.record_order_latency(i as f64);
        }
        let window = metrics.order_latencies_ms.lock().unwrap();
        assert_eq!(window.len(), WINDOW_CAPACITY);
        // Oldest samples (0..500) should have been evicted.
        assert_eq!(*window.front().unwrap(), 500.0);
    }
}
