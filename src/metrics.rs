//! Metrics collection for observability.
//!
//! Tracks call latency, failure counts, pending call depth and event traffic
//! for one side of a pair.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// How a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Resolved,
    Rejected,
    TimedOut,
    Disconnected,
    /// The call envelope never left this side.
    NotSent,
    /// The caller stopped waiting before the call settled.
    Abandoned,
}

/// Point-in-time snapshot of all metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    // Calls
    pub calls_total: usize,
    pub calls_resolved: usize,
    pub calls_rejected: usize,
    pub calls_timed_out: usize,
    pub calls_disconnected: usize,
    pub calls_not_sent: usize,
    pub calls_abandoned: usize,

    // Latency (milliseconds)
    pub latency_avg_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub latency_min_ms: f64,
    pub latency_max_ms: f64,

    // Pending calls
    pub pending: usize,
    pub pending_max: usize,

    // Events
    pub events_sent: usize,
    pub events_received: usize,
    pub messages_dropped: usize,
    pub calls_served: usize,

    pub timestamp: f64,
}

/// Shared metrics collector.
///
/// # Example
///
/// ```rust,no_run
/// use wtfork::{Metrics, CallOutcome};
///
/// # async fn demo() {
/// let metrics = Metrics::new();
/// let start = metrics.start_call().await;
/// // ... await the reply ...
/// metrics.end_call(start, CallOutcome::Resolved).await;
///
/// let snapshot = metrics.snapshot().await;
/// println!("Avg latency: {}ms", snapshot.latency_avg_ms);
/// # }
/// ```
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<RwLock<MetricsInner>>,
}

struct MetricsInner {
    max_latency_samples: usize,

    calls_total: usize,
    calls_resolved: usize,
    calls_rejected: usize,
    calls_timed_out: usize,
    calls_disconnected: usize,
    calls_not_sent: usize,
    calls_abandoned: usize,

    pending: usize,
    pending_max: usize,

    events_sent: usize,
    events_received: usize,
    messages_dropped: usize,
    calls_served: usize,

    // Circular buffer
    latencies: VecDeque<f64>,
}

impl MetricsInner {
    fn new(max_latency_samples: usize) -> Self {
        Self {
            max_latency_samples,
            calls_total: 0,
            calls_resolved: 0,
            calls_rejected: 0,
            calls_timed_out: 0,
            calls_disconnected: 0,
            calls_not_sent: 0,
            calls_abandoned: 0,
            pending: 0,
            pending_max: 0,
            events_sent: 0,
            events_received: 0,
            messages_dropped: 0,
            calls_served: 0,
            latencies: VecDeque::with_capacity(max_latency_samples),
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Collector keeping at most `max_latency_samples` latency samples.
    pub fn with_capacity(max_latency_samples: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsInner::new(max_latency_samples.max(1)))),
        }
    }

    /// Start tracking a call. Returns the start instant for [`Metrics::end_call`].
    pub async fn start_call(&self) -> Instant {
        let mut inner = self.inner.write().await;
        inner.calls_total += 1;
        inner.pending += 1;
        inner.pending_max = inner.pending_max.max(inner.pending);
        Instant::now()
    }

    /// Finish tracking a call. Returns latency in milliseconds.
    pub async fn end_call(&self, start_time: Instant, outcome: CallOutcome) -> f64 {
        let latency_ms = start_time.elapsed().as_secs_f64() * 1000.0;

        let mut inner = self.inner.write().await;
        inner.pending = inner.pending.saturating_sub(1);
        match outcome {
            CallOutcome::Resolved => inner.calls_resolved += 1,
            CallOutcome::Rejected => inner.calls_rejected += 1,
            CallOutcome::TimedOut => inner.calls_timed_out += 1,
            CallOutcome::Disconnected => inner.calls_disconnected += 1,
            CallOutcome::NotSent => inner.calls_not_sent += 1,
            CallOutcome::Abandoned => inner.calls_abandoned += 1,
        }

        inner.latencies.push_back(latency_ms);
        if inner.latencies.len() > inner.max_latency_samples {
            inner.latencies.pop_front();
        }

        latency_ms
    }

    pub async fn record_event_sent(&self) {
        self.inner.write().await.events_sent += 1;
    }

    pub async fn record_event_received(&self) {
        self.inner.write().await.events_received += 1;
    }

    pub async fn record_dropped(&self) {
        self.inner.write().await.messages_dropped += 1;
    }

    pub async fn record_call_served(&self) {
        self.inner.write().await.calls_served += 1;
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.read().await;

        let mut latencies: Vec<f64> = inner.latencies.iter().copied().collect();
        let (avg, p50, p95, p99, min, max) = if latencies.is_empty() {
            (0.0, 0.0, 0.0, 0.0, 0.0, 0.0)
        } else {
            latencies.sort_by(|a, b| a.total_cmp(b));
            let n = latencies.len();
            let at = |q: f64| latencies[((n as f64 * q) as usize).min(n - 1)];
            (
                latencies.iter().sum::<f64>() / n as f64,
                at(0.50),
                at(0.95),
                at(0.99),
                latencies[0],
                latencies[n - 1],
            )
        };

        MetricsSnapshot {
            calls_total: inner.calls_total,
            calls_resolved: inner.calls_resolved,
            calls_rejected: inner.calls_rejected,
            calls_timed_out: inner.calls_timed_out,
            calls_disconnected: inner.calls_disconnected,
            calls_not_sent: inner.calls_not_sent,
            calls_abandoned: inner.calls_abandoned,
            latency_avg_ms: avg,
            latency_p50_ms: p50,
            latency_p95_ms: p95,
            latency_p99_ms: p99,
            latency_min_ms: min,
            latency_max_ms: max,
            pending: inner.pending,
            pending_max: inner.pending_max,
            events_sent: inner.events_sent,
            events_received: inner.events_received,
            messages_dropped: inner.messages_dropped,
            calls_served: inner.calls_served,
            timestamp: current_timestamp(),
        }
    }

    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        let capacity = inner.max_latency_samples;
        *inner = MetricsInner::new(capacity);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn current_timestamp() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
