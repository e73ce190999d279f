//! Performance monitor
//!
//! Keeps a fixed-size window of recent latency samples per operation kind
//! plus lifetime request, error and cache counters. `snapshot` turns them
//! into means and rates and evaluates alert thresholds. Shared cache outages
//! only raise an alert while the last failure is recent. Alerts are returned
//! to the caller; delivery goes through `AlertQueue`.

pub mod alerts;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::MonitorConfig;

pub use alerts::{AlertError, AlertEvent, AlertLevel, AlertQueue, AlertSink, TracingAlertSink};

/// Operation whose latency is tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyKind {
    Response,
    Embedding,
    Search,
    Generation,
}

impl LatencyKind {
    pub const ALL: [LatencyKind; 4] = [
        LatencyKind::Response,
        LatencyKind::Embedding,
        LatencyKind::Search,
        LatencyKind::Generation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LatencyKind::Response => "response",
            LatencyKind::Embedding => "embedding",
            LatencyKind::Search => "search",
            LatencyKind::Generation => "generation",
        }
    }
}

/// Ring of the most recent samples, in seconds
#[derive(Debug)]
struct SlidingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SlidingWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, value: f64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }
}

/// Host resource readings supplied by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HostMetrics {
    pub cpu_percent: f64,
    pub memory_mb: f64,
}

/// Mean latency over the current window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    /// `None` until the first sample arrives
    pub mean_secs: Option<f64>,
    pub samples: usize,
}

/// Point-in-time view of the monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub total_requests: u64,
    pub total_errors: u64,
    /// Requests per second since start
    pub request_rate: f64,
    pub error_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub cache_unavailable: u64,
    /// Seconds since the shared cache tier last failed
    pub last_cache_outage_secs: Option<f64>,
    pub latency: HashMap<LatencyKind, LatencySummary>,
    pub host: Option<HostMetrics>,
    pub alerts: Vec<AlertEvent>,
}

/// Sliding-window latency statistics and counters
#[derive(Debug)]
pub struct PerformanceMonitor {
    config: MonitorConfig,
    started: Instant,
    windows: Mutex<HashMap<LatencyKind, SlidingWindow>>,
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_unavailable: AtomicU64,
    last_cache_outage: Mutex<Option<Instant>>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let capacity = config.window_size.max(1);
        let windows = LatencyKind::ALL
            .iter()
            .map(|k| (*k, SlidingWindow::new(capacity)))
            .collect();

        Self {
            config,
            started: Instant::now(),
            windows: Mutex::new(windows),
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_unavailable: AtomicU64::new(0),
            last_cache_outage: Mutex::new(None),
        }
    }

    pub fn record_latency(&self, kind: LatencyKind, duration: Duration) {
        if let Some(window) = self.windows.lock().get_mut(&kind) {
            window.push(duration.as_secs_f64());
        }
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_outcome(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// The shared cache tier failed and the local tier was used alone
    pub fn record_cache_unavailable(&self) {
        self.cache_unavailable.fetch_add(1, Ordering::Relaxed);
        *self.last_cache_outage.lock() = Some(Instant::now());
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Compute current statistics and evaluate thresholds
    pub fn snapshot(&self, host: Option<HostMetrics>) -> MetricsSnapshot {
        let uptime_secs = self.uptime().as_secs_f64();
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_errors = self.total_errors.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let cache_unavailable = self.cache_unavailable.load(Ordering::Relaxed);
        let last_cache_outage_secs = self
            .last_cache_outage
            .lock()
            .map(|at| at.elapsed().as_secs_f64());

        let request_rate = if uptime_secs > 0.0 {
            total_requests as f64 / uptime_secs
        } else {
            0.0
        };
        let error_rate = ratio(total_errors, total_requests);
        let cache_hit_rate = ratio(cache_hits, cache_hits + cache_misses);

        let latency: HashMap<LatencyKind, LatencySummary> = self
            .windows
            .lock()
            .iter()
            .map(|(kind, w)| {
                (
                    *kind,
                    LatencySummary {
                        mean_secs: w.mean(),
                        samples: w.samples.len(),
                    },
                )
            })
            .collect();

        let mut snapshot = MetricsSnapshot {
            uptime_secs,
            total_requests,
            total_errors,
            request_rate,
            error_rate,
            cache_hits,
            cache_misses,
            cache_hit_rate,
            cache_unavailable,
            last_cache_outage_secs,
            latency,
            host,
            alerts: Vec::new(),
        };
        snapshot.alerts = self.evaluate(&snapshot);
        snapshot
    }

    fn evaluate(&self, snapshot: &MetricsSnapshot) -> Vec<AlertEvent> {
        let mut alerts = Vec::new();

        let latency_limits = [
            (LatencyKind::Response, self.config.response_time_threshold),
            (LatencyKind::Embedding, self.config.embedding_time_threshold),
            (LatencyKind::Search, self.config.search_time_threshold),
        ];
        for (kind, limit) in latency_limits {
            let mean = snapshot.latency.get(&kind).and_then(|s| s.mean_secs);
            if let Some(mean) = mean.filter(|m| *m > limit) {
                alerts.push(
                    AlertEvent::new(
                        AlertLevel::Warning,
                        format!("High {} time: {mean:.2}s (limit {limit:.2}s)", kind.as_str()),
                    )
                    .with("kind", kind.as_str())
                    .with("mean_secs", mean)
                    .with("threshold_secs", limit),
                );
            }
        }

        if snapshot.total_requests > 0 && snapshot.error_rate > self.config.error_rate_threshold {
            alerts.push(
                AlertEvent::new(
                    AlertLevel::Critical,
                    format!("High error rate: {:.1}%", snapshot.error_rate * 100.0),
                )
                .with("error_rate", snapshot.error_rate)
                .with("threshold", self.config.error_rate_threshold),
            );
        }

        let lookups = snapshot.cache_hits + snapshot.cache_misses;
        if lookups > 0 && snapshot.cache_hit_rate < self.config.cache_hit_rate_target {
            alerts.push(
                AlertEvent::new(
                    AlertLevel::Info,
                    format!("Low cache hit rate: {:.1}%", snapshot.cache_hit_rate * 100.0),
                )
                .with("cache_hit_rate", snapshot.cache_hit_rate)
                .with("target", self.config.cache_hit_rate_target),
            );
        }

        let outage_window = self.config.cache_outage_alert_secs;
        if let Some(ago) = snapshot.last_cache_outage_secs.filter(|s| *s < outage_window) {
            alerts.push(
                AlertEvent::new(
                    AlertLevel::Warning,
                    format!(
                        "Shared cache tier unavailable {:.0}s ago, serving from local tier",
                        ago
                    ),
                )
                .with("failures", snapshot.cache_unavailable)
                .with("secs_since_failure", ago),
            );
        }

        if let Some(host) = snapshot.host {
            if host.memory_mb > self.config.memory_threshold_mb {
                alerts.push(
                    AlertEvent::new(
                        AlertLevel::Warning,
                        format!("High memory usage: {:.0}MB", host.memory_mb),
                    )
                    .with("memory_mb", host.memory_mb),
                );
            }
            if host.cpu_percent > self.config.cpu_threshold_percent {
                alerts.push(
                    AlertEvent::new(
                        AlertLevel::Warning,
                        format!("High CPU usage: {:.1}%", host.cpu_percent),
                    )
                    .with("cpu_percent", host.cpu_percent),
                );
            }
        }

        alerts
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
