//! Windowed cache metrics
//!
//! Hit/miss/invalidation counters over a rolling time window, kept in a
//! ring buffer that is pruned lazily on insertion. Snapshots compute hit
//! rate, p95 latency, and byte counters from the events currently inside
//! the window; two snapshots can be compared for deltas.
//!
//! The collector takes a short lock and never does I/O inside it.

use lattice_core::now_millis;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// What kind of cache event occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
    /// Served from the edge
    Hit,
    /// Fell through to origin
    Miss,
    /// Entries removed from the edge
    Invalidation,
}

#[derive(Debug, Clone)]
struct MetricEvent {
    at_ms: u64,
    kind: CacheEventKind,
    latency_ms: Option<f64>,
    bytes: u64,
    count: u64,
    namespace: Option<String>,
}

/// One per-request entry in the optional detail log
#[derive(Debug, Clone, PartialEq)]
pub struct DetailEntry {
    /// When the request was recorded
    pub at_ms: u64,
    /// Hit or miss
    pub kind: CacheEventKind,
    /// Namespace, when known
    pub namespace: Option<String>,
    /// Request latency
    pub latency_ms: Option<f64>,
}

/// Hit/miss totals for one namespace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NamespaceCounts {
    /// Hits within the window
    pub hits: u64,
    /// Misses within the window
    pub misses: u64,
}

/// Metrics configuration
#[derive(Debug, Clone)]
pub struct CacheMetricsConfig {
    /// Rolling window length
    pub window: Duration,
    /// Keep per-namespace hit/miss buckets
    pub per_namespace: bool,
    /// Keep a bounded per-request detail log
    pub max_detail_entries: Option<usize>,
}

impl Default for CacheMetricsConfig {
    fn default() -> Self {
        CacheMetricsConfig {
            window: Duration::from_secs(300),
            per_namespace: false,
            max_detail_entries: None,
        }
    }
}

/// Point-in-time view of the window
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    /// When the snapshot was taken
    pub at_ms: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Hits within the window
    pub hits: u64,
    /// Misses within the window
    pub misses: u64,
    /// Entries invalidated within the window
    pub invalidations: u64,
    /// `hits / (hits + misses)`, 0 for an empty window
    pub hit_rate: f64,
    /// 95th percentile request latency, when any latency was sampled
    pub p95_latency_ms: Option<f64>,
    /// Bytes served from the edge or through it
    pub bytes_served: u64,
    /// Bytes hits kept away from origin
    pub bytes_saved: u64,
    /// Compaction-driven invalidation rounds observed (lifetime counter)
    pub compactions: u64,
    /// Per-namespace buckets, when enabled
    pub per_namespace: HashMap<String, NamespaceCounts>,
}

/// Delta between two snapshots
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsDelta {
    /// Milliseconds between the snapshots
    pub elapsed_ms: u64,
    /// Hit difference
    pub hits: i64,
    /// Miss difference
    pub misses: i64,
    /// Invalidation difference
    pub invalidations: i64,
    /// Bytes-served difference
    pub bytes_served: i64,
}

struct Inner {
    events: VecDeque<MetricEvent>,
    detail: VecDeque<DetailEntry>,
    compactions: u64,
}

/// Windowed cache metrics collector
pub struct CacheMetrics {
    config: CacheMetricsConfig,
    inner: Mutex<Inner>,
}

impl CacheMetrics {
    /// Create a collector with the given configuration
    pub fn new(config: CacheMetricsConfig) -> Self {
        CacheMetrics {
            config,
            inner: Mutex::new(Inner {
                events: VecDeque::new(),
                detail: VecDeque::new(),
                compactions: 0,
            }),
        }
    }

    /// Create a collector with defaults (5-minute window)
    pub fn with_defaults() -> Self {
        Self::new(CacheMetricsConfig::default())
    }

    /// Record a cache hit
    pub fn record_hit(&self, namespace: Option<&str>, latency_ms: Option<f64>, bytes: u64) {
        self.record(CacheEventKind::Hit, namespace, latency_ms, bytes, 1);
    }

    /// Record a cache miss
    pub fn record_miss(&self, namespace: Option<&str>, latency_ms: Option<f64>, bytes: u64) {
        self.record(CacheEventKind::Miss, namespace, latency_ms, bytes, 1);
    }

    /// Record `count` invalidated entries
    pub fn record_invalidations(&self, namespace: Option<&str>, count: u64) {
        if count == 0 {
            return;
        }
        self.record(CacheEventKind::Invalidation, namespace, None, 0, count);
    }

    /// Record one compaction-driven invalidation round
    pub fn record_compaction(&self) {
        self.inner.lock().compactions += 1;
    }

    fn record(
        &self,
        kind: CacheEventKind,
        namespace: Option<&str>,
        latency_ms: Option<f64>,
        bytes: u64,
        count: u64,
    ) {
        let at_ms = now_millis();
        let mut inner = self.inner.lock();
        Self::prune(&mut inner.events, at_ms, self.config.window);
        inner.events.push_back(MetricEvent {
            at_ms,
            kind,
            latency_ms,
            bytes,
            count,
            namespace: namespace.map(str::to_string),
        });

        if kind != CacheEventKind::Invalidation {
            if let Some(max) = self.config.max_detail_entries {
                inner.detail.push_back(DetailEntry {
                    at_ms,
                    kind,
                    namespace: namespace.map(str::to_string),
                    latency_ms,
                });
                while inner.detail.len() > max {
                    inner.detail.pop_front();
                }
            }
        }
    }

    fn prune(events: &mut VecDeque<MetricEvent>, now_ms: u64, window: Duration) {
        let cutoff = now_ms.saturating_sub(window.as_millis() as u64);
        while events.front().map(|e| e.at_ms < cutoff).unwrap_or(false) {
            events.pop_front();
        }
    }

    /// Compute a snapshot of the current window
    pub fn snapshot(&self) -> MetricsSnapshot {
        let at_ms = now_millis();
        let mut inner = self.inner.lock();
        Self::prune(&mut inner.events, at_ms, self.config.window);

        let mut hits = 0u64;
        let mut misses = 0u64;
        let mut invalidations = 0u64;
        let mut bytes_served = 0u64;
        let mut bytes_saved = 0u64;
        let mut latencies: Vec<f64> = Vec::new();
        let mut per_namespace: HashMap<String, NamespaceCounts> = HashMap::new();

        for event in &inner.events {
            match event.kind {
                CacheEventKind::Hit => {
                    hits += 1;
                    bytes_served += event.bytes;
                    bytes_saved += event.bytes;
                }
                CacheEventKind::Miss => {
                    misses += 1;
                    bytes_served += event.bytes;
                }
                CacheEventKind::Invalidation => {
                    invalidations += event.count;
                }
            }
            if let Some(latency) = event.latency_ms {
                latencies.push(latency);
            }
            if self.config.per_namespace && event.kind != CacheEventKind::Invalidation {
                if let Some(ns) = &event.namespace {
                    let bucket = per_namespace.entry(ns.clone()).or_default();
                    match event.kind {
                        CacheEventKind::Hit => bucket.hits += 1,
                        CacheEventKind::Miss => bucket.misses += 1,
                        CacheEventKind::Invalidation => {}
                    }
                }
            }
        }

        let requests = hits + misses;
        let hit_rate = if requests == 0 {
            0.0
        } else {
            hits as f64 / requests as f64
        };

        let p95_latency_ms = if latencies.is_empty() {
            None
        } else {
            latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let rank = ((latencies.len() as f64) * 0.95).ceil() as usize;
            Some(latencies[rank.saturating_sub(1).min(latencies.len() - 1)])
        };

        MetricsSnapshot {
            at_ms,
            window_ms: self.config.window.as_millis() as u64,
            hits,
            misses,
            invalidations,
            hit_rate,
            p95_latency_ms,
            bytes_served,
            bytes_saved,
            compactions: inner.compactions,
            per_namespace,
        }
    }

    /// Compare two snapshots taken from this collector
    pub fn compare(older: &MetricsSnapshot, newer: &MetricsSnapshot) -> MetricsDelta {
        MetricsDelta {
            elapsed_ms: newer.at_ms.saturating_sub(older.at_ms),
            hits: newer.hits as i64 - older.hits as i64,
            misses: newer.misses as i64 - older.misses as i64,
            invalidations: newer.invalidations as i64 - older.invalidations as i64,
            bytes_served: newer.bytes_served as i64 - older.bytes_served as i64,
        }
    }

    /// The bounded per-request detail log, oldest first
    pub fn detail(&self) -> Vec<DetailEntry> {
        self.inner.lock().detail.iter().cloned().collect()
    }
}
