//! Metrics collection module for the on3demand governor.
//!
//! Tracks frequency requests by kind, idle transitions and backend failures.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Kind of frequency request issued by the governor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Maximum frequency (activity onset, high load, missed frame deadline)
    Max,
    /// Minimum frequency (GPU idle for a whole poll interval)
    Min,
    /// Proportional scale-down after sustained low load
    ScaleDown,
}

/// Metrics data exposed via IPC
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsResponse {
    /// Total number of frequency requests since daemon start
    pub total_requests: u64,
    /// Requests in the last hour
    pub requests_per_hour: u64,
    /// Maximum-frequency requests
    pub max_requests: u64,
    /// Minimum-frequency requests
    pub min_requests: u64,
    /// Proportional scale-down requests
    pub scale_down_requests: u64,
    /// Polling -> Idle transitions
    pub idle_transitions: u64,
    /// Backend queries or requests that failed
    pub backend_errors: u64,
    /// Uptime in seconds
    pub uptime_sec: u64,
}

/// Metrics collector for the governor
pub struct MetricsCollector {
    start_time: Instant,
    total_requests: AtomicU64,
    max_requests: AtomicU64,
    min_requests: AtomicU64,
    scale_down_requests: AtomicU64,
    idle_transitions: AtomicU64,
    backend_errors: AtomicU64,
    /// Request timestamps for per-hour calculation
    recent_requests: RwLock<Vec<Instant>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            max_requests: AtomicU64::new(0),
            min_requests: AtomicU64::new(0),
            scale_down_requests: AtomicU64::new(0),
            idle_transitions: AtomicU64::new(0),
            backend_errors: AtomicU64::new(0),
            recent_requests: RwLock::new(Vec::new()),
        }
    }

    /// Record a frequency request
    pub fn record_request(&self, kind: RequestKind) {
        let now = Instant::now();

        self.total_requests.fetch_add(1, Ordering::SeqCst);
        let counter = match kind {
            RequestKind::Max => &self.max_requests,
            RequestKind::Min => &self.min_requests,
            RequestKind::ScaleDown => &self.scale_down_requests,
        };
        counter.fetch_add(1, Ordering::SeqCst);

        if let Ok(mut requests) = self.recent_requests.write() {
            requests.push(now);
            // Keep only last hour of requests
            if let Some(hour_ago) = now.checked_sub(Duration::from_secs(3600)) {
                requests.retain(|t| *t > hour_ago);
            }
        }
    }

    pub fn record_idle_transition(&self) {
        self.idle_transitions.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_backend_error(&self) {
        self.backend_errors.fetch_add(1, Ordering::SeqCst);
    }

    /// Get current metrics
    pub fn get_metrics(&self) -> MetricsResponse {
        let now = Instant::now();
        let uptime = now.duration_since(self.start_time);

        let requests_per_hour = self
            .recent_requests
            .read()
            .map(|requests| match now.checked_sub(Duration::from_secs(3600)) {
                Some(hour_ago) => requests.iter().filter(|t| **t > hour_ago).count() as u64,
                None => requests.len() as u64,
            })
            .unwrap_or(0);

        MetricsResponse {
            total_requests: self.total_requests.load(Ordering::SeqCst),
            requests_per_hour,
            max_requests: self.max_requests.load(Ordering::SeqCst),
            min_requests: self.min_requests.load(Ordering::SeqCst),
            scale_down_requests: self.scale_down_requests.load(Ordering::SeqCst),
            idle_transitions: self.idle_transitions.load(Ordering::SeqCst),
            backend_errors: self.backend_errors.load(Ordering::SeqCst),
            uptime_sec: uptime.as_secs(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
