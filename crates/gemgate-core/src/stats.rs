use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use time::OffsetDateTime;

/// Gateway-level request counters; per-key numbers live in the pool.
#[derive(Debug)]
pub struct GatewayStats {
    started_at: OffsetDateTime,
    total_requests: AtomicU64,
    stream_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    retried_attempts: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub uptime_secs: i64,
    pub total_requests: u64,
    pub stream_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retried_attempts: u64,
}

impl Default for GatewayStats {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayStats {
    pub fn new() -> Self {
        Self {
            started_at: OffsetDateTime::now_utc(),
            total_requests: AtomicU64::new(0),
            stream_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            retried_attempts: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_request(&self, stream: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if stream {
            self.stream_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_success(&self) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retried_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started_at: self.started_at,
            uptime_secs: (OffsetDateTime::now_utc() - self.started_at)
                .whole_seconds()
                .max(0),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            stream_requests: self.stream_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            retried_attempts: self.retried_attempts.load(Ordering::Relaxed),
        }
    }
}
