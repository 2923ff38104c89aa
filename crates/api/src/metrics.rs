use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub struct Metrics {
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,
    jobs_submitted: AtomicUsize,
    queries_served: AtomicUsize,
    degraded_queries: AtomicUsize,
    total_query_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            jobs_submitted: AtomicUsize::new(0),
            queries_served: AtomicUsize::new(0),
            degraded_queries: AtomicUsize::new(0),
            total_query_time_us: AtomicU64::new(0),
        })
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_job_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self, duration: std::time::Duration, degraded: bool) {
        self.queries_served.fetch_add(1, Ordering::Relaxed);
        if degraded {
            self.degraded_queries.fetch_add(1, Ordering::Relaxed);
        }
        self.total_query_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let queries = self.queries_served.load(Ordering::Relaxed);
        let total_us = self.total_query_time_us.load(Ordering::Relaxed) as f64;
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            queries_served: queries,
            degraded_queries: self.degraded_queries.load(Ordering::Relaxed),
            avg_query_time_ms: if queries > 0 {
                total_us / queries as f64 / 1000.0
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub jobs_submitted: usize,
    pub queries_served: usize,
    pub degraded_queries: usize,
    pub avg_query_time_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn snapshot_reflects_recorded_activity() {
        let metrics = Metrics::new();
        metrics.record_request(true);
        metrics.record_request(false);
        metrics.record_job_submitted();
        metrics.record_query(Duration::from_millis(10), true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.successful_requests, 1);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.jobs_submitted, 1);
        assert_eq!(snapshot.degraded_queries, 1);
        assert!(snapshot.avg_query_time_ms >= 10.0);
    }
}
