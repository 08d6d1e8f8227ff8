// =============================================================================
// Webhook Ingest — signature-verified alert intake for the analysis pipeline
// =============================================================================
//
// Stage order per request: content-type → body size → HMAC signature →
// per-source rate limit → dedup → parse → dispatch. Every stage increments
// its counter; counters are atomic and lock-free to read.
// =============================================================================

pub mod alert;
pub mod dedup;
pub mod handler;
pub mod rate_limit;
pub mod signature;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide ingest counters.
#[derive(Default)]
pub struct WebhookStats {
    pub total_alerts: AtomicU64,
    pub valid_alerts: AtomicU64,
    pub invalid_alerts: AtomicU64,
    pub duplicate_alerts: AtomicU64,
    pub rate_limited_alerts: AtomicU64,
    pub processing_errors: AtomicU64,
    processing_time_sum_ms: AtomicU64,
    processed_count: AtomicU64,
}

/// Serialisable snapshot for the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookStatsSnapshot {
    pub total_alerts: u64,
    pub valid_alerts: u64,
    pub invalid_alerts: u64,
    pub duplicate_alerts: u64,
    pub rate_limited_alerts: u64,
    pub processing_errors: u64,
    pub average_processing_time_ms: f64,
}

impl WebhookStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the wall time of one fully processed alert.
    pub fn record_processing_time(&self, ms: u64) {
        self.processing_time_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.processed_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WebhookStatsSnapshot {
        let count = self.processed_count.load(Ordering::Relaxed);
        let sum = self.processing_time_sum_ms.load(Ordering::Relaxed);
        WebhookStatsSnapshot {
            total_alerts: self.total_alerts.load(Ordering::Relaxed),
            valid_alerts: self.valid_alerts.load(Ordering::Relaxed),
            invalid_alerts: self.invalid_alerts.load(Ordering::Relaxed),
            duplicate_alerts: self.duplicate_alerts.load(Ordering::Relaxed),
            rate_limited_alerts: self.rate_limited_alerts.load(Ordering::Relaxed),
            processing_errors: self.processing_errors.load(Ordering::Relaxed),
            average_processing_time_ms: if count > 0 {
                sum as f64 / count as f64
            } else {
                0.0
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
