//! Push-based metrics reporter.
//!
//! Periodically emits a JSON snapshot to stdout with a `METRICS_JSON:`
//! prefix for log-based collection. The daemon never opens a listening
//! socket for this.

use crate::infrastructure::observability::metrics::Metrics;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Serialize)]
struct MetricsSnapshot {
    timestamp: String,
    uptime_seconds: u64,
    version: String,
    events_ingested: u64,
    messages_dropped: u64,
    stream_reconnects: u64,
    enforcement_success: u64,
    enforcement_failed: u64,
    enforcement_skipped: u64,
}

pub struct MetricsReporter {
    metrics: Metrics,
    interval: Duration,
    started: Instant,
}

impl MetricsReporter {
    pub fn new(metrics: Metrics, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval: Duration::from_secs(interval_secs),
            started: Instant::now(),
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            let uptime = self.started.elapsed().as_secs();
            self.metrics.uptime_seconds.set(uptime as f64);

            let outcome = |name: &str| {
                self.metrics
                    .enforcement_total
                    .with_label_values(&[name])
                    .get()
            };
            let snapshot = MetricsSnapshot {
                timestamp: chrono::Utc::now().to_rfc3339(),
                uptime_seconds: uptime,
                version: env!("CARGO_PKG_VERSION").to_string(),
                events_ingested: self.metrics.events_ingested.get(),
                messages_dropped: self.metrics.messages_dropped.get(),
                stream_reconnects: self.metrics.stream_reconnects.get(),
                enforcement_success: outcome("success"),
                enforcement_failed: outcome("failed"),
                enforcement_skipped: outcome("skipped"),
            };
            match serde_json::to_string(&snapshot) {
                Ok(json) => println!("METRICS_JSON:{}", json),
                Err(e) => info!(error = %e, "metrics snapshot serialization failed"),
            }
        }
    }
}
