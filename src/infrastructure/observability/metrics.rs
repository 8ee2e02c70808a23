//! Prometheus metrics definitions for the risk daemon.
//!
//! All metrics use the `riskguard_` prefix. The daemon never serves HTTP;
//! metrics are pushed as JSON by the reporter.

use prometheus::{
    Gauge, IntCounter, IntCounterVec, Opts, Registry,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Events parsed from the hubs and handed to the dispatcher.
    pub events_ingested: IntCounter,
    /// Frames/payloads dropped as malformed.
    pub messages_dropped: IntCounter,
    /// Hub connection losses (both hubs).
    pub stream_reconnects: IntCounter,
    /// Enforcement calls by outcome.
    pub enforcement_total: IntCounterVec,
    /// Lockouts placed by kind.
    pub lockouts_total: IntCounterVec,
    /// Uptime in seconds.
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events_ingested = IntCounter::with_opts(Opts::new(
            "riskguard_events_ingested_total",
            "Events parsed from the hubs and dispatched",
        ))?;
        registry.register(Box::new(events_ingested.clone()))?;

        let messages_dropped = IntCounter::with_opts(Opts::new(
            "riskguard_messages_dropped_total",
            "Malformed hub frames and payloads dropped",
        ))?;
        registry.register(Box::new(messages_dropped.clone()))?;

        let stream_reconnects = IntCounter::with_opts(Opts::new(
            "riskguard_stream_reconnects_total",
            "Hub connection losses",
        ))?;
        registry.register(Box::new(stream_reconnects.clone()))?;

        let enforcement_total = IntCounterVec::new(
            Opts::new(
                "riskguard_enforcement_total",
                "Enforcement calls by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(enforcement_total.clone()))?;

        let lockouts_total = IntCounterVec::new(
            Opts::new("riskguard_lockouts_total", "Lockouts placed by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(lockouts_total.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "riskguard_uptime_seconds",
            "Seconds since daemon start",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            events_ingested,
            messages_dropped,
            stream_reconnects,
            enforcement_total,
            lockouts_total,
            uptime_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_register_and_increment() {
        let metrics = Metrics::new().unwrap();
        metrics.events_ingested.inc();
        metrics.events_ingested.inc();
        assert_eq!(metrics.events_ingested.get(), 2);
        metrics
            .enforcement_total
            .with_label_values(&["success"])
            .inc();
        assert_eq!(
            metrics
                .enforcement_total
                .with_label_values(&["success"])
                .get(),
            1
        );
    }
}
