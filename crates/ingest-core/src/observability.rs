//! Self-observability: structured logging init plus an in-process counter
//! registry exposed at `GET /metrics` in Prometheus text format.
//!
//! This is distinct from the metric *sink* the pipeline forwards producer
//! metrics to (§4.7/§6) — it is the ingestor's own health signal, named as
//! ambient-stack scope in the expanded specification.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing_subscriber::EnvFilter;

/// Initialises the global `tracing` subscriber with an env-filter
/// (`RUST_LOG`, defaulting to `info`) and compact formatting. Called once,
/// at process start, before any other component runs.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// A single monotonically increasing counter, named the way Prometheus
/// client libraries name them (`_total` suffix for counters).
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub const fn new() -> Self {
        Self { value: AtomicU64::new(0) }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// The fixed set of self-observability counters this service exposes.
/// Kept as a flat struct (rather than a dynamic registry) because the set
/// of series is small and known at compile time — matching how the
/// teacher's own health/status types are plain structs rather than a
/// generic metrics bus.
#[derive(Debug, Default)]
pub struct Metrics {
    pub requests_total: Counter,
    pub requests_rejected_total: Counter,
    pub records_enqueued_total: Counter,
    pub records_acked_total: Counter,
    pub records_dead_lettered_total: Counter,
    pub records_trimmed_unacked_total: Counter,
    pub sink_write_failures_total: Counter,
    pub syslog_parse_failures_total: Counter,
    pub rate_limit_throttled_total: Counter,
    pub admission_blocked_total: Counter,
    pub sender_protocol_fallbacks_total: Counter,
    pub sender_dropped_total: Counter,
}

impl Metrics {
    /// Renders the current counter values in Prometheus text exposition
    /// format, suitable for `GET /metrics`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let lines: &[(&str, &Counter)] = &[
            ("ingest_requests_total", &self.requests_total),
            ("ingest_requests_rejected_total", &self.requests_rejected_total),
            ("ingest_records_enqueued_total", &self.records_enqueued_total),
            ("ingest_records_acked_total", &self.records_acked_total),
            ("ingest_records_dead_lettered_total", &self.records_dead_lettered_total),
            ("ingest_records_trimmed_unacked_total", &self.records_trimmed_unacked_total),
            ("ingest_sink_write_failures_total", &self.sink_write_failures_total),
            ("ingest_syslog_parse_failures_total", &self.syslog_parse_failures_total),
            ("ingest_rate_limit_throttled_total", &self.rate_limit_throttled_total),
            ("ingest_admission_blocked_total", &self.admission_blocked_total),
            ("ingest_sender_protocol_fallbacks_total", &self.sender_protocol_fallbacks_total),
            ("ingest_sender_dropped_total", &self.sender_dropped_total),
        ];
        for (name, counter) in lines {
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {}", counter.get());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_every_series() {
        let metrics = Metrics::default();
        metrics.records_trimmed_unacked_total.add(3);
        let rendered = metrics.render();
        assert!(rendered.contains("ingest_records_trimmed_unacked_total 3"));
        assert!(rendered.contains("ingest_requests_total 0"));
    }
}
