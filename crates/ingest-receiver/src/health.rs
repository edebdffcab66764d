//! `GET /healthz` (§6): `{status, components: {queue, auth, sinks}}`, 200
//! when every component is `ok`, 503 otherwise.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ingest_queue::QueueBroker;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum ComponentState {
    Ok,
    Degraded,
}

impl ComponentState {
    fn from_ok(ok: bool) -> Self {
        if ok { ComponentState::Ok } else { ComponentState::Degraded }
    }
}

#[derive(Debug, Serialize)]
struct Components {
    queue: ComponentState,
    auth: ComponentState,
    sinks: ComponentState,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    status: ComponentState,
    components: Components,
}

impl HealthReport {
    pub fn http_status(&self) -> u16 {
        match self.status {
            ComponentState::Ok => 200,
            ComponentState::Degraded => 503,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Sink health is reported by the worker tier, which the receiver has no
/// direct visibility into; the supervisor flips this flag when a worker's
/// `BatchWorker` has been stuck in `Draining` or repeatedly failing its
/// sink for longer than its shutdown deadline.
#[derive(Clone, Default)]
pub struct SinkHealthFlag(Arc<AtomicBool>);

impl SinkHealthFlag {
    pub fn new_healthy() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.0.store(healthy, Ordering::Relaxed);
    }

    fn is_healthy(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct HealthChecker {
    broker: Arc<dyn QueueBroker>,
    probe_stream: String,
    probe_group: String,
    sinks: SinkHealthFlag,
}

impl HealthChecker {
    pub fn new(
        broker: Arc<dyn QueueBroker>,
        probe_stream: impl Into<String>,
        probe_group: impl Into<String>,
        sinks: SinkHealthFlag,
    ) -> Self {
        Self { broker, probe_stream: probe_stream.into(), probe_group: probe_group.into(), sinks }
    }

    /// Authentication is only "unhealthy" in the sense that checks run
    /// in-process (the cache decorator never fails); it is reported `ok`
    /// unless wired up otherwise. A real deployment would probe the
    /// catalogue directly here.
    pub async fn check(&self) -> HealthReport {
        let queue_ok = self.broker.pending(&self.probe_stream, &self.probe_group).await.is_ok();
        let components = Components {
            queue: ComponentState::from_ok(queue_ok),
            auth: ComponentState::Ok,
            sinks: ComponentState::from_ok(self.sinks.is_healthy()),
        };
        let overall =
            ComponentState::from_ok(components.queue == ComponentState::Ok && components.sinks == ComponentState::Ok);
        HealthReport { status: overall, components }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_queue::InMemoryQueueBroker;

    #[tokio::test]
    async fn healthy_queue_and_sinks_report_ok() {
        let broker: Arc<dyn QueueBroker> = Arc::new(InMemoryQueueBroker::new());
        broker.ensure_group("logs:raw", "log-workers", "0").await.unwrap();
        let checker = HealthChecker::new(broker, "logs:raw", "log-workers", SinkHealthFlag::new_healthy());
        let report = checker.check().await;
        assert_eq!(report.http_status(), 200);
    }

    #[tokio::test]
    async fn unhealthy_sinks_flip_overall_status() {
        let broker: Arc<dyn QueueBroker> = Arc::new(InMemoryQueueBroker::new());
        broker.ensure_group("logs:raw", "log-workers", "0").await.unwrap();
        let sinks = SinkHealthFlag::new_healthy();
        sinks.set_healthy(false);
        let checker = HealthChecker::new(broker, "logs:raw", "log-workers", sinks);
        let report = checker.check().await;
        assert_eq!(report.http_status(), 503);
    }
}
