//! Record -> sink-shape transforms (§4.7 step 3).
//!
//! The log worker normalises a [`LogEvent`] into an ECS-style document;
//! the metric worker groups [`MetricSample`]s by `(job, instance)` and
//! renders a Prometheus exposition blob per group. Both derive a stable
//! identity from `(queue id, payload fingerprint)` so replaying the same
//! record (crash + reclaim, or a retried ack) produces the same sink
//! state (§8 invariant 2, idempotence at sink).

use sha2::{Digest, Sha256};

use ingest_core::{LogEvent, MetricSample};

/// Stable identity for a sink write, derived from the queue-assigned id
/// and a fingerprint of the payload bytes. Two deliveries of the same
/// queue id with the same payload always produce the same identity.
pub fn record_identity(record_id: &str, payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    let digest = hasher.finalize();
    format!("{record_id}-{}", hex::encode(&digest[..8]))
}

/// One document ready for the bulk index endpoint: the action line and
/// the document body, newline-delimited per the sink wire contract (§6).
pub struct EcsDocument {
    pub id: String,
    pub action_line: String,
    pub document_line: String,
}

/// Normalises a log event into an ECS-style document. Required fields
/// per the data model (§3): timestamp, schema version, message, level.
pub fn log_event_to_ecs(record_id: &str, payload: &[u8], event: &LogEvent) -> EcsDocument {
    let id = record_identity(record_id, payload);

    let mut doc = serde_json::json!({
        "@timestamp": event.timestamp.to_rfc3339(),
        "ecs.version": "8.11",
        "schema_version": event.schema_version,
        "log.level": format!("{:?}", event.level).to_uppercase(),
        "message": event.message,
        "service.name": event.service_name,
    });

    let map = doc.as_object_mut().expect("constructed as a JSON object above");
    if let Some(host) = &event.host {
        map.insert("host.name".into(), serde_json::Value::String(host.clone()));
    }
    if !event.labels.is_empty() {
        map.insert("labels".into(), serde_json::to_value(&event.labels).expect("BTreeMap<String,String> always serialises"));
    }
    if !event.tags.is_empty() {
        map.insert("tags".into(), serde_json::to_value(&event.tags).expect("Vec<String> always serialises"));
    }
    if let Some(trace_id) = &event.trace_id {
        map.insert("trace.id".into(), serde_json::Value::String(trace_id.clone()));
    }
    if let Some(span_id) = &event.span_id {
        map.insert("span.id".into(), serde_json::Value::String(span_id.clone()));
    }
    if let Some(txn_id) = &event.transaction_id {
        map.insert("transaction.id".into(), serde_json::Value::String(txn_id.clone()));
    }

    let action_line = serde_json::json!({"index": {"_id": id}}).to_string();
    let document_line = doc.to_string();

    EcsDocument { id, action_line, document_line }
}

/// Renders a batch of samples already grouped by `(job, instance)` into
/// one Prometheus exposition-format blob, per the pushgateway sink
/// contract (§6, §4.7).
pub fn metric_samples_to_exposition(samples: &[MetricSample]) -> String {
    let mut out = String::new();
    let mut seen_help = std::collections::HashSet::new();

    for sample in samples {
        if let Some(help) = &sample.help {
            if seen_help.insert(sample.name.clone()) {
                out.push_str(&format!("# HELP {} {}\n", sample.name, help));
            }
        }
        let type_name = match sample.kind {
            ingest_core::MetricKind::Counter => "counter",
            ingest_core::MetricKind::Gauge => "gauge",
            ingest_core::MetricKind::Histogram => "histogram",
            ingest_core::MetricKind::Summary => "summary",
        };
        out.push_str(&format!("# TYPE {} {}\n", sample.name, type_name));

        let labels = render_labels(sample);
        out.push_str(&format!("{}{} {}\n", sample.name, labels, format_value(sample.value)));

        for (le, count) in &sample.buckets {
            let mut bucket_labels = sample.labels.clone();
            bucket_labels.insert("le".to_string(), format_value(*le));
            out.push_str(&format!(
                "{}_bucket{} {}\n",
                sample.name,
                render_label_map(&bucket_labels),
                count
            ));
        }
    }
    out
}

fn render_labels(sample: &MetricSample) -> String {
    render_label_map(&sample.labels)
}

fn render_label_map(labels: &std::collections::BTreeMap<String, String>) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let body = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{body}}}")
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ingest_core::LogLevel;
    use std::collections::BTreeMap;

    #[test]
    fn same_record_id_and_payload_yields_same_identity() {
        let a = record_identity("42-0", b"payload");
        let b = record_identity("42-0", b"payload");
        assert_eq!(a, b);
    }

    #[test]
    fn different_payload_yields_different_identity() {
        let a = record_identity("42-0", b"payload-a");
        let b = record_identity("42-0", b"payload-b");
        assert_ne!(a, b);
    }

    #[test]
    fn s6_ecs_document_carries_required_fields() {
        let event = LogEvent {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: "hi".into(),
            service_name: "auth".into(),
            host: Some("h".into()),
            labels: BTreeMap::new(),
            tags: vec![],
            trace_id: None,
            span_id: None,
            transaction_id: None,
            schema_version: "1".into(),
        };
        let doc = log_event_to_ecs("1-0", b"x", &event);
        assert!(doc.document_line.contains("\"message\":\"hi\""));
        assert!(doc.document_line.contains("\"log.level\":\"INFO\""));
        assert!(doc.document_line.contains("\"service.name\":\"auth\""));
    }

    #[test]
    fn s4_exposition_contains_metric_line() {
        let mut labels = BTreeMap::new();
        labels.insert("method".to_string(), "GET".to_string());
        let sample = MetricSample {
            name: "http_requests_total".into(),
            kind: ingest_core::MetricKind::Counter,
            value: 1245.0,
            labels,
            timestamp_ms: 0,
            help: None,
            buckets: vec![],
        };
        let blob = metric_samples_to_exposition(&[sample]);
        assert!(blob.contains("http_requests_total{method=\"GET\"} 1245"));
    }
}
