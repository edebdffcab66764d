//! Data model (§3): Source, Log event, Metric sample, Stream record, Pending
//! entry, Admission rule.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

pub type SourceId = String;

/// Per-source rate class. See `RATE_TIER_*` in the configuration table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Community,
    Professional,
    Enterprise,
}

/// A registered producer, as held by the receiver's read-through cache.
///
/// Ownership lives in the external catalogue (§1 Out of scope); this struct
/// is the local, possibly-stale copy receivers actually check against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub api_keys: Vec<String>,
    pub bearer_subjects: Vec<String>,
    pub mtls_subject: Option<String>,
    pub allowed_clients: Vec<IpNet>,
    pub udp_port: Option<u16>,
    pub enabled: bool,
    pub tier: Tier,
    pub created_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,

    /// When this copy was pulled from the catalogue. Used by
    /// `CachingSourceResolver` to enforce the ≤60s staleness window (§4.4).
    #[serde(skip, default = "Instant::now")]
    pub cache_fetched_at: Instant,
}

impl Source {
    pub fn allows_client(&self, addr: IpAddr) -> bool {
        self.allowed_clients.iter().any(|net| net.contains(&addr))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Maps syslog severity (0=Emergency .. 7=Debug) onto this level table,
    /// per the facility/severity → level mapping named in §4.5.
    pub fn from_syslog_severity(severity: u8) -> Self {
        match severity {
            0..=2 => LogLevel::Fatal,
            3 => LogLevel::Error,
            4 => LogLevel::Warn,
            5 | 6 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }
}

/// §3 Log event. Required fields for the normalisation invariant:
/// timestamp, schema version, message, level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub service_name: String,
    pub host: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub transaction_id: Option<String>,
    #[serde(default = "LogEvent::default_schema_version")]
    pub schema_version: String,
}

impl LogEvent {
    pub fn default_schema_version() -> String {
        "1".to_string()
    }

    /// Rejects labels whose value does not deserialize as a plain string —
    /// the "dynamic typing" guard named in §9.
    pub fn validate(&self) -> Result<(), crate::IngestError> {
        if self.message.is_empty() {
            return Err(crate::IngestError::invalid_input("message must not be empty"));
        }
        if self.service_name.is_empty() {
            return Err(crate::IngestError::invalid_input("service_name must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

/// §3 Metric sample. `name`/label keys must match
/// `[A-Za-z_:][A-Za-z0-9_:]*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub timestamp_ms: i64,
    pub help: Option<String>,
    /// Histogram bucket boundaries with cumulative counts, ordered by `le`.
    #[serde(default)]
    pub buckets: Vec<(f64, u64)>,
}

fn is_valid_metric_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

impl MetricSample {
    pub const MAX_LABELS_PER_SOURCE: usize = 256;

    pub fn validate(&self) -> Result<(), crate::IngestError> {
        if !is_valid_metric_identifier(&self.name) {
            return Err(crate::IngestError::invalid_input(format!(
                "metric name {:?} does not match [A-Za-z_:][A-Za-z0-9_:]*",
                self.name
            )));
        }
        for key in self.labels.keys() {
            if !is_valid_metric_identifier(key) {
                return Err(crate::IngestError::invalid_input(format!(
                    "label key {key:?} does not match [A-Za-z_:][A-Za-z0-9_:]*"
                )));
            }
        }
        Ok(())
    }

    /// `(job, instance)` used by the metric worker to group pushgateway
    /// writes (§4.7 sink semantics).
    pub fn job_instance(&self) -> (String, String) {
        let job = self.labels.get("job").cloned().unwrap_or_else(|| "default".to_string());
        let instance =
            self.labels.get("instance").cloned().unwrap_or_else(|| "unknown".to_string());
        (job, instance)
    }
}

/// One validated event or sample, as carried through the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    Log(LogEvent),
    Metric(MetricSample),
}

/// §3 Stream record: a queue entry wrapping one validated payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRecord {
    /// Monotone per-stream id, assigned by the broker on append.
    pub id: String,
    pub source_id: SourceId,
    pub payload: Payload,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
}

/// §3 Pending entry: per-group metadata produced by `pending()`, consumed by
/// the stale-claim loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEntry {
    pub record_id: String,
    pub consumer: String,
    pub idle_ms: u64,
    pub delivery_count: u32,
}

/// §3 Admission rule: `(network, prefix-length, optional port, enabled)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionRule {
    pub network: IpNet,
    /// `None` matches any destination port.
    pub port: Option<u16>,
    pub enabled: bool,
    pub source_id: Option<SourceId>,
}

impl AdmissionRule {
    pub fn matches(&self, addr: IpAddr, dest_port: u16) -> bool {
        self.enabled
            && self.network.contains(&addr)
            && self.port.map(|p| p == dest_port).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syslog_severity_maps_to_level() {
        assert_eq!(LogLevel::from_syslog_severity(6), LogLevel::Info);
        assert_eq!(LogLevel::from_syslog_severity(3), LogLevel::Error);
        assert_eq!(LogLevel::from_syslog_severity(0), LogLevel::Fatal);
        assert_eq!(LogLevel::from_syslog_severity(7), LogLevel::Debug);
    }

    #[test]
    fn metric_name_validation() {
        let mut m = MetricSample {
            name: "http_requests_total".into(),
            kind: MetricKind::Counter,
            value: 1.0,
            labels: BTreeMap::new(),
            timestamp_ms: 0,
            help: None,
            buckets: vec![],
        };
        assert!(m.validate().is_ok());
        m.name = "9invalid".into();
        assert!(m.validate().is_err());
    }

    #[test]
    fn admission_rule_port_zero_equivalent_matches_any() {
        let rule = AdmissionRule {
            network: "192.168.1.0/24".parse().unwrap(),
            port: None,
            enabled: true,
            source_id: None,
        };
        assert!(rule.matches("192.168.1.5".parse().unwrap(), 10000));
        assert!(!rule.matches("10.0.0.5".parse().unwrap(), 10000));
    }
}
