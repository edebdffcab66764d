//! UDP syslog receiver (C6, §4.5): one socket per enabled source port,
//! RFC3164/5424 detection and parsing, normalisation to the log-event
//! schema, enqueue. Source identity is the port binding, resolved via
//! [`SourceResolver::by_udp_port`].

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ingest_core::{IngestError, LogEvent, LogLevel};
use ingest_gate::{AdmissionVerdict, Protocol};
use ingest_transport_udp::PortReconciler;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::pipeline::PipelineContext;

const MAX_DATAGRAM: usize = 16 * 1024;

pub struct SyslogReceiver {
    reconciler: Arc<PortReconciler>,
    ctx: Arc<PipelineContext>,
    readers: DashMap<u16, CancellationToken>,
}

impl SyslogReceiver {
    pub fn new(bind_ip: std::net::IpAddr, ctx: Arc<PipelineContext>) -> Self {
        Self { reconciler: Arc::new(PortReconciler::new(bind_ip)), ctx, readers: DashMap::new() }
    }

    /// Reconciles desired ports on every change of `desired_ports` until
    /// cancelled (§4.5: "on start, the component reconciles the set of
    /// desired bindings with open sockets").
    pub async fn run(self: Arc<Self>, mut desired_ports: watch::Receiver<BTreeSet<u16>>, token: CancellationToken) {
        loop {
            let desired = desired_ports.borrow().clone();
            self.reconcile_once(&desired, &token).await;

            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                changed = desired_ports.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn reconcile_once(&self, desired: &BTreeSet<u16>, token: &CancellationToken) {
        let outcome = self.reconciler.reconcile(desired).await;
        for port in &outcome.closed {
            if let Some((_, child)) = self.readers.remove(port) {
                child.cancel();
            }
        }
        for (port, reason) in &outcome.failed {
            tracing::warn!(port, error = reason, "failed to bind syslog port");
        }
        for &port in &outcome.opened {
            let Some(endpoint) = self.reconciler.socket(port) else { continue };
            let child = token.child_token();
            self.readers.insert(port, child.clone());
            let ctx = self.ctx.clone();
            tokio::spawn(read_loop(endpoint, port, ctx, child));
        }
    }
}

async fn read_loop(
    endpoint: Arc<ingest_transport_udp::UdpEndpoint>,
    port: u16,
    ctx: Arc<PipelineContext>,
    token: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let received = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            received = endpoint.recv_from(&mut buf) => received,
        };
        let (n, peer_addr) = match received {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, port, "syslog recv failed");
                continue;
            }
        };

        if ctx.admission.check(Protocol::Udp, peer_addr.ip(), port) == AdmissionVerdict::Block {
            ctx.metrics.admission_blocked_total.inc();
            continue;
        }

        let source = match ctx.resolver.by_udp_port(port).await {
            Ok(source) => source,
            Err(err) => {
                tracing::warn!(error = %err, port, "no source bound to syslog port");
                continue;
            }
        };

        match parse_datagram(&buf[..n], peer_addr) {
            Ok(event) => {
                if let Err(err) = ctx.ingest_syslog_event(&source.id, &event).await {
                    tracing::warn!(error = %err, port, "syslog event rejected");
                }
            }
            Err(err) => {
                ctx.metrics.syslog_parse_failures_total.inc();
                tracing::debug!(error = %err, port, %peer_addr, "unparseable syslog datagram");
            }
        }
    }
}

/// Parses one syslog datagram, detecting RFC5424 vs RFC3164 by the
/// presence of a version digit right after the `<PRI>` tag (§4.5).
fn parse_datagram(bytes: &[u8], peer_addr: SocketAddr) -> Result<LogEvent, IngestError> {
    let text = std::str::from_utf8(bytes).map_err(|_| IngestError::invalid_input("syslog datagram is not UTF-8"))?;
    let (pri, rest) = extract_pri(text)?;
    let (facility, severity) = split_pri(pri);

    if rest.as_bytes().first().is_some_and(u8::is_ascii_digit) && rest.as_bytes().get(1) == Some(&b' ') {
        parse_rfc5424(rest, facility, severity, peer_addr)
    } else {
        parse_rfc3164(rest, facility, severity, peer_addr)
    }
}

fn extract_pri(text: &str) -> Result<(u8, &str), IngestError> {
    let text = text.strip_prefix('<').ok_or_else(|| IngestError::invalid_input("missing <PRI> tag"))?;
    let (pri_str, rest) = text.split_once('>').ok_or_else(|| IngestError::invalid_input("unterminated <PRI> tag"))?;
    let pri: u8 = pri_str.parse().map_err(|_| IngestError::invalid_input("non-numeric PRI"))?;
    Ok((pri, rest))
}

fn split_pri(pri: u8) -> (u8, u8) {
    (pri >> 3, pri & 0x07)
}

fn parse_rfc5424(rest: &str, facility: u8, severity: u8, peer_addr: SocketAddr) -> Result<LogEvent, IngestError> {
    let mut fields = rest.splitn(7, ' ');
    let _version = fields.next().ok_or_else(|| IngestError::invalid_input("rfc5424: missing version"))?;
    let timestamp_field = fields.next().ok_or_else(|| IngestError::invalid_input("rfc5424: missing timestamp"))?;
    let hostname = fields.next().unwrap_or("-");
    let app_name = fields.next().unwrap_or("-");
    let proc_id = fields.next().unwrap_or("-");
    let _msg_id = fields.next().unwrap_or("-");
    let remainder = fields.next().unwrap_or("");

    // Structured data is either `-` or a bracketed run; the message is
    // whatever follows the last `]` (or the whole remainder if absent).
    let message = match remainder.find(']') {
        Some(idx) if remainder.starts_with('[') => remainder[idx + 1..].trim_start().to_string(),
        _ => remainder.trim_start_matches("- ").to_string(),
    };

    let timestamp = DateTime::parse_from_rfc3339(timestamp_field).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now());

    Ok(build_event(facility, severity, timestamp, hostname, app_name, proc_id, message, peer_addr))
}

fn parse_rfc3164(rest: &str, facility: u8, severity: u8, peer_addr: SocketAddr) -> Result<LogEvent, IngestError> {
    // `Mmm dd hh:mm:ss hostname tag[pid]: message` — timestamp has no
    // year or timezone in RFC3164, so local receipt time is used instead.
    let rest = rest.trim_start();
    let mut parts = rest.splitn(2, char::is_whitespace);
    let _ts_month = parts.next();
    let after_month = parts.next().unwrap_or("");

    let mut rest_parts = after_month.trim_start().splitn(3, ' ');
    let _day = rest_parts.next();
    let _time = rest_parts.next();
    let remainder = rest_parts.next().unwrap_or("");

    let mut host_and_tag = remainder.trim_start().splitn(2, ' ');
    let hostname = host_and_tag.next().unwrap_or("-");
    let tag_and_msg = host_and_tag.next().unwrap_or("");

    let (tag, message) = tag_and_msg.split_once(':').unwrap_or(("-", tag_and_msg));
    let (app_name, proc_id) = match tag.trim().strip_suffix(']').and_then(|t| t.split_once('[')) {
        Some((name, pid)) => (name, pid),
        None => (tag.trim(), "-"),
    };

    Ok(build_event(facility, severity, Utc::now(), hostname, app_name, proc_id, message.trim_start().to_string(), peer_addr))
}

fn build_event(
    facility: u8,
    severity: u8,
    timestamp: DateTime<Utc>,
    hostname: &str,
    app_name: &str,
    proc_id: &str,
    message: String,
    peer_addr: SocketAddr,
) -> LogEvent {
    let mut labels = std::collections::BTreeMap::new();
    labels.insert("syslog.facility".to_string(), facility.to_string());
    labels.insert("syslog.proc_id".to_string(), proc_id.to_string());
    labels.insert("syslog.peer_addr".to_string(), peer_addr.ip().to_string());

    LogEvent {
        timestamp,
        level: LogLevel::from_syslog_severity(severity),
        message,
        service_name: app_name.to_string(),
        host: Some(hostname.to_string()).filter(|h| h != "-"),
        labels,
        tags: vec!["syslog".to_string()],
        trace_id: None,
        span_id: None,
        transaction_id: None,
        schema_version: LogEvent::default_schema_version(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn parses_rfc3164_datagram() {
        let raw = b"<34>Oct 11 22:14:15 mymachine su: 'su root' failed for lonvick on /dev/pts/8";
        let event = parse_datagram(raw, addr()).unwrap();
        assert_eq!(event.service_name, "su");
        assert_eq!(event.host.as_deref(), Some("mymachine"));
        assert_eq!(event.level, LogLevel::Fatal);
        assert!(event.message.contains("failed for lonvick"));
    }

    #[test]
    fn parses_rfc5424_datagram() {
        let raw = b"<165>1 2003-10-11T22:14:15.003Z mymachine.example.com evntslog 1234 ID47 - An application event log entry";
        let event = parse_datagram(raw, addr()).unwrap();
        assert_eq!(event.service_name, "evntslog");
        assert_eq!(event.host.as_deref(), Some("mymachine.example.com"));
        assert!(event.message.contains("An application event log entry"));
    }

    #[test]
    fn rejects_missing_pri() {
        assert!(parse_datagram(b"no pri here", addr()).is_err());
    }
}
