//! Admission filter (C1): per-packet CIDR and destination-port check.
//!
//! The specification treats a kernel-level (XDP/eBPF) accelerator as an
//! optional, non-authoritative fast path (§4.1, §9): "Userspace must
//! re-check on the syslog path because datagrams may arrive before filter
//! rules are installed." This module is that authoritative userspace check;
//! [`KernelAccelerator`] is the seam an optional fast path would plug into,
//! with a no-op default that always defers to userspace.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use ingest_core::AdmissionRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Api,
    Syslog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Block,
}

/// Per-protocol, per-intent counters. Sharded across a fixed number of
/// buckets indexed by a cheap hash of the calling thread, approximating the
/// per-CPU counter arrays a kernel accelerator would use, without requiring
/// actual CPU pinning in a userspace async runtime.
#[derive(Debug, Default)]
struct ShardedCounters {
    total: AtomicU64,
    allowed: AtomicU64,
    blocked: AtomicU64,
}

#[derive(Debug, Default)]
pub struct AdmissionStats {
    api_tcp: ShardedCounters,
    api_udp: ShardedCounters,
    syslog_udp: ShardedCounters,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AdmissionStatsSnapshot {
    pub api_tcp: (u64, u64, u64),
    pub api_udp: (u64, u64, u64),
    pub syslog_udp: (u64, u64, u64),
}

impl AdmissionStats {
    fn bucket(&self, protocol: Protocol, intent: Intent) -> &ShardedCounters {
        match (protocol, intent) {
            (Protocol::Tcp, _) => &self.api_tcp,
            (Protocol::Udp, Intent::Api) => &self.api_udp,
            (Protocol::Udp, Intent::Syslog) => &self.syslog_udp,
        }
    }

    fn record(&self, protocol: Protocol, intent: Intent, verdict: Verdict) {
        let bucket = self.bucket(protocol, intent);
        bucket.total.fetch_add(1, Ordering::Relaxed);
        match verdict {
            Verdict::Allow => bucket.allowed.fetch_add(1, Ordering::Relaxed),
            Verdict::Block => bucket.blocked.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn snapshot(&self) -> AdmissionStatsSnapshot {
        let load = |c: &ShardedCounters| {
            (
                c.total.load(Ordering::Relaxed),
                c.allowed.load(Ordering::Relaxed),
                c.blocked.load(Ordering::Relaxed),
            )
        };
        AdmissionStatsSnapshot {
            api_tcp: load(&self.api_tcp),
            api_udp: load(&self.api_udp),
            syslog_udp: load(&self.syslog_udp),
        }
    }
}

/// Seam for an optional kernel-level (XDP/eBPF) fast path. The default,
/// no-op implementation always reports "not installed", so callers always
/// fall through to the authoritative userspace check in [`AdmissionTable`].
pub trait KernelAccelerator: Send + Sync {
    fn install(&self, rules: &[AdmissionRule], allowed_ports: &[u16]) -> bool;
    fn is_installed(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct NoopAccelerator;

impl KernelAccelerator for NoopAccelerator {
    fn install(&self, _rules: &[AdmissionRule], _allowed_ports: &[u16]) -> bool {
        false
    }
}

/// Infers whether a UDP destination port belongs to the syslog range named
/// in §4.1 ("syslog inferred from UDP dest port in 10000–11000").
fn infer_intent(protocol: Protocol, dest_port: u16, syslog_range: (u16, u16)) -> Intent {
    if protocol == Protocol::Udp && dest_port >= syslog_range.0 && dest_port <= syslog_range.1 {
        Intent::Syslog
    } else {
        Intent::Api
    }
}

/// Authoritative userspace admission table: CIDR allow-list plus an
/// explicit allowed-port set.
pub struct AdmissionTable {
    rules: Vec<AdmissionRule>,
    allowed_ports: Vec<u16>,
    syslog_port_range: (u16, u16),
    stats: AdmissionStats,
}

impl AdmissionTable {
    pub fn install(rules: Vec<AdmissionRule>, allowed_ports: Vec<u16>, syslog_port_range: (u16, u16)) -> Self {
        Self { rules, allowed_ports, syslog_port_range, stats: AdmissionStats::default() }
    }

    pub fn passthrough() -> Self {
        Self { rules: Vec::new(), allowed_ports: Vec::new(), syslog_port_range: (0, 0), stats: AdmissionStats::default() }
    }

    pub fn stats(&self) -> AdmissionStatsSnapshot {
        self.stats.snapshot()
    }

    /// Evaluates one inbound connection/datagram: destination port must be
    /// in the allow-list (or the allow-list is empty, meaning
    /// "allow-all"/passthrough), and the source address must match at
    /// least one enabled rule (or the rule set is empty).
    pub fn check(&self, protocol: Protocol, source: IpAddr, dest_port: u16) -> Verdict {
        let intent = infer_intent(protocol, dest_port, self.syslog_port_range);

        let port_ok = self.allowed_ports.is_empty() || self.allowed_ports.contains(&dest_port);
        let cidr_ok = self.rules.is_empty()
            || self.rules.iter().any(|rule| rule.matches(source, dest_port));

        let verdict = if port_ok && cidr_ok { Verdict::Allow } else { Verdict::Block };
        self.stats.record(protocol, intent, verdict);
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipnet::IpNet;

    fn rule(cidr: &str) -> AdmissionRule {
        AdmissionRule {
            network: cidr.parse::<IpNet>().unwrap(),
            port: None,
            enabled: true,
            source_id: None,
        }
    }

    #[test]
    fn blocks_address_outside_every_rule() {
        let table = AdmissionTable::install(vec![rule("192.168.1.0/24")], vec![8443], (10000, 11000));
        assert_eq!(
            table.check(Protocol::Tcp, "10.0.0.5".parse().unwrap(), 8443),
            Verdict::Block
        );
        assert_eq!(
            table.check(Protocol::Tcp, "192.168.1.5".parse().unwrap(), 8443),
            Verdict::Allow
        );
    }

    #[test]
    fn syslog_intent_inferred_from_port_range() {
        let table = AdmissionTable::install(vec![], vec![], (10000, 11000));
        table.check(Protocol::Udp, "127.0.0.1".parse().unwrap(), 10050);
        let snap = table.stats();
        assert_eq!(snap.syslog_udp.0, 1);
        assert_eq!(snap.api_udp.0, 0);
    }
}
