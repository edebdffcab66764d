use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use dashmap::DashMap;
use ingest_core::IngestError;

use crate::endpoint::UdpEndpoint;

/// Ports opened or closed by one call to [`PortReconciler::reconcile`].
#[derive(Debug, Default, Clone)]
pub struct ReconcileOutcome {
    pub opened: Vec<u16>,
    pub closed: Vec<u16>,
    pub failed: Vec<(u16, String)>,
}

/// Keeps the set of bound UDP sockets in sync with the set of enabled
/// source ports (§4.5: "reconciles the set of desired bindings with open
/// sockets — open new, close removed").
pub struct PortReconciler {
    bind_ip: IpAddr,
    sockets: DashMap<u16, Arc<UdpEndpoint>>,
}

impl PortReconciler {
    pub fn new(bind_ip: IpAddr) -> Self {
        Self { bind_ip, sockets: DashMap::new() }
    }

    pub fn unbound() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    pub fn socket(&self, port: u16) -> Option<Arc<UdpEndpoint>> {
        self.sockets.get(&port).map(|entry| entry.clone())
    }

    pub fn bound_ports(&self) -> Vec<u16> {
        self.sockets.iter().map(|entry| *entry.key()).collect()
    }

    /// Binds sockets for ports in `desired` that are not yet bound, and
    /// drops sockets for ports no longer in `desired`. Binding one port
    /// failing does not stop the others from being reconciled.
    pub async fn reconcile(&self, desired: &BTreeSet<u16>) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        let current: BTreeSet<u16> = self.sockets.iter().map(|e| *e.key()).collect();

        for port in current.difference(desired) {
            self.sockets.remove(port);
            outcome.closed.push(*port);
        }

        for &port in desired.difference(&current) {
            let addr = SocketAddr::new(self.bind_ip, port);
            match UdpEndpoint::bind(addr).await {
                Ok(endpoint) => {
                    self.sockets.insert(port, Arc::new(endpoint));
                    outcome.opened.push(port);
                }
                Err(err) => outcome.failed.push((port, err.to_string())),
            }
        }

        outcome
    }

    pub fn is_bound(&self, port: u16) -> bool {
        self.sockets.contains_key(&port)
    }
}

impl std::fmt::Debug for PortReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortReconciler")
            .field("bind_ip", &self.bind_ip)
            .field("bound_ports", &self.bound_ports())
            .finish()
    }
}

/// Never returned to callers directly; kept so `IngestError` stays in scope
/// for downstream crates constructing their own reconciliation errors.
pub type ReconcileError = IngestError;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_new_and_closes_removed_ports() {
        let reconciler = PortReconciler::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let mut desired = BTreeSet::new();
        desired.insert(0); // ephemeral, just to prove bind succeeds
        let outcome = reconciler.reconcile(&desired).await;
        assert_eq!(outcome.opened.len(), 1);

        let bound_port = reconciler.bound_ports()[0];
        let empty = BTreeSet::new();
        let outcome2 = reconciler.reconcile(&empty).await;
        assert_eq!(outcome2.closed, vec![bound_port]);
        assert!(reconciler.bound_ports().is_empty());
    }
}
