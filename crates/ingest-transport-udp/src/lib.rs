//! UDP transport for the syslog receiver (C6).
//!
//! Generalises the teacher's SIP-flavoured `UdpEndpoint` (which tracked
//! `Via: rport` return routes for a signalling protocol) down to what the
//! syslog path actually needs: bind one socket per enabled source port,
//! read datagrams, and reconcile the bound set as sources are
//! enabled/disabled/reassigned (§4.5).

pub mod endpoint;
pub mod reconcile;

pub use endpoint::{UdpEndpoint, UdpSocketOptions};
pub use reconcile::{PortReconciler, ReconcileOutcome};
