//! The two batch transports the adaptive sender chooses between (§4.8).

use async_trait::async_trait;
use bytes::Bytes;

/// How a failed send should be treated by the sender's retry loop.
#[derive(Debug)]
pub enum SendError {
    /// Connection refused, DNS failure, QUIC negotiation error, or network
    /// timeout: the protocol itself is unusable right now (§4.8), not just
    /// this one request.
    ProtocolUnavailable(String),
    /// A 4xx response: the batch itself is bad, retrying will not help.
    Rejected { status: u16 },
    /// A 5xx or other transient failure: retry the same protocol.
    Transient(String),
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::ProtocolUnavailable(msg) => write!(f, "protocol unavailable: {msg}"),
            SendError::Rejected { status } => write!(f, "rejected with status {status}"),
            SendError::Transient(msg) => write!(f, "transient failure: {msg}"),
        }
    }
}

#[async_trait]
pub trait BatchTransport: Send + Sync {
    /// Sends `body` (already serialised and optionally compressed) to
    /// `path` (`/api/v1/logs` or `/api/v1/metrics`).
    async fn send(&self, path: &str, content_encoding: Option<&str>, body: Bytes) -> Result<(), SendError>;
}
