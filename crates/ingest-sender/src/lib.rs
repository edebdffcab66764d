//! Adaptive sender (C10, §4.8): the edge-side transport external
//! collectors use to push batches into the HTTP/3 (C4/C5) receivers.
//!
//! An [`AdaptiveSender`] holds one HTTP/3 [`transport::BatchTransport`]
//! and one HTTP/1.1 fallback, tracked by [`state::ProtocolState`]. Sends
//! go through a bounded channel so a stalled transport sheds load instead
//! of buffering unboundedly, matching the receiver's own back-pressure
//! posture (§4.4).

pub mod driver;
pub mod h3_transport;
pub mod http1_transport;
pub mod state;
pub mod tls;
pub mod transport;

pub use driver::{AdaptiveSender, SenderConfig};
pub use h3_transport::H3Transport;
pub use http1_transport::Http1Transport;
pub use state::ProtocolState;
pub use transport::{BatchTransport, SendError};
