//! QUIC transport for the HTTP/3 receivers (C4/C5) and the adaptive
//! sender's primary client (C10).
//!
//! `endpoint` binds/accepts/connects; the resulting [`endpoint::QuicConnection`]
//! is handed to `h3`/`h3-quinn` one layer up (`ingest-receiver`,
//! `ingest-sender`) for HTTP/3 request/response framing — this crate stops
//! at the QUIC transport, matching how the teacher's transport crates never
//! reach into application framing.

pub mod endpoint;
pub mod error;

pub use endpoint::{EndpointMode, QuicConnection, QuicEndpoint};
