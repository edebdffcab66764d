//! TLS configuration for the HTTP/1.1 fallback listener (§4.4) and the QUIC
//! server's certificate material (shared with `ingest-transport-quic` via
//! [`hot_reload::HotReloadingServerConfig::snapshot`]).

pub mod hot_reload;
pub mod loader;

pub use hot_reload::{HotReloadingServerConfig, TlsHandshakeError};
pub use loader::{load_server_config, watch_and_reload};
