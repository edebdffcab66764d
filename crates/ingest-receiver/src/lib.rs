//! Receiver tier (C4, C5, C6): HTTP/3, HTTP/1.1 fallback, and UDP syslog
//! ingestion, all sharing one [`pipeline::PipelineContext`] for the gate
//! + enqueue logic (§4.4, §4.5).

pub mod catalogue;
pub mod h3_api;
pub mod health;
pub mod http1;
pub mod pipeline;
pub mod request;
pub mod syslog;

pub use catalogue::{poll_desired_ports, CatalogueClient};
pub use h3_api::Http3Receiver;
pub use health::{HealthChecker, HealthReport, SinkHealthFlag};
pub use http1::Http1Receiver;
pub use pipeline::{LogsRequest, MetricsRequest, PipelineContext};
pub use syslog::SyslogReceiver;
