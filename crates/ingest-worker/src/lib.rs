//! Worker tier (C8, C9): competing consumers over the queue broker,
//! batched sink writes, retry/dead-letter, and reclaim of stranded
//! records from dead consumers (§4.7).
//!
//! Both workers named in `spec.md` are instantiations of the same
//! generic [`batch::BatchWorker`] driver, parameterised over the record
//! transform and the [`sinks::Sink`] it writes to — the log worker
//! feeds an ECS-document sink, the metric worker feeds a pushgateway
//! exposition sink.

pub mod batch;
pub mod dead_letter;
pub mod reclaim;
pub mod sinks;
pub mod state;
pub mod transform;

pub use batch::{BatchWorker, WorkerConfig, WorkerHandles};
pub use dead_letter::DeadLetterWriter;
pub use sinks::{LogSink, MetricSink, Sink, SinkOutcome};
pub use state::WorkerState;
