//! Shared primitives for the ingestion and dispatch pipeline.
//!
//! This crate has no knowledge of HTTP, QUIC, or Redis; it only defines the
//! vocabulary every other crate in the workspace builds on: the data model
//! (§3), the error taxonomy (§7), layered configuration (§6), the adaptive
//! backoff algorithm shared by workers and the edge sender (§4.7/§4.8), and
//! a thin observability facade used to wire up `tracing` consistently.

pub mod backoff;
pub mod config;
pub mod error;
pub mod observability;
pub mod time;
pub mod types;

pub use error::{ErrorKind, IngestError};
pub use types::*;
