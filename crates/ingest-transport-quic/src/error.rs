//! QUIC error classification.
//!
//! Mirrors the teacher's `OperationKind` + `categorize_*` approach: map every
//! `quinn` failure mode onto a small set of named operations and a retry
//! hint, rather than letting raw `quinn::ConnectionError` variants leak into
//! the rest of the workspace.

use std::io;

use ingest_core::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationKind(pub &'static str);

pub const BIND: OperationKind = OperationKind("quic.bind");
pub const ACCEPT: OperationKind = OperationKind("quic.accept");
pub const CONNECT: OperationKind = OperationKind("quic.connect");
pub const OPEN_STREAM: OperationKind = OperationKind("quic.open_stream");
pub const READ: OperationKind = OperationKind("quic.read");
pub const WRITE: OperationKind = OperationKind("quic.write");

pub fn map_io_error(kind: OperationKind, err: io::Error) -> IngestError {
    IngestError::unavailable(kind.0, err.to_string())
}

pub fn map_connect_error(kind: OperationKind, err: quinn::ConnectError) -> IngestError {
    // Connection-establishment failures (refused, DNS, version mismatch) are
    // exactly the "protocol-unavailable" signal the adaptive sender (§4.8)
    // watches for, so these are always classified as retryable/unavailable
    // rather than internal.
    IngestError::unavailable(kind.0, err.to_string())
}

pub fn map_connection_error(kind: OperationKind, err: quinn::ConnectionError) -> IngestError {
    match &err {
        quinn::ConnectionError::TimedOut => timeout_error(kind),
        _ => IngestError::unavailable(kind.0, err.to_string()),
    }
}

pub fn map_write_error(kind: OperationKind, err: quinn::WriteError) -> IngestError {
    IngestError::unavailable(kind.0, err.to_string())
}

pub fn map_read_error(kind: OperationKind, err: quinn::ReadError) -> IngestError {
    IngestError::unavailable(kind.0, err.to_string())
}

pub fn timeout_error(kind: OperationKind) -> IngestError {
    IngestError::unavailable(kind.0, "operation timed out")
}

pub fn cancelled_error(kind: OperationKind) -> IngestError {
    IngestError::unavailable(kind.0, "cancelled by shutdown signal")
}

pub fn invalid_endpoint_mode(kind: OperationKind) -> IngestError {
    IngestError::internal(format!("{}: endpoint is in the wrong mode for this operation", kind.0))
}

pub fn closed_error(kind: OperationKind) -> IngestError {
    IngestError::unavailable(kind.0, "endpoint is closed")
}
