//! Admission (C1), authentication (C2), and rate limiting (C3) — the gate
//! every inbound request or datagram passes through before a receiver
//! touches the queue.

pub mod admission;
pub mod auth;
pub mod ratelimit;

pub use admission::{AdmissionStats, AdmissionStatsSnapshot, AdmissionTable, Intent, KernelAccelerator, NoopAccelerator, Protocol, Verdict as AdmissionVerdict};
pub use auth::{authenticate, CachingSourceResolver, CredentialKind, SourceResolver};
pub use ratelimit::{CounterReplicator, RateLimiterGate, RecordKind, Verdict as RateVerdict};
