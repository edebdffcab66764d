//! Queue broker interface (C7) and its two implementations: a Redis
//! Streams-backed broker for production, and an in-memory fake for
//! deterministic tests of the scenarios in §8.

pub mod broker;
pub mod memory;
pub mod redis_broker;

pub use broker::{ClaimedRecord, DeliveredRecord, PendingSummary, QueueBroker};
pub use memory::InMemoryQueueBroker;
pub use redis_broker::RedisStreamBroker;
