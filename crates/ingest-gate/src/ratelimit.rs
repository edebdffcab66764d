//! Rate limiter (C3): token-bucket per `(source, kind)` plus a global
//! per-client-address bucket (§4.3), using `governor`'s keyed limiters the
//! way the broader ecosystem applies per-IP/per-key limiting.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use ingest_core::config::{RateLimit, RateTiers};
use ingest_core::{IngestError, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Log,
    Metric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Throttle { retry_after: Duration },
}

impl Verdict {
    pub fn is_allow(self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

type KeyedLimiter<K> = RateLimiter<K, DefaultKeyedStateStore<K>, DefaultClock>;

fn quota_for(tier: RateLimit) -> Option<Quota> {
    match tier {
        RateLimit::Unlimited => None,
        RateLimit::PerMinute(count) => {
            let count = NonZeroU32::new(count.max(1)).expect("count clamped to >=1 above");
            Some(Quota::per_minute(count))
        }
    }
}

/// One token bucket per `(source_id, kind)`, lazily created on first use
/// since the set of active sources is not known ahead of time.
struct PerSourceLimiter {
    tier: Tier,
    log: KeyedLimiter<String>,
    metric: KeyedLimiter<String>,
}

/// In-process rate limiter. Per §4.3, cross-replica convergence is
/// best-effort: callers periodically push local counters into the queue
/// broker's key/value side channel through [`CounterReplicator`] rather
/// than this limiter sharing state directly with other replicas.
pub struct RateLimiterGate {
    tiers: RateTiers,
    per_source: DashMap<String, Arc<PerSourceLimiter>>,
    global: KeyedLimiter<IpAddr>,
}

/// Best-effort cross-replica counter push, implemented against the queue
/// broker's KV side channel (e.g. Redis `INCRBY`/`EXPIRE`) one layer up.
#[async_trait::async_trait]
pub trait CounterReplicator: Send + Sync {
    async fn push(&self, key: &str, delta: u64, ttl: Duration) -> Result<(), IngestError>;
}

impl RateLimiterGate {
    pub fn new(tiers: RateTiers) -> Self {
        // Global per-client bucket uses the most permissive tier as a
        // coarse abuse guard; per-source buckets below are authoritative.
        let global_quota = Quota::per_minute(NonZeroU32::new(6000).unwrap());
        Self { tiers, per_source: DashMap::new(), global: RateLimiter::keyed(global_quota) }
    }

    fn limiter_for(&self, source_id: &str, tier: Tier) -> Arc<PerSourceLimiter> {
        if let Some(existing) = self.per_source.get(source_id) {
            return existing.clone();
        }
        let rate = match tier {
            Tier::Community => self.tiers.community,
            Tier::Professional => self.tiers.professional,
            Tier::Enterprise => self.tiers.enterprise,
        };
        let quota = quota_for(rate).unwrap_or_else(|| Quota::per_minute(NonZeroU32::new(u32::MAX).unwrap()));
        let limiter = Arc::new(PerSourceLimiter {
            tier,
            log: RateLimiter::keyed(quota),
            metric: RateLimiter::keyed(quota),
        });
        self.per_source.insert(source_id.to_string(), limiter.clone());
        limiter
    }

    /// Evaluates both the per-`(source, kind)` bucket and the global
    /// per-client-address bucket; either one throttling is sufficient to
    /// reject (§4.3).
    pub fn check(&self, source_id: &str, tier: Tier, kind: RecordKind, client_addr: IpAddr) -> Verdict {
        let limiter = self.limiter_for(source_id, tier);
        let per_source_result = match kind {
            RecordKind::Log => limiter.log.check_key(&source_id.to_string()),
            RecordKind::Metric => limiter.metric.check_key(&source_id.to_string()),
        };

        let global_result = self.global.check_key(&client_addr);

        let mut retry_after = None;
        if let Err(not_until) = per_source_result {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            retry_after = Some(retry_after.map_or(wait, |cur: Duration| cur.max(wait)));
        }
        if let Err(not_until) = global_result {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            retry_after = Some(retry_after.map_or(wait, |cur: Duration| cur.max(wait)));
        }

        match retry_after {
            Some(wait) => Verdict::Throttle { retry_after: wait.max(Duration::from_secs(1)) },
            None => Verdict::Allow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_core::config::RateLimit;

    fn tiers() -> RateTiers {
        RateTiers {
            community: RateLimit::PerMinute(100),
            professional: RateLimit::PerMinute(1000),
            enterprise: RateLimit::Unlimited,
        }
    }

    #[test]
    fn s3_101st_request_in_a_minute_is_throttled() {
        let gate = RateLimiterGate::new(tiers());
        let addr: IpAddr = "192.168.1.5".parse().unwrap();
        let mut throttled_at = None;
        for i in 1..=101 {
            let verdict = gate.check("web-application", Tier::Community, RecordKind::Log, addr);
            if matches!(verdict, Verdict::Throttle { .. }) {
                throttled_at = Some(i);
                break;
            }
        }
        assert_eq!(throttled_at, Some(101));
    }

    #[test]
    fn enterprise_tier_is_never_throttled_by_the_per_source_bucket() {
        let gate = RateLimiterGate::new(tiers());
        let addr: IpAddr = "192.168.1.6".parse().unwrap();
        for _ in 0..500 {
            let verdict = gate.check("big-customer", Tier::Enterprise, RecordKind::Log, addr);
            assert_eq!(verdict, Verdict::Allow);
        }
    }
}
