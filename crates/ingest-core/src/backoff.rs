//! Adaptive exponential backoff with jitter.
//!
//! Shared by the worker retry path (§4.7, `SINK_RETRY_MAX`/
//! `SINK_RETRY_BACKOFF_MS`) and the adaptive sender's protocol retry loop
//! (§4.8). Weighs queue backlog pressure and observed RTT against a base
//! delay, then applies deterministic jitter so a thundering herd of retrying
//! consumers does not resynchronise.

use std::time::Duration;

const MIN_COOLDOWN: Duration = Duration::from_millis(40);
const MAX_WAIT: Duration = Duration::from_secs(3);
const BACKLOG_CEILING: f64 = 4.0;
const BACKLOG_WEIGHT: f64 = 0.65;
const RTT_WEIGHT: f64 = 0.35;
const BASELINE_RTT: Duration = Duration::from_millis(55);
const MAX_RTT_RATIO: f64 = 6.0;
const JITTER_RANGE: f64 = 0.05;

/// Computes the next backoff delay.
///
/// `backlog` is a caller-defined pressure signal (e.g. retry attempt number,
/// or queue depth normalised against a target); `rtt` is the most recently
/// observed round-trip time against the thing being retried; `base` is the
/// configured floor (`SINK_RETRY_BACKOFF_MS`, or an equivalent for the
/// sender). The result is clamped to `[MIN_COOLDOWN, MAX_WAIT]`.
pub fn compute(backlog: f32, rtt: Duration, base: Duration, seed: u64) -> Duration {
    let backlog_ratio = clamp_f64(backlog as f64 / BACKLOG_CEILING, 0.0, 1.0);
    let rtt_ratio = clamp_f64(
        rtt.as_secs_f64() / BASELINE_RTT.as_secs_f64().max(f64::EPSILON),
        0.0,
        MAX_RTT_RATIO,
    ) / MAX_RTT_RATIO;

    let pressure = BACKLOG_WEIGHT * backlog_ratio + RTT_WEIGHT * rtt_ratio;
    let scaled = fold_duration(base, 1.0 + pressure);

    let jitter = jitter_factor(seed);
    let jittered = fold_duration(scaled, jitter);

    jittered.clamp(MIN_COOLDOWN, MAX_WAIT)
}

/// Backoff purely as a function of attempt count, for callers (most of the
/// worker retry path) that don't track RTT.
pub fn compute_for_attempt(attempt: u32, base: Duration, seed: u64) -> Duration {
    let backlog = attempt as f32;
    compute(backlog, BASELINE_RTT, base, seed)
}

fn clamp_f64(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.max(min).min(max)
    }
}

fn fold_duration(base: Duration, factor: f64) -> Duration {
    let nanos = base.as_nanos() as f64 * factor.max(0.0);
    Duration::from_nanos(nanos.round() as u64)
}

/// Deterministic pseudo-jitter in `[1 - JITTER_RANGE, 1 + JITTER_RANGE]`,
/// derived from a caller-supplied seed (e.g. attempt count or record id
/// hash) via SplitMix64 so repeated calls with the same seed are
/// reproducible in tests.
fn jitter_factor(seed: u64) -> f64 {
    let mixed = mix64(seed);
    let unit = (mixed >> 11) as f64 / (1u64 << 53) as f64; // in [0, 1)
    1.0 - JITTER_RANGE + unit * (2.0 * JITTER_RANGE)
}

fn mix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E3779B97F4A7C15);
    let mut x = z;
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptive_wait_respects_floor_and_cap() {
        let low = compute(0.0, Duration::from_millis(1), Duration::from_millis(10), 1);
        assert!(low >= MIN_COOLDOWN);

        let high = compute(100.0, Duration::from_secs(10), Duration::from_secs(10), 2);
        assert!(high <= MAX_WAIT);
    }

    #[test]
    fn same_seed_is_deterministic() {
        let a = compute(2.0, Duration::from_millis(60), Duration::from_millis(200), 42);
        let b = compute(2.0, Duration::from_millis(60), Duration::from_millis(200), 42);
        assert_eq!(a, b);
    }

    #[test]
    fn higher_backlog_never_shrinks_the_wait() {
        let base = Duration::from_millis(200);
        let a = compute(0.0, BASELINE_RTT, base, 7);
        let b = compute(4.0, BASELINE_RTT, base, 7);
        assert!(b >= a);
    }
}
