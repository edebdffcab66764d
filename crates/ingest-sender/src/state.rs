//! Protocol selection state (§4.8): `{useH3, lastFallbackAt}`, plus the
//! promotion-cooldown decision rule.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ProtocolState {
    use_h3: bool,
    last_fallback_at: Option<Instant>,
    promotion_cooldown: Duration,
}

impl ProtocolState {
    pub fn new(promotion_cooldown: Duration) -> Self {
        Self { use_h3: true, last_fallback_at: None, promotion_cooldown }
    }

    pub fn use_h3(&self) -> bool {
        self.use_h3
    }

    /// HTTP/3 was classified protocol-unavailable: fall back immediately.
    pub fn on_h3_unavailable(&mut self) {
        self.use_h3 = false;
        self.last_fallback_at = Some(Instant::now());
    }

    /// HTTP/1.1 succeeded while on the fallback path: re-probe HTTP/3 on
    /// the next batch once the cooldown has elapsed (§4.8).
    pub fn on_http1_success(&mut self) {
        if self.use_h3 {
            return;
        }
        let elapsed = self.last_fallback_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
        if elapsed > self.promotion_cooldown {
            self.use_h3 = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_on_h3_unavailable() {
        let mut state = ProtocolState::new(Duration::from_secs(300));
        assert!(state.use_h3());
        state.on_h3_unavailable();
        assert!(!state.use_h3());
    }

    #[test]
    fn does_not_promote_before_cooldown_elapses() {
        let mut state = ProtocolState::new(Duration::from_secs(300));
        state.on_h3_unavailable();
        state.on_http1_success();
        assert!(!state.use_h3());
    }

    #[test]
    fn promotes_after_cooldown_elapses() {
        let mut state = ProtocolState::new(Duration::from_millis(1));
        state.on_h3_unavailable();
        std::thread::sleep(Duration::from_millis(5));
        state.on_http1_success();
        assert!(state.use_h3());
    }
}
