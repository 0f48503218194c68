//! Shared outbound request budget.
//!
//! The query service enforces one request-rate ceiling per client, so every
//! request from every round and every worker draws from the same limiter.
//! Two mechanisms:
//! - spacing: request starts are at least `min_interval` apart
//! - cool-down: a rate-limit reply pushes the next slot out for everyone

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct LimiterState {
    next_slot: Option<Instant>,
    granted: u64,
    cool_downs: u64,
}

/// Counters exposed for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LimiterStats {
    pub granted: u64,
    pub cool_downs: u64,
}

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    honor_cool_down: bool,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            honor_cool_down: true,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// A limiter that never waits. Still counts grants.
    pub fn unlimited() -> Self {
        Self {
            min_interval: Duration::ZERO,
            honor_cool_down: false,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Wait for the next request slot.
    pub async fn acquire(&self) {
        let now = Instant::now();
        let slot = {
            let mut state = self.state.lock();
            let slot = match state.next_slot {
                Some(next) if next > now => next,
                _ => now,
            };
            state.next_slot = Some(slot + self.min_interval);
            state.granted += 1;
            slot
        };

        if slot > now {
            log::debug!("limiter: waiting {:?} for request slot", slot - now);
            tokio::time::sleep_until(slot).await;
        }
    }

    /// Hold back every caller for `cool_down` from now.
    pub fn cool_down(&self, cool_down: Duration) {
        if !self.honor_cool_down {
            return;
        }
        let until = Instant::now() + cool_down;
        let mut state = self.state.lock();
        state.cool_downs += 1;
        if state.next_slot.map_or(true, |next| next < until) {
            state.next_slot = Some(until);
        }
        log::info!("limiter: cooling down for {:?}", cool_down);
    }

    pub fn stats(&self) -> LimiterStats {
        let state = self.state.lock();
        LimiterStats {
            granted: state.granted,
            cool_downs: state.cool_downs,
        }
    }
}
