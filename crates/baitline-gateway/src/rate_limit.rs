use baitline_core::Clock;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Per-API-key request allowance over a rolling window.
///
/// Each key carries a single "next free slot" timestamp (a cell-rate
/// scheduler): a request is admitted while that slot is no further ahead of
/// now than the burst allowance, and pushes it forward by
/// `window / limit`. A key whose slot is already in the past is
/// indistinguishable from a key never seen, so such entries are dropped
/// at most once per window without any loss of state.
pub struct RateLimiter {
    /// Time one request "costs".
    spacing: TimeDelta,
    /// How far ahead of now a key may run before it is refused.
    burst: TimeDelta,
    window: TimeDelta,
    clock: Arc<dyn Clock>,
    state: Mutex<Slots>,
}

struct Slots {
    next_free: HashMap<String, DateTime<Utc>>,
    next_prune: DateTime<Utc>,
}

impl RateLimiter {
    /// Admit up to `limit` requests per key within `window`, all of them
    /// usable as a burst.
    pub fn new(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        let limit = i32::try_from(limit.max(1)).unwrap_or(i32::MAX);
        let window = TimeDelta::from_std(window).unwrap_or_else(|_| TimeDelta::days(1));
        let spacing = window / limit;
        let next_prune = clock.now() + window;
        Self {
            spacing,
            burst: spacing * (limit - 1),
            window,
            clock,
            state: Mutex::new(Slots {
                next_free: HashMap::new(),
                next_prune,
            }),
        }
    }

    /// `limit` requests per key per minute.
    pub fn per_minute(limit: u32, clock: Arc<dyn Clock>) -> Self {
        Self::new(limit, Duration::from_secs(60), clock)
    }

    /// Spend one request for `api_key`. `false` means refused.
    pub fn check(&self, api_key: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if now >= state.next_prune {
            let before = state.next_free.len();
            state.next_free.retain(|_, slot| *slot > now);
            state.next_prune = now + self.window;
            debug!(dropped = before - state.next_free.len(), "Pruned idle rate-limit keys");
        }

        let slot = state
            .next_free
            .get(api_key)
            .copied()
            .map_or(now, |slot| slot.max(now));
        if slot - now > self.burst {
            return false;
        }
        state.next_free.insert(api_key.to_string(), slot + self.spacing);
        true
    }

    /// Keys currently holding state.
    pub fn tracked_keys(&self) -> usize {
        self.state.lock().next_free.len()
    }
}
