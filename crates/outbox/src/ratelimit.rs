//! Producer admission limits.
//!
//! Fixed one-minute windows per `(device, message kind)`, held in process
//! memory. Operator protection, not billing: horizontally scaled
//! instances each enforce their own window.

use std::time::{Duration, Instant};

use dashmap::{mapref::entry::Entry, DashMap};

const WINDOW: Duration = Duration::from_secs(60);
const CLEANUP_EVERY_CHECKS: u64 = 512;

/// Canonical per-minute allowances by message kind.
fn limit_for(kind: &str) -> u32 {
    match kind {
        "text" => 60,
        "media" => 30,
        "location" => 40,
        "contact" => 40,
        "reaction" => 100,
        "poll" => 40,
        _ => 60,
    }
}

/// What the handler needs to shape the response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed {
        limit: u32,
        remaining: u32,
        /// Seconds until the window resets.
        reset_secs: u64,
    },
    Denied {
        limit: u32,
        retry_after_secs: u64,
        reset_secs: u64,
    },
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started_at: Instant,
    count: u32,
}

pub struct RateLimiter {
    buckets: DashMap<(String, &'static str), WindowState>,
    checks: std::sync::atomic::AtomicU64,
    /// Multiplier applied to every limit (operator tuning knob).
    scale: u32,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_scale(1)
    }

    /// Scale all canonical limits, e.g. for load testing environments.
    #[must_use]
    pub fn with_scale(scale: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            checks: std::sync::atomic::AtomicU64::new(0),
            scale: scale.max(1),
        }
    }

    pub fn check(&self, device_id: &str, kind: &'static str) -> RateDecision {
        self.check_at(device_id, kind, Instant::now())
    }

    fn check_at(&self, device_id: &str, kind: &'static str, now: Instant) -> RateDecision {
        let limit = limit_for(kind).saturating_mul(self.scale);
        let key = (device_id.to_string(), kind);

        let decision = match self.buckets.entry(key) {
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                let elapsed = now.duration_since(state.started_at);
                if elapsed >= WINDOW {
                    state.started_at = now;
                    state.count = 1;
                    RateDecision::Allowed {
                        limit,
                        remaining: limit - 1,
                        reset_secs: WINDOW.as_secs(),
                    }
                } else if state.count < limit {
                    state.count += 1;
                    RateDecision::Allowed {
                        limit,
                        remaining: limit - state.count,
                        reset_secs: (WINDOW - elapsed).as_secs().max(1),
                    }
                } else {
                    let wait = (WINDOW - elapsed).as_secs().max(1);
                    RateDecision::Denied {
                        limit,
                        retry_after_secs: wait,
                        reset_secs: wait,
                    }
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(WindowState {
                    started_at: now,
                    count: 1,
                });
                RateDecision::Allowed {
                    limit,
                    remaining: limit - 1,
                    reset_secs: WINDOW.as_secs(),
                }
            }
        };

        self.cleanup_if_needed(now);
        decision
    }

    fn cleanup_if_needed(&self, now: Instant) {
        use std::sync::atomic::Ordering;
        let seen = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % CLEANUP_EVERY_CHECKS != 0 {
            return;
        }
        let stale_after = WINDOW.saturating_mul(3);
        self.buckets
            .retain(|_, state| now.duration_since(state.started_at) <= stale_after);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
