//! Worker liveness beacons.
//!
//! Each background worker bumps its heartbeat every loop iteration; the
//! readiness probe refuses traffic when any beacon goes stale.

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use crate::time::unix_now;

#[derive(Clone, Default)]
pub struct Heartbeat(Arc<AtomicI64>);

impl Heartbeat {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the worker alive right now.
    pub fn beat(&self) {
        self.0.store(unix_now(), Ordering::Relaxed);
    }

    /// Seconds since the last beat. A worker that never beat reports
    /// `i64::MAX`.
    #[must_use]
    pub fn age_secs(&self) -> i64 {
        let last = self.0.load(Ordering::Relaxed);
        if last == 0 {
            return i64::MAX;
        }
        (unix_now() - last).max(0)
    }

    #[must_use]
    pub fn is_fresh(&self, max_age_secs: i64) -> bool {
        self.age_secs() <= max_age_secs
    }
}
