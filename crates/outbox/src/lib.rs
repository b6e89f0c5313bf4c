//! The outbox: durable, idempotent message sending.
//!
//! Producers (HTTP handlers) insert `pending` rows; a single cooperative
//! sender worker per process drains them FIFO, dispatches through the
//! device engine, and walks each row's status forward. Per-device,
//! per-kind token windows gate producer admission.

mod ratelimit;
mod sender;

use rijan_store::{NewOutboxMessage, OutboxMessage, Store};

pub use {
    ratelimit::{RateDecision, RateLimiter},
    sender::{Dispatcher, SenderConfig, SenderWorker},
};

pub type Result<T> = rijan_store::Result<T>;

/// Producer-side API over the outbox table.
#[derive(Clone)]
pub struct OutboxService {
    store: Store,
}

impl OutboxService {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Idempotent enqueue: at most one row per `(device, key)`, and the
    /// caller learns whether it got the existing one.
    pub async fn enqueue(&self, new: NewOutboxMessage) -> Result<(OutboxMessage, bool)> {
        self.store.outbox().insert_pending(new).await
    }
}
