//! Event fan-out pipeline.
//!
//! Captures events from the device engines, persists them once in the
//! event log, matches tenant webhook subscriptions, and delivers signed
//! JSON callbacks with bounded retries and a dead-letter queue. Delivery
//! is best-effort at-least-once and unordered; receivers dedupe on the
//! payload `id`.
//!
//! The queue between capture and dispatch is an in-process channel:
//! events survive retries but not a process crash. That mirrors the
//! upstream behavior this gateway brokers for.

mod deliver;
mod pipeline;
mod sink;

pub use {
    deliver::{sign_payload, DeliveryOutcome, DispatchConfig},
    pipeline::{subscription_matches, EventPipeline, MESSAGE_STATUS_ALIAS},
    sink::{EventSink, GatewayEvent},
};
