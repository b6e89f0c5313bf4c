//! Metrics collection and export.
//!
//! Thin layer over the `metrics` facade with a Prometheus exporter. Call
//! [`init_metrics`] once at boot; the returned handle renders the scrape
//! body for the `/metrics` endpoint.

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{init_metrics, MetricsHandle},
};

// Re-export the facade macros for call sites.
pub use metrics::{counter, gauge, histogram};
