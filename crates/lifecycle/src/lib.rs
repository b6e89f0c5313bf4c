//! Device lifecycle engine.
//!
//! One supervisor per process owns every device socket this instance has
//! locked. It drives pairing, persists status transitions, wires protocol
//! events into the store and the fan-out pipeline, reconnects with
//! bounded backoff, and — via the distributed lock — guarantees that at
//! most one instance in the fleet writes to a device at a time.

mod engine;
mod error;
mod qr;

pub use {
    engine::{DeviceEngine, DeviceHealth, EngineConfig, PairingCode, QrPairing},
    error::{Error, Result},
    qr::qr_svg_data_url,
};
