//! HTTP API surface.
//!
//! Two gates guard the router: the master key for `/admin`, tenant
//! tokens for `/v1`. Every device-scoped path re-resolves the device
//! under the caller's tenant id, so a foreign device is indistinguishable
//! from a missing one.

pub mod auth_gate;
pub mod error;
pub mod media_guard;
mod request_id;
mod routes;
pub mod server;
pub mod state;

pub use {
    error::{ApiError, ErrorKind},
    server::{build_router, serve},
    state::AppState,
};
