//! Crypto primitives for the gateway: master-key verification, tenant
//! token issuance, and the optional at-rest sealer for session blobs.
//!
//! Everything here is deterministic in its failure mode and never branches
//! on secret bytes.

mod error;
mod master;
mod seal;
mod token;

pub use {
    error::{Error, Result},
    master::MasterKey,
    seal::{open, seal, SealedBlob},
    token::{issue_tenant_token, token_fingerprint, verify_tenant_token, TokenCheck},
};

/// Constant-time byte comparison (prevents timing attacks).
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
