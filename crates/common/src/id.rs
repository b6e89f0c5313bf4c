//! Opaque id minting.
//!
//! Every row id in the system is a 128-bit random value, lower-hex encoded.
//! Human-facing resources carry a stable prefix (`tenant_`, `device_`) for
//! debuggability only — nothing ever parses an id.

use rand::RngCore;

/// Mint a fresh random id, optionally prefixed (`prefix_<32 hex chars>`).
#[must_use]
pub fn mint_id(prefix: Option<&str>) -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    let body = hex::encode(bytes);
    match prefix {
        Some(p) => format!("{p}_{body}"),
        None => body,
    }
}

/// Shorthand for the common prefixed case.
#[must_use]
pub fn prefixed_id(prefix: &str) -> String {
    mint_id(Some(prefix))
}
