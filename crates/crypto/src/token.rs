//! Tenant API tokens.
//!
//! Wire format is five dot-separated parts:
//!
//! ```text
//! tenant_id . issued_at_ms . expires_at_ms . salt_hex . signature_hex
//! ```
//!
//! The signature is HMAC-SHA256 over the first four parts, keyed by the
//! master reference bytes. The token itself is never persisted — the store
//! indexes tenants by [`token_fingerprint`].

use {
    hmac::{Hmac, Mac},
    rand::RngCore,
    sha2::Sha256,
};

use rijan_common::unix_now_ms;

use crate::{
    constant_time_eq,
    master::{sha256_hex, MasterKey},
};

type HmacSha256 = Hmac<Sha256>;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Outcome of verifying a tenant token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCheck {
    pub valid: bool,
    pub tenant_id: Option<String>,
    pub expired: bool,
}

impl TokenCheck {
    fn invalid() -> Self {
        Self {
            valid: false,
            tenant_id: None,
            expired: false,
        }
    }
}

/// Issue a signed token for a tenant, valid for `ttl_days`.
#[must_use]
pub fn issue_tenant_token(master: &MasterKey, tenant_id: &str, ttl_days: u32) -> String {
    let issued_at = unix_now_ms();
    let expires_at = issued_at + i64::from(ttl_days) * MS_PER_DAY;

    let mut salt = [0u8; 16];
    rand::rng().fill_bytes(&mut salt);
    let salt_hex = hex::encode(salt);

    let payload = format!("{tenant_id}.{issued_at}.{expires_at}.{salt_hex}");
    let signature = sign(master, &payload);
    format!("{payload}.{signature}")
}

/// Verify a token against the master reference and the current clock.
#[must_use]
pub fn verify_tenant_token(master: &MasterKey, token: &str) -> TokenCheck {
    verify_tenant_token_at(master, token, unix_now_ms())
}

/// Clock-injected variant of [`verify_tenant_token`].
#[must_use]
pub fn verify_tenant_token_at(master: &MasterKey, token: &str, now_ms: i64) -> TokenCheck {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 5 {
        return TokenCheck::invalid();
    }
    let (tenant_id, issued_raw, expires_raw, salt_hex, signature) =
        (parts[0], parts[1], parts[2], parts[3], parts[4]);

    let (Ok(_issued_at), Ok(expires_at)) = (issued_raw.parse::<i64>(), expires_raw.parse::<i64>())
    else {
        return TokenCheck::invalid();
    };

    let payload = format!("{tenant_id}.{issued_raw}.{expires_raw}.{salt_hex}");
    let expected = sign(master, &payload);
    if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
        return TokenCheck::invalid();
    }

    if expires_at < now_ms {
        return TokenCheck {
            valid: false,
            tenant_id: Some(tenant_id.to_string()),
            expired: true,
        };
    }

    TokenCheck {
        valid: true,
        tenant_id: Some(tenant_id.to_string()),
        expired: false,
    }
}

/// Stable digest of the full token, persisted as the tenant's
/// `api_key_hash` lookup key.
#[must_use]
pub fn token_fingerprint(token: &str) -> String {
    sha256_hex(token)
}

fn sign(master: &MasterKey, payload: &str) -> String {
    // The key length is fixed (32 bytes), so construction cannot fail.
    let mut mac = HmacSha256::new_from_slice(master.reference_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
