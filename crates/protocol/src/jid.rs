//! Recipient addressing.
//!
//! A JID is `<local>@<domain>`. Callers may also pass bare international
//! digits (no `+`, no leading zero), which normalize onto the user
//! domain. Anything else is rejected before it reaches the socket.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const USER_DOMAIN: &str = "s.whatsapp.net";
pub const GROUP_DOMAIN: &str = "g.us";
pub const BROADCAST_DOMAIN: &str = "broadcast";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jid(String);

impl Jid {
    /// Normalize a recipient identifier.
    pub fn normalize(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::invalid_recipient(input, "empty recipient"));
        }

        if let Some((local, domain)) = input.split_once('@') {
            if local.is_empty() {
                return Err(Error::invalid_recipient(input, "empty local part"));
            }
            if local.contains('@') || local.chars().any(char::is_whitespace) {
                return Err(Error::invalid_recipient(input, "malformed local part"));
            }
            if !matches!(domain, USER_DOMAIN | GROUP_DOMAIN | BROADCAST_DOMAIN) {
                return Err(Error::invalid_recipient(input, "unknown domain"));
            }
            return Ok(Self(format!("{local}@{domain}")));
        }

        // Bare digits: international form, no plus, no leading zero.
        if !input.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::invalid_recipient(
                input,
                "expected digits or a full JID",
            ));
        }
        if input.starts_with('0') {
            return Err(Error::invalid_recipient(input, "leading zero"));
        }
        if input.len() < 6 || input.len() > 15 {
            return Err(Error::invalid_recipient(input, "implausible number length"));
        }
        Ok(Self(format!("{input}@{USER_DOMAIN}")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map_or("", |(_, d)| d)
    }

    #[must_use]
    pub fn is_user(&self) -> bool {
        self.domain() == USER_DOMAIN
    }

    #[must_use]
    pub fn is_group(&self) -> bool {
        self.domain() == GROUP_DOMAIN
    }

    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.domain() == BROADCAST_DOMAIN
    }
}

impl std::fmt::Display for Jid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
