use sha2::{Digest, Sha256};

use crate::{
    constant_time_eq,
    error::{Error, Result},
};

/// The provisioned master reference: a SHA-256 digest of the operator's
/// master password. The pre-image travels in the `X-Master-Key` header;
/// only the digest is ever configured or held in memory long-term.
#[derive(Clone)]
pub struct MasterKey {
    reference: [u8; 32],
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey").field("reference", &"[REDACTED]").finish()
    }
}

impl MasterKey {
    /// Parse the 64-hex-character reference digest. Anything else is a
    /// fatal configuration error.
    pub fn from_hex(reference: &str) -> Result<Self> {
        if reference.len() != 64 {
            return Err(Error::BadMasterReference);
        }
        let bytes = hex::decode(reference).map_err(|_| Error::BadMasterReference)?;
        let mut fixed = [0u8; 32];
        fixed.copy_from_slice(&bytes);
        Ok(Self { reference: fixed })
    }

    /// Check a submitted pre-image against the reference in constant time.
    /// Fails closed: any malformed input is simply "no".
    #[must_use]
    pub fn verify(&self, plain: &str) -> bool {
        let digest = Sha256::digest(plain.as_bytes());
        constant_time_eq(&digest, &self.reference)
    }

    /// The raw reference bytes, used as HMAC key material for tenant
    /// tokens and as the sealer KDF input.
    #[must_use]
    pub(crate) fn reference_bytes(&self) -> &[u8; 32] {
        &self.reference
    }
}

/// SHA-256 of an arbitrary string, lower-hex encoded.
#[must_use]
pub(crate) fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}
