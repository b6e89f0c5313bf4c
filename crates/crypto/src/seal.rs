//! Optional at-rest sealing of session blobs.
//!
//! XChaCha20-Poly1305 with a per-blob random nonce. The key is derived as
//! SHA-256(master_reference_bytes || salt), so rotating the master
//! reference invalidates every sealed blob. This is NOT the primary
//! storage path — the filesystem session directory stays the source of
//! truth; sealing only protects exported copies.

use {
    chacha20poly1305::{
        aead::{Aead, KeyInit},
        XChaCha20Poly1305, XNonce,
    },
    rand::RngCore,
    sha2::{Digest, Sha256},
};

use crate::{
    error::{Error, Result},
    master::MasterKey,
};

/// Version tag for the XChaCha20-Poly1305 sealer.
pub const SEAL_VERSION: u8 = 1;

const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// A sealed blob, split into its wire fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlob {
    pub version: u8,
    pub iv: Vec<u8>,
    pub ct: Vec<u8>,
    pub tag: Vec<u8>,
}

/// Seal `plaintext` under a key derived from the master reference and
/// `salt`.
pub fn seal(master: &MasterKey, salt: &[u8], plaintext: &[u8]) -> Result<SealedBlob> {
    let cipher = XChaCha20Poly1305::new((&derive_key(master, salt)).into());

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let mut sealed = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| Error::Cipher(e.to_string()))?;

    // The AEAD output is ciphertext followed by the 16-byte Poly1305 tag.
    let tag = sealed.split_off(sealed.len() - TAG_LEN);
    Ok(SealedBlob {
        version: SEAL_VERSION,
        iv: nonce_bytes.to_vec(),
        ct: sealed,
        tag,
    })
}

/// Open a sealed blob. Any mismatch (wrong salt, wrong master, tampered
/// bytes, truncated fields) is a single rejection kind.
pub fn open(master: &MasterKey, salt: &[u8], blob: &SealedBlob) -> Result<Vec<u8>> {
    if blob.version != SEAL_VERSION {
        return Err(Error::UnsupportedVersion(blob.version));
    }
    if blob.iv.len() != NONCE_LEN || blob.tag.len() != TAG_LEN {
        return Err(Error::Cipher("malformed sealed blob".into()));
    }

    let cipher = XChaCha20Poly1305::new((&derive_key(master, salt)).into());
    let nonce = XNonce::from_slice(&blob.iv);

    let mut joined = Vec::with_capacity(blob.ct.len() + TAG_LEN);
    joined.extend_from_slice(&blob.ct);
    joined.extend_from_slice(&blob.tag);

    cipher
        .decrypt(nonce, joined.as_slice())
        .map_err(|e| Error::Cipher(e.to_string()))
}

fn derive_key(master: &MasterKey, salt: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(master.reference_bytes());
    hasher.update(salt);
    hasher.finalize().into()
}
