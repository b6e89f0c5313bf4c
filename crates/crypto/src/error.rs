pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configured master reference is not a 64-char hex digest.
    #[error("master key reference must be 64 hex characters")]
    BadMasterReference,

    /// A sealed blob failed to decrypt (tampered data or wrong key/salt).
    #[error("sealed blob rejected: {0}")]
    Cipher(String),

    /// A sealed blob has an unknown version tag.
    #[error("unsupported sealed blob version {0}")]
    UnsupportedVersion(u8),
}
