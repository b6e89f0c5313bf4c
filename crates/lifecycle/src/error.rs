pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Another instance holds the device's distributed lock.
    #[error("device is owned by another instance")]
    LockHeld,

    /// The device has no running supervisor on this instance.
    #[error("device {device_id} is not running")]
    NotRunning { device_id: String },

    /// The device is running but its socket is not connected.
    #[error("device {device_id} is not connected")]
    NotConnected { device_id: String },

    /// No fresh QR payload is available (not pairing, or code expired).
    #[error("no pairing QR available; start the device and retry")]
    NoQrAvailable,

    /// QR rendering failed.
    #[error("failed to render QR: {0}")]
    Qr(String),

    #[error(transparent)]
    Store(#[from] rijan_store::Error),

    #[error(transparent)]
    Sessions(#[from] rijan_sessionfs::Error),

    #[error(transparent)]
    Protocol(#[from] rijan_protocol::Error),
}
