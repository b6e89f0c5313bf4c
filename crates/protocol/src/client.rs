use std::{path::Path, sync::Arc};

use async_trait::async_trait;

use crate::{
    error::Result,
    event::ProtocolEvent,
    jid::Jid,
    types::{OutgoingContent, SendReceipt},
};

/// Callback the socket drives for every event. Invocations for one device
/// are serialized by the client; implementations must not block — spawn
/// for anything slow.
pub type EventHandler = Arc<dyn Fn(ProtocolEvent) + Send + Sync>;

/// Factory for device sockets. The concrete implementation wraps the
/// external client library; tests substitute their own.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Open a socket using the credential directory. An unpaired
    /// directory yields a socket that emits QR payloads until pairing
    /// completes.
    async fn connect(
        &self,
        session_dir: &Path,
        handler: EventHandler,
    ) -> Result<Box<dyn ProtocolSocket>>;
}

/// One live connection to the chat protocol for one device.
#[async_trait]
pub trait ProtocolSocket: Send + Sync {
    async fn send(&self, to: &Jid, content: &OutgoingContent) -> Result<SendReceipt>;

    /// Request the alternative phone-number pairing flow.
    async fn request_pairing_code(&self, phone: &str) -> Result<String>;

    async fn group_create(&self, subject: &str, participants: &[Jid]) -> Result<Jid>;
    async fn group_add(&self, group: &Jid, participants: &[Jid]) -> Result<()>;
    async fn group_remove(&self, group: &Jid, participants: &[Jid]) -> Result<()>;

    async fn privacy_settings(&self) -> Result<serde_json::Value>;
    async fn set_privacy_setting(&self, name: &str, value: &str) -> Result<()>;

    /// Revoke the pairing server-side, then close.
    async fn logout(&self) -> Result<()>;

    /// Close the socket without touching the pairing.
    async fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;
}
