//! Typed row models. Statuses are persisted as lowercase text; the enums
//! here are the only place those strings are interpreted.

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ── Statuses ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
    Deleted,
}

impl TenantStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "deleted" => Ok(Self::Deleted),
            other => Err(Error::corrupt(format!("unknown tenant status {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Disconnected,
    Connecting,
    Pairing,
    NeedsPairing,
    Connected,
    Failed,
}

impl DeviceStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Pairing => "pairing",
            Self::NeedsPairing => "needs_pairing",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "disconnected" => Ok(Self::Disconnected),
            "connecting" => Ok(Self::Connecting),
            "pairing" => Ok(Self::Pairing),
            "needs_pairing" => Ok(Self::NeedsPairing),
            "connected" => Ok(Self::Connected),
            "failed" => Ok(Self::Failed),
            other => Err(Error::corrupt(format!("unknown device status {other:?}"))),
        }
    }

    /// All statuses, for the metrics gauge sweep.
    #[must_use]
    pub fn all() -> [Self; 6] {
        [
            Self::Disconnected,
            Self::Connecting,
            Self::Pairing,
            Self::NeedsPairing,
            Self::Connected,
            Self::Failed,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Queued,
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
    Expired,
}

impl OutboxStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            other => Err(Error::corrupt(format!("unknown outbox status {other:?}"))),
        }
    }

    /// Whether the row may never be mutated again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Read | Self::Failed | Self::Expired)
    }
}

// ── Rows ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub api_key_hash: String,
    pub status: TenantStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub id: String,
    pub tenant_id: String,
    pub label: String,
    pub phone_number: Option<String>,
    pub status: DeviceStatus,
    pub created_at: i64,
    pub last_seen: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceSession {
    pub device_id: String,
    pub tenant_id: Option<String>,
    pub session_kind: String,
    pub session_dir: String,
    pub wa_jid: Option<String>,
    pub wa_name: Option<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboxMessage {
    pub id: String,
    pub tenant_id: String,
    pub device_id: String,
    pub jid: String,
    pub message_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retries: i64,
    pub error_message: Option<String>,
    pub idempotency_key: Option<String>,
    pub wa_message_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub sent_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InboxMessage {
    pub id: String,
    pub tenant_id: String,
    pub device_id: String,
    pub jid: String,
    pub message_id: String,
    pub message_type: String,
    pub payload: serde_json::Value,
    pub received_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventLog {
    pub id: String,
    pub tenant_id: String,
    pub device_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub received_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Webhook {
    pub id: String,
    pub tenant_id: String,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub events: Vec<String>,
    pub enabled: bool,
    pub retry_count: i64,
    pub timeout_ms: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookLog {
    pub id: String,
    pub webhook_id: String,
    pub event_id: Option<String>,
    pub status_code: Option<i64>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub sent_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DlqEntry {
    pub id: String,
    pub webhook_id: String,
    pub event_payload: serde_json::Value,
    pub reason: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceLock {
    pub device_id: String,
    pub instance_id: String,
    pub acquired_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: String,
    pub tenant_id: Option<String>,
    pub actor: String,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub meta: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Chat {
    pub id: String,
    pub tenant_id: String,
    pub device_id: String,
    pub jid: String,
    pub name: Option<String>,
    pub last_message_at: Option<i64>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LidMapping {
    pub device_id: String,
    pub lid: String,
    pub phone_jid: String,
    pub updated_at: i64,
}
