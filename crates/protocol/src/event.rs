//! Events surfaced by the protocol socket.
//!
//! Each variant carries the identifiers the core routes on plus an opaque
//! `data` payload owned by the client. The gateway never reshapes `data`.

use serde_json::Value;

/// Everything a connected socket can report back.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    /// A fresh QR payload for pairing. Re-emitted as codes rotate.
    QrCode { payload: String },
    /// A one-time pairing code for the phone-number flow.
    PairingCode { code: String },
    /// Socket opened and authenticated.
    Connected { jid: Option<String>, name: Option<String> },
    /// Socket dropped. `logged_out` means the pairing itself was revoked.
    Disconnected { reason: String, logged_out: bool },
    /// The client rewrote files in the credential directory.
    CredentialsChanged,

    MessageReceived {
        jid: String,
        message_id: String,
        message_type: String,
        data: Value,
    },
    MessageUpdated {
        message_id: String,
        data: Value,
    },
    MessageDeleted {
        message_id: String,
        data: Value,
    },
    ReceiptDelivery {
        jid: String,
        message_id: String,
        data: Value,
    },
    ReceiptRead {
        jid: String,
        message_id: String,
        data: Value,
    },

    GroupCreated { jid: String, data: Value },
    GroupUpdated { jid: String, data: Value },
    GroupDeleted { jid: String, data: Value },
    ParticipantAdded { jid: String, participant: String, data: Value },
    ParticipantRemoved { jid: String, participant: String, data: Value },
    ContactUpdated { jid: String, data: Value },

    /// Chat cache maintenance; logged but never published to webhooks.
    ChatUpserted {
        jid: String,
        name: Option<String>,
        last_message_at: Option<i64>,
        data: Value,
    },
    ChatDeleted { jid: String },
    /// LID↔phone mapping discovered by the client.
    LidMapping { lid: String, phone_jid: String },
}

impl ProtocolEvent {
    /// The wire token recorded in the event log and matched against
    /// webhook subscriptions. `None` for pairing/internal events that
    /// never leave the engine.
    #[must_use]
    pub fn event_type(&self) -> Option<&'static str> {
        match self {
            Self::QrCode { .. }
            | Self::PairingCode { .. }
            | Self::CredentialsChanged
            | Self::LidMapping { .. } => None,
            Self::Connected { .. } => Some("device.connected"),
            Self::Disconnected { .. } => Some("device.disconnected"),
            Self::MessageReceived { .. } => Some("message.received"),
            Self::MessageUpdated { .. } => Some("message.updated"),
            Self::MessageDeleted { .. } => Some("message.deleted"),
            Self::ReceiptDelivery { .. } => Some("receipt.delivery"),
            Self::ReceiptRead { .. } => Some("receipt.read"),
            Self::GroupCreated { .. } => Some("group.created"),
            Self::GroupUpdated { .. } => Some("group.updated"),
            Self::GroupDeleted { .. } => Some("group.deleted"),
            Self::ParticipantAdded { .. } => Some("participant.added"),
            Self::ParticipantRemoved { .. } => Some("participant.removed"),
            Self::ContactUpdated { .. } => Some("contact.updated"),
            Self::ChatUpserted { .. } => Some("chat.upserted"),
            Self::ChatDeleted { .. } => Some("chat.deleted"),
        }
    }

    /// The opaque payload to persist and publish, when the variant has
    /// one.
    #[must_use]
    pub fn data(&self) -> Value {
        match self {
            Self::MessageReceived { data, .. }
            | Self::MessageUpdated { data, .. }
            | Self::MessageDeleted { data, .. }
            | Self::ReceiptDelivery { data, .. }
            | Self::ReceiptRead { data, .. }
            | Self::GroupCreated { data, .. }
            | Self::GroupUpdated { data, .. }
            | Self::GroupDeleted { data, .. }
            | Self::ParticipantAdded { data, .. }
            | Self::ParticipantRemoved { data, .. }
            | Self::ContactUpdated { data, .. }
            | Self::ChatUpserted { data, .. } => data.clone(),
            Self::Connected { jid, name } => serde_json::json!({
                "jid": jid,
                "name": name,
            }),
            Self::Disconnected { reason, logged_out } => serde_json::json!({
                "reason": reason,
                "loggedOut": logged_out,
            }),
            Self::ChatDeleted { jid } => serde_json::json!({ "jid": jid }),
            Self::QrCode { .. }
            | Self::PairingCode { .. }
            | Self::CredentialsChanged
            | Self::LidMapping { .. } => Value::Null,
        }
    }
}
