use serde::{Deserialize, Serialize};

/// Outgoing message content, one variant per send endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OutgoingContent {
    Text {
        body: String,
    },
    Media {
        /// Remote URL, already SSRF-vetted by the gateway.
        url: Option<String>,
        /// Inline bytes, used after the gateway has downloaded the media.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bytes: Option<Vec<u8>>,
        mime_type: Option<String>,
        caption: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        name: Option<String>,
    },
    Contact {
        full_name: String,
        vcard: String,
    },
    Reaction {
        message_id: String,
        emoji: String,
    },
    Poll {
        name: String,
        options: Vec<String>,
        selectable_count: i64,
    },
    /// Tombstone a previously sent message.
    Delete {
        message_id: String,
    },
}

impl OutgoingContent {
    /// The message-type token persisted on outbox rows and used for
    /// rate-limit bucketing.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Media { .. } => "media",
            Self::Location { .. } => "location",
            Self::Contact { .. } => "contact",
            Self::Reaction { .. } => "reaction",
            Self::Poll { .. } => "poll",
            Self::Delete { .. } => "delete",
        }
    }
}

/// What the client hands back after accepting a send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Protocol-assigned message id; later receipts reference it.
    pub message_id: String,
    pub timestamp: i64,
}
