//! The seam to the chat-protocol client library.
//!
//! The concrete client is an external collaborator; this crate pins down
//! everything the gateway relies on: recipient addressing, the outgoing
//! content shapes, the event stream, and the socket trait the lifecycle
//! engine drives. Event payloads stay opaque `serde_json::Value`s from the
//! client all the way out to webhook receivers.

mod client;
mod error;
mod event;
mod jid;
mod types;

pub use {
    client::{EventHandler, ProtocolClient, ProtocolSocket},
    error::{Error, Result},
    event::ProtocolEvent,
    jid::{Jid, BROADCAST_DOMAIN, GROUP_DOMAIN, USER_DOMAIN},
    types::{OutgoingContent, SendReceipt},
};
