//! Adapter for the external protocol bridge.
//!
//! The actual chat-protocol implementation runs as a companion process
//! (the "bridge"); this module speaks newline-delimited JSON to it over
//! TCP and adapts that wire into the [`ProtocolClient`] traits. One TCP
//! connection per device socket; requests carry correlation ids, events
//! arrive unsolicited.

use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use {
    serde_json::{json, Value},
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpStream,
        sync::{mpsc, oneshot},
    },
    tracing::{debug, warn},
};

use {
    rijan_common::mint_id,
    rijan_protocol::{
        Error, EventHandler, Jid, OutgoingContent, ProtocolClient, ProtocolEvent, ProtocolSocket,
        Result, SendReceipt,
    },
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;

/// Factory connecting device sockets through the bridge at `addr`.
pub struct SidecarClient {
    addr: String,
}

impl SidecarClient {
    #[must_use]
    pub fn new(addr: String) -> Self {
        Self { addr }
    }
}

#[async_trait::async_trait]
impl ProtocolClient for SidecarClient {
    async fn connect(
        &self,
        session_dir: &Path,
        handler: EventHandler,
    ) -> Result<Box<dyn ProtocolSocket>> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(Error::transport)?;
        let (read_half, mut write_half) = stream.into_split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let open = Arc::new(AtomicBool::new(true));
        let (tx, mut rx) = mpsc::channel::<String>(64);

        // Writer task: serialize every outbound line.
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if write_half.write_all(b"\n").await.is_err() {
                    break;
                }
            }
        });

        // Reader task: route replies to their waiters, events to the
        // handler.
        {
            let pending = Arc::clone(&pending);
            let open = Arc::clone(&open);
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let mut lines = BufReader::new(read_half).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let Ok(value) = serde_json::from_str::<Value>(&line) else {
                        warn!("bridge sent unparseable line");
                        continue;
                    };
                    if let Some(reply_to) = value.get("reply").and_then(Value::as_str) {
                        let waiter = pending.lock().ok().and_then(|mut map| map.remove(reply_to));
                        if let Some(waiter) = waiter {
                            let _ = waiter.send(value);
                        }
                        continue;
                    }
                    if let Some(event) = translate_event(&value) {
                        handler(event);
                    } else {
                        debug!("ignoring unknown bridge event");
                    }
                }
                // Stream closed: synthesize a disconnect so the engine
                // reconnects.
                open.store(false, Ordering::SeqCst);
                handler(ProtocolEvent::Disconnected {
                    reason: "bridge connection closed".into(),
                    logged_out: false,
                });
            });
        }

        let socket = SidecarSocket {
            tx,
            pending,
            open,
        };
        socket
            .fire(json!({
                "op": "connect",
                "sessionDir": session_dir.to_string_lossy(),
            }))
            .await?;
        Ok(Box::new(socket))
    }
}

struct SidecarSocket {
    tx: mpsc::Sender<String>,
    pending: PendingMap,
    open: Arc<AtomicBool>,
}

impl SidecarSocket {
    /// Send a line without waiting for a reply.
    async fn fire(&self, message: Value) -> Result<()> {
        self.tx
            .send(message.to_string())
            .await
            .map_err(|_| Error::transport("bridge writer is gone"))
    }

    /// Send a correlated request and wait for its reply.
    async fn request(&self, mut message: Value) -> Result<Value> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        let id = mint_id(None);
        message["id"] = json!(id);

        let (reply_tx, reply_rx) = oneshot::channel();
        if let Ok(mut map) = self.pending.lock() {
            map.insert(id.clone(), reply_tx);
        }

        self.fire(message).await?;

        let reply = match tokio::time::timeout(REQUEST_TIMEOUT, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(Error::transport("bridge dropped the request")),
            Err(_) => {
                if let Ok(mut map) = self.pending.lock() {
                    map.remove(&id);
                }
                return Err(Error::Timeout);
            }
        };

        if reply.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(reply.get("data").cloned().unwrap_or(Value::Null));
        }
        let error = reply
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("bridge error")
            .to_string();
        if reply.get("permanent").and_then(Value::as_bool).unwrap_or(false) {
            Err(Error::rejected(error))
        } else {
            Err(Error::transport(error))
        }
    }
}

#[async_trait::async_trait]
impl ProtocolSocket for SidecarSocket {
    async fn send(&self, to: &Jid, content: &OutgoingContent) -> Result<SendReceipt> {
        let data = self
            .request(json!({
                "op": "send",
                "to": to.as_str(),
                "content": content,
            }))
            .await?;
        let message_id = data
            .get("messageId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::transport("bridge reply missing messageId"))?
            .to_string();
        let timestamp = data
            .get("timestamp")
            .and_then(Value::as_i64)
            .unwrap_or_else(rijan_common::unix_now);
        Ok(SendReceipt {
            message_id,
            timestamp,
        })
    }

    async fn request_pairing_code(&self, phone: &str) -> Result<String> {
        let data = self
            .request(json!({ "op": "pairing_code", "phone": phone }))
            .await?;
        data.get("code")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::transport("bridge reply missing code"))
    }

    async fn group_create(&self, subject: &str, participants: &[Jid]) -> Result<Jid> {
        let data = self
            .request(json!({
                "op": "group_create",
                "subject": subject,
                "participants": participants,
            }))
            .await?;
        let jid = data
            .get("groupJid")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::transport("bridge reply missing groupJid"))?;
        Jid::normalize(jid)
    }

    async fn group_add(&self, group: &Jid, participants: &[Jid]) -> Result<()> {
        self.request(json!({
            "op": "group_add",
            "group": group.as_str(),
            "participants": participants,
        }))
        .await
        .map(|_| ())
    }

    async fn group_remove(&self, group: &Jid, participants: &[Jid]) -> Result<()> {
        self.request(json!({
            "op": "group_remove",
            "group": group.as_str(),
            "participants": participants,
        }))
        .await
        .map(|_| ())
    }

    async fn privacy_settings(&self) -> Result<Value> {
        self.request(json!({ "op": "privacy_get" })).await
    }

    async fn set_privacy_setting(&self, name: &str, value: &str) -> Result<()> {
        self.request(json!({ "op": "privacy_set", "name": name, "value": value }))
            .await
            .map(|_| ())
    }

    async fn logout(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        self.fire(json!({ "op": "logout" })).await
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        self.fire(json!({ "op": "close" })).await
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// One bridge event line → one protocol event.
fn translate_event(value: &Value) -> Option<ProtocolEvent> {
    let kind = value.get("event").and_then(Value::as_str)?;
    let data = value.get("data").cloned().unwrap_or(Value::Null);
    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default()
    };
    let opt_text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);

    Some(match kind {
        "qr" => ProtocolEvent::QrCode { payload: text("payload") },
        "pairing_code" => ProtocolEvent::PairingCode { code: text("code") },
        "connected" => ProtocolEvent::Connected {
            jid: opt_text("jid"),
            name: opt_text("name"),
        },
        "disconnected" => ProtocolEvent::Disconnected {
            reason: text("reason"),
            logged_out: value
                .get("loggedOut")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        },
        "credentials" => ProtocolEvent::CredentialsChanged,
        "message" => ProtocolEvent::MessageReceived {
            jid: text("jid"),
            message_id: text("messageId"),
            message_type: value
                .get("messageType")
                .and_then(Value::as_str)
                .unwrap_or("text")
                .to_string(),
            data,
        },
        "message_update" => ProtocolEvent::MessageUpdated {
            message_id: text("messageId"),
            data,
        },
        "message_delete" => ProtocolEvent::MessageDeleted {
            message_id: text("messageId"),
            data,
        },
        "receipt_delivery" => ProtocolEvent::ReceiptDelivery {
            jid: text("jid"),
            message_id: text("messageId"),
            data,
        },
        "receipt_read" => ProtocolEvent::ReceiptRead {
            jid: text("jid"),
            message_id: text("messageId"),
            data,
        },
        "group_created" => ProtocolEvent::GroupCreated { jid: text("jid"), data },
        "group_updated" => ProtocolEvent::GroupUpdated { jid: text("jid"), data },
        "group_deleted" => ProtocolEvent::GroupDeleted { jid: text("jid"), data },
        "participant_added" => ProtocolEvent::ParticipantAdded {
            jid: text("jid"),
            participant: text("participant"),
            data,
        },
        "participant_removed" => ProtocolEvent::ParticipantRemoved {
            jid: text("jid"),
            participant: text("participant"),
            data,
        },
        "contact" => ProtocolEvent::ContactUpdated { jid: text("jid"), data },
        "chat" => ProtocolEvent::ChatUpserted {
            jid: text("jid"),
            name: opt_text("name"),
            last_message_at: value.get("lastMessageAt").and_then(Value::as_i64),
            data,
        },
        "chat_delete" => ProtocolEvent::ChatDeleted { jid: text("jid") },
        "lid" => ProtocolEvent::LidMapping {
            lid: text("lid"),
            phone_jid: text("phoneJid"),
        },
        _ => return None,
    })
}
