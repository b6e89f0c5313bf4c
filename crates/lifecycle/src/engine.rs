//! The per-device supervisor.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc, Mutex as StdMutex, OnceLock, Weak,
    },
    time::{Duration, Instant},
};

use {
    serde::Serialize,
    tokio::sync::{mpsc, RwLock},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use {
    rijan_common::{unix_now, unix_now_ms},
    rijan_fanout::{EventSink, GatewayEvent},
    rijan_protocol::{
        EventHandler, Jid, OutgoingContent, ProtocolClient, ProtocolEvent, ProtocolSocket,
        SendReceipt,
    },
    rijan_sessionfs::SessionFs,
    rijan_store::{Device, DeviceStatus, OutboxStatus, Store, TenantStatus},
};

use crate::{
    error::{Error, Result},
    qr::qr_svg_data_url,
};

// ── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// This process's identity in `device_locks`.
    pub instance_id: String,
    pub lock_ttl_secs: i64,
    pub lock_refresh_every: Duration,
    pub lock_acquire_timeout: Duration,
    pub lock_acquire_poll: Duration,
    pub reconnect_ceiling: u32,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub qr_ttl_secs: i64,
}

impl EngineConfig {
    #[must_use]
    pub fn new(instance_id: String) -> Self {
        Self {
            instance_id,
            lock_ttl_secs: 300,
            lock_refresh_every: Duration::from_secs(60),
            lock_acquire_timeout: Duration::from_secs(5),
            lock_acquire_poll: Duration::from_millis(250),
            reconnect_ceiling: 10,
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
            qr_ttl_secs: 60,
        }
    }
}

// ── Public response shapes ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPairing {
    /// Raw pairing payload, for clients that render their own code.
    pub qr: String,
    /// SVG data URL of the same payload.
    pub qr_image: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingCode {
    pub code: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHealth {
    pub is_connected: bool,
    pub status: DeviceStatus,
    pub jid: Option<String>,
    pub phone: Option<String>,
    pub last_connect_at: Option<i64>,
    pub uptime_ms: Option<i64>,
}

// ── Internal instance state ──────────────────────────────────────────────────

/// State the synchronous socket callback writes without touching the
/// async world.
struct InstanceShared {
    connected: AtomicBool,
    /// Latest QR payload and its expiry.
    qr: StdMutex<Option<(String, i64)>>,
    /// Paired identity as reported by the socket.
    identity: StdMutex<(Option<String>, Option<String>)>,
    last_connect_at_ms: AtomicI64,
}

struct DeviceInstance {
    tenant_id: String,
    session_dir: PathBuf,
    socket: Arc<RwLock<Arc<dyn ProtocolSocket>>>,
    shared: Arc<InstanceShared>,
    event_tx: mpsc::UnboundedSender<ProtocolEvent>,
    cancel: CancellationToken,
    started_at: Instant,
}

// ── Engine ───────────────────────────────────────────────────────────────────

pub struct DeviceEngine {
    store: Store,
    sessions: SessionFs,
    client: Arc<dyn ProtocolClient>,
    sink: Arc<dyn EventSink>,
    config: EngineConfig,
    devices: RwLock<HashMap<String, DeviceInstance>>,
    self_ref: OnceLock<Weak<DeviceEngine>>,
}

impl DeviceEngine {
    #[must_use]
    pub fn new(
        store: Store,
        sessions: SessionFs,
        client: Arc<dyn ProtocolClient>,
        sink: Arc<dyn EventSink>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let engine = Arc::new(Self {
            store,
            sessions,
            client,
            sink,
            config,
            devices: RwLock::new(HashMap::new()),
            self_ref: OnceLock::new(),
        });
        let _ = engine.self_ref.set(Arc::downgrade(&engine));
        engine
    }

    fn upgrade(&self) -> Option<Arc<Self>> {
        self.self_ref.get().and_then(Weak::upgrade)
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    // ── start / stop / logout ───────────────────────────────────────────

    /// Take ownership of a device and open its socket. Idempotent while
    /// the device is already running on this instance.
    pub async fn start(&self, tenant_id: &str, device_id: &str) -> Result<()> {
        if self.devices.read().await.contains_key(device_id) {
            return Ok(());
        }

        self.acquire_lock(device_id).await?;

        match self.start_locked(tenant_id, device_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Leave nothing dangling: the lock is only held while a
                // supervisor actually runs.
                let _ = self
                    .store
                    .locks()
                    .release(device_id, &self.config.instance_id)
                    .await;
                let _ = self
                    .store
                    .devices()
                    .set_status(device_id, DeviceStatus::Disconnected)
                    .await;
                Err(e)
            }
        }
    }

    async fn acquire_lock(&self, device_id: &str) -> Result<()> {
        let deadline = Instant::now() + self.config.lock_acquire_timeout;
        loop {
            if self
                .store
                .locks()
                .acquire(device_id, &self.config.instance_id, self.config.lock_ttl_secs)
                .await?
            {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::LockHeld);
            }
            tokio::time::sleep(self.config.lock_acquire_poll).await;
        }
    }

    async fn start_locked(&self, tenant_id: &str, device_id: &str) -> Result<()> {
        info!(device_id, tenant_id, "starting device");
        self.store
            .devices()
            .set_status(device_id, DeviceStatus::Connecting)
            .await?;

        let session_dir = self.sessions.resolve(tenant_id, device_id).await?;
        self.store
            .sessions()
            .upsert(
                device_id,
                tenant_id,
                &session_dir.to_string_lossy(),
                None,
                None,
            )
            .await?;

        let shared = Arc::new(InstanceShared {
            connected: AtomicBool::new(false),
            qr: StdMutex::new(None),
            identity: StdMutex::new((None, None)),
            last_connect_at_ms: AtomicI64::new(0),
        });
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let handler = make_handler(Arc::clone(&shared), event_tx.clone(), self.config.qr_ttl_secs);
        let socket = self.client.connect(&session_dir, handler).await?;
        let socket: Arc<dyn ProtocolSocket> = Arc::from(socket);

        let instance = DeviceInstance {
            tenant_id: tenant_id.to_string(),
            session_dir,
            socket: Arc::new(RwLock::new(socket)),
            shared,
            event_tx,
            cancel: cancel.clone(),
            started_at: Instant::now(),
        };

        if let Some(engine) = self.upgrade() {
            tokio::spawn(lock_refresh_loop(
                Arc::clone(&engine),
                device_id.to_string(),
                cancel.clone(),
            ));
            tokio::spawn(event_worker(
                Arc::downgrade(&engine),
                tenant_id.to_string(),
                device_id.to_string(),
                event_rx,
                cancel,
            ));
        }

        self.devices
            .write()
            .await
            .insert(device_id.to_string(), instance);
        Ok(())
    }

    async fn remove_instance(&self, device_id: &str) -> Option<DeviceInstance> {
        self.devices.write().await.remove(device_id)
    }

    /// Close the socket, mark the row disconnected, release the lock.
    pub async fn stop(&self, device_id: &str) -> Result<()> {
        let Some(instance) = self.remove_instance(device_id).await else {
            return Err(Error::NotRunning {
                device_id: device_id.to_string(),
            });
        };
        info!(device_id, "stopping device");
        instance.cancel.cancel();
        let socket = instance.socket.read().await.clone();
        if let Err(e) = socket.close().await {
            debug!(device_id, "socket close reported: {e}");
        }
        self.store
            .devices()
            .set_status(device_id, DeviceStatus::Disconnected)
            .await?;
        self.store
            .locks()
            .release(device_id, &self.config.instance_id)
            .await?;
        Ok(())
    }

    /// Stop plus credential scrub: the next start must pair again.
    pub async fn logout(&self, tenant_id: &str, device_id: &str) -> Result<()> {
        if let Some(instance) = self.remove_instance(device_id).await {
            info!(device_id, "logging out device");
            instance.cancel.cancel();
            let socket = instance.socket.read().await.clone();
            if let Err(e) = socket.logout().await {
                warn!(device_id, "protocol logout failed (scrubbing anyway): {e}");
            }
        }
        self.store
            .locks()
            .release(device_id, &self.config.instance_id)
            .await?;
        self.sessions.delete(tenant_id, device_id).await?;
        self.store.sessions().delete(device_id).await?;
        self.store
            .devices()
            .set_status(device_id, DeviceStatus::NeedsPairing)
            .await?;
        Ok(())
    }

    /// Best-effort teardown of everything this instance owns.
    pub async fn shutdown(&self) {
        let device_ids: Vec<String> = self.devices.read().await.keys().cloned().collect();
        for device_id in device_ids {
            if let Err(e) = self.stop(&device_id).await {
                warn!(device_id, "shutdown stop failed: {e}");
            }
        }
    }

    // ── pairing ─────────────────────────────────────────────────────────

    /// The most recent QR payload, wrapped as an SVG data URL.
    pub async fn request_qr(&self, device_id: &str) -> Result<QrPairing> {
        let devices = self.devices.read().await;
        let instance = devices.get(device_id).ok_or_else(|| Error::NotRunning {
            device_id: device_id.to_string(),
        })?;
        let current = instance
            .shared
            .qr
            .lock()
            .ok()
            .and_then(|guard| guard.clone());
        match current {
            Some((payload, expires_at)) if expires_at > unix_now() => Ok(QrPairing {
                qr_image: qr_svg_data_url(&payload)?,
                qr: payload,
                expires_at,
            }),
            _ => Err(Error::NoQrAvailable),
        }
    }

    /// Trigger the phone-number pairing flow.
    pub async fn request_pairing_code(&self, device_id: &str, phone: &str) -> Result<PairingCode> {
        let socket = self.socket_for(device_id).await?;
        let code = socket.request_pairing_code(phone).await?;
        self.store
            .devices()
            .set_status(device_id, DeviceStatus::Pairing)
            .await?;
        Ok(PairingCode {
            code,
            expires_at: unix_now() + self.config.qr_ttl_secs,
        })
    }

    // ── send path & health ──────────────────────────────────────────────

    async fn socket_for(&self, device_id: &str) -> Result<Arc<dyn ProtocolSocket>> {
        let devices = self.devices.read().await;
        let instance = devices.get(device_id).ok_or_else(|| Error::NotRunning {
            device_id: device_id.to_string(),
        })?;
        let socket = instance.socket.read().await.clone();
        Ok(socket)
    }

    /// Whether this instance holds a connected socket for the device.
    pub async fn is_connected(&self, device_id: &str) -> bool {
        let devices = self.devices.read().await;
        devices
            .get(device_id)
            .is_some_and(|i| i.shared.connected.load(Ordering::Relaxed))
    }

    /// Hand one message to the socket. The sender worker is the only
    /// caller.
    pub async fn dispatch(
        &self,
        device_id: &str,
        to: &Jid,
        content: &OutgoingContent,
    ) -> Result<SendReceipt> {
        if !self.is_connected(device_id).await {
            return Err(Error::NotConnected {
                device_id: device_id.to_string(),
            });
        }
        let socket = self.socket_for(device_id).await?;
        Ok(socket.send(to, content).await?)
    }

    /// Best-effort stop of every running device owned by a tenant (used
    /// when the tenant is deleted or suspended).
    pub async fn stop_tenant(&self, tenant_id: &str) {
        let device_ids: Vec<String> = {
            let devices = self.devices.read().await;
            devices
                .iter()
                .filter(|(_, i)| i.tenant_id == tenant_id)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for device_id in device_ids {
            if let Err(e) = self.stop(&device_id).await {
                warn!(tenant_id, device_id, "tenant stop failed: {e}");
            }
        }
    }

    // ── group & privacy passthrough ─────────────────────────────────────

    pub async fn group_create(&self, device_id: &str, subject: &str, participants: &[Jid]) -> Result<Jid> {
        let socket = self.connected_socket(device_id).await?;
        Ok(socket.group_create(subject, participants).await?)
    }

    pub async fn group_add(&self, device_id: &str, group: &Jid, participants: &[Jid]) -> Result<()> {
        let socket = self.connected_socket(device_id).await?;
        Ok(socket.group_add(group, participants).await?)
    }

    pub async fn group_remove(&self, device_id: &str, group: &Jid, participants: &[Jid]) -> Result<()> {
        let socket = self.connected_socket(device_id).await?;
        Ok(socket.group_remove(group, participants).await?)
    }

    pub async fn privacy_settings(&self, device_id: &str) -> Result<serde_json::Value> {
        let socket = self.connected_socket(device_id).await?;
        Ok(socket.privacy_settings().await?)
    }

    pub async fn set_privacy_setting(&self, device_id: &str, name: &str, value: &str) -> Result<()> {
        let socket = self.connected_socket(device_id).await?;
        Ok(socket.set_privacy_setting(name, value).await?)
    }

    async fn connected_socket(&self, device_id: &str) -> Result<Arc<dyn ProtocolSocket>> {
        if !self.is_connected(device_id).await {
            return Err(Error::NotConnected {
                device_id: device_id.to_string(),
            });
        }
        self.socket_for(device_id).await
    }

    /// Health snapshot combining the persisted row with live socket
    /// state.
    pub async fn health(&self, device: &Device) -> DeviceHealth {
        let devices = self.devices.read().await;
        match devices.get(&device.id) {
            Some(instance) => {
                let (jid, _) = instance
                    .shared
                    .identity
                    .lock()
                    .map(|g| g.clone())
                    .unwrap_or((None, None));
                let last_ms = instance.shared.last_connect_at_ms.load(Ordering::Relaxed);
                DeviceHealth {
                    is_connected: instance.shared.connected.load(Ordering::Relaxed),
                    status: device.status,
                    jid,
                    phone: device.phone_number.clone(),
                    last_connect_at: (last_ms > 0).then_some(last_ms),
                    uptime_ms: Some(instance.started_at.elapsed().as_millis() as i64),
                }
            }
            None => DeviceHealth {
                is_connected: false,
                status: device.status,
                jid: None,
                phone: device.phone_number.clone(),
                last_connect_at: None,
                uptime_ms: None,
            },
        }
    }

    // ── boot recovery ───────────────────────────────────────────────────

    /// Re-start every device whose credentials survive on disk and whose
    /// tenant is active. Sequential within a tenant, parallel across
    /// tenants; failures log and move on.
    pub async fn recover_on_boot(&self) -> Result<()> {
        let entries = self.sessions.scan().await?;
        let mut by_tenant: HashMap<String, Vec<String>> = HashMap::new();
        for entry in entries {
            let tenant_id = match entry.tenant_id {
                Some(tenant_id) => Some(tenant_id),
                // Legacy flat layout: recover ownership from the session
                // metadata row.
                None => self
                    .store
                    .sessions()
                    .find(&entry.device_id)
                    .await?
                    .and_then(|meta| meta.tenant_id),
            };
            let Some(tenant_id) = tenant_id else {
                warn!(device_id = %entry.device_id, "orphan session directory, skipping recovery");
                continue;
            };
            by_tenant.entry(tenant_id).or_default().push(entry.device_id);
        }

        let mut handles = Vec::new();
        for (tenant_id, device_ids) in by_tenant {
            let Some(engine) = self.upgrade() else { break };
            handles.push(tokio::spawn(async move {
                match engine.store.tenants().find(&tenant_id).await {
                    Ok(Some(tenant)) if tenant.status == TenantStatus::Active => {}
                    Ok(_) => {
                        info!(tenant_id, "skipping recovery for missing or suspended tenant");
                        return;
                    }
                    Err(e) => {
                        warn!(tenant_id, "tenant lookup failed during recovery: {e}");
                        return;
                    }
                }
                for device_id in device_ids {
                    match engine.store.devices().find_scoped(&tenant_id, &device_id).await {
                        Ok(Some(_)) => {
                            if let Err(e) = engine.start(&tenant_id, &device_id).await {
                                warn!(tenant_id, device_id, "boot recovery failed: {e}");
                            }
                        }
                        Ok(None) => {
                            warn!(tenant_id, device_id, "session directory without device row")
                        }
                        Err(e) => warn!(tenant_id, device_id, "device lookup failed: {e}"),
                    }
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    // ── event hooks ─────────────────────────────────────────────────────

    async fn publish(&self, tenant_id: &str, device_id: &str, event_type: &str, data: serde_json::Value) {
        self.sink
            .publish(GatewayEvent {
                tenant_id: tenant_id.to_string(),
                device_id: device_id.to_string(),
                event_type: event_type.to_string(),
                data,
            })
            .await;
    }

    /// One protocol event, fully handled. Errors bubble to the worker,
    /// which logs and keeps going — a broken hook never kills the socket.
    async fn handle_event(
        &self,
        tenant_id: &str,
        device_id: &str,
        event: ProtocolEvent,
    ) -> Result<()> {
        match event {
            ProtocolEvent::QrCode { .. } => {
                // Payload already captured synchronously; just reflect
                // the state machine.
                self.store
                    .devices()
                    .set_status(device_id, DeviceStatus::Pairing)
                    .await?;
            }
            ProtocolEvent::PairingCode { .. } => {}
            ProtocolEvent::CredentialsChanged => {
                if let Some(identity) = self.sessions.identity(tenant_id, device_id).await? {
                    self.store
                        .sessions()
                        .upsert(
                            device_id,
                            tenant_id,
                            &self.sessions.root().join(tenant_id).join(device_id).to_string_lossy(),
                            identity.jid.as_deref(),
                            identity.name.as_deref(),
                        )
                        .await?;
                }
            }
            ProtocolEvent::Connected { jid, name } => {
                self.store
                    .devices()
                    .set_status(device_id, DeviceStatus::Connected)
                    .await?;
                if let Some(jid) = jid.as_deref() {
                    self.store
                        .devices()
                        .set_phone_number(device_id, Some(&phone_from_jid(jid)))
                        .await?;
                }
                self.store.devices().touch_last_seen(device_id).await?;
                self.store
                    .sessions()
                    .upsert(
                        device_id,
                        tenant_id,
                        &self.sessions.root().join(tenant_id).join(device_id).to_string_lossy(),
                        jid.as_deref(),
                        name.as_deref(),
                    )
                    .await?;
                self.publish(
                    tenant_id,
                    device_id,
                    "device.connected",
                    serde_json::json!({ "jid": jid, "name": name }),
                )
                .await;
            }
            ProtocolEvent::Disconnected { reason, logged_out } => {
                let next = if logged_out {
                    DeviceStatus::NeedsPairing
                } else {
                    DeviceStatus::Disconnected
                };
                self.store.devices().set_status(device_id, next).await?;
                self.publish(
                    tenant_id,
                    device_id,
                    "device.disconnected",
                    serde_json::json!({ "reason": reason, "loggedOut": logged_out }),
                )
                .await;
                if !logged_out {
                    self.spawn_reconnect(device_id).await;
                }
            }
            ProtocolEvent::MessageReceived {
                jid,
                message_id,
                message_type,
                data,
            } => {
                self.store
                    .inbox()
                    .insert(tenant_id, device_id, &jid, &message_id, &message_type, &data)
                    .await?;
                self.store
                    .chats()
                    .upsert(tenant_id, device_id, &jid, None, Some(unix_now()))
                    .await?;
                self.store.devices().touch_last_seen(device_id).await?;
                rijan_metrics::counter!(rijan_metrics::MESSAGES_RECEIVED_TOTAL).increment(1);
                self.publish(tenant_id, device_id, "message.received", data).await;
            }
            ProtocolEvent::MessageUpdated { data, .. } => {
                self.publish(tenant_id, device_id, "message.updated", data).await;
            }
            ProtocolEvent::MessageDeleted { data, .. } => {
                self.publish(tenant_id, device_id, "message.deleted", data).await;
            }
            ProtocolEvent::ReceiptDelivery { message_id, data, .. } => {
                self.store
                    .outbox()
                    .apply_receipt(device_id, &message_id, OutboxStatus::Delivered)
                    .await?;
                self.publish(tenant_id, device_id, "receipt.delivery", data).await;
            }
            ProtocolEvent::ReceiptRead { message_id, data, .. } => {
                self.store
                    .outbox()
                    .apply_receipt(device_id, &message_id, OutboxStatus::Read)
                    .await?;
                self.publish(tenant_id, device_id, "receipt.read", data).await;
            }
            ProtocolEvent::GroupCreated { data, .. } => {
                self.publish(tenant_id, device_id, "group.created", data).await;
            }
            ProtocolEvent::GroupUpdated { data, .. } => {
                self.publish(tenant_id, device_id, "group.updated", data).await;
            }
            ProtocolEvent::GroupDeleted { data, .. } => {
                self.publish(tenant_id, device_id, "group.deleted", data).await;
            }
            ProtocolEvent::ParticipantAdded { data, .. } => {
                self.publish(tenant_id, device_id, "participant.added", data).await;
            }
            ProtocolEvent::ParticipantRemoved { data, .. } => {
                self.publish(tenant_id, device_id, "participant.removed", data).await;
            }
            ProtocolEvent::ContactUpdated { data, .. } => {
                self.publish(tenant_id, device_id, "contact.updated", data).await;
            }
            ProtocolEvent::ChatUpserted {
                jid,
                name,
                last_message_at,
                data,
            } => {
                self.store
                    .chats()
                    .upsert(tenant_id, device_id, &jid, name.as_deref(), last_message_at)
                    .await?;
                self.publish(tenant_id, device_id, "chat.upserted", data).await;
            }
            ProtocolEvent::ChatDeleted { jid } => {
                self.store.chats().delete(device_id, &jid).await?;
                self.publish(
                    tenant_id,
                    device_id,
                    "chat.deleted",
                    serde_json::json!({ "jid": jid }),
                )
                .await;
            }
            ProtocolEvent::LidMapping { lid, phone_jid } => {
                self.store.lid_map().upsert(device_id, &lid, &phone_jid).await?;
            }
        }
        Ok(())
    }

    // ── reconnect ───────────────────────────────────────────────────────

    async fn spawn_reconnect(&self, device_id: &str) {
        let Some(engine) = self.upgrade() else { return };
        let device_id = device_id.to_string();
        tokio::spawn(async move {
            engine.reconnect_loop(&device_id).await;
        });
    }

    async fn reconnect_loop(self: Arc<Self>, device_id: &str) {
        let (cancel, shared, socket_slot, event_tx, session_dir) = {
            let devices = self.devices.read().await;
            let Some(instance) = devices.get(device_id) else { return };
            (
                instance.cancel.clone(),
                Arc::clone(&instance.shared),
                Arc::clone(&instance.socket),
                instance.event_tx.clone(),
                instance.session_dir.clone(),
            )
        };

        for attempt in 1..=self.config.reconnect_ceiling {
            let backoff = reconnect_backoff(self.config.reconnect_base, self.config.reconnect_max, attempt);
            tokio::select! {
                _ = cancel.cancelled() => return,
                () = tokio::time::sleep(backoff) => {}
            }
            if shared.connected.load(Ordering::Relaxed) {
                return;
            }

            info!(device_id, attempt, "reconnecting device");
            let _ = self
                .store
                .devices()
                .set_status(device_id, DeviceStatus::Connecting)
                .await;

            let handler = make_handler(Arc::clone(&shared), event_tx.clone(), self.config.qr_ttl_secs);
            match self.client.connect(&session_dir, handler).await {
                Ok(socket) => {
                    *socket_slot.write().await = Arc::from(socket);
                    return;
                }
                Err(e) => warn!(device_id, attempt, "reconnect attempt failed: {e}"),
            }
        }

        error!(device_id, "reconnect retries exhausted, marking failed");
        if let Some(instance) = self.remove_instance(device_id).await {
            instance.cancel.cancel();
        }
        let _ = self
            .store
            .devices()
            .set_status(device_id, DeviceStatus::Failed)
            .await;
        let _ = self
            .store
            .locks()
            .release(device_id, &self.config.instance_id)
            .await;
    }
}

/// The sender worker talks to the engine through this seam.
#[async_trait::async_trait]
impl rijan_outbox::Dispatcher for DeviceEngine {
    async fn dispatch(
        &self,
        device_id: &str,
        to: &Jid,
        content: &OutgoingContent,
    ) -> rijan_protocol::Result<SendReceipt> {
        match DeviceEngine::dispatch(self, device_id, to, content).await {
            Ok(receipt) => Ok(receipt),
            Err(Error::NotConnected { .. } | Error::NotRunning { .. }) => {
                Err(rijan_protocol::Error::NotConnected)
            }
            Err(Error::Protocol(e)) => Err(e),
            Err(e) => Err(rijan_protocol::Error::transport(e)),
        }
    }
}

// ── Support tasks ────────────────────────────────────────────────────────────

/// Keep the distributed lock warm. Losing it means another instance may
/// take the device, so this supervisor stands down immediately.
async fn lock_refresh_loop(engine: Arc<DeviceEngine>, device_id: String, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            () = tokio::time::sleep(engine.config.lock_refresh_every) => {}
        }
        match engine
            .store
            .locks()
            .refresh(&device_id, &engine.config.instance_id, engine.config.lock_ttl_secs)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                error!(device_id, "device lock lost, standing down");
                if let Some(instance) = engine.remove_instance(&device_id).await {
                    instance.cancel.cancel();
                    let socket = instance.socket.read().await.clone();
                    let _ = socket.close().await;
                }
                let _ = engine
                    .store
                    .devices()
                    .set_status(&device_id, DeviceStatus::Disconnected)
                    .await;
                return;
            }
            Err(e) => warn!(device_id, "lock refresh failed: {e}"),
        }
    }
}

/// Drain the per-device event queue in capture order. One failing hook
/// logs and moves on; it never tears the socket down.
async fn event_worker(
    engine: Weak<DeviceEngine>,
    tenant_id: String,
    device_id: String,
    mut rx: mpsc::UnboundedReceiver<ProtocolEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            maybe = rx.recv() => match maybe {
                Some(event) => event,
                None => return,
            },
        };
        let Some(engine) = engine.upgrade() else { return };
        let label = event.event_type().unwrap_or("internal");
        if let Err(e) = engine.handle_event(&tenant_id, &device_id, event).await {
            warn!(device_id, event_type = label, "event hook failed: {e}");
        }
    }
}

/// Synchronous socket callback: capture pairing material and connection
/// flags inline, then queue the event for the async worker.
fn make_handler(
    shared: Arc<InstanceShared>,
    tx: mpsc::UnboundedSender<ProtocolEvent>,
    qr_ttl_secs: i64,
) -> EventHandler {
    Arc::new(move |event: ProtocolEvent| {
        match &event {
            ProtocolEvent::QrCode { payload } => {
                if let Ok(mut qr) = shared.qr.lock() {
                    *qr = Some((payload.clone(), unix_now() + qr_ttl_secs));
                }
            }
            ProtocolEvent::Connected { jid, name } => {
                shared.connected.store(true, Ordering::Relaxed);
                shared.last_connect_at_ms.store(unix_now_ms(), Ordering::Relaxed);
                if let Ok(mut qr) = shared.qr.lock() {
                    *qr = None;
                }
                if let Ok(mut identity) = shared.identity.lock() {
                    *identity = (jid.clone(), name.clone());
                }
            }
            ProtocolEvent::Disconnected { .. } => {
                shared.connected.store(false, Ordering::Relaxed);
            }
            _ => {}
        }
        let _ = tx.send(event);
    })
}

fn reconnect_backoff(base: Duration, max: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(10);
    base.saturating_mul(1u32 << shift).min(max)
}

/// `6281234:57@s.whatsapp.net` → `6281234`.
fn phone_from_jid(jid: &str) -> String {
    let local = jid.split('@').next().unwrap_or(jid);
    local.split(':').next().unwrap_or(local).to_string()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::{path::Path, sync::atomic::AtomicUsize};

    // ── Fakes ───────────────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeSocketInner {
        open: AtomicBool,
        sent: StdMutex<Vec<(String, String)>>,
        send_counter: AtomicUsize,
    }

    #[derive(Clone, Default)]
    struct FakeSocket {
        inner: Arc<FakeSocketInner>,
    }

    #[async_trait]
    impl ProtocolSocket for FakeSocket {
        async fn send(
            &self,
            to: &Jid,
            content: &OutgoingContent,
        ) -> rijan_protocol::Result<SendReceipt> {
            let n = self.inner.send_counter.fetch_add(1, Ordering::SeqCst) + 1;
            self.inner
                .sent
                .lock()
                .unwrap()
                .push((to.as_str().to_string(), content.kind().to_string()));
            Ok(SendReceipt {
                message_id: format!("WAMID.{n}"),
                timestamp: unix_now(),
            })
        }

        async fn request_pairing_code(&self, _phone: &str) -> rijan_protocol::Result<String> {
            Ok("ABCD-1234".into())
        }

        async fn group_create(
            &self,
            _subject: &str,
            _participants: &[Jid],
        ) -> rijan_protocol::Result<Jid> {
            Jid::normalize("120363000000000001@g.us")
        }

        async fn group_add(&self, _group: &Jid, _participants: &[Jid]) -> rijan_protocol::Result<()> {
            Ok(())
        }

        async fn group_remove(
            &self,
            _group: &Jid,
            _participants: &[Jid],
        ) -> rijan_protocol::Result<()> {
            Ok(())
        }

        async fn privacy_settings(&self) -> rijan_protocol::Result<serde_json::Value> {
            Ok(serde_json::json!({"lastSeen": "contacts"}))
        }

        async fn set_privacy_setting(&self, _name: &str, _value: &str) -> rijan_protocol::Result<()> {
            Ok(())
        }

        async fn logout(&self) -> rijan_protocol::Result<()> {
            self.inner.open.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) -> rijan_protocol::Result<()> {
            self.inner.open.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.inner.open.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct FakeClient {
        handlers: StdMutex<Vec<EventHandler>>,
        sockets: StdMutex<Vec<FakeSocket>>,
        fail_connects: AtomicUsize,
    }

    impl FakeClient {
        fn emit(&self, event: ProtocolEvent) {
            let handler = self.handlers.lock().unwrap().last().cloned().unwrap();
            handler(event);
        }

        fn connect_count(&self) -> usize {
            self.handlers.lock().unwrap().len()
        }

        fn last_socket(&self) -> FakeSocket {
            self.sockets.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl ProtocolClient for FakeClient {
        async fn connect(
            &self,
            _session_dir: &Path,
            handler: EventHandler,
        ) -> rijan_protocol::Result<Box<dyn ProtocolSocket>> {
            if self.fail_connects.load(Ordering::SeqCst) > 0 {
                self.fail_connects.fetch_sub(1, Ordering::SeqCst);
                return Err(rijan_protocol::Error::transport("connect refused"));
            }
            let socket = FakeSocket::default();
            socket.inner.open.store(true, Ordering::SeqCst);
            self.handlers.lock().unwrap().push(handler);
            self.sockets.lock().unwrap().push(socket.clone());
            Ok(Box::new(socket))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: StdMutex<Vec<GatewayEvent>>,
    }

    impl RecordingSink {
        fn types(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.event_type.clone())
                .collect()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn publish(&self, event: GatewayEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    // ── Fixture ─────────────────────────────────────────────────────────

    struct Fixture {
        _tmp: tempfile::TempDir,
        store: Store,
        client: Arc<FakeClient>,
        sink: Arc<RecordingSink>,
        engine: Arc<DeviceEngine>,
        tenant_id: String,
        device_id: String,
    }

    fn test_config(instance_id: &str) -> EngineConfig {
        EngineConfig {
            lock_acquire_timeout: Duration::from_millis(300),
            lock_acquire_poll: Duration::from_millis(25),
            lock_refresh_every: Duration::from_millis(50),
            reconnect_base: Duration::from_millis(10),
            reconnect_max: Duration::from_millis(50),
            reconnect_ceiling: 3,
            ..EngineConfig::new(instance_id.to_string())
        }
    }

    async fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let tenant = store.tenants().create("Acme", "h").await.unwrap();
        let device = store.devices().create(&tenant.id, "Sales").await.unwrap();
        let client = Arc::new(FakeClient::default());
        let sink = Arc::new(RecordingSink::default());
        let engine = DeviceEngine::new(
            store.clone(),
            SessionFs::new(tmp.path().to_path_buf()),
            Arc::clone(&client) as Arc<dyn ProtocolClient>,
            Arc::clone(&sink) as Arc<dyn EventSink>,
            test_config("instance-a"),
        );
        Fixture {
            _tmp: tmp,
            store,
            client,
            sink,
            engine,
            tenant_id: tenant.id,
            device_id: device.id,
        }
    }

    async fn wait_until<F, Fut>(mut probe: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if probe().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    async fn device_status(store: &Store, tenant: &str, device: &str) -> DeviceStatus {
        store
            .devices()
            .find_scoped(tenant, device)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    // ── Tests ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn start_takes_lock_and_marks_connecting() {
        let f = fixture().await;
        f.engine.start(&f.tenant_id, &f.device_id).await.unwrap();

        let lock = f.store.locks().find(&f.device_id).await.unwrap().unwrap();
        assert_eq!(lock.instance_id, "instance-a");
        assert_eq!(
            device_status(&f.store, &f.tenant_id, &f.device_id).await,
            DeviceStatus::Connecting
        );
        assert_eq!(f.client.connect_count(), 1);

        // Idempotent while running.
        f.engine.start(&f.tenant_id, &f.device_id).await.unwrap();
        assert_eq!(f.client.connect_count(), 1);
    }

    #[tokio::test]
    async fn second_instance_is_refused_while_lock_is_live() {
        let f = fixture().await;
        f.engine.start(&f.tenant_id, &f.device_id).await.unwrap();

        let other = DeviceEngine::new(
            f.store.clone(),
            SessionFs::new(f._tmp.path().to_path_buf()),
            Arc::new(FakeClient::default()) as Arc<dyn ProtocolClient>,
            Arc::new(RecordingSink::default()) as Arc<dyn EventSink>,
            test_config("instance-b"),
        );
        let err = other.start(&f.tenant_id, &f.device_id).await.unwrap_err();
        assert!(matches!(err, Error::LockHeld));
        assert_eq!(err.to_string(), "device is owned by another instance");
    }

    #[tokio::test]
    async fn connected_event_flips_status_and_identity() {
        let f = fixture().await;
        f.engine.start(&f.tenant_id, &f.device_id).await.unwrap();
        f.client.emit(ProtocolEvent::Connected {
            jid: Some("6281234567:3@s.whatsapp.net".into()),
            name: Some("Rijan".into()),
        });

        let store = f.store.clone();
        let (t, d) = (f.tenant_id.clone(), f.device_id.clone());
        wait_until(|| {
            let store = store.clone();
            let (t, d) = (t.clone(), d.clone());
            async move { device_status(&store, &t, &d).await == DeviceStatus::Connected }
        })
        .await;

        assert!(f.engine.is_connected(&f.device_id).await);
        let device = f
            .store
            .devices()
            .find_scoped(&f.tenant_id, &f.device_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(device.phone_number.as_deref(), Some("6281234567"));

        let health = f.engine.health(&device).await;
        assert!(health.is_connected);
        assert_eq!(health.jid.as_deref(), Some("6281234567:3@s.whatsapp.net"));
        assert!(f.sink.types().contains(&"device.connected".to_string()));
    }

    #[tokio::test]
    async fn qr_flow_surfaces_latest_payload() {
        let f = fixture().await;
        f.engine.start(&f.tenant_id, &f.device_id).await.unwrap();

        // Nothing emitted yet.
        assert!(matches!(
            f.engine.request_qr(&f.device_id).await,
            Err(Error::NoQrAvailable)
        ));

        f.client.emit(ProtocolEvent::QrCode {
            payload: "2@first".into(),
        });
        f.client.emit(ProtocolEvent::QrCode {
            payload: "2@second".into(),
        });

        let engine = Arc::clone(&f.engine);
        let device_id = f.device_id.clone();
        wait_until(|| {
            let engine = Arc::clone(&engine);
            let device_id = device_id.clone();
            async move { engine.request_qr(&device_id).await.is_ok() }
        })
        .await;

        let pairing = f.engine.request_qr(&f.device_id).await.unwrap();
        assert_eq!(pairing.qr, "2@second");
        assert!(pairing.qr_image.starts_with("data:image/svg+xml;base64,"));
        assert!(pairing.expires_at > unix_now());

        let store = f.store.clone();
        let (t, d) = (f.tenant_id.clone(), f.device_id.clone());
        wait_until(|| {
            let store = store.clone();
            let (t, d) = (t.clone(), d.clone());
            async move { device_status(&store, &t, &d).await == DeviceStatus::Pairing }
        })
        .await;
    }

    #[tokio::test]
    async fn inbound_message_lands_in_inbox_and_sink() {
        let f = fixture().await;
        f.engine.start(&f.tenant_id, &f.device_id).await.unwrap();
        f.client.emit(ProtocolEvent::MessageReceived {
            jid: "628111@s.whatsapp.net".into(),
            message_id: "MSG1".into(),
            message_type: "text".into(),
            data: serde_json::json!({"text": "hello"}),
        });

        let store = f.store.clone();
        let (t, d) = (f.tenant_id.clone(), f.device_id.clone());
        wait_until(|| {
            let store = store.clone();
            let (t, d) = (t.clone(), d.clone());
            async move { !store.inbox().list_scoped(&t, &d, None, 10).await.unwrap().is_empty() }
        })
        .await;

        let inbox = f
            .store
            .inbox()
            .list_scoped(&f.tenant_id, &f.device_id, None, 10)
            .await
            .unwrap();
        assert_eq!(inbox[0].message_id, "MSG1");
        let chats = f.store.chats().list_scoped(&f.tenant_id, &f.device_id, 10).await.unwrap();
        assert_eq!(chats.len(), 1);
        assert!(f.sink.types().contains(&"message.received".to_string()));
    }

    #[tokio::test]
    async fn receipts_advance_outbox_rows() {
        let f = fixture().await;
        f.engine.start(&f.tenant_id, &f.device_id).await.unwrap();

        let (msg, _) = f
            .store
            .outbox()
            .insert_pending(rijan_store::NewOutboxMessage {
                tenant_id: f.tenant_id.clone(),
                device_id: f.device_id.clone(),
                jid: "628111@s.whatsapp.net".into(),
                message_type: "text".into(),
                payload: serde_json::json!({"text": "hi"}),
                idempotency_key: None,
            })
            .await
            .unwrap();
        f.store.outbox().claim_sending(&msg.id).await.unwrap();
        f.store.outbox().mark_sent(&msg.id, "WAMID.77").await.unwrap();

        f.client.emit(ProtocolEvent::ReceiptDelivery {
            jid: "628111@s.whatsapp.net".into(),
            message_id: "WAMID.77".into(),
            data: serde_json::json!({}),
        });

        let store = f.store.clone();
        let (t, d, id) = (f.tenant_id.clone(), f.device_id.clone(), msg.id.clone());
        wait_until(|| {
            let store = store.clone();
            let (t, d, id) = (t.clone(), d.clone(), id.clone());
            async move {
                store.outbox().find_scoped(&t, &d, &id).await.unwrap().unwrap().status
                    == OutboxStatus::Delivered
            }
        })
        .await;
    }

    #[tokio::test]
    async fn failing_hook_does_not_stop_the_worker() {
        let f = fixture().await;
        f.engine.start(&f.tenant_id, &f.device_id).await.unwrap();

        // Deleting the device row makes the inbox insert violate its
        // foreign key — the hook fails.
        f.store.devices().delete(&f.tenant_id, &f.device_id).await.unwrap();
        f.client.emit(ProtocolEvent::MessageReceived {
            jid: "628111@s.whatsapp.net".into(),
            message_id: "MSG1".into(),
            message_type: "text".into(),
            data: serde_json::json!({}),
        });
        // A later event on the same queue still goes through.
        f.client.emit(ProtocolEvent::ChatUpserted {
            jid: "628111@s.whatsapp.net".into(),
            name: Some("Budi".into()),
            last_message_at: Some(unix_now()),
            data: serde_json::json!({}),
        });

        let store = f.store.clone();
        let (t, d) = (f.tenant_id.clone(), f.device_id.clone());
        wait_until(|| {
            let store = store.clone();
            let (t, d) = (t.clone(), d.clone());
            async move { !store.chats().list_scoped(&t, &d, 10).await.unwrap().is_empty() }
        })
        .await;
    }

    #[tokio::test]
    async fn unexpected_disconnect_reconnects_with_backoff() {
        let f = fixture().await;
        f.engine.start(&f.tenant_id, &f.device_id).await.unwrap();
        f.client.emit(ProtocolEvent::Connected { jid: None, name: None });

        // One failed attempt, then success on the second.
        f.client.fail_connects.store(1, Ordering::SeqCst);
        f.client.emit(ProtocolEvent::Disconnected {
            reason: "stream error".into(),
            logged_out: false,
        });

        let client = Arc::clone(&f.client);
        wait_until(|| {
            let client = Arc::clone(&client);
            async move { client.connect_count() >= 2 }
        })
        .await;

        // The lock is retained across the reconnect.
        let lock = f.store.locks().find(&f.device_id).await.unwrap().unwrap();
        assert_eq!(lock.instance_id, "instance-a");

        // The fresh socket's events still flow.
        f.client.emit(ProtocolEvent::Connected { jid: None, name: None });
        let engine = Arc::clone(&f.engine);
        let device_id = f.device_id.clone();
        wait_until(|| {
            let engine = Arc::clone(&engine);
            let device_id = device_id.clone();
            async move { engine.is_connected(&device_id).await }
        })
        .await;
    }

    #[tokio::test]
    async fn reconnect_ceiling_marks_failed_and_releases_lock() {
        let f = fixture().await;
        f.engine.start(&f.tenant_id, &f.device_id).await.unwrap();
        f.client.emit(ProtocolEvent::Connected { jid: None, name: None });

        f.client.fail_connects.store(usize::MAX, Ordering::SeqCst);
        f.client.emit(ProtocolEvent::Disconnected {
            reason: "stream error".into(),
            logged_out: false,
        });

        let store = f.store.clone();
        let (t, d) = (f.tenant_id.clone(), f.device_id.clone());
        wait_until(|| {
            let store = store.clone();
            let (t, d) = (t.clone(), d.clone());
            async move { device_status(&store, &t, &d).await == DeviceStatus::Failed }
        })
        .await;
        assert!(f.store.locks().find(&f.device_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remote_logout_needs_pairing_without_reconnect() {
        let f = fixture().await;
        f.engine.start(&f.tenant_id, &f.device_id).await.unwrap();
        f.client.emit(ProtocolEvent::Disconnected {
            reason: "logged out from phone".into(),
            logged_out: true,
        });

        let store = f.store.clone();
        let (t, d) = (f.tenant_id.clone(), f.device_id.clone());
        wait_until(|| {
            let store = store.clone();
            let (t, d) = (t.clone(), d.clone());
            async move { device_status(&store, &t, &d).await == DeviceStatus::NeedsPairing }
        })
        .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.client.connect_count(), 1);
    }

    #[tokio::test]
    async fn stop_releases_lock_and_closes_socket() {
        let f = fixture().await;
        f.engine.start(&f.tenant_id, &f.device_id).await.unwrap();
        let socket = f.client.last_socket();
        assert!(socket.is_open());

        f.engine.stop(&f.device_id).await.unwrap();
        assert!(!socket.is_open());
        assert!(f.store.locks().find(&f.device_id).await.unwrap().is_none());
        assert_eq!(
            device_status(&f.store, &f.tenant_id, &f.device_id).await,
            DeviceStatus::Disconnected
        );

        // Stopping again is a state error.
        assert!(matches!(
            f.engine.stop(&f.device_id).await,
            Err(Error::NotRunning { .. })
        ));
    }

    #[tokio::test]
    async fn logout_scrubs_credentials() {
        let f = fixture().await;
        f.engine.start(&f.tenant_id, &f.device_id).await.unwrap();
        let dir = f._tmp.path().join(&f.tenant_id).join(&f.device_id);
        assert!(dir.is_dir());

        f.engine.logout(&f.tenant_id, &f.device_id).await.unwrap();
        assert!(!dir.exists());
        assert!(f.store.sessions().find(&f.device_id).await.unwrap().is_none());
        assert_eq!(
            device_status(&f.store, &f.tenant_id, &f.device_id).await,
            DeviceStatus::NeedsPairing
        );
        assert!(f.store.locks().find(&f.device_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dispatch_requires_connection() {
        let f = fixture().await;
        f.engine.start(&f.tenant_id, &f.device_id).await.unwrap();

        let jid = Jid::normalize("6281234567890").unwrap();
        let content = OutgoingContent::Text { body: "hi".into() };
        assert!(matches!(
            f.engine.dispatch(&f.device_id, &jid, &content).await,
            Err(Error::NotConnected { .. })
        ));

        f.client.emit(ProtocolEvent::Connected { jid: None, name: None });
        let engine = Arc::clone(&f.engine);
        let device_id = f.device_id.clone();
        wait_until(|| {
            let engine = Arc::clone(&engine);
            let device_id = device_id.clone();
            async move { engine.is_connected(&device_id).await }
        })
        .await;

        let receipt = f.engine.dispatch(&f.device_id, &jid, &content).await.unwrap();
        assert_eq!(receipt.message_id, "WAMID.1");
    }

    #[tokio::test]
    async fn recover_on_boot_restarts_active_tenants_only() {
        let f = fixture().await;
        // Simulate a previous run: session dir exists, nothing running.
        f.engine.sessions.resolve(&f.tenant_id, &f.device_id).await.unwrap();

        // A suspended tenant's device must stay down.
        let suspended = f.store.tenants().create("Frozen", "h2").await.unwrap();
        let frozen_device = f.store.devices().create(&suspended.id, "x").await.unwrap();
        f.engine.sessions.resolve(&suspended.id, &frozen_device.id).await.unwrap();
        f.store
            .tenants()
            .set_status(&suspended.id, TenantStatus::Suspended)
            .await
            .unwrap();

        f.engine.recover_on_boot().await.unwrap();

        assert_eq!(
            device_status(&f.store, &f.tenant_id, &f.device_id).await,
            DeviceStatus::Connecting
        );
        assert_eq!(
            device_status(&f.store, &suspended.id, &frozen_device.id).await,
            DeviceStatus::Disconnected
        );
        assert_eq!(f.client.connect_count(), 1);
    }

    #[test]
    fn backoff_is_bounded() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        assert_eq!(reconnect_backoff(base, max, 1), Duration::from_secs(1));
        assert_eq!(reconnect_backoff(base, max, 2), Duration::from_secs(2));
        assert_eq!(reconnect_backoff(base, max, 5), Duration::from_secs(16));
        assert_eq!(reconnect_backoff(base, max, 6), Duration::from_secs(30));
        assert_eq!(reconnect_backoff(base, max, 40), Duration::from_secs(30));
    }

    #[test]
    fn phone_extraction() {
        assert_eq!(phone_from_jid("628123:5@s.whatsapp.net"), "628123");
        assert_eq!(phone_from_jid("628123@s.whatsapp.net"), "628123");
        assert_eq!(phone_from_jid("628123"), "628123");
    }
}
