//! End-to-end API tests: real router, real listener, fake protocol
//! client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio_util::sync::CancellationToken,
};

use {
    rijan_common::{unix_now, Heartbeat},
    rijan_crypto::MasterKey,
    rijan_fanout::{DispatchConfig, EventPipeline},
    rijan_gateway::{serve, AppState},
    rijan_lifecycle::{DeviceEngine, EngineConfig},
    rijan_outbox::{OutboxService, RateLimiter, SenderConfig, SenderWorker},
    rijan_protocol::{
        EventHandler, Jid, OutgoingContent, ProtocolClient, ProtocolEvent, ProtocolSocket,
        SendReceipt,
    },
    rijan_sessionfs::SessionFs,
    rijan_store::Store,
};

/// SHA-256 of the literal master password "admin".
const MASTER_REFERENCE: &str = "8c6976e5b5410415bde908bd4dee15dfb167a9c873fc4bb8a81f6f2ab448a918";

// ── Fake protocol client ─────────────────────────────────────────────────────

#[derive(Default)]
struct FakeSocketInner {
    open: AtomicBool,
    send_counter: AtomicUsize,
    sent: Mutex<Vec<String>>,
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
        _content: &OutgoingContent,
    ) -> rijan_protocol::Result<SendReceipt> {
        let n = self.inner.send_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.sent.lock().unwrap().push(to.as_str().to_string());
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

    async fn group_remove(&self, _group: &Jid, _participants: &[Jid]) -> rijan_protocol::Result<()> {
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
    handlers: Mutex<Vec<EventHandler>>,
    sockets: Mutex<Vec<FakeSocket>>,
}

impl FakeClient {
    fn emit(&self, event: ProtocolEvent) {
        let handler = self.handlers.lock().unwrap().last().cloned().unwrap();
        handler(event);
    }

    fn sent_count(&self) -> usize {
        self.sockets
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.inner.send_counter.load(Ordering::SeqCst))
            .sum()
    }
}

#[async_trait]
impl ProtocolClient for FakeClient {
    async fn connect(
        &self,
        _session_dir: &Path,
        handler: EventHandler,
    ) -> rijan_protocol::Result<Box<dyn ProtocolSocket>> {
        let socket = FakeSocket::default();
        socket.inner.open.store(true, Ordering::SeqCst);
        self.handlers.lock().unwrap().push(handler);
        self.sockets.lock().unwrap().push(socket.clone());
        Ok(Box::new(socket))
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct TestApp {
    base: String,
    http: reqwest::Client,
    store: Store,
    client: Arc<FakeClient>,
    sender_heartbeat: Heartbeat,
    fanout_heartbeat: Heartbeat,
    _tmp: tempfile::TempDir,
    _cancel: CancellationToken,
}

async fn spawn_app() -> TestApp {
    let tmp = tempfile::tempdir().unwrap();
    let store = Store::open_in_memory().await.unwrap();
    let client = Arc::new(FakeClient::default());
    let cancel = CancellationToken::new();

    let pipeline = EventPipeline::spawn(
        store.clone(),
        DispatchConfig {
            backoff: vec![Duration::from_millis(5)],
            ..Default::default()
        },
        cancel.clone(),
    );
    let fanout_heartbeat = pipeline.heartbeat();

    let mut engine_config = EngineConfig::new("test-instance".into());
    engine_config.lock_acquire_timeout = Duration::from_millis(300);
    engine_config.lock_acquire_poll = Duration::from_millis(25);
    let engine = DeviceEngine::new(
        store.clone(),
        SessionFs::new(tmp.path().to_path_buf()),
        Arc::clone(&client) as Arc<dyn ProtocolClient>,
        pipeline.clone() as Arc<dyn rijan_fanout::EventSink>,
        engine_config,
    );

    let worker = SenderWorker::new(
        store.clone(),
        Arc::clone(&engine) as Arc<dyn rijan_outbox::Dispatcher>,
        SenderConfig {
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        },
    );
    let sender_heartbeat = worker.heartbeat();
    tokio::spawn(worker.run(cancel.clone()));

    let state = AppState::new(
        store.clone(),
        Arc::clone(&engine),
        OutboxService::new(store.clone()),
        pipeline,
        RateLimiter::new(),
        MasterKey::from_hex(MASTER_REFERENCE).unwrap(),
        None,
        sender_heartbeat.clone(),
        fanout_heartbeat.clone(),
        "test".into(),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, state, std::future::pending()));

    TestApp {
        base: format!("http://{addr}"),
        http: reqwest::Client::new(),
        store,
        client,
        sender_heartbeat,
        fanout_heartbeat,
        _tmp: tmp,
        _cancel: cancel,
    }
}

impl TestApp {
    async fn create_tenant(&self, name: &str) -> (String, String) {
        let response = self
            .http
            .post(format!("{}/admin/tenants", self.base))
            .header("X-Master-Key", "admin")
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        let body: serde_json::Value = response.json().await.unwrap();
        (
            body["tenant"]["id"].as_str().unwrap().to_string(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    async fn create_device(&self, tenant_id: &str, label: &str) -> String {
        let response = self
            .http
            .post(format!("{}/admin/tenants/{tenant_id}/devices", self.base))
            .header("X-Master-Key", "admin")
            .json(&serde_json::json!({ "label": label }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        let body: serde_json::Value = response.json().await.unwrap();
        body["device"]["id"].as_str().unwrap().to_string()
    }

    async fn start_device(&self, token: &str, device_id: &str) {
        let response = self
            .http
            .post(format!("{}/v1/devices/{device_id}/start", self.base))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
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

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn admin_tenant_lifecycle_and_audit() {
    let app = spawn_app().await;

    let (tenant_id, token) = app.create_tenant("Acme").await;
    assert!(tenant_id.starts_with("tenant_"));
    assert_eq!(token.split('.').count(), 5);

    // The list shows the new tenant under the correct master key.
    let response = app
        .http
        .get(format!("{}/admin/tenants", app.base))
        .header("X-Master-Key", "admin")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["tenants"]
        .as_array()
        .unwrap()
        .iter()
        .any(|t| t["id"] == tenant_id.as_str()));
    // The fingerprint never leaves the store.
    assert!(body["tenants"][0].get("api_key_hash").is_none());

    // A wrong master key is rejected and audited.
    let response = app
        .http
        .get(format!("{}/admin/tenants", app.base))
        .header("X-Master-Key", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "auth");
    assert!(body["error"]["requestId"].is_string());
    assert_eq!(
        app.store.audit().count_action("admin.auth.failed").await.unwrap(),
        1
    );
}

#[tokio::test]
async fn device_provisioning_and_pairing_flow() {
    let app = spawn_app().await;
    let (tenant_id, token) = app.create_tenant("Acme").await;
    let device_id = app.create_device(&tenant_id, "Sales").await;
    assert!(device_id.starts_with("device_"));

    app.start_device(&token, &device_id).await;
    let response = app
        .http
        .get(format!("{}/v1/devices/{device_id}", app.base))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["device"]["status"], "connecting");

    // A QR appears once the socket emits one.
    app.client.emit(ProtocolEvent::QrCode {
        payload: "2@pairing-payload".into(),
    });
    let http = app.http.clone();
    let url = format!("{}/v1/devices/{device_id}/pairing/qr", app.base);
    let bearer = token.clone();
    wait_until(|| {
        let http = http.clone();
        let url = url.clone();
        let bearer = bearer.clone();
        async move {
            http.post(url)
                .bearer_auth(bearer)
                .send()
                .await
                .unwrap()
                .status()
                == 200
        }
    })
    .await;

    let response = app
        .http
        .post(format!("{}/v1/devices/{device_id}/pairing/qr", app.base))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["qr"], "2@pairing-payload");
    assert!(body["qrImage"]
        .as_str()
        .unwrap()
        .starts_with("data:image/svg+xml;base64,"));

    // Until pairing completes, health reports not connected.
    let response = app
        .http
        .get(format!("{}/v1/devices/{device_id}/health", app.base))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["isConnected"], false);
}

#[tokio::test]
async fn idempotent_text_send_hits_protocol_once() {
    let app = spawn_app().await;
    let (tenant_id, token) = app.create_tenant("Acme").await;
    let device_id = app.create_device(&tenant_id, "Sales").await;
    app.start_device(&token, &device_id).await;
    app.client.emit(ProtocolEvent::Connected { jid: None, name: None });

    let url = format!("{}/v1/devices/{device_id}/messages/text", app.base);
    let payload = serde_json::json!({
        "to": "6281234567890",
        "text": "hi",
        "idempotencyKey": "k-1",
    });

    // The device flips to connected asynchronously.
    let http = app.http.clone();
    let probe_url = url.clone();
    let bearer = token.clone();
    let body = payload.clone();
    wait_until(|| {
        let http = http.clone();
        let url = probe_url.clone();
        let bearer = bearer.clone();
        let body = body.clone();
        async move {
            let status = http
                .post(url)
                .bearer_auth(bearer)
                .json(&body)
                .send()
                .await
                .unwrap()
                .status();
            status == 201 || status == 200
        }
    })
    .await;

    let first: serde_json::Value = app
        .http
        .post(&url)
        .bearer_auth(&token)
        .json(&payload)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let second: serde_json::Value = app
        .http
        .post(&url)
        .bearer_auth(&token)
        .json(&payload)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(first["id"], second["id"]);
    assert_eq!(second["deduplicated"], true);

    // Exactly one outbox row, and at most one protocol send.
    let rows = app
        .store
        .outbox()
        .list_scoped(&tenant_id, &device_id, None, 50)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    let store = app.store.clone();
    let (t, d) = (tenant_id.clone(), device_id.clone());
    wait_until(|| {
        let store = store.clone();
        let (t, d) = (t.clone(), d.clone());
        async move {
            store.outbox().list_scoped(&t, &d, None, 50).await.unwrap()[0]
                .wa_message_id
                .is_some()
        }
    })
    .await;
    assert_eq!(app.client.sent_count(), 1);
}

#[tokio::test]
async fn cross_tenant_access_is_a_plain_404() {
    let app = spawn_app().await;
    let (tenant_a, token_a) = app.create_tenant("Acme").await;
    let (tenant_b, _token_b) = app.create_tenant("Umbrella").await;
    let device_b = app.create_device(&tenant_b, "Theirs").await;
    let _ = tenant_a;

    for url in [
        format!("{}/v1/devices/{device_b}", app.base),
        format!("{}/v1/devices/{device_b}/health", app.base),
    ] {
        let response = app.http.get(url).bearer_auth(&token_a).send().await.unwrap();
        assert_eq!(response.status(), 404);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"]["kind"], "not_found");
    }

    // Mutations bounce the same way, with no state change.
    let response = app
        .http
        .post(format!("{}/v1/devices/{device_b}/start", app.base))
        .bearer_auth(&token_a)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let device = app
        .store
        .devices()
        .find_scoped(&tenant_b, &device_b)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(device.status, rijan_store::DeviceStatus::Disconnected);
}

#[tokio::test]
async fn bad_tokens_are_rejected_with_distinct_kinds() {
    let app = spawn_app().await;
    app.create_tenant("Acme").await;

    // Garbage token.
    let response = app
        .http
        .get(format!("{}/v1/devices", app.base))
        .bearer_auth("not.a.real.token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "auth");

    // No token at all.
    let response = app
        .http
        .get(format!("{}/v1/devices", app.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn media_urls_resolving_privately_are_rejected() {
    let app = spawn_app().await;
    let (tenant_id, token) = app.create_tenant("Acme").await;
    let device_id = app.create_device(&tenant_id, "Sales").await;

    for media_url in [
        "http://127.0.0.1:8080/x.jpg",
        "http://169.254.169.254/latest/meta-data",
        "http://[::1]/x.jpg",
        "file:///etc/passwd",
    ] {
        let response = app
            .http
            .post(format!("{}/v1/devices/{device_id}/messages/media", app.base))
            .bearer_auth(&token)
            .json(&serde_json::json!({
                "to": "6281234567890",
                "mediaUrl": media_url,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400, "{media_url}");
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"]["kind"], "validation", "{media_url}");
    }
}

#[tokio::test]
async fn webhook_crud_and_validation() {
    let app = spawn_app().await;
    let (_tenant_id, token) = app.create_tenant("Acme").await;

    // Unknown event types are rejected up front.
    let response = app
        .http
        .post(format!("{}/v1/webhooks", app.base))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "url": "https://example.com/hook",
            "events": ["message.recieved"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = app
        .http
        .post(format!("{}/v1/webhooks", app.base))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "url": "https://example.com/hook",
            "secret": "s3cret",
            "events": ["message.status"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    let webhook_id = body["webhook"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["webhook"]["retry_count"], 3);
    assert_eq!(body["webhook"]["timeout_ms"], 5000);
    // The secret stays server-side.
    assert!(body["webhook"].get("secret").is_none());

    // Disable it via PUT.
    let response = app
        .http
        .put(format!("{}/v1/webhooks/{webhook_id}", app.base))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "enabled": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["webhook"]["enabled"], false);

    let response = app
        .http
        .delete(format!("{}/v1/webhooks/{webhook_id}", app.base))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
}

#[tokio::test]
async fn readiness_tracks_worker_heartbeats() {
    let app = spawn_app().await;

    // The workers beat on their own; readiness settles to 200.
    let http = app.http.clone();
    let url = format!("{}/ready", app.base);
    wait_until(|| {
        let http = http.clone();
        let url = url.clone();
        async move { http.get(url).send().await.unwrap().status() == 200 }
    })
    .await;

    // Liveness is unconditional.
    let response = app.http.get(format!("{}/health", app.base)).send().await.unwrap();
    assert_eq!(response.status(), 200);

    let _ = (&app.sender_heartbeat, &app.fanout_heartbeat);
}
