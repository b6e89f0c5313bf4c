//! The sender worker.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    rijan_common::{unix_now, Heartbeat},
    rijan_protocol::{Jid, OutgoingContent, SendReceipt},
    rijan_store::{OutboxMessage, Store},
};

/// The engine-facing seam. The lifecycle crate implements this for
/// [`DeviceEngine`]; tests drop in fakes.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Send one message on a device's socket. `NotConnected` means the
    /// row should wait for the device, other transport errors are
    /// transient, and permanent errors end the row.
    async fn dispatch(
        &self,
        device_id: &str,
        to: &Jid,
        content: &OutgoingContent,
    ) -> rijan_protocol::Result<SendReceipt>;
}

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub poll_interval: Duration,
    /// Transient failures allowed before a row goes terminal.
    pub retry_ceiling: i64,
    /// Rows never sent within this horizon expire.
    pub expire_horizon_secs: i64,
    /// Rows claimed per poll.
    pub batch_size: i64,
    /// `queued` rows untouched for this long count as stuck.
    pub stuck_after_secs: i64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            retry_ceiling: 5,
            expire_horizon_secs: 24 * 60 * 60,
            batch_size: 25,
            stuck_after_secs: 60,
        }
    }
}

pub struct SenderWorker {
    store: Store,
    dispatcher: Arc<dyn Dispatcher>,
    config: SenderConfig,
    heartbeat: Heartbeat,
}

impl SenderWorker {
    #[must_use]
    pub fn new(store: Store, dispatcher: Arc<dyn Dispatcher>, config: SenderConfig) -> Self {
        Self {
            store,
            dispatcher,
            config,
            heartbeat: Heartbeat::new(),
        }
    }

    #[must_use]
    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat.clone()
    }

    /// Run until cancelled. One cooperative loop per process.
    pub async fn run(self, cancel: CancellationToken) {
        info!("sender worker started");
        let mut expire_tick: u32 = 0;
        loop {
            self.heartbeat.beat();
            tokio::select! {
                _ = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }

            // Expiry sweep runs on a slower cadence than the send poll.
            expire_tick = expire_tick.wrapping_add(1);
            if expire_tick % 20 == 0 {
                match self.store.outbox().expire_older_than(self.config.expire_horizon_secs).await {
                    Ok(0) => {}
                    Ok(n) => info!(expired = n, "expired stale outbox rows"),
                    Err(e) => warn!("expiry sweep failed: {e}"),
                }
            }

            if let Err(e) = self.drain_ready().await {
                warn!("sender poll failed: {e}");
            }
        }
        info!("sender worker stopped");
    }

    /// One poll: claim and dispatch every ready row, FIFO.
    pub async fn drain_ready(&self) -> rijan_store::Result<()> {
        let ready = self
            .store
            .outbox()
            .next_ready(self.config.stuck_after_secs, self.config.batch_size)
            .await?;
        for row in ready {
            // Retried rows wait out their backoff before another claim.
            if row.retries > 0 {
                let not_before = row.updated_at + retry_backoff_secs(row.retries);
                if unix_now() < not_before {
                    continue;
                }
            }
            if !self.store.outbox().claim_sending(&row.id).await? {
                continue;
            }
            self.send_claimed(row).await?;
        }
        Ok(())
    }

    async fn send_claimed(&self, row: OutboxMessage) -> rijan_store::Result<()> {
        let outbox = self.store.outbox();

        let jid = match Jid::normalize(&row.jid) {
            Ok(jid) => jid,
            Err(e) => {
                // Should have been caught at admission; terminal either way.
                outbox.mark_failed(&row.id, &e.to_string()).await?;
                return Ok(());
            }
        };
        let content: OutgoingContent = match serde_json::from_value(row.payload.clone()) {
            Ok(content) => content,
            Err(e) => {
                outbox
                    .mark_failed(&row.id, &format!("unreadable payload: {e}"))
                    .await?;
                return Ok(());
            }
        };

        match self.dispatcher.dispatch(&row.device_id, &jid, &content).await {
            Ok(receipt) => {
                outbox.mark_sent(&row.id, &receipt.message_id).await?;
                rijan_metrics::counter!(rijan_metrics::MESSAGES_SENT_TOTAL).increment(1);
                debug!(message_id = %row.id, wa_message_id = %receipt.message_id, "message sent");
            }
            Err(e) if e.is_permanent() => {
                warn!(message_id = %row.id, "permanent send failure: {e}");
                outbox.mark_failed(&row.id, &e.to_string()).await?;
            }
            Err(e) => {
                if row.retries + 1 > self.config.retry_ceiling {
                    warn!(message_id = %row.id, retries = row.retries, "retry ceiling reached: {e}");
                    outbox
                        .mark_failed(&row.id, &format!("retries exhausted: {e}"))
                        .await?;
                } else {
                    debug!(message_id = %row.id, retries = row.retries + 1, "transient failure, requeued: {e}");
                    outbox.requeue(&row.id, &e.to_string()).await?;
                }
            }
        }
        Ok(())
    }
}

/// Backoff between retry attempts, growing with the retry count.
fn retry_backoff_secs(retries: i64) -> i64 {
    let capped = retries.clamp(0, 6) as u32;
    (1_i64 << capped).min(60)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    };

    use rijan_store::{NewOutboxMessage, OutboxStatus};

    #[derive(Default)]
    struct FakeDispatcher {
        calls: AtomicUsize,
        sent: Mutex<Vec<String>>,
        connected: AtomicBool,
        /// Queue of canned errors returned before succeeding.
        fail_with: Mutex<Vec<rijan_protocol::Error>>,
    }

    #[async_trait]
    impl Dispatcher for FakeDispatcher {
        async fn dispatch(
            &self,
            _device_id: &str,
            to: &Jid,
            _content: &OutgoingContent,
        ) -> rijan_protocol::Result<SendReceipt> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(err) = self.fail_with.lock().unwrap().pop() {
                return Err(err);
            }
            if !self.connected.load(Ordering::SeqCst) {
                return Err(rijan_protocol::Error::NotConnected);
            }
            self.sent.lock().unwrap().push(to.as_str().to_string());
            Ok(SendReceipt {
                message_id: format!("WAMID.{n}"),
                timestamp: unix_now(),
            })
        }
    }

    struct Fixture {
        store: Store,
        dispatcher: Arc<FakeDispatcher>,
        worker: SenderWorker,
        tenant_id: String,
        device_id: String,
    }

    async fn fixture() -> Fixture {
        let store = Store::open_in_memory().await.unwrap();
        let tenant = store.tenants().create("Acme", "h").await.unwrap();
        let device = store.devices().create(&tenant.id, "Sales").await.unwrap();
        let dispatcher = Arc::new(FakeDispatcher::default());
        dispatcher.connected.store(true, Ordering::SeqCst);
        let worker = SenderWorker::new(
            store.clone(),
            Arc::clone(&dispatcher) as Arc<dyn Dispatcher>,
            SenderConfig {
                poll_interval: Duration::from_millis(10),
                retry_ceiling: 2,
                ..Default::default()
            },
        );
        Fixture {
            store,
            dispatcher,
            worker,
            tenant_id: tenant.id,
            device_id: device.id,
        }
    }

    fn text_message(f: &Fixture, key: Option<&str>) -> NewOutboxMessage {
        NewOutboxMessage {
            tenant_id: f.tenant_id.clone(),
            device_id: f.device_id.clone(),
            jid: "6281234567890".into(),
            message_type: "text".into(),
            payload: serde_json::json!({"kind": "text", "body": "hi"}),
            idempotency_key: key.map(str::to_string),
        }
    }

    async fn row_status(f: &Fixture, id: &str) -> OutboxStatus {
        f.store
            .outbox()
            .find_scoped(&f.tenant_id, &f.device_id, id)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn sends_pending_rows_fifo() {
        let f = fixture().await;
        let service = crate::OutboxService::new(f.store.clone());
        let (a, _) = service.enqueue(text_message(&f, None)).await.unwrap();
        let (b, _) = service.enqueue(text_message(&f, None)).await.unwrap();

        f.worker.drain_ready().await.unwrap();

        assert_eq!(row_status(&f, &a.id).await, OutboxStatus::Sent);
        assert_eq!(row_status(&f, &b.id).await, OutboxStatus::Sent);
        assert_eq!(f.dispatcher.calls.load(Ordering::SeqCst), 2);
        // Normalized JID reached the socket.
        assert_eq!(
            f.dispatcher.sent.lock().unwrap()[0],
            "6281234567890@s.whatsapp.net"
        );
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_sends_once() {
        let f = fixture().await;
        let service = crate::OutboxService::new(f.store.clone());
        let (first, deduped_a) = service.enqueue(text_message(&f, Some("k-1"))).await.unwrap();
        let (second, deduped_b) = service.enqueue(text_message(&f, Some("k-1"))).await.unwrap();
        assert!(!deduped_a);
        assert!(deduped_b);
        assert_eq!(first.id, second.id);

        f.worker.drain_ready().await.unwrap();
        f.worker.drain_ready().await.unwrap();

        // Exactly one protocol invocation ever happens for the pair.
        assert_eq!(f.dispatcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disconnected_device_requeues_until_ceiling() {
        let f = fixture().await;
        f.dispatcher.connected.store(false, Ordering::SeqCst);
        let service = crate::OutboxService::new(f.store.clone());
        let (msg, _) = service.enqueue(text_message(&f, None)).await.unwrap();

        f.worker.drain_ready().await.unwrap();
        assert_eq!(row_status(&f, &msg.id).await, OutboxStatus::Pending);
        let row = f
            .store
            .outbox()
            .find_scoped(&f.tenant_id, &f.device_id, &msg.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.retries, 1);
        assert_eq!(row.error_message.as_deref(), Some("socket not connected"));
    }

    #[tokio::test]
    async fn permanent_failure_is_terminal_without_retry() {
        let f = fixture().await;
        f.dispatcher
            .fail_with
            .lock()
            .unwrap()
            .push(rijan_protocol::Error::rejected("recipient not on protocol"));
        let service = crate::OutboxService::new(f.store.clone());
        let (msg, _) = service.enqueue(text_message(&f, None)).await.unwrap();

        f.worker.drain_ready().await.unwrap();
        assert_eq!(row_status(&f, &msg.id).await, OutboxStatus::Failed);
        assert_eq!(f.dispatcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_payload_fails_terminally() {
        let f = fixture().await;
        let service = crate::OutboxService::new(f.store.clone());
        let mut bad = text_message(&f, None);
        bad.payload = serde_json::json!({"kind": "no-such-kind"});
        let (msg, _) = service.enqueue(bad).await.unwrap();

        f.worker.drain_ready().await.unwrap();
        assert_eq!(row_status(&f, &msg.id).await, OutboxStatus::Failed);
        assert_eq!(f.dispatcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn backoff_defers_recently_retried_rows() {
        let f = fixture().await;
        f.dispatcher.connected.store(false, Ordering::SeqCst);
        let service = crate::OutboxService::new(f.store.clone());
        let (msg, _) = service.enqueue(text_message(&f, None)).await.unwrap();

        f.worker.drain_ready().await.unwrap();
        // Second poll comes before the backoff window lapses: no claim.
        f.worker.drain_ready().await.unwrap();

        let row = f
            .store
            .outbox()
            .find_scoped(&f.tenant_id, &f.device_id, &msg.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.retries, 1);
        assert_eq!(f.dispatcher.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(retry_backoff_secs(0), 1);
        assert_eq!(retry_backoff_secs(1), 2);
        assert_eq!(retry_backoff_secs(3), 8);
        assert_eq!(retry_backoff_secs(10), 60);
    }
}
