//! Capture → persist → match → dispatch.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use {
    rijan_common::{unix_now, Heartbeat},
    rijan_store::{Store, Webhook},
};

use crate::{
    deliver::{deliver, DeliveryOutcome, DispatchConfig},
    sink::{EventSink, GatewayEvent},
};

/// Subscription alias expanding to the message-status family.
pub const MESSAGE_STATUS_ALIAS: &str = "message.status";

const ALIAS_EXPANSION: [&str; 3] = ["message.updated", "receipt.delivery", "receipt.read"];

/// Queue depth between socket callbacks and the dispatcher.
const QUEUE_DEPTH: usize = 1024;

/// Does a subscription list cover this event type?
#[must_use]
pub fn subscription_matches(subscribed: &[String], event_type: &str) -> bool {
    subscribed.iter().any(|s| s == event_type)
        || (ALIAS_EXPANSION.contains(&event_type)
            && subscribed.iter().any(|s| s == MESSAGE_STATUS_ALIAS))
}

pub struct EventPipeline {
    store: Store,
    config: DispatchConfig,
    client: reqwest::Client,
    tx: mpsc::Sender<GatewayEvent>,
    heartbeat: Heartbeat,
}

impl EventPipeline {
    /// Start the dispatcher task and return the shared pipeline handle.
    #[must_use]
    pub fn spawn(store: Store, config: DispatchConfig, cancel: CancellationToken) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let heartbeat = Heartbeat::new();
        let client = reqwest::Client::new();

        let pipeline = Arc::new(Self {
            store: store.clone(),
            config: config.clone(),
            client: client.clone(),
            tx,
            heartbeat: heartbeat.clone(),
        });

        tokio::spawn(dispatch_loop(store, config, client, rx, heartbeat, cancel));
        pipeline
    }

    #[must_use]
    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat.clone()
    }

    /// Push a synthetic `webhook.test` event through the delivery path
    /// for one specific webhook, subscription filter bypassed.
    pub async fn deliver_test(&self, webhook: &Webhook) -> DeliveryOutcome {
        let payload = serde_json::json!({
            "id": rijan_common::mint_id(Some("evt")),
            "eventType": "webhook.test",
            "tenantId": webhook.tenant_id,
            "deviceId": serde_json::Value::Null,
            "timestamp": unix_now(),
            "data": { "note": "test delivery requested via API" },
        });
        let body = payload.to_string().into_bytes();
        let outcome = deliver(&self.client, &self.config, webhook, &body).await;
        if let Err(e) = self
            .store
            .webhook_logs()
            .record(
                &webhook.id,
                None,
                outcome.status_code,
                outcome.attempts,
                outcome.last_error.as_deref(),
            )
            .await
        {
            warn!(webhook_id = %webhook.id, "failed to record test delivery: {e}");
        }
        outcome
    }
}

#[async_trait]
impl EventSink for EventPipeline {
    async fn publish(&self, event: GatewayEvent) {
        if self.tx.send(event).await.is_err() {
            warn!("event pipeline is shut down; dropping event");
        }
    }
}

async fn dispatch_loop(
    store: Store,
    config: DispatchConfig,
    client: reqwest::Client,
    mut rx: mpsc::Receiver<GatewayEvent>,
    heartbeat: Heartbeat,
    cancel: CancellationToken,
) {
    loop {
        heartbeat.beat();
        tokio::select! {
            _ = cancel.cancelled() => break,
            () = tokio::time::sleep(Duration::from_secs(5)) => {}
            maybe = rx.recv() => {
                let Some(event) = maybe else { break };
                if let Err(e) = process_event(&store, &config, &client, event).await {
                    warn!("event fan-out failed: {e}");
                }
            }
        }
    }
    debug!("event fan-out dispatcher stopped");
}

async fn process_event(
    store: &Store,
    config: &DispatchConfig,
    client: &reqwest::Client,
    event: GatewayEvent,
) -> rijan_store::Result<()> {
    // Persist exactly once; the log row id doubles as the receiver-side
    // dedupe key.
    let log = store
        .events()
        .append(&event.tenant_id, &event.device_id, &event.event_type, &event.data)
        .await?;

    let candidates = store.webhooks().list_enabled(&event.tenant_id).await?;
    let matching: Vec<Webhook> = candidates
        .into_iter()
        .filter(|w| subscription_matches(&w.events, &event.event_type))
        .collect();
    if matching.is_empty() {
        return Ok(());
    }

    let payload = serde_json::json!({
        "id": log.id,
        "eventType": log.event_type,
        "tenantId": log.tenant_id,
        "deviceId": log.device_id,
        "timestamp": log.received_at,
        "data": log.payload,
    });
    let body: Arc<[u8]> = payload.to_string().into_bytes().into();

    for webhook in matching {
        let store = store.clone();
        let config = config.clone();
        let client = client.clone();
        let body = Arc::clone(&body);
        let event_id = log.id.clone();
        let payload = payload.clone();

        // Retries sleep for seconds; each webhook gets its own task so a
        // slow receiver cannot stall the rest of the fan-out.
        tokio::spawn(async move {
            let outcome = deliver(&client, &config, &webhook, &body).await;

            let delivery_outcome = if outcome.ok {
                "ok"
            } else {
                "dead"
            };
            rijan_metrics::counter!(
                rijan_metrics::WEBHOOK_DELIVERIES_TOTAL,
                "outcome" => delivery_outcome
            )
            .increment(1);

            if let Err(e) = store
                .webhook_logs()
                .record(
                    &webhook.id,
                    Some(&event_id),
                    outcome.status_code,
                    outcome.attempts,
                    outcome.last_error.as_deref(),
                )
                .await
            {
                warn!(webhook_id = %webhook.id, "failed to record webhook log: {e}");
            }

            if !outcome.ok {
                let reason = outcome
                    .last_error
                    .unwrap_or_else(|| "delivery failed".to_string());
                if let Err(e) = store.dlq().insert(&webhook.id, &payload, &reason).await {
                    warn!(webhook_id = %webhook.id, "failed to dead-letter event: {e}");
                }
            }
        });
    }

    Ok(())
}
