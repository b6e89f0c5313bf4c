//! Canonical metric names. Use these constants instead of string literals
//! so the scrape surface stays greppable.

/// Devices by status; labeled `status`.
pub const DEVICES: &str = "rijan_devices";

/// Outbox rows by status; labeled `status`.
pub const OUTBOX_MESSAGES: &str = "rijan_outbox_messages";

/// Messages accepted by the sender and handed to the protocol client.
pub const MESSAGES_SENT_TOTAL: &str = "rijan_messages_sent_total";

/// Inbound messages persisted from protocol events.
pub const MESSAGES_RECEIVED_TOTAL: &str = "rijan_messages_received_total";

/// Enabled webhook subscriptions.
pub const WEBHOOKS_ACTIVE: &str = "rijan_webhooks_active";

/// Webhook delivery attempts; labeled `outcome` (`ok`, `retry`, `dead`).
pub const WEBHOOK_DELIVERIES_TOTAL: &str = "rijan_webhook_deliveries_total";

/// Dead-letter queue depth.
pub const WEBHOOK_DLQ_SIZE: &str = "rijan_webhook_dlq_size";

/// HTTP requests served; labeled `method` and `status`.
pub const HTTP_REQUESTS_TOTAL: &str = "rijan_http_requests_total";

/// Seconds since process start.
pub const UPTIME_SECONDS: &str = "rijan_uptime_seconds";

/// Resident set size in bytes.
pub const MEMORY_RSS_BYTES: &str = "rijan_memory_rss_bytes";

/// Seconds since each worker's last heartbeat; labeled `worker`.
pub const WORKER_HEARTBEAT_AGE_SECONDS: &str = "rijan_worker_heartbeat_age_seconds";
