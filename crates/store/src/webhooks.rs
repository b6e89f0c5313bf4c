use sqlx::SqlitePool;

use rijan_common::{mint_id, unix_now};

use crate::{
    error::Result,
    models::{DlqEntry, Webhook, WebhookLog},
};

pub struct WebhookRepo {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct NewWebhook {
    pub tenant_id: String,
    pub url: String,
    pub secret: Option<String>,
    pub events: Vec<String>,
    pub retry_count: Option<i64>,
    pub timeout_ms: Option<i64>,
}

/// Partial update; `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct WebhookUpdate {
    pub url: Option<String>,
    pub secret: Option<Option<String>>,
    pub events: Option<Vec<String>>,
    pub enabled: Option<bool>,
    pub retry_count: Option<i64>,
    pub timeout_ms: Option<i64>,
}

type WebhookRow = (
    String,
    String,
    String,
    Option<String>,
    String,
    bool,
    i64,
    i64,
    i64,
    i64,
);

fn from_row(row: WebhookRow) -> Result<Webhook> {
    Ok(Webhook {
        id: row.0,
        tenant_id: row.1,
        url: row.2,
        secret: row.3,
        events: serde_json::from_str(&row.4)?,
        enabled: row.5,
        retry_count: row.6,
        timeout_ms: row.7,
        created_at: row.8,
        updated_at: row.9,
    })
}

const COLUMNS: &str =
    "id, tenant_id, url, secret, events, enabled, retry_count, timeout_ms, created_at, updated_at";

impl WebhookRepo {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewWebhook) -> Result<Webhook> {
        let id = mint_id(Some("wh"));
        let now = unix_now();
        let retry_count = new.retry_count.unwrap_or(3);
        let timeout_ms = new.timeout_ms.unwrap_or(5000);
        sqlx::query(
            "INSERT INTO webhooks
             (id, tenant_id, url, secret, events, enabled, retry_count, timeout_ms,
              created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.tenant_id)
        .bind(&new.url)
        .bind(new.secret.as_deref())
        .bind(serde_json::to_string(&new.events)?)
        .bind(retry_count)
        .bind(timeout_ms)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(Webhook {
            id,
            tenant_id: new.tenant_id,
            url: new.url,
            secret: new.secret,
            events: new.events,
            enabled: true,
            retry_count,
            timeout_ms,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn find_scoped(&self, tenant_id: &str, webhook_id: &str) -> Result<Option<Webhook>> {
        let row: Option<WebhookRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM webhooks WHERE id = ? AND tenant_id = ?"
        ))
        .bind(webhook_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(from_row).transpose()
    }

    pub async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<Webhook>> {
        let rows: Vec<WebhookRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM webhooks WHERE tenant_id = ? ORDER BY created_at ASC"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Candidates for dispatch; event-type matching (including the
    /// `message.status` alias) happens in the fan-out layer.
    pub async fn list_enabled(&self, tenant_id: &str) -> Result<Vec<Webhook>> {
        let rows: Vec<WebhookRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM webhooks WHERE tenant_id = ? AND enabled = 1"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(from_row).collect()
    }

    pub async fn update(
        &self,
        tenant_id: &str,
        webhook_id: &str,
        update: WebhookUpdate,
    ) -> Result<Option<Webhook>> {
        let Some(current) = self.find_scoped(tenant_id, webhook_id).await? else {
            return Ok(None);
        };

        let url = update.url.unwrap_or(current.url);
        let secret = update.secret.unwrap_or(current.secret);
        let events = update.events.unwrap_or(current.events);
        let enabled = update.enabled.unwrap_or(current.enabled);
        let retry_count = update.retry_count.unwrap_or(current.retry_count);
        let timeout_ms = update.timeout_ms.unwrap_or(current.timeout_ms);

        sqlx::query(
            "UPDATE webhooks
             SET url = ?, secret = ?, events = ?, enabled = ?, retry_count = ?,
                 timeout_ms = ?, updated_at = ?
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(&url)
        .bind(secret.as_deref())
        .bind(serde_json::to_string(&events)?)
        .bind(enabled)
        .bind(retry_count)
        .bind(timeout_ms)
        .bind(unix_now())
        .bind(webhook_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        self.find_scoped(tenant_id, webhook_id).await
    }

    pub async fn delete(&self, tenant_id: &str, webhook_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = ? AND tenant_id = ?")
            .bind(webhook_id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_enabled(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM webhooks WHERE enabled = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// ── Delivery logs ────────────────────────────────────────────────────────────

pub struct WebhookLogRepo {
    pool: SqlitePool,
}

impl WebhookLogRepo {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// One row per delivery batch: final status code, attempt count, last
    /// error if any.
    pub async fn record(
        &self,
        webhook_id: &str,
        event_id: Option<&str>,
        status_code: Option<i64>,
        attempts: i64,
        last_error: Option<&str>,
    ) -> Result<WebhookLog> {
        let id = mint_id(Some("whlog"));
        let now = unix_now();
        sqlx::query(
            "INSERT INTO webhook_logs (id, webhook_id, event_id, status_code, attempts, last_error, sent_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(webhook_id)
        .bind(event_id)
        .bind(status_code)
        .bind(attempts)
        .bind(last_error)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(WebhookLog {
            id,
            webhook_id: webhook_id.to_string(),
            event_id: event_id.map(str::to_string),
            status_code,
            attempts,
            last_error: last_error.map(str::to_string),
            sent_at: Some(now),
        })
    }

    pub async fn list_for_webhook(&self, webhook_id: &str, limit: i64) -> Result<Vec<WebhookLog>> {
        let rows: Vec<(String, String, Option<String>, Option<i64>, i64, Option<String>, Option<i64>)> =
            sqlx::query_as(
                "SELECT id, webhook_id, event_id, status_code, attempts, last_error, sent_at
                 FROM webhook_logs WHERE webhook_id = ?
                 ORDER BY sent_at DESC LIMIT ?",
            )
            .bind(webhook_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| WebhookLog {
                id: r.0,
                webhook_id: r.1,
                event_id: r.2,
                status_code: r.3,
                attempts: r.4,
                last_error: r.5,
                sent_at: r.6,
            })
            .collect())
    }
}

// ── Dead letters ─────────────────────────────────────────────────────────────

pub struct DlqRepo {
    pool: SqlitePool,
}

impl DlqRepo {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        webhook_id: &str,
        event_payload: &serde_json::Value,
        reason: &str,
    ) -> Result<DlqEntry> {
        let id = mint_id(Some("dlq"));
        let now = unix_now();
        sqlx::query(
            "INSERT INTO webhook_dlq (id, webhook_id, event_payload, reason, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(webhook_id)
        .bind(serde_json::to_string(event_payload)?)
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(DlqEntry {
            id,
            webhook_id: webhook_id.to_string(),
            event_payload: event_payload.clone(),
            reason: reason.to_string(),
            created_at: now,
        })
    }

    pub async fn list_for_webhook(&self, webhook_id: &str, limit: i64) -> Result<Vec<DlqEntry>> {
        let rows: Vec<(String, String, String, String, i64)> = sqlx::query_as(
            "SELECT id, webhook_id, event_payload, reason, created_at
             FROM webhook_dlq WHERE webhook_id = ?
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(webhook_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| {
                Ok(DlqEntry {
                    id: r.0,
                    webhook_id: r.1,
                    event_payload: serde_json::from_str(&r.2)?,
                    reason: r.3,
                    created_at: r.4,
                })
            })
            .collect()
    }

    pub async fn size(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM webhook_dlq")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
