//! The durable send queue.
//!
//! Rows travel `pending → queued → sending → sent → delivered → read` on
//! the happy path, or divert to `failed`/`expired`. Status writes are
//! conditional updates keyed on the current status, so two workers can
//! never double-claim a row.

use sqlx::SqlitePool;

use rijan_common::{mint_id, unix_now};

use crate::{
    error::Result,
    models::{OutboxMessage, OutboxStatus},
};

pub struct OutboxRepo {
    pool: SqlitePool,
}

/// Producer-side insert payload.
#[derive(Debug, Clone)]
pub struct NewOutboxMessage {
    pub tenant_id: String,
    pub device_id: String,
    pub jid: String,
    pub message_type: String,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
}

type OutboxRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    i64,
    Option<i64>,
);

fn from_row(row: OutboxRow) -> Result<OutboxMessage> {
    Ok(OutboxMessage {
        id: row.0,
        tenant_id: row.1,
        device_id: row.2,
        jid: row.3,
        message_type: row.4,
        payload: serde_json::from_str(&row.5)?,
        status: OutboxStatus::parse(&row.6)?,
        retries: row.7,
        error_message: row.8,
        idempotency_key: row.9,
        wa_message_id: row.10,
        created_at: row.11,
        updated_at: row.12,
        sent_at: row.13,
    })
}

const COLUMNS: &str = "id, tenant_id, device_id, jid, message_type, payload, status, retries, \
                       error_message, idempotency_key, wa_message_id, created_at, updated_at, sent_at";

impl OutboxRepo {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Idempotent enqueue. When the idempotency key already names a row
    /// for this device, that row comes back unchanged with `deduplicated
    /// = true` and nothing is written.
    pub async fn insert_pending(&self, new: NewOutboxMessage) -> Result<(OutboxMessage, bool)> {
        if let Some(key) = new.idempotency_key.as_deref() {
            if let Some(existing) = self.find_by_idempotency(&new.device_id, key).await? {
                return Ok((existing, true));
            }
        }

        let id = mint_id(Some("msg"));
        let now = unix_now();
        let insert = sqlx::query(
            "INSERT INTO messages_outbox
             (id, tenant_id, device_id, jid, message_type, payload, status,
              idempotency_key, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.tenant_id)
        .bind(&new.device_id)
        .bind(&new.jid)
        .bind(&new.message_type)
        .bind(serde_json::to_string(&new.payload)?)
        .bind(new.idempotency_key.as_deref())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match insert {
            Ok(_) => Ok((
                OutboxMessage {
                    id,
                    tenant_id: new.tenant_id,
                    device_id: new.device_id,
                    jid: new.jid,
                    message_type: new.message_type,
                    payload: new.payload,
                    status: OutboxStatus::Pending,
                    retries: 0,
                    error_message: None,
                    idempotency_key: new.idempotency_key,
                    wa_message_id: None,
                    created_at: now,
                    updated_at: now,
                    sent_at: None,
                },
                false,
            )),
            Err(err) => {
                // Unique-index race: a concurrent submit with the same key
                // won. Surface that row instead of the violation.
                if let Some(key) = new.idempotency_key.as_deref() {
                    if let Some(existing) = self.find_by_idempotency(&new.device_id, key).await? {
                        return Ok((existing, true));
                    }
                }
                Err(err.into())
            }
        }
    }

    pub async fn find_by_idempotency(
        &self,
        device_id: &str,
        key: &str,
    ) -> Result<Option<OutboxMessage>> {
        let row: Option<OutboxRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM messages_outbox WHERE device_id = ? AND idempotency_key = ?"
        ))
        .bind(device_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(from_row).transpose()
    }

    pub async fn find_scoped(
        &self,
        tenant_id: &str,
        device_id: &str,
        message_id: &str,
    ) -> Result<Option<OutboxMessage>> {
        let row: Option<OutboxRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM messages_outbox
             WHERE id = ? AND tenant_id = ? AND device_id = ?"
        ))
        .bind(message_id)
        .bind(tenant_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(from_row).transpose()
    }

    pub async fn list_scoped(
        &self,
        tenant_id: &str,
        device_id: &str,
        status: Option<OutboxStatus>,
        limit: i64,
    ) -> Result<Vec<OutboxMessage>> {
        let rows: Vec<OutboxRow> = match status {
            Some(status) => {
                sqlx::query_as(&format!(
                    "SELECT {COLUMNS} FROM messages_outbox
                     WHERE tenant_id = ? AND device_id = ? AND status = ?
                     ORDER BY created_at DESC LIMIT ?"
                ))
                .bind(tenant_id)
                .bind(device_id)
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {COLUMNS} FROM messages_outbox
                     WHERE tenant_id = ? AND device_id = ?
                     ORDER BY created_at DESC LIMIT ?"
                ))
                .bind(tenant_id)
                .bind(device_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(from_row).collect()
    }

    /// Rows the sender should look at: fresh `pending` plus `queued` rows
    /// that have sat past the stuck horizon. FIFO per the created_at index.
    pub async fn next_ready(&self, stuck_after_secs: i64, limit: i64) -> Result<Vec<OutboxMessage>> {
        let stale_before = unix_now() - stuck_after_secs;
        let rows: Vec<OutboxRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM messages_outbox
             WHERE status = 'pending' OR (status = 'queued' AND updated_at < ?)
             ORDER BY created_at ASC, rowid ASC LIMIT ?"
        ))
        .bind(stale_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Compare-and-set claim. Only one caller can move a row into
    /// `sending`; a miss means someone else already has it.
    pub async fn claim_sending(&self, message_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE messages_outbox SET status = 'sending', updated_at = ?
             WHERE id = ? AND status IN ('pending', 'queued')",
        )
        .bind(unix_now())
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_sent(&self, message_id: &str, wa_message_id: &str) -> Result<()> {
        let now = unix_now();
        sqlx::query(
            "UPDATE messages_outbox
             SET status = 'sent', wa_message_id = ?, sent_at = ?, updated_at = ?, error_message = NULL
             WHERE id = ? AND status = 'sending'",
        )
        .bind(wa_message_id)
        .bind(now)
        .bind(now)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Put a row back in line after a transient failure.
    pub async fn requeue(&self, message_id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE messages_outbox
             SET status = 'pending', retries = retries + 1, error_message = ?, updated_at = ?
             WHERE id = ? AND status = 'sending'",
        )
        .bind(error)
        .bind(unix_now())
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, message_id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE messages_outbox
             SET status = 'failed', error_message = ?, updated_at = ?
             WHERE id = ? AND status IN ('pending', 'queued', 'sending')",
        )
        .bind(error)
        .bind(unix_now())
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sweep never-sent rows past the horizon into `expired`.
    pub async fn expire_older_than(&self, horizon_secs: i64) -> Result<u64> {
        let cutoff = unix_now() - horizon_secs;
        let result = sqlx::query(
            "UPDATE messages_outbox
             SET status = 'expired', updated_at = ?
             WHERE status IN ('pending', 'queued') AND created_at < ?",
        )
        .bind(unix_now())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Advance a sent row on a delivery or read receipt. Transitions are
    /// monotonic: `delivered` only lands on `sent`, `read` on either.
    pub async fn apply_receipt(
        &self,
        device_id: &str,
        wa_message_id: &str,
        receipt: OutboxStatus,
    ) -> Result<bool> {
        let allowed_from = match receipt {
            OutboxStatus::Delivered => "('sent')",
            OutboxStatus::Read => "('sent', 'delivered')",
            _ => return Ok(false),
        };
        let result = sqlx::query(&format!(
            "UPDATE messages_outbox SET status = ?, updated_at = ?
             WHERE device_id = ? AND wa_message_id = ? AND status IN {allowed_from}"
        ))
        .bind(receipt.as_str())
        .bind(unix_now())
        .bind(device_id)
        .bind(wa_message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_by_status(&self) -> Result<Vec<(OutboxStatus, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM messages_outbox GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(status, count)| Ok((OutboxStatus::parse(&status)?, count)))
            .collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    async fn fixture() -> (Store, String, String) {
        let store = Store::open_in_memory().await.unwrap();
        let t = store.tenants().create("Acme", "h").await.unwrap();
        let d = store.devices().create(&t.id, "Sales").await.unwrap();
        (store, t.id, d.id)
    }

    fn new_message(tenant: &str, device: &str, key: Option<&str>) -> NewOutboxMessage {
        NewOutboxMessage {
            tenant_id: tenant.to_string(),
            device_id: device.to_string(),
            jid: "6281234567890@s.whatsapp.net".into(),
            message_type: "text".into(),
            payload: serde_json::json!({"text": "hi"}),
            idempotency_key: key.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_returns_existing_row() {
        let (store, t, d) = fixture().await;
        let outbox = store.outbox();

        let (first, deduped) = outbox.insert_pending(new_message(&t, &d, Some("k-1"))).await.unwrap();
        assert!(!deduped);
        let (second, deduped) = outbox.insert_pending(new_message(&t, &d, Some("k-1"))).await.unwrap();
        assert!(deduped);
        assert_eq!(first.id, second.id);

        let counts = outbox.count_by_status().await.unwrap();
        assert_eq!(counts, vec![(OutboxStatus::Pending, 1)]);
    }

    #[tokio::test]
    async fn same_key_on_different_devices_is_not_a_duplicate() {
        let (store, t, d) = fixture().await;
        let d2 = store.devices().create(&t, "Support").await.unwrap();

        let (a, _) = store.outbox().insert_pending(new_message(&t, &d, Some("k"))).await.unwrap();
        let (b, deduped) = store
            .outbox()
            .insert_pending(new_message(&t, &d2.id, Some("k")))
            .await
            .unwrap();
        assert!(!deduped);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let (store, t, d) = fixture().await;
        let (msg, _) = store.outbox().insert_pending(new_message(&t, &d, None)).await.unwrap();

        assert!(store.outbox().claim_sending(&msg.id).await.unwrap());
        // Second claim misses: the row is no longer pending.
        assert!(!store.outbox().claim_sending(&msg.id).await.unwrap());
    }

    #[tokio::test]
    async fn happy_path_through_read() {
        let (store, t, d) = fixture().await;
        let outbox = store.outbox();
        let (msg, _) = outbox.insert_pending(new_message(&t, &d, None)).await.unwrap();

        assert!(outbox.claim_sending(&msg.id).await.unwrap());
        outbox.mark_sent(&msg.id, "WAMID.1").await.unwrap();

        assert!(outbox
            .apply_receipt(&d, "WAMID.1", OutboxStatus::Delivered)
            .await
            .unwrap());
        assert!(outbox.apply_receipt(&d, "WAMID.1", OutboxStatus::Read).await.unwrap());

        // Receipts never move the row backwards.
        assert!(!outbox
            .apply_receipt(&d, "WAMID.1", OutboxStatus::Delivered)
            .await
            .unwrap());

        let row = outbox.find_scoped(&t, &d, &msg.id).await.unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Read);
        assert_eq!(row.wa_message_id.as_deref(), Some("WAMID.1"));
        assert!(row.sent_at.is_some());
    }

    #[tokio::test]
    async fn requeue_increments_retries() {
        let (store, t, d) = fixture().await;
        let outbox = store.outbox();
        let (msg, _) = outbox.insert_pending(new_message(&t, &d, None)).await.unwrap();

        outbox.claim_sending(&msg.id).await.unwrap();
        outbox.requeue(&msg.id, "device not connected").await.unwrap();

        let row = outbox.find_scoped(&t, &d, &msg.id).await.unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Pending);
        assert_eq!(row.retries, 1);
        assert_eq!(row.error_message.as_deref(), Some("device not connected"));
    }

    #[tokio::test]
    async fn expiry_sweep_only_touches_unsent_rows() {
        let (store, t, d) = fixture().await;
        let outbox = store.outbox();
        let (old, _) = outbox.insert_pending(new_message(&t, &d, None)).await.unwrap();
        let (sent, _) = outbox.insert_pending(new_message(&t, &d, None)).await.unwrap();
        outbox.claim_sending(&sent.id).await.unwrap();
        outbox.mark_sent(&sent.id, "WAMID.9").await.unwrap();

        // Horizon in the past relative to both rows.
        let swept = outbox.expire_older_than(-10).await.unwrap();
        assert_eq!(swept, 1);

        let row = outbox.find_scoped(&t, &d, &old.id).await.unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Expired);
        let row = outbox.find_scoped(&t, &d, &sent.id).await.unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Sent);
    }

    #[tokio::test]
    async fn next_ready_is_fifo() {
        let (store, t, d) = fixture().await;
        let outbox = store.outbox();
        let (a, _) = outbox.insert_pending(new_message(&t, &d, None)).await.unwrap();
        let (b, _) = outbox.insert_pending(new_message(&t, &d, None)).await.unwrap();

        let ready = outbox.next_ready(60, 10).await.unwrap();
        let ids: Vec<&str> = ready.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![a.id.as_str(), b.id.as_str()]);
    }
}
