use sqlx::SqlitePool;

use rijan_common::{mint_id, unix_now};

use crate::{error::Result, models::InboxMessage};

/// Persisted inbound messages, written by the lifecycle event hooks.
pub struct InboxRepo {
    pool: SqlitePool,
}

type InboxRow = (String, String, String, String, String, String, String, i64);

fn from_row(row: InboxRow) -> Result<InboxMessage> {
    Ok(InboxMessage {
        id: row.0,
        tenant_id: row.1,
        device_id: row.2,
        jid: row.3,
        message_id: row.4,
        message_type: row.5,
        payload: serde_json::from_str(&row.6)?,
        received_at: row.7,
    })
}

const COLUMNS: &str = "id, tenant_id, device_id, jid, message_id, message_type, payload, received_at";

impl InboxRepo {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        tenant_id: &str,
        device_id: &str,
        jid: &str,
        message_id: &str,
        message_type: &str,
        payload: &serde_json::Value,
    ) -> Result<InboxMessage> {
        let id = mint_id(Some("in"));
        let now = unix_now();
        sqlx::query(
            "INSERT INTO messages_inbox
             (id, tenant_id, device_id, jid, message_id, message_type, payload, received_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(device_id)
        .bind(jid)
        .bind(message_id)
        .bind(message_type)
        .bind(serde_json::to_string(payload)?)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(InboxMessage {
            id,
            tenant_id: tenant_id.to_string(),
            device_id: device_id.to_string(),
            jid: jid.to_string(),
            message_id: message_id.to_string(),
            message_type: message_type.to_string(),
            payload: payload.clone(),
            received_at: now,
        })
    }

    pub async fn list_scoped(
        &self,
        tenant_id: &str,
        device_id: &str,
        since: Option<i64>,
        limit: i64,
    ) -> Result<Vec<InboxMessage>> {
        let rows: Vec<InboxRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM messages_inbox
             WHERE tenant_id = ? AND device_id = ? AND received_at > ?
             ORDER BY received_at DESC LIMIT ?"
        ))
        .bind(tenant_id)
        .bind(device_id)
        .bind(since.unwrap_or(0))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(from_row).collect()
    }
}
