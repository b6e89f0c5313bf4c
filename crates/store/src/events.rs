use sqlx::SqlitePool;

use rijan_common::{mint_id, unix_now};

use crate::{error::Result, models::EventLog};

/// Append-only protocol event log. Retention is somebody else's problem.
pub struct EventLogRepo {
    pool: SqlitePool,
}

/// Read-side filter for the events endpoint. `limit` is clamped to 500.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub since: Option<i64>,
    pub event_type: Option<String>,
    pub limit: Option<i64>,
}

const MAX_LIMIT: i64 = 500;

type EventRow = (String, String, String, String, String, i64);

fn from_row(row: EventRow) -> Result<EventLog> {
    Ok(EventLog {
        id: row.0,
        tenant_id: row.1,
        device_id: row.2,
        event_type: row.3,
        payload: serde_json::from_str(&row.4)?,
        received_at: row.5,
    })
}

impl EventLogRepo {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(
        &self,
        tenant_id: &str,
        device_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<EventLog> {
        let id = mint_id(Some("evt"));
        let now = unix_now();
        sqlx::query(
            "INSERT INTO event_logs (id, tenant_id, device_id, event_type, payload, received_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(device_id)
        .bind(event_type)
        .bind(serde_json::to_string(payload)?)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(EventLog {
            id,
            tenant_id: tenant_id.to_string(),
            device_id: device_id.to_string(),
            event_type: event_type.to_string(),
            payload: payload.clone(),
            received_at: now,
        })
    }

    pub async fn list_scoped(
        &self,
        tenant_id: &str,
        device_id: &str,
        filter: &EventFilter,
    ) -> Result<Vec<EventLog>> {
        let limit = filter.limit.unwrap_or(100).clamp(1, MAX_LIMIT);
        let rows: Vec<EventRow> = match filter.event_type.as_deref() {
            Some(event_type) => {
                sqlx::query_as(
                    "SELECT id, tenant_id, device_id, event_type, payload, received_at
                     FROM event_logs
                     WHERE tenant_id = ? AND device_id = ? AND received_at > ? AND event_type = ?
                     ORDER BY received_at ASC, rowid ASC LIMIT ?",
                )
                .bind(tenant_id)
                .bind(device_id)
                .bind(filter.since.unwrap_or(0))
                .bind(event_type)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT id, tenant_id, device_id, event_type, payload, received_at
                     FROM event_logs
                     WHERE tenant_id = ? AND device_id = ? AND received_at > ?
                     ORDER BY received_at ASC, rowid ASC LIMIT ?",
                )
                .bind(tenant_id)
                .bind(device_id)
                .bind(filter.since.unwrap_or(0))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(from_row).collect()
    }
}
