use sqlx::SqlitePool;

use rijan_common::{prefixed_id, unix_now};

use crate::{
    error::Result,
    models::{Device, DeviceSession, DeviceStatus},
};

pub struct DeviceRepo {
    pool: SqlitePool,
}

type DeviceRow = (String, String, String, Option<String>, String, i64, Option<i64>);

fn from_row(row: DeviceRow) -> Result<Device> {
    Ok(Device {
        id: row.0,
        tenant_id: row.1,
        label: row.2,
        phone_number: row.3,
        status: DeviceStatus::parse(&row.4)?,
        created_at: row.5,
        last_seen: row.6,
    })
}

const COLUMNS: &str = "id, tenant_id, label, phone_number, status, created_at, last_seen";

impl DeviceRepo {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, tenant_id: &str, label: &str) -> Result<Device> {
        let id = prefixed_id("device");
        let now = unix_now();
        sqlx::query(
            "INSERT INTO devices (id, tenant_id, label, status, created_at)
             VALUES (?, ?, ?, 'disconnected', ?)",
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(label)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(Device {
            id,
            tenant_id: tenant_id.to_string(),
            label: label.to_string(),
            phone_number: None,
            status: DeviceStatus::Disconnected,
            created_at: now,
            last_seen: None,
        })
    }

    /// The only device lookup offered to tenant-facing code: both ids must
    /// match. A device belonging to someone else is indistinguishable from
    /// a missing one.
    pub async fn find_scoped(&self, tenant_id: &str, device_id: &str) -> Result<Option<Device>> {
        let row: Option<DeviceRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM devices WHERE id = ? AND tenant_id = ?"
        ))
        .bind(device_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(from_row).transpose()
    }

    pub async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<Device>> {
        let rows: Vec<DeviceRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM devices WHERE tenant_id = ? ORDER BY created_at ASC"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Status transition, written by the lifecycle engine (the lock
    /// holder). Unscoped by tenant on purpose: the engine owns devices
    /// across tenants.
    pub async fn set_status(&self, device_id: &str, status: DeviceStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE devices SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mirror the paired identity (phone number) onto the device row.
    pub async fn set_phone_number(&self, device_id: &str, phone: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE devices SET phone_number = ? WHERE id = ?")
            .bind(phone)
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn touch_last_seen(&self, device_id: &str) -> Result<()> {
        sqlx::query("UPDATE devices SET last_seen = ? WHERE id = ?")
            .bind(unix_now())
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, tenant_id: &str, device_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM devices WHERE id = ? AND tenant_id = ?")
            .bind(device_id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Device counts per status, for the metrics sweep.
    pub async fn count_by_status(&self) -> Result<Vec<(DeviceStatus, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM devices GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(status, count)| Ok((DeviceStatus::parse(&status)?, count)))
            .collect()
    }
}

// ── Session metadata ─────────────────────────────────────────────────────────

/// Discovery records for on-disk credential directories. The directory is
/// the source of truth; this row only mirrors what pairing produced.
pub struct SessionMetaRepo {
    pool: SqlitePool,
}

type SessionRow = (String, Option<String>, String, String, Option<String>, Option<String>, i64);

impl SessionMetaRepo {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(
        &self,
        device_id: &str,
        tenant_id: &str,
        session_dir: &str,
        wa_jid: Option<&str>,
        wa_name: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO device_sessions
             (device_id, tenant_id, session_kind, session_dir, wa_jid, wa_name, updated_at)
             VALUES (?, ?, 'filesystem', ?, ?, ?, ?)
             ON CONFLICT(device_id) DO UPDATE SET
               tenant_id   = excluded.tenant_id,
               session_dir = excluded.session_dir,
               wa_jid      = COALESCE(excluded.wa_jid, device_sessions.wa_jid),
               wa_name     = COALESCE(excluded.wa_name, device_sessions.wa_name),
               updated_at  = excluded.updated_at",
        )
        .bind(device_id)
        .bind(tenant_id)
        .bind(session_dir)
        .bind(wa_jid)
        .bind(wa_name)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find(&self, device_id: &str) -> Result<Option<DeviceSession>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT device_id, tenant_id, session_kind, session_dir, wa_jid, wa_name, updated_at
             FROM device_sessions WHERE device_id = ?",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| DeviceSession {
            device_id: r.0,
            tenant_id: r.1,
            session_kind: r.2,
            session_dir: r.3,
            wa_jid: r.4,
            wa_name: r.5,
            updated_at: r.6,
        }))
    }

    pub async fn delete(&self, device_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM device_sessions WHERE device_id = ?")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
