use sqlx::SqlitePool;

use rijan_common::{prefixed_id, unix_now};

use crate::{
    error::Result,
    models::{Tenant, TenantStatus},
};

pub struct TenantRepo {
    pool: SqlitePool,
}

type TenantRow = (String, String, String, String, i64, i64);

fn from_row(row: TenantRow) -> Result<Tenant> {
    Ok(Tenant {
        id: row.0,
        name: row.1,
        api_key_hash: row.2,
        status: TenantStatus::parse(&row.3)?,
        created_at: row.4,
        updated_at: row.5,
    })
}

const COLUMNS: &str = "id, name, api_key_hash, status, created_at, updated_at";

impl TenantRepo {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new active tenant. The caller supplies the fingerprint of
    /// the token it just issued; the token itself is never stored.
    pub async fn create(&self, name: &str, api_key_hash: &str) -> Result<Tenant> {
        self.create_with_id(&prefixed_id("tenant"), name, api_key_hash).await
    }

    /// Variant for callers that must mint the id first (the issued token
    /// embeds it).
    pub async fn create_with_id(
        &self,
        id: &str,
        name: &str,
        api_key_hash: &str,
    ) -> Result<Tenant> {
        let id = id.to_string();
        let now = unix_now();
        sqlx::query(
            "INSERT INTO tenants (id, name, api_key_hash, status, created_at, updated_at)
             VALUES (?, ?, ?, 'active', ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(api_key_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(Tenant {
            id,
            name: name.to_string(),
            api_key_hash: api_key_hash.to_string(),
            status: TenantStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    /// Find by id. Tombstoned tenants are invisible.
    pub async fn find(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        let row: Option<TenantRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM tenants WHERE id = ? AND status != 'deleted'"
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(from_row).transpose()
    }

    /// Authentication lookup by token fingerprint.
    pub async fn find_by_api_key_hash(&self, api_key_hash: &str) -> Result<Option<Tenant>> {
        let row: Option<TenantRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM tenants WHERE api_key_hash = ? AND status != 'deleted'"
        ))
        .bind(api_key_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(from_row).transpose()
    }

    pub async fn list(&self) -> Result<Vec<Tenant>> {
        let rows: Vec<TenantRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM tenants WHERE status != 'deleted' ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Suspend or re-activate. Returns false if the tenant is unknown or
    /// tombstoned.
    pub async fn set_status(&self, tenant_id: &str, status: TenantStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tenants SET status = ?, updated_at = ?
             WHERE id = ? AND status != 'deleted'",
        )
        .bind(status.as_str())
        .bind(unix_now())
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the stored token fingerprint (token rotation).
    pub async fn set_api_key_hash(&self, tenant_id: &str, api_key_hash: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tenants SET api_key_hash = ?, updated_at = ?
             WHERE id = ? AND status != 'deleted'",
        )
        .bind(api_key_hash)
        .bind(unix_now())
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Tombstone the tenant and hard-delete its devices in one
    /// transaction. Foreign keys cascade the device-owned rows (sessions,
    /// outbox, inbox); history tables keyed only by tenant id are kept for
    /// audit.
    pub async fn soft_delete(&self, tenant_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE tenants SET status = 'deleted', updated_at = ?
             WHERE id = ? AND status != 'deleted'",
        )
        .bind(unix_now())
        .bind(tenant_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query("DELETE FROM devices WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }
}
