use sqlx::SqlitePool;

use rijan_common::{mint_id, unix_now};

use crate::{error::Result, models::AuditEntry};

/// Append-only audit trail for admin and lifecycle actions.
pub struct AuditRepo {
    pool: SqlitePool,
}

/// Builder-ish insert payload; everything but actor/action is optional.
#[derive(Debug, Clone, Default)]
pub struct NewAuditEntry<'a> {
    pub tenant_id: Option<&'a str>,
    pub actor: &'a str,
    pub action: &'a str,
    pub resource_type: Option<&'a str>,
    pub resource_id: Option<&'a str>,
    pub meta: Option<serde_json::Value>,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

impl AuditRepo {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, entry: NewAuditEntry<'_>) -> Result<()> {
        let meta = entry.meta.map(|m| serde_json::to_string(&m)).transpose()?;
        sqlx::query(
            "INSERT INTO audit_logs
             (id, tenant_id, actor, action, resource_type, resource_id, meta,
              ip_address, user_agent, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(mint_id(Some("audit")))
        .bind(entry.tenant_id)
        .bind(entry.actor)
        .bind(entry.action)
        .bind(entry.resource_type)
        .bind(entry.resource_id)
        .bind(meta)
        .bind(entry.ip_address)
        .bind(entry.user_agent)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list(&self, tenant_id: Option<&str>, limit: i64) -> Result<Vec<AuditEntry>> {
        type Row = (
            String,
            Option<String>,
            String,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            i64,
        );
        const COLUMNS: &str = "id, tenant_id, actor, action, resource_type, resource_id, meta, \
                               ip_address, user_agent, created_at";
        let rows: Vec<Row> = match tenant_id {
            Some(tenant_id) => {
                sqlx::query_as(&format!(
                    "SELECT {COLUMNS} FROM audit_logs WHERE tenant_id = ?
                     ORDER BY created_at DESC LIMIT ?"
                ))
                .bind(tenant_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {COLUMNS} FROM audit_logs ORDER BY created_at DESC LIMIT ?"
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter()
            .map(|r| {
                Ok(AuditEntry {
                    id: r.0,
                    tenant_id: r.1,
                    actor: r.2,
                    action: r.3,
                    resource_type: r.4,
                    resource_id: r.5,
                    meta: r.6.map(|m| serde_json::from_str(&m)).transpose()?,
                    ip_address: r.7,
                    user_agent: r.8,
                    created_at: r.9,
                })
            })
            .collect()
    }

    /// Count rows for one action token (used by tests and ops tooling).
    pub async fn count_action(&self, action: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_logs WHERE action = ?")
            .bind(action)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
