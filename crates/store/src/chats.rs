//! Derived caches fed by protocol events: the chat list and the LID↔phone
//! map. Read-only endpoints consume them; nothing invariant-bearing lives
//! here.

use sqlx::SqlitePool;

use rijan_common::{mint_id, unix_now};

use crate::{
    error::Result,
    models::{Chat, LidMapping},
};

pub struct ChatRepo {
    pool: SqlitePool,
}

impl ChatRepo {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(
        &self,
        tenant_id: &str,
        device_id: &str,
        jid: &str,
        name: Option<&str>,
        last_message_at: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO chats (id, tenant_id, device_id, jid, name, last_message_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(device_id, jid) DO UPDATE SET
               name            = COALESCE(excluded.name, chats.name),
               last_message_at = COALESCE(excluded.last_message_at, chats.last_message_at),
               updated_at      = excluded.updated_at",
        )
        .bind(mint_id(Some("chat")))
        .bind(tenant_id)
        .bind(device_id)
        .bind(jid)
        .bind(name)
        .bind(last_message_at)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, device_id: &str, jid: &str) -> Result<()> {
        sqlx::query("DELETE FROM chats WHERE device_id = ? AND jid = ?")
            .bind(device_id)
            .bind(jid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_scoped(
        &self,
        tenant_id: &str,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<Chat>> {
        let rows: Vec<(String, String, String, String, Option<String>, Option<i64>, i64)> =
            sqlx::query_as(
                "SELECT id, tenant_id, device_id, jid, name, last_message_at, updated_at
                 FROM chats WHERE tenant_id = ? AND device_id = ?
                 ORDER BY last_message_at DESC LIMIT ?",
            )
            .bind(tenant_id)
            .bind(device_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| Chat {
                id: r.0,
                tenant_id: r.1,
                device_id: r.2,
                jid: r.3,
                name: r.4,
                last_message_at: r.5,
                updated_at: r.6,
            })
            .collect())
    }
}

pub struct LidMapRepo {
    pool: SqlitePool,
}

impl LidMapRepo {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, device_id: &str, lid: &str, phone_jid: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO lid_map (device_id, lid, phone_jid, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(device_id, lid) DO UPDATE SET
               phone_jid  = excluded.phone_jid,
               updated_at = excluded.updated_at",
        )
        .bind(device_id)
        .bind(lid)
        .bind(phone_jid)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn resolve(&self, device_id: &str, lid: &str) -> Result<Option<LidMapping>> {
        let row: Option<(String, String, String, i64)> = sqlx::query_as(
            "SELECT device_id, lid, phone_jid, updated_at
             FROM lid_map WHERE device_id = ? AND lid = ?",
        )
        .bind(device_id)
        .bind(lid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| LidMapping {
            device_id: r.0,
            lid: r.1,
            phone_jid: r.2,
            updated_at: r.3,
        }))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[tokio::test]
    async fn chat_upsert_merges() {
        let store = Store::open_in_memory().await.unwrap();
        let chats = store.chats();

        chats
            .upsert("t", "d", "628@s.whatsapp.net", Some("Budi"), Some(100))
            .await
            .unwrap();
        chats.upsert("t", "d", "628@s.whatsapp.net", None, Some(200)).await.unwrap();

        let listed = chats.list_scoped("t", "d", 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name.as_deref(), Some("Budi"));
        assert_eq!(listed[0].last_message_at, Some(200));
    }

    #[tokio::test]
    async fn lid_map_resolves_per_device() {
        let store = Store::open_in_memory().await.unwrap();
        let map = store.lid_map();

        map.upsert("d1", "123@lid", "628@s.whatsapp.net").await.unwrap();
        let hit = map.resolve("d1", "123@lid").await.unwrap().unwrap();
        assert_eq!(hit.phone_jid, "628@s.whatsapp.net");
        assert!(map.resolve("d2", "123@lid").await.unwrap().is_none());
    }
}
