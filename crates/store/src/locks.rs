//! TTL row locks keyed by device id.
//!
//! The single-writer contract for a device rests on this table: whichever
//! instance holds a live row owns the socket and the credential
//! directory. Acquisition is one atomic upsert — a row is stolen only
//! when its `expires_at` has passed, and re-acquisition by the current
//! holder just extends the lease.

use sqlx::SqlitePool;

use rijan_common::unix_now;

use crate::{error::Result, models::DeviceLock};

pub struct LockRepo {
    pool: SqlitePool,
}

impl LockRepo {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Try to take (or extend) the lock. Returns `true` when this
    /// instance now holds it.
    pub async fn acquire(&self, device_id: &str, instance_id: &str, ttl_secs: i64) -> Result<bool> {
        let now = unix_now();
        let result = sqlx::query(
            "INSERT INTO device_locks (device_id, instance_id, acquired_at, expires_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(device_id) DO UPDATE SET
               instance_id = excluded.instance_id,
               acquired_at = excluded.acquired_at,
               expires_at  = excluded.expires_at
             WHERE device_locks.expires_at <= excluded.acquired_at
                OR device_locks.instance_id = excluded.instance_id",
        )
        .bind(device_id)
        .bind(instance_id)
        .bind(now)
        .bind(now + ttl_secs)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Extend the lease if (and only if) we still hold it.
    pub async fn refresh(&self, device_id: &str, instance_id: &str, ttl_secs: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE device_locks SET expires_at = ?
             WHERE device_id = ? AND instance_id = ?",
        )
        .bind(unix_now() + ttl_secs)
        .bind(device_id)
        .bind(instance_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Release only our own lock — never a blind delete.
    pub async fn release(&self, device_id: &str, instance_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM device_locks WHERE device_id = ? AND instance_id = ?")
            .bind(device_id)
            .bind(instance_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn find(&self, device_id: &str) -> Result<Option<DeviceLock>> {
        let row: Option<(String, String, i64, i64)> = sqlx::query_as(
            "SELECT device_id, instance_id, acquired_at, expires_at
             FROM device_locks WHERE device_id = ?",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| DeviceLock {
            device_id: r.0,
            instance_id: r.1,
            acquired_at: r.2,
            expires_at: r.3,
        }))
    }

    /// Reaper sweep: drop rows whose lease has lapsed.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM device_locks WHERE expires_at <= ?")
            .bind(unix_now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[tokio::test]
    async fn only_one_instance_holds_a_live_lock() {
        let store = Store::open_in_memory().await.unwrap();
        let locks = store.locks();

        assert!(locks.acquire("device_1", "instance-a", 300).await.unwrap());
        // A competing instance is refused while the lease is live.
        assert!(!locks.acquire("device_1", "instance-b", 300).await.unwrap());

        let lock = locks.find("device_1").await.unwrap().unwrap();
        assert_eq!(lock.instance_id, "instance-a");
    }

    #[tokio::test]
    async fn reacquire_by_holder_is_reentrant() {
        let store = Store::open_in_memory().await.unwrap();
        let locks = store.locks();

        assert!(locks.acquire("device_1", "instance-a", 300).await.unwrap());
        assert!(locks.acquire("device_1", "instance-a", 300).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_can_be_stolen() {
        let store = Store::open_in_memory().await.unwrap();
        let locks = store.locks();

        // TTL of zero expires immediately.
        assert!(locks.acquire("device_1", "instance-a", 0).await.unwrap());
        assert!(locks.acquire("device_1", "instance-b", 300).await.unwrap());

        let lock = locks.find("device_1").await.unwrap().unwrap();
        assert_eq!(lock.instance_id, "instance-b");
    }

    #[tokio::test]
    async fn refresh_only_works_for_holder() {
        let store = Store::open_in_memory().await.unwrap();
        let locks = store.locks();

        locks.acquire("device_1", "instance-a", 300).await.unwrap();
        assert!(locks.refresh("device_1", "instance-a", 300).await.unwrap());
        assert!(!locks.refresh("device_1", "instance-b", 300).await.unwrap());
    }

    #[tokio::test]
    async fn release_is_never_blind() {
        let store = Store::open_in_memory().await.unwrap();
        let locks = store.locks();

        locks.acquire("device_1", "instance-a", 300).await.unwrap();
        // Somebody else's release is a no-op.
        locks.release("device_1", "instance-b").await.unwrap();
        assert!(locks.find("device_1").await.unwrap().is_some());

        locks.release("device_1", "instance-a").await.unwrap();
        assert!(locks.find("device_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_removes_lapsed_rows() {
        let store = Store::open_in_memory().await.unwrap();
        let locks = store.locks();

        locks.acquire("device_1", "instance-a", 0).await.unwrap();
        locks.acquire("device_2", "instance-a", 300).await.unwrap();

        assert_eq!(locks.sweep_expired().await.unwrap(), 1);
        assert!(locks.find("device_1").await.unwrap().is_none());
        assert!(locks.find("device_2").await.unwrap().is_some());
    }
}
