//! SQLite persistence layer.
//!
//! One embedded database holds every table in the system. Repositories
//! expose narrow, typed operations; every tenant-scoped read takes the
//! tenant id and bakes it into the predicate, so handlers physically
//! cannot reach across tenants through this crate.

use std::{path::Path, str::FromStr};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

mod audit;
mod chats;
mod devices;
mod error;
mod events;
mod inbox;
mod locks;
pub mod migrate;
mod models;
mod outbox;
mod tenants;
mod webhooks;

pub use {
    audit::{AuditRepo, NewAuditEntry},
    chats::{ChatRepo, LidMapRepo},
    devices::{DeviceRepo, SessionMetaRepo},
    error::{Error, Result},
    events::{EventFilter, EventLogRepo},
    inbox::InboxRepo,
    locks::LockRepo,
    models::*,
    outbox::{NewOutboxMessage, OutboxRepo},
    tenants::TenantRepo,
    webhooks::{DlqRepo, NewWebhook, WebhookLogRepo, WebhookRepo, WebhookUpdate},
};

/// Handle to the embedded database. Cheap to clone; repositories borrow
/// the underlying pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `path`, switch it to WAL
    /// journaling with foreign keys enforced, and bring the schema up to
    /// date.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        migrate::run(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database for tests. A single connection keeps every
    /// query on the same ephemeral database.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        migrate::run(&pool).await?;
        Ok(Self { pool })
    }

    /// Liveness probe for `/ready`.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the pool, flushing WAL state.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[must_use]
    pub fn tenants(&self) -> TenantRepo {
        TenantRepo::new(self.pool.clone())
    }

    #[must_use]
    pub fn devices(&self) -> DeviceRepo {
        DeviceRepo::new(self.pool.clone())
    }

    #[must_use]
    pub fn sessions(&self) -> SessionMetaRepo {
        SessionMetaRepo::new(self.pool.clone())
    }

    #[must_use]
    pub fn outbox(&self) -> OutboxRepo {
        OutboxRepo::new(self.pool.clone())
    }

    #[must_use]
    pub fn inbox(&self) -> InboxRepo {
        InboxRepo::new(self.pool.clone())
    }

    #[must_use]
    pub fn events(&self) -> EventLogRepo {
        EventLogRepo::new(self.pool.clone())
    }

    #[must_use]
    pub fn webhooks(&self) -> WebhookRepo {
        WebhookRepo::new(self.pool.clone())
    }

    #[must_use]
    pub fn webhook_logs(&self) -> WebhookLogRepo {
        WebhookLogRepo::new(self.pool.clone())
    }

    #[must_use]
    pub fn dlq(&self) -> DlqRepo {
        DlqRepo::new(self.pool.clone())
    }

    #[must_use]
    pub fn locks(&self) -> LockRepo {
        LockRepo::new(self.pool.clone())
    }

    #[must_use]
    pub fn audit(&self) -> AuditRepo {
        AuditRepo::new(self.pool.clone())
    }

    #[must_use]
    pub fn chats(&self) -> ChatRepo {
        ChatRepo::new(self.pool.clone())
    }

    #[must_use]
    pub fn lid_map(&self) -> LidMapRepo {
        LidMapRepo::new(self.pool.clone())
    }
}
