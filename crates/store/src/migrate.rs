//! Forward-only schema evolution.
//!
//! Each migration is an ordered list of single statements executed inside
//! one transaction. The `migrations` table records what has been applied;
//! on open, every version strictly greater than the recorded maximum runs
//! in ascending order. There is no down path.

use sqlx::SqlitePool;
use tracing::info;

use rijan_common::unix_now;

use crate::error::{Error, Result};

struct Migration {
    version: i64,
    name: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "core schema",
        statements: &[
            "CREATE TABLE tenants (
                id           TEXT PRIMARY KEY,
                name         TEXT NOT NULL,
                api_key_hash TEXT NOT NULL UNIQUE,
                status       TEXT NOT NULL DEFAULT 'active',
                created_at   INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL
            )",
            "CREATE INDEX idx_tenants_status ON tenants (status)",
            "CREATE TABLE devices (
                id           TEXT PRIMARY KEY,
                tenant_id    TEXT NOT NULL REFERENCES tenants (id) ON DELETE CASCADE,
                label        TEXT NOT NULL,
                phone_number TEXT,
                status       TEXT NOT NULL DEFAULT 'disconnected',
                created_at   INTEGER NOT NULL,
                last_seen    INTEGER
            )",
            "CREATE INDEX idx_devices_tenant ON devices (tenant_id)",
            "CREATE INDEX idx_devices_status ON devices (status)",
            "CREATE TABLE device_sessions (
                device_id    TEXT PRIMARY KEY REFERENCES devices (id) ON DELETE CASCADE,
                tenant_id    TEXT,
                session_kind TEXT NOT NULL DEFAULT 'filesystem',
                session_dir  TEXT NOT NULL,
                wa_jid       TEXT,
                wa_name      TEXT,
                updated_at   INTEGER NOT NULL
            )",
            "CREATE TABLE messages_outbox (
                id              TEXT PRIMARY KEY,
                tenant_id       TEXT NOT NULL,
                device_id       TEXT NOT NULL REFERENCES devices (id) ON DELETE CASCADE,
                jid             TEXT NOT NULL,
                message_type    TEXT NOT NULL,
                payload         TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'pending',
                retries         INTEGER NOT NULL DEFAULT 0,
                error_message   TEXT,
                idempotency_key TEXT,
                wa_message_id   TEXT,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL,
                sent_at         INTEGER
            )",
            "CREATE INDEX idx_outbox_tenant_device ON messages_outbox (tenant_id, device_id)",
            "CREATE UNIQUE INDEX idx_outbox_idempotency
             ON messages_outbox (device_id, idempotency_key)
             WHERE idempotency_key IS NOT NULL",
            "CREATE INDEX idx_outbox_status ON messages_outbox (status)",
            "CREATE INDEX idx_outbox_created ON messages_outbox (created_at)",
            "CREATE TABLE messages_inbox (
                id           TEXT PRIMARY KEY,
                tenant_id    TEXT NOT NULL,
                device_id    TEXT NOT NULL REFERENCES devices (id) ON DELETE CASCADE,
                jid          TEXT NOT NULL,
                message_id   TEXT NOT NULL,
                message_type TEXT NOT NULL,
                payload      TEXT NOT NULL,
                received_at  INTEGER NOT NULL
            )",
            "CREATE INDEX idx_inbox_tenant_device ON messages_inbox (tenant_id, device_id)",
            "CREATE INDEX idx_inbox_received ON messages_inbox (received_at)",
            "CREATE INDEX idx_inbox_message_id ON messages_inbox (message_id)",
            "CREATE TABLE event_logs (
                id          TEXT PRIMARY KEY,
                tenant_id   TEXT NOT NULL,
                device_id   TEXT NOT NULL,
                event_type  TEXT NOT NULL,
                payload     TEXT NOT NULL,
                received_at INTEGER NOT NULL
            )",
            "CREATE INDEX idx_event_logs_tenant_device ON event_logs (tenant_id, device_id)",
            "CREATE INDEX idx_event_logs_type ON event_logs (event_type)",
            "CREATE INDEX idx_event_logs_received ON event_logs (received_at)",
            "CREATE TABLE webhooks (
                id          TEXT PRIMARY KEY,
                tenant_id   TEXT NOT NULL REFERENCES tenants (id) ON DELETE CASCADE,
                url         TEXT NOT NULL,
                secret      TEXT,
                events      TEXT NOT NULL,
                enabled     INTEGER NOT NULL DEFAULT 1,
                retry_count INTEGER NOT NULL DEFAULT 3,
                timeout_ms  INTEGER NOT NULL DEFAULT 5000,
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            )",
            "CREATE INDEX idx_webhooks_tenant ON webhooks (tenant_id)",
            "CREATE INDEX idx_webhooks_enabled ON webhooks (enabled)",
            "CREATE TABLE webhook_logs (
                id          TEXT PRIMARY KEY,
                webhook_id  TEXT NOT NULL REFERENCES webhooks (id) ON DELETE CASCADE,
                event_id    TEXT,
                status_code INTEGER,
                attempts    INTEGER NOT NULL DEFAULT 0,
                last_error  TEXT,
                sent_at     INTEGER
            )",
            "CREATE TABLE webhook_dlq (
                id            TEXT PRIMARY KEY,
                webhook_id    TEXT NOT NULL,
                event_payload TEXT NOT NULL,
                reason        TEXT NOT NULL,
                created_at    INTEGER NOT NULL
            )",
            "CREATE TABLE device_locks (
                device_id   TEXT PRIMARY KEY,
                instance_id TEXT NOT NULL,
                acquired_at INTEGER NOT NULL,
                expires_at  INTEGER NOT NULL
            )",
            "CREATE INDEX idx_device_locks_expires ON device_locks (expires_at)",
            "CREATE TABLE audit_logs (
                id            TEXT PRIMARY KEY,
                tenant_id     TEXT,
                actor         TEXT NOT NULL,
                action        TEXT NOT NULL,
                resource_type TEXT,
                resource_id   TEXT,
                meta          TEXT,
                ip_address    TEXT,
                user_agent    TEXT,
                created_at    INTEGER NOT NULL
            )",
            "CREATE INDEX idx_audit_logs_tenant ON audit_logs (tenant_id)",
            "CREATE INDEX idx_audit_logs_created ON audit_logs (created_at)",
            "CREATE INDEX idx_audit_logs_action ON audit_logs (action)",
        ],
    },
    Migration {
        version: 2,
        name: "chat cache and lid map",
        statements: &[
            "CREATE TABLE chats (
                id              TEXT PRIMARY KEY,
                tenant_id       TEXT NOT NULL,
                device_id       TEXT NOT NULL,
                jid             TEXT NOT NULL,
                name            TEXT,
                last_message_at INTEGER,
                updated_at      INTEGER NOT NULL,
                UNIQUE (device_id, jid)
            )",
            "CREATE INDEX idx_chats_tenant_device ON chats (tenant_id, device_id)",
            "CREATE TABLE lid_map (
                device_id  TEXT NOT NULL,
                lid        TEXT NOT NULL,
                phone_jid  TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (device_id, lid)
            )",
        ],
    },
    Migration {
        version: 3,
        name: "receipt lookup index",
        statements: &[
            "CREATE INDEX idx_outbox_wa_message ON messages_outbox (device_id, wa_message_id)",
        ],
    },
];

/// Apply every migration newer than the recorded maximum, in order.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS migrations (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    let (current,): (Option<i64>,) = sqlx::query_as("SELECT MAX(version) FROM migrations")
        .fetch_one(pool)
        .await?;
    let current = current.unwrap_or(0);

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let mut tx = pool.begin().await?;
        for statement in migration.statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|source| Error::Migration {
                    version: migration.version,
                    name: migration.name.to_string(),
                    source,
                })?;
        }
        sqlx::query("INSERT INTO migrations (version, name, applied_at) VALUES (?, ?, ?)")
            .bind(migration.version)
            .bind(migration.name)
            .bind(unix_now())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(version = migration.version, name = migration.name, "applied migration");
    }

    Ok(())
}

/// The newest migration version this build knows about.
#[must_use]
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}
