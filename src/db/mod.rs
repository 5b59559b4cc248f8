//! Embedded storage engine.
//!
//! A single-file SQLite database opened with WAL journaling,
//! `synchronous=NORMAL`, `foreign_keys=ON`, and a 5 s busy timeout. Schema
//! changes are applied through the migration ledger in [`migrations`].

use crate::error::Error;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;

mod api_keys;
mod attributes;
mod interactions;
pub mod migrations;
mod plugin_config;
mod tokens;

pub use tokens::TokenWithCount;

const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Handle to the embedded database, shared across listeners. SQLite's
/// internal locking plus the busy timeout absorb write contention.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

/// An API key record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKey {
    pub id: i64,
    pub key_prefix: String,
    pub key_hash: Vec<u8>,
    pub created_at: i64,
    pub revoked_at: Option<i64>,
}

/// An OAST token record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Token {
    pub id: i64,
    pub token: String,
    pub api_key_id: Option<i64>,
    pub created_at: i64,
    pub label: Option<String>,
}

/// A recorded interaction.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Interaction {
    pub id: i64,
    pub token_id: i64,
    pub kind: String,
    pub occurred_at: i64,
    pub remote_ip: String,
    pub remote_port: i64,
    pub tls: bool,
    pub summary: String,
}

/// HTTP-specific details for an interaction.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HttpInteraction {
    pub interaction_id: i64,
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub query: String,
    pub http_version: String,
    pub request_headers: String,
    pub request_body: Option<Vec<u8>>,
}

/// DNS-specific details for an interaction.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DnsInteraction {
    pub interaction_id: i64,
    pub qname: String,
    pub qtype: i64,
    pub qclass: i64,
    pub rd: i64,
    pub opcode: i64,
    pub dns_id: i64,
    pub protocol: String,
}

impl Db {
    /// Open (creating if missing) the database at `path` and bring the
    /// schema up to date. Open or migration failure is fatal at startup.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        migrations::apply(&pool).await?;
        Ok(Db { pool })
    }

    /// Open an in-memory database. A single connection keeps every caller
    /// on the same memory instance.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        migrations::apply(&pool).await?;
        Ok(Db { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool. Called last during shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_applies_migrations() {
        let db = Db::open_in_memory().await.unwrap();
        let applied: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version")
            .fetch_all(db.pool())
            .await
            .unwrap();
        assert_eq!(applied, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn open_creates_file_with_expected_pragmas() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oastrix.db");
        let db = Db::open(&path).await.unwrap();

        let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(journal_mode, "wal");
        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(foreign_keys, 1);

        db.close().await;
        assert!(path.exists());
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db = Db::open_in_memory().await.unwrap();
        migrations::apply(db.pool()).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn deleting_token_cascades_to_dependents() {
        let db = Db::open_in_memory().await.unwrap();
        let key_id = db.create_api_key("abcdefghijkl", &[0u8; 32]).await.unwrap();
        let token_id = db
            .create_token("cascadetoken", Some(key_id), None)
            .await
            .unwrap();

        let mut draft = crate::events::InteractionDraft {
            token_id: Some(token_id),
            kind: Some(crate::events::Kind::Dns),
            occurred_at: now_unix(),
            remote_ip: "192.0.2.1".into(),
            remote_port: 5353,
            summary: "A cascadetoken.example.com udp".into(),
            ..Default::default()
        };
        draft.dns = Some(crate::events::DnsDraft {
            qname: "cascadetoken.example.com".into(),
            qtype: 1,
            qclass: 1,
            protocol: "udp".into(),
            ..Default::default()
        });
        let interaction_id = db.create_interaction(&draft).await.unwrap().unwrap();

        let mut attrs = std::collections::HashMap::new();
        attrs.insert("source".to_string(), serde_json::json!("scanner"));
        db.save_attributes(interaction_id, &attrs).await.unwrap();
        db.set_token_plugin_config(token_id, "demo", &serde_json::json!({"on": true}))
            .await
            .unwrap();

        db.delete_token("cascadetoken").await.unwrap();

        for table in [
            "interactions",
            "dns_interactions",
            "interaction_attributes",
            "token_plugin_config",
        ] {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(db.pool())
                .await
                .unwrap();
            assert_eq!(count, 0, "{table} not emptied by cascade");
        }
    }

    #[tokio::test]
    async fn deleting_api_key_does_not_cascade_tokens() {
        let db = Db::open_in_memory().await.unwrap();
        let key_id = db.create_api_key("abcdefghijkl", &[0u8; 32]).await.unwrap();
        db.create_token("orphantoken1", Some(key_id), None)
            .await
            .unwrap();

        sqlx::query("DELETE FROM api_keys WHERE id = ?")
            .bind(key_id)
            .execute(db.pool())
            .await
            .unwrap();

        let tok = db.get_token_by_value("orphantoken1").await.unwrap();
        assert!(tok.is_some());
    }
}
