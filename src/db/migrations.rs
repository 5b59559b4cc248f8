//! Migration ledger.
//!
//! Numeric-prefixed `.sql` files are embedded at compile time, sorted by
//! version, and applied in order. Applied versions are recorded in
//! `schema_migrations(version, applied_at)` and skipped on later starts. A
//! filename whose prefix is not an integer is a fatal startup error.

use crate::db::now_unix;
use crate::error::Error;
use sqlx::SqlitePool;

const MIGRATIONS: &[(&str, &str)] = &[
    ("001_init.sql", include_str!("../../migrations/001_init.sql")),
    (
        "002_plugin_tables.sql",
        include_str!("../../migrations/002_plugin_tables.sql"),
    ),
    (
        "003_acme_store.sql",
        include_str!("../../migrations/003_acme_store.sql"),
    ),
];

/// Apply every pending migration.
pub async fn apply(pool: &SqlitePool) -> Result<(), Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    let mut migrations: Vec<(i64, &str, &str)> = Vec::with_capacity(MIGRATIONS.len());
    for (name, sql) in MIGRATIONS {
        migrations.push((parse_version(name)?, *name, *sql));
    }
    migrations.sort_by_key(|(version, _, _)| *version);

    for (version, name, sql) in migrations {
        let applied: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations WHERE version = ?")
                .bind(version)
                .fetch_one(pool)
                .await?;
        if applied > 0 {
            continue;
        }

        tracing::debug!(version, name, "applying migration");
        sqlx::raw_sql(sql).execute(pool).await?;
        sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now_unix())
            .execute(pool)
            .await?;
    }

    Ok(())
}

/// Parse the integer version prefix from a migration filename.
fn parse_version(filename: &str) -> Result<i64, Error> {
    let prefix = filename.split('_').next().unwrap_or(filename);
    prefix
        .parse::<i64>()
        .map_err(|_| Error::InvalidMigration(filename.to_string()))
}
