//! Database-backed blob store for ACME state.
//!
//! Certificates, account credentials, and renewal metadata live in the same
//! embedded database as the capture data, addressed by library-style paths
//! like `certificates/example.com/cert.pem`. Advisory locks are owned by the
//! host's OS hostname so two processes sharing a database file do not
//! clobber each other's issuance.

use crate::db::Db;
use crate::error::Error;

const LOCK_TTL_SECS: i64 = 600;

#[derive(Clone)]
pub struct CertStore {
    db: Db,
    owner_id: String,
}

impl CertStore {
    pub fn new(db: Db) -> Self {
        let owner_id = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "oastrix".to_string());
        CertStore { db, owner_id }
    }

    #[cfg(test)]
    pub fn with_owner(db: Db, owner_id: &str) -> Self {
        CertStore {
            db,
            owner_id: owner_id.to_string(),
        }
    }

    pub async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let row = sqlx::query_scalar::<_, Vec<u8>>("SELECT value FROM acme_store WHERE key = ?")
            .bind(key)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row)
    }

    pub async fn store(&self, key: &str, value: &[u8]) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO acme_store (key, value, modified_at) VALUES (?, ?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, modified_at = excluded.modified_at",
        )
        .bind(key)
        .bind(value)
        .bind(crate::db::now_unix())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT key FROM acme_store WHERE key LIKE ? || '%' ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(self.db.pool())
        .await?;
        Ok(keys)
    }

    pub async fn delete(&self, key: &str) -> Result<(), Error> {
        sqlx::query("DELETE FROM acme_store WHERE key = ?")
            .bind(key)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Take the advisory lock for `key`. Returns false when another live
    /// owner holds it; expired locks are taken over.
    pub async fn lock(&self, key: &str) -> Result<bool, Error> {
        let now = crate::db::now_unix();
        let result = sqlx::query(
            "INSERT INTO acme_locks (key, owner_id, expires_at) VALUES (?, ?, ?)
             ON CONFLICT (key) DO UPDATE
                 SET owner_id = excluded.owner_id, expires_at = excluded.expires_at
                 WHERE acme_locks.owner_id = excluded.owner_id
                    OR acme_locks.expires_at < ?",
        )
        .bind(key)
        .bind(&self.owner_id)
        .bind(now + LOCK_TTL_SECS)
        .bind(now)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Release the advisory lock for `key` if this owner holds it.
    pub async fn unlock(&self, key: &str) -> Result<(), Error> {
        sqlx::query("DELETE FROM acme_locks WHERE key = ? AND owner_id = ?")
            .bind(key)
            .bind(&self.owner_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blob_round_trip_and_overwrite() {
        let db = Db::open_in_memory().await.unwrap();
        let store = CertStore::with_owner(db, "host-a");

        assert_eq!(store.load("certificates/example.com/cert.pem").await.unwrap(), None);
        store
            .store("certificates/example.com/cert.pem", b"PEM ONE")
            .await
            .unwrap();
        store
            .store("certificates/example.com/cert.pem", b"PEM TWO")
            .await
            .unwrap();
        assert_eq!(
            store.load("certificates/example.com/cert.pem").await.unwrap(),
            Some(b"PEM TWO".to_vec())
        );

        store.delete("certificates/example.com/cert.pem").await.unwrap();
        assert_eq!(store.load("certificates/example.com/cert.pem").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let db = Db::open_in_memory().await.unwrap();
        let store = CertStore::with_owner(db, "host-a");
        store.store("certificates/a/cert.pem", b"1").await.unwrap();
        store.store("certificates/b/cert.pem", b"2").await.unwrap();
        store.store("acme/account.json", b"3").await.unwrap();

        let keys = store.list("certificates/").await.unwrap();
        assert_eq!(keys, vec!["certificates/a/cert.pem", "certificates/b/cert.pem"]);
    }

    #[tokio::test]
    async fn locks_exclude_other_owners_until_released() {
        let db = Db::open_in_memory().await.unwrap();
        let a = CertStore::with_owner(db.clone(), "host-a");
        let b = CertStore::with_owner(db, "host-b");

        assert!(a.lock("issue/example.com").await.unwrap());
        assert!(!b.lock("issue/example.com").await.unwrap());
        // Re-entrant for the same owner.
        assert!(a.lock("issue/example.com").await.unwrap());

        a.unlock("issue/example.com").await.unwrap();
        assert!(b.lock("issue/example.com").await.unwrap());
    }

    #[tokio::test]
    async fn unlock_of_foreign_lock_is_a_no_op() {
        let db = Db::open_in_memory().await.unwrap();
        let a = CertStore::with_owner(db.clone(), "host-a");
        let b = CertStore::with_owner(db, "host-b");

        assert!(a.lock("issue/example.com").await.unwrap());
        b.unlock("issue/example.com").await.unwrap();
        assert!(!b.lock("issue/example.com").await.unwrap());
    }
}
