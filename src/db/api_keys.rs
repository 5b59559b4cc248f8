use crate::db::{now_unix, ApiKey, Db};
use crate::error::Error;

impl Db {
    pub async fn create_api_key(&self, prefix: &str, hash: &[u8]) -> Result<i64, Error> {
        let result =
            sqlx::query("INSERT INTO api_keys (key_prefix, key_hash, created_at) VALUES (?, ?, ?)")
                .bind(prefix)
                .bind(hash)
                .bind(now_unix())
                .execute(&self.pool)
                .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_api_key_by_prefix(&self, prefix: &str) -> Result<Option<ApiKey>, Error> {
        let row = sqlx::query_as::<_, ApiKey>(
            "SELECT id, key_prefix, key_hash, created_at, revoked_at
             FROM api_keys WHERE key_prefix = ?",
        )
        .bind(prefix)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Count non-revoked API keys. The first process start mints a key when
    /// this returns zero.
    pub async fn count_api_keys(&self) -> Result<i64, Error> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM api_keys WHERE revoked_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Revoke a key by stamping its revocation time. Revoked keys fail
    /// verification but their tokens remain stored.
    pub async fn revoke_api_key(&self, id: i64) -> Result<(), Error> {
        sqlx::query("UPDATE api_keys SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
            .bind(now_unix())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn api_key_round_trip() {
        let db = Db::open_in_memory().await.unwrap();
        assert_eq!(db.count_api_keys().await.unwrap(), 0);

        let hash = vec![7u8; 32];
        let id = db.create_api_key("abcdefghijkl", &hash).await.unwrap();
        assert_eq!(db.count_api_keys().await.unwrap(), 1);

        let key = db
            .get_api_key_by_prefix("abcdefghijkl")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(key.id, id);
        assert_eq!(key.key_hash, hash);
        assert!(key.revoked_at.is_none());

        assert!(db.get_api_key_by_prefix("nosuchprefix").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prefix_is_unique() {
        let db = Db::open_in_memory().await.unwrap();
        db.create_api_key("abcdefghijkl", &[0u8; 32]).await.unwrap();
        assert!(db.create_api_key("abcdefghijkl", &[1u8; 32]).await.is_err());
    }

    #[tokio::test]
    async fn revoked_keys_leave_the_active_count() {
        let db = Db::open_in_memory().await.unwrap();
        let id = db.create_api_key("abcdefghijkl", &[0u8; 32]).await.unwrap();
        db.revoke_api_key(id).await.unwrap();
        assert_eq!(db.count_api_keys().await.unwrap(), 0);
        let key = db
            .get_api_key_by_prefix("abcdefghijkl")
            .await
            .unwrap()
            .unwrap();
        assert!(key.revoked_at.is_some());
    }
}
