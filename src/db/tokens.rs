use crate::db::{now_unix, Db, Token};
use crate::error::Error;

/// A token joined with its interaction count, as listed by the REST API.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TokenWithCount {
    pub token: String,
    pub label: Option<String>,
    pub created_at: i64,
    pub interaction_count: i64,
}

impl Db {
    /// Insert a new token and return its id. Fails with a UNIQUE violation
    /// on value collision; the caller retries with a fresh token.
    pub async fn create_token(
        &self,
        token: &str,
        api_key_id: Option<i64>,
        label: Option<&str>,
    ) -> Result<i64, Error> {
        let result =
            sqlx::query("INSERT INTO tokens (token, api_key_id, created_at, label) VALUES (?, ?, ?, ?)")
                .bind(token)
                .bind(api_key_id)
                .bind(now_unix())
                .bind(label)
                .execute(&self.pool)
                .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_token_by_value(&self, token: &str) -> Result<Option<Token>, Error> {
        let row = sqlx::query_as::<_, Token>(
            "SELECT id, token, api_key_id, created_at, label FROM tokens WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Resolve a token value to its id, returning `None` when unknown.
    pub async fn resolve_token_id(&self, token: &str) -> Result<Option<i64>, Error> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM tokens WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    /// Delete a token by value. Foreign keys cascade the delete through
    /// interactions, detail rows, attributes, and plugin config.
    pub async fn delete_token(&self, token: &str) -> Result<(), Error> {
        sqlx::query("DELETE FROM tokens WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// List the tokens owned by an API key, newest first, with interaction
    /// counts.
    pub async fn list_tokens_by_api_key(
        &self,
        api_key_id: i64,
    ) -> Result<Vec<TokenWithCount>, Error> {
        let rows = sqlx::query_as::<_, TokenWithCount>(
            "SELECT t.token, t.label, t.created_at, COUNT(i.id) AS interaction_count
             FROM tokens t
             LEFT JOIN interactions i ON i.token_id = t.id
             WHERE t.api_key_id = ?
             GROUP BY t.id
             ORDER BY t.created_at DESC",
        )
        .bind(api_key_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_round_trip() {
        let db = Db::open_in_memory().await.unwrap();
        let id = db
            .create_token("abcdef123456", None, Some("ssrf probe"))
            .await
            .unwrap();

        let tok = db.get_token_by_value("abcdef123456").await.unwrap().unwrap();
        assert_eq!(tok.id, id);
        assert_eq!(tok.label.as_deref(), Some("ssrf probe"));
        assert_eq!(tok.api_key_id, None);

        assert_eq!(db.resolve_token_id("abcdef123456").await.unwrap(), Some(id));
        assert_eq!(db.resolve_token_id("missing000000").await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_token_value_is_rejected() {
        let db = Db::open_in_memory().await.unwrap();
        db.create_token("duplicated00", None, None).await.unwrap();
        let err = db.create_token("duplicated00", None, None).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn list_is_scoped_to_owner_and_newest_first() {
        let db = Db::open_in_memory().await.unwrap();
        let a = db.create_api_key("aaaaaaaaaaaa", &[1u8; 32]).await.unwrap();
        let b = db.create_api_key("bbbbbbbbbbbb", &[2u8; 32]).await.unwrap();
        db.create_token("ownedbya0001", Some(a), None).await.unwrap();
        db.create_token("ownedbyb0001", Some(b), None).await.unwrap();

        let listed = db.list_tokens_by_api_key(a).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].token, "ownedbya0001");
        assert_eq!(listed[0].interaction_count, 0);
    }
}
