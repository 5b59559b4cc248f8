use crate::db::Db;
use crate::error::Error;

impl Db {
    /// Store JSON-encoded plugin configuration for a token, replacing any
    /// previous value for the same `(token, plugin)` pair.
    pub async fn set_token_plugin_config(
        &self,
        token_id: i64,
        plugin_id: &str,
        config: &serde_json::Value,
    ) -> Result<(), Error> {
        let encoded = serde_json::to_string(config)?;
        sqlx::query(
            "INSERT INTO token_plugin_config (token_id, plugin_id, config)
             VALUES (?, ?, ?)
             ON CONFLICT (token_id, plugin_id) DO UPDATE SET config = excluded.config",
        )
        .bind(token_id)
        .bind(plugin_id)
        .bind(encoded)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch plugin configuration for a token, `None` when unset.
    pub async fn get_token_plugin_config(
        &self,
        token_id: i64,
        plugin_id: &str,
    ) -> Result<Option<serde_json::Value>, Error> {
        let row = sqlx::query_scalar::<_, String>(
            "SELECT config FROM token_plugin_config WHERE token_id = ? AND plugin_id = ?",
        )
        .bind(token_id)
        .bind(plugin_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(encoded) => Ok(Some(serde_json::from_str(&encoded)?)),
            None => Ok(None),
        }
    }

    pub async fn delete_token_plugin_config(
        &self,
        token_id: i64,
        plugin_id: &str,
    ) -> Result<(), Error> {
        sqlx::query("DELETE FROM token_plugin_config WHERE token_id = ? AND plugin_id = ?")
            .bind(token_id)
            .bind(plugin_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn config_set_get_delete() {
        let db = Db::open_in_memory().await.unwrap();
        let token_id = db.create_token("plugtoken001", None, None).await.unwrap();

        assert_eq!(
            db.get_token_plugin_config(token_id, "responder").await.unwrap(),
            None
        );

        db.set_token_plugin_config(token_id, "responder", &json!({"status": 302}))
            .await
            .unwrap();
        assert_eq!(
            db.get_token_plugin_config(token_id, "responder").await.unwrap(),
            Some(json!({"status": 302}))
        );

        db.set_token_plugin_config(token_id, "responder", &json!({"status": 404}))
            .await
            .unwrap();
        assert_eq!(
            db.get_token_plugin_config(token_id, "responder").await.unwrap(),
            Some(json!({"status": 404}))
        );

        db.delete_token_plugin_config(token_id, "responder")
            .await
            .unwrap();
        assert_eq!(
            db.get_token_plugin_config(token_id, "responder").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn configs_are_scoped_per_plugin() {
        let db = Db::open_in_memory().await.unwrap();
        let token_id = db.create_token("plugtoken002", None, None).await.unwrap();
        db.set_token_plugin_config(token_id, "a", &json!(1)).await.unwrap();
        db.set_token_plugin_config(token_id, "b", &json!(2)).await.unwrap();
        assert_eq!(
            db.get_token_plugin_config(token_id, "a").await.unwrap(),
            Some(json!(1))
        );
        assert_eq!(
            db.get_token_plugin_config(token_id, "b").await.unwrap(),
            Some(json!(2))
        );
    }
}
