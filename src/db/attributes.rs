use crate::db::Db;
use crate::error::Error;
use std::collections::HashMap;

impl Db {
    /// Upsert plugin enrichment data for an interaction. Each key becomes
    /// one row with a JSON-encoded value; existing keys are replaced. All
    /// keys are written in one transaction.
    pub async fn save_attributes(
        &self,
        interaction_id: i64,
        attrs: &HashMap<String, serde_json::Value>,
    ) -> Result<(), Error> {
        if attrs.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for (key, value) in attrs {
            let encoded = serde_json::to_string(value)?;
            sqlx::query(
                "INSERT INTO interaction_attributes (interaction_id, key, value)
                 VALUES (?, ?, ?)
                 ON CONFLICT (interaction_id, key) DO UPDATE SET value = excluded.value",
            )
            .bind(interaction_id)
            .bind(key)
            .bind(encoded)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Read back the attribute bag for an interaction.
    pub async fn get_attributes(
        &self,
        interaction_id: i64,
    ) -> Result<HashMap<String, serde_json::Value>, Error> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT key, value FROM interaction_attributes WHERE interaction_id = ?",
        )
        .bind(interaction_id)
        .fetch_all(&self.pool)
        .await?;

        let mut attrs = HashMap::with_capacity(rows.len());
        for (key, value) in rows {
            attrs.insert(key, serde_json::from_str(&value)?);
        }
        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DnsDraft, InteractionDraft, Kind};
    use serde_json::json;

    async fn interaction_fixture() -> (Db, i64) {
        let db = Db::open_in_memory().await.unwrap();
        let token_id = db.create_token("attrtoken001", None, None).await.unwrap();
        let draft = InteractionDraft {
            token_id: Some(token_id),
            kind: Some(Kind::Dns),
            remote_ip: "192.0.2.1".into(),
            summary: "A attrtoken001.example.com udp".into(),
            dns: Some(DnsDraft::default()),
            ..Default::default()
        };
        let id = db.create_interaction(&draft).await.unwrap().unwrap();
        (db, id)
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let (db, id) = interaction_fixture().await;
        let mut attrs = HashMap::new();
        attrs.insert("geo".to_string(), json!({"country": "NL"}));
        attrs.insert("score".to_string(), json!(7));
        attrs.insert("tags".to_string(), json!(["ssrf", "blind"]));

        db.save_attributes(id, &attrs).await.unwrap();
        let got = db.get_attributes(id).await.unwrap();
        assert_eq!(got, attrs);
    }

    #[tokio::test]
    async fn save_replaces_existing_keys() {
        let (db, id) = interaction_fixture().await;
        let mut attrs = HashMap::new();
        attrs.insert("verdict".to_string(), json!("pending"));
        db.save_attributes(id, &attrs).await.unwrap();

        attrs.insert("verdict".to_string(), json!("confirmed"));
        db.save_attributes(id, &attrs).await.unwrap();

        let got = db.get_attributes(id).await.unwrap();
        assert_eq!(got["verdict"], json!("confirmed"));
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn empty_map_is_a_no_op() {
        let (db, id) = interaction_fixture().await;
        db.save_attributes(id, &HashMap::new()).await.unwrap();
        assert!(db.get_attributes(id).await.unwrap().is_empty());
    }
}
