//! The `storage` core plugin.
//!
//! Registered first so its pre-store hook runs before any feature plugin:
//! it resolves the draft's token value to a token id, which the pipeline's
//! persistence step requires.

use crate::db::Db;
use crate::events::Event;
use crate::plugins::Plugin;
use async_trait::async_trait;

pub struct StoragePlugin {
    db: Db,
}

impl StoragePlugin {
    pub fn new(db: Db) -> Self {
        StoragePlugin { db }
    }
}

#[async_trait]
impl Plugin for StoragePlugin {
    fn id(&self) -> &'static str {
        "storage"
    }

    fn is_core(&self) -> bool {
        true
    }

    async fn on_pre_store(&self, event: &mut Event) -> Result<(), anyhow::Error> {
        if event.draft.token_id.is_some() || event.draft.token_value.is_empty() {
            return Ok(());
        }
        event.draft.token_id = self.db.resolve_token_id(&event.draft.token_value).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InteractionDraft;

    #[tokio::test]
    async fn pre_store_resolves_known_tokens() {
        let db = Db::open_in_memory().await.unwrap();
        let id = db.create_token("resolvetoken", None, None).await.unwrap();
        let plugin = StoragePlugin::new(db);

        let mut event = Event::new(InteractionDraft {
            token_value: "resolvetoken".into(),
            ..Default::default()
        });
        plugin.on_pre_store(&mut event).await.unwrap();
        assert_eq!(event.draft.token_id, Some(id));
    }

    #[tokio::test]
    async fn pre_store_leaves_unknown_tokens_unresolved() {
        let db = Db::open_in_memory().await.unwrap();
        let plugin = StoragePlugin::new(db);

        let mut event = Event::new(InteractionDraft {
            token_value: "missing00000".into(),
            ..Default::default()
        });
        plugin.on_pre_store(&mut event).await.unwrap();
        assert_eq!(event.draft.token_id, None);
    }

    #[tokio::test]
    async fn pre_store_keeps_existing_ids() {
        let db = Db::open_in_memory().await.unwrap();
        let plugin = StoragePlugin::new(db);

        let mut event = Event::new(InteractionDraft {
            token_value: "whatever0000".into(),
            token_id: Some(7),
            ..Default::default()
        });
        plugin.on_pre_store(&mut event).await.unwrap();
        assert_eq!(event.draft.token_id, Some(7));
    }
}
