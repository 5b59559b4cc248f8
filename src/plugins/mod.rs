//! Plugin framework for the interaction pipeline.
//!
//! A plugin has a stable string id and may implement any subset of the four
//! hooks: `on_pre_store` (may mutate the draft or set `drop`),
//! `on_post_store` (side effects), and `on_http_response` /
//! `on_dns_response` (fill the response plan; setting `handled` terminates
//! the response chain). Hook errors are logged and swallowed; only storage
//! errors abort the pipeline.

use crate::api::PluginInfo;
use crate::db::Db;
use crate::error::Error;
use crate::events::{DnsEvent, Event, HttpEvent, InteractionDraft};
use async_trait::async_trait;
use std::collections::HashMap;

mod default_response;
mod pipeline;
mod storage;

pub use default_response::DefaultResponsePlugin;
pub use pipeline::Pipeline;
pub use storage::StoragePlugin;

/// Storage operations available to the pipeline and to plugins.
#[async_trait]
pub trait Store: Send + Sync {
    /// Resolve a token value to its id; `None` when unknown.
    async fn resolve_token_id(&self, token_value: &str) -> Result<Option<i64>, Error>;

    /// Persist a draft and return the assigned interaction id. Drafts whose
    /// token cannot be resolved are not persisted and yield `None`.
    async fn create_interaction(&self, draft: &InteractionDraft) -> Result<Option<i64>, Error>;

    /// Persist the attribute bag for an interaction.
    async fn save_attributes(
        &self,
        interaction_id: i64,
        attrs: &HashMap<String, serde_json::Value>,
    ) -> Result<(), Error>;
}

#[async_trait]
impl Store for Db {
    async fn resolve_token_id(&self, token_value: &str) -> Result<Option<i64>, Error> {
        Db::resolve_token_id(self, token_value).await
    }

    async fn create_interaction(&self, draft: &InteractionDraft) -> Result<Option<i64>, Error> {
        Db::create_interaction(self, draft).await
    }

    async fn save_attributes(
        &self,
        interaction_id: i64,
        attrs: &HashMap<String, serde_json::Value>,
    ) -> Result<(), Error> {
        Db::save_attributes(self, interaction_id, attrs).await
    }
}

/// A pipeline plugin. Every hook has a no-op default; implement only the
/// hooks the plugin needs.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable identifier, also the key for per-token plugin config.
    fn id(&self) -> &'static str;

    /// Core plugins ship with the server; feature plugins are optional.
    fn is_core(&self) -> bool {
        false
    }

    /// Ordering key for the response-synthesis chain only. Lower runs
    /// earlier; ties keep registration order.
    fn priority(&self) -> i32 {
        0
    }

    /// Optional global configuration view exposed through the registry.
    fn config(&self) -> Option<serde_json::Map<String, serde_json::Value>> {
        None
    }

    async fn on_pre_store(&self, _event: &mut Event) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn on_post_store(&self, _event: &mut Event) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn on_http_response(&self, _event: &mut HttpEvent) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn on_dns_response(&self, _event: &mut DnsEvent) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

pub(crate) fn plugin_info(plugin: &dyn Plugin) -> PluginInfo {
    PluginInfo {
        id: plugin.id().to_string(),
        kind: if plugin.is_core() { "core" } else { "feature" }.to_string(),
        enabled: true,
        config: plugin.config(),
    }
}
