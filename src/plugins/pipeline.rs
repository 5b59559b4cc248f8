//! Hook orchestration: PreStore → Storage → PostStore → Response.

use crate::api::PluginInfo;
use crate::error::Error;
use crate::events::{DnsEvent, HttpEvent};
use crate::plugins::{plugin_info, Plugin, Store};
use std::sync::Arc;
use tracing::warn;

/// Ordered plugin runner wrapping storage. Populated once at boot and
/// read-only afterwards; also serves as the plugin registry.
pub struct Pipeline {
    store: Option<Arc<dyn Store>>,
    plugins: Vec<Arc<dyn Plugin>>,
    /// Indices into `plugins`, stably sorted by `priority()` so the
    /// response chain honors priorities while pre/post hooks keep
    /// registration order.
    response_order: Vec<usize>,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline {
            store: None,
            plugins: Vec::new(),
            response_order: Vec::new(),
        }
    }

    pub fn set_store(&mut self, store: Arc<dyn Store>) {
        self.store = Some(store);
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
        let plugins = &self.plugins;
        let mut order: Vec<usize> = (0..plugins.len()).collect();
        order.sort_by_key(|&i| plugins[i].priority());
        self.response_order = order;
    }

    /// Registry snapshot, tagging each plugin as `core` or `feature`.
    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.plugins.iter().map(|p| plugin_info(p.as_ref())).collect()
    }

    /// Run an HTTP capture through the pipeline. Only storage errors
    /// propagate; hook errors are logged and swallowed.
    pub async fn process_http(&self, event: &mut HttpEvent) -> Result<(), Error> {
        for plugin in &self.plugins {
            if let Err(err) = plugin.on_pre_store(&mut event.base).await {
                warn!(plugin = plugin.id(), error = %err, "pre-store hook error");
            }
        }

        self.persist(&mut event.base).await?;

        for plugin in &self.plugins {
            if let Err(err) = plugin.on_post_store(&mut event.base).await {
                warn!(plugin = plugin.id(), error = %err, "post-store hook error");
            }
        }

        for &i in &self.response_order {
            let plugin = &self.plugins[i];
            if let Err(err) = plugin.on_http_response(event).await {
                warn!(plugin = plugin.id(), error = %err, "http response hook error");
            }
            if event.response.handled {
                break;
            }
        }

        Ok(())
    }

    /// Run a DNS capture through the pipeline.
    pub async fn process_dns(&self, event: &mut DnsEvent) -> Result<(), Error> {
        for plugin in &self.plugins {
            if let Err(err) = plugin.on_pre_store(&mut event.base).await {
                warn!(plugin = plugin.id(), error = %err, "pre-store hook error");
            }
        }

        self.persist(&mut event.base).await?;

        for plugin in &self.plugins {
            if let Err(err) = plugin.on_post_store(&mut event.base).await {
                warn!(plugin = plugin.id(), error = %err, "post-store hook error");
            }
        }

        for &i in &self.response_order {
            let plugin = &self.plugins[i];
            if let Err(err) = plugin.on_dns_response(event).await {
                warn!(plugin = plugin.id(), error = %err, "dns response hook error");
            }
            if event.response.handled {
                break;
            }
        }

        Ok(())
    }

    async fn persist(&self, event: &mut crate::events::Event) -> Result<(), Error> {
        if event.draft.drop {
            return Ok(());
        }
        let Some(store) = &self.store else {
            return Ok(());
        };

        let id = store.create_interaction(&event.draft).await?;
        event.interaction_id = id;

        if let Some(id) = id {
            if !event.draft.attributes.is_empty() {
                if let Err(err) = store.save_attributes(id, &event.draft.attributes).await {
                    warn!(error = %err, "failed to save attributes");
                }
            }
        }
        Ok(())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
