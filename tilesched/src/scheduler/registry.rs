//! Registry of tile managers, one per tile type.
//!
//! The registry is owned by the composition root and passed to whoever
//! creates map layers. Managers are created lazily when the first provider
//! of a new type registers and live until [`SchedulerRegistry::shutdown`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::info;

use super::handle::TileProviderHandle;
use super::manager::TileManager;
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::provider::TileProvider;
use crate::request::TileProviderId;

/// Tile managers keyed by tile type.
pub struct SchedulerRegistry {
    config: SchedulerConfig,
    runtime: Handle,
    managers: Mutex<HashMap<String, TileManager>>,
}

impl SchedulerRegistry {
    /// Creates an empty registry.
    ///
    /// # Arguments
    ///
    /// * `config` - Concurrency settings for new managers
    /// * `runtime` - Runtime the tile fetches are spawned on
    pub fn new(config: SchedulerConfig, runtime: Handle) -> Self {
        Self {
            config,
            runtime,
            managers: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a provider and returns its facade.
    ///
    /// The provider joins the manager of its tile type, which is created on
    /// first use. A provider id is generated when none is given. The provider
    /// starts visible and enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider reports a concurrency of zero.
    pub fn get_tile_manager(
        &self,
        tile_provider_id: Option<TileProviderId>,
        provider: Arc<dyn TileProvider>,
    ) -> Result<TileProviderHandle, SchedulerError> {
        let tile_provider_id = tile_provider_id.unwrap_or_else(TileProviderId::generate);
        let tile_type = provider.tile_type().to_string();

        let manager = {
            let mut managers = self.managers.lock();
            managers
                .entry(tile_type.clone())
                .or_insert_with(|| {
                    let concurrency = self
                        .config
                        .concurrency_for(&tile_type, provider.concurrency());
                    TileManager::new(tile_type.clone(), concurrency, self.runtime.clone())
                })
                .clone()
        };

        manager.add_tile_provider(tile_provider_id.clone(), provider)?;
        let handle = TileProviderHandle::new(tile_provider_id, manager)?;
        handle.set_enabled(true)?;
        Ok(handle)
    }

    /// The manager serving a tile type, if one exists.
    pub fn tile_manager(&self, tile_type: &str) -> Option<TileManager> {
        self.managers.lock().get(tile_type).cloned()
    }

    /// Tile types with a manager, sorted.
    pub fn tile_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.managers.lock().keys().cloned().collect();
        types.sort();
        types
    }

    /// Releases all work of every manager and forgets them.
    pub fn shutdown(&self) {
        let managers: Vec<_> = self.managers.lock().drain().map(|(_, m)| m).collect();
        info!(managers = managers.len(), "Shutting down tile scheduler");
        for manager in managers {
            manager.shutdown();
        }
    }
}

impl std::fmt::Debug for SchedulerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerRegistry")
            .field("tile_types", &self.tile_types())
            .finish()
    }
}
