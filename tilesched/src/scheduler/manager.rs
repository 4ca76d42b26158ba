//! Tile manager.
//!
//! One `TileManager` serves every tile provider of one tile type. It binds a
//! [`RequestQueue`] and a [`RequestExecutor`] together:
//!
//! ```text
//! load_tile ──► queue.enqueue ──► executor.notify
//!                                      │
//!                                      ▼ Ready { providers with room, preempted? }
//!                      queue.dequeue_by_tile_provider_ids ──► executor.execute
//!                                      │
//!                                      ▼ (preempted request) ──► back of the queue
//! ```
//!
//! Fetch settlements arrive from the executor's tasks through a settle hook
//! that locks the manager state, applies the result and refills free slots.
//! All bookkeeping therefore happens under one mutex, and every public
//! operation observes a consistent queue and executor.
//!
//! Each provider also has a `watch` channel carrying its pending count
//! (queued plus executing), republished after every state change.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::executor::{Ready, RequestExecutor, Settlement, SettleHook};
use super::queue::{QueuedRequest, RequestQueue};
use super::stats::TileProviderStats;
use crate::error::SchedulerError;
use crate::provider::TileProvider;
use crate::request::{RequestId, TileProviderId};

/// Per-type scheduler shared by all providers of that type.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct TileManager {
    tile_type: Arc<str>,
    state: Arc<Mutex<ManagerState>>,
}

struct ManagerState {
    tile_type: Arc<str>,
    providers: HashMap<TileProviderId, Arc<dyn TileProvider>>,
    pending: HashMap<TileProviderId, watch::Sender<usize>>,
    queue: RequestQueue,
    executor: RequestExecutor,
    preemptions: u64,
}

impl TileManager {
    /// Creates a manager for one tile type.
    ///
    /// # Arguments
    ///
    /// * `tile_type` - Provider type served by this manager
    /// * `concurrency` - Global budget shared by all providers of the type
    /// * `runtime` - Runtime the tile fetches are spawned on
    pub fn new(tile_type: impl Into<String>, concurrency: usize, runtime: Handle) -> Self {
        let tile_type: Arc<str> = Arc::from(tile_type.into());

        let state = Arc::new_cyclic(|weak: &Weak<Mutex<ManagerState>>| {
            let weak = weak.clone();
            let on_settled: SettleHook = Arc::new(move |settlement: Settlement| {
                // The manager may be gone by the time a fetch finishes.
                if let Some(state) = weak.upgrade() {
                    state.lock().on_settled(settlement);
                }
            });

            Mutex::new(ManagerState {
                tile_type: Arc::clone(&tile_type),
                providers: HashMap::new(),
                pending: HashMap::new(),
                queue: RequestQueue::new(),
                executor: RequestExecutor::new(concurrency, runtime, on_settled),
                preemptions: 0,
            })
        });

        info!(
            tile_type = %tile_type,
            concurrency = concurrency.max(1),
            "Tile manager created"
        );

        Self { tile_type, state }
    }

    /// Tile type served by this manager.
    pub fn tile_type(&self) -> &str {
        &self.tile_type
    }

    /// Global concurrency budget.
    pub fn concurrency(&self) -> usize {
        self.state.lock().executor.concurrency()
    }

    /// Registers a provider.
    ///
    /// Registering an id twice is tolerated: the second call logs a warning
    /// and keeps the original provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider's type differs from the manager's or
    /// its concurrency is zero.
    pub fn add_tile_provider(
        &self,
        tile_provider_id: TileProviderId,
        provider: Arc<dyn TileProvider>,
    ) -> Result<(), SchedulerError> {
        if provider.tile_type() != &*self.tile_type {
            return Err(SchedulerError::TypeMismatch {
                expected: self.tile_type.to_string(),
                actual: provider.tile_type().to_string(),
            });
        }
        let concurrency = provider.concurrency();
        if concurrency == 0 {
            return Err(SchedulerError::InvalidConcurrency {
                tile_provider_id,
                concurrency,
            });
        }

        let mut state = self.state.lock();
        if state.providers.contains_key(&tile_provider_id) {
            warn!(
                tile_provider_id = %tile_provider_id,
                "Cannot add existing tile provider"
            );
            return Ok(());
        }

        state
            .executor
            .add_tile_provider(tile_provider_id.clone(), concurrency);
        state
            .pending
            .insert(tile_provider_id.clone(), watch::channel(0).0);
        state.providers.insert(tile_provider_id.clone(), provider);

        debug!(
            tile_provider_id = %tile_provider_id,
            tile_type = %self.tile_type,
            concurrency,
            "Added tile provider"
        );
        Ok(())
    }

    /// Deregisters a provider.
    ///
    /// Its queued and executing requests are released. Unknown ids are
    /// ignored.
    pub fn remove_tile_provider(&self, tile_provider_id: &TileProviderId) {
        let mut state = self.state.lock();
        if state.providers.remove(tile_provider_id).is_none() {
            debug!(
                tile_provider_id = %tile_provider_id,
                "Skipped removing unknown tile provider"
            );
            return;
        }

        let queued = state.queue.remove_tile_provider(tile_provider_id);
        let active = state.executor.remove_tile_provider(tile_provider_id);
        let released = queued.len() + active.len();
        for entry in queued.into_iter().chain(active) {
            entry.release();
        }
        state.pending.remove(tile_provider_id);

        debug!(
            tile_provider_id = %tile_provider_id,
            tile_type = %self.tile_type,
            released,
            "Removed tile provider"
        );

        state.pump();
        state.publish_pending();
    }

    /// Submits a request.
    ///
    /// The request is queued and started as soon as capacity allows,
    /// possibly by preempting another provider's request.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unknown or a request with the same
    /// id is still queued or executing.
    pub fn load_tile(&self, entry: QueuedRequest) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        state.require(&entry.tile_provider_id)?;

        let request_id = entry.request_id();
        if state.queue.contains(request_id) || state.executor.is_active(request_id) {
            return Err(SchedulerError::DuplicateRequest(request_id.clone()));
        }

        debug!(
            tile_provider_id = %entry.tile_provider_id,
            request_id = %request_id,
            coord = %entry.request.coord,
            "Load tile"
        );

        state.submit(entry);
        state.publish_pending();
        Ok(())
    }

    /// Releases a request.
    ///
    /// Removes it from the queue if pending, cancels it if executing, and
    /// finalizes its response channel without a value. Releasing an unknown
    /// or already settled request, or one owned by another provider, is a
    /// no-op.
    pub fn release_tile(&self, tile_provider_id: &TileProviderId, request_id: &RequestId) {
        let mut state = self.state.lock();

        let owner = state
            .queue
            .tile_provider_of(request_id)
            .or_else(|| state.executor.tile_provider_of(request_id));
        if owner != Some(tile_provider_id) {
            trace!(
                tile_provider_id = %tile_provider_id,
                request_id = %request_id,
                "Release of settled, unknown or foreign request"
            );
            return;
        }

        let queued = state.queue.discard_by_request_id(request_id);
        let active = state.executor.cancel_by_request_id(request_id);
        debug!(
            tile_provider_id = %tile_provider_id,
            request_id = %request_id,
            was_active = active.is_some(),
            "Release tile"
        );

        let freed = active.is_some();
        for entry in queued.into_iter().chain(active) {
            entry.release();
        }
        if freed {
            state.pump();
        }
        state.publish_pending();
    }

    /// Shows or hides a provider.
    ///
    /// Hidden providers lose preemption races against visible ones. Every
    /// queued request is re-evaluated afterwards, since visibility changes
    /// can make preemption possible.
    pub fn set_visibility(
        &self,
        tile_provider_id: &TileProviderId,
        visible: bool,
    ) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        state.require(tile_provider_id)?;

        debug!(
            tile_provider_id = %tile_provider_id,
            visible,
            "Set tile provider visibility"
        );
        state.executor.set_hidden(tile_provider_id, !visible);
        state.rescan(None);
        state.publish_pending();
        Ok(())
    }

    /// Enables or disables a provider.
    ///
    /// Disabling freezes its queued requests and moves its executing requests
    /// back to the queue, freeing their slots for other providers. Enabling
    /// lets the frozen requests run again.
    pub fn set_enabled(
        &self,
        tile_provider_id: &TileProviderId,
        enabled: bool,
    ) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        state.require(tile_provider_id)?;

        debug!(
            tile_provider_id = %tile_provider_id,
            enabled,
            "Set tile provider enabled"
        );
        state.executor.set_enabled(tile_provider_id, enabled);
        state.queue.set_enabled(tile_provider_id, enabled);

        if enabled {
            state.rescan(Some(tile_provider_id));
        } else {
            let cancelled = state.executor.cancel_by_tile_provider_id(tile_provider_id);
            for entry in cancelled {
                state.submit(entry);
            }
            state.pump();
        }
        state.publish_pending();
        Ok(())
    }

    /// Returns a snapshot of a provider's counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unknown.
    pub fn get_stats(&self, tile_provider_id: &TileProviderId) -> Result<TileProviderStats, SchedulerError> {
        let state = self.state.lock();
        let stats = state.stats(tile_provider_id)?;
        debug!(tile_provider_id = %tile_provider_id, "{}", stats);
        Ok(stats)
    }

    /// Subscribes to a provider's pending count.
    ///
    /// The channel closes when the provider is removed.
    pub fn subscribe_pending(
        &self,
        tile_provider_id: &TileProviderId,
    ) -> Result<watch::Receiver<usize>, SchedulerError> {
        let state = self.state.lock();
        state
            .pending
            .get(tile_provider_id)
            .map(watch::Sender::subscribe)
            .ok_or_else(|| SchedulerError::UnknownTileProvider(tile_provider_id.clone()))
    }

    /// Registered provider ids, sorted.
    pub fn tile_provider_ids(&self) -> Vec<TileProviderId> {
        let state = self.state.lock();
        let mut ids: Vec<_> = state.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of requests preempted so far.
    pub fn preemptions(&self) -> u64 {
        self.state.lock().preemptions
    }

    /// Releases all work and deregisters every provider.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        let ids: Vec<_> = state.providers.keys().cloned().collect();
        let mut released = 0;
        for id in &ids {
            let queued = state.queue.remove_tile_provider(id);
            let active = state.executor.remove_tile_provider(id);
            released += queued.len() + active.len();
            for entry in queued.into_iter().chain(active) {
                entry.release();
            }
        }
        state.providers.clear();
        state.pending.clear();

        info!(
            tile_type = %self.tile_type,
            providers = ids.len(),
            released,
            "Tile manager shut down"
        );
    }
}

impl std::fmt::Debug for TileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileManager")
            .field("tile_type", &self.tile_type)
            .finish_non_exhaustive()
    }
}

impl ManagerState {
    fn require(&self, tile_provider_id: &TileProviderId) -> Result<&Arc<dyn TileProvider>, SchedulerError> {
        self.providers
            .get(tile_provider_id)
            .ok_or_else(|| SchedulerError::UnknownTileProvider(tile_provider_id.clone()))
    }

    /// Queues a request and asks the executor for room.
    fn submit(&mut self, entry: QueuedRequest) {
        let tile_provider_id = entry.tile_provider_id.clone();
        let request_id = entry.request_id().clone();
        self.queue.enqueue(entry);
        if let Some(ready) = self.executor.notify(&tile_provider_id, &request_id) {
            self.handle_ready(ready);
        }
    }

    fn handle_ready(&mut self, ready: Ready) {
        let Ready {
            tile_provider_ids,
            cancelled,
        } = ready;

        if self.queue.is_empty() {
            trace!(tile_type = %self.tile_type, "Pending request queue empty");
        } else if let Some(entry) = self.queue.dequeue_by_tile_provider_ids(&tile_provider_ids) {
            self.execute(entry);
        }

        if let Some(cancelled) = cancelled {
            self.preemptions += 1;
            debug!(
                tile_provider_id = %cancelled.tile_provider_id,
                request_id = %cancelled.request_id(),
                "Resubmitting preempted request"
            );
            self.submit(cancelled);
        }

        self.pump();
    }

    /// Fills every free slot with the oldest runnable request.
    fn pump(&mut self) {
        loop {
            let tile_provider_ids = self.executor.available_tile_provider_ids();
            if tile_provider_ids.is_empty() {
                break;
            }
            match self.queue.dequeue_by_tile_provider_ids(&tile_provider_ids) {
                Some(entry) => self.execute(entry),
                None => break,
            }
        }
    }

    fn execute(&mut self, entry: QueuedRequest) {
        match self.providers.get(&entry.tile_provider_id) {
            Some(provider) => {
                let provider = Arc::clone(provider);
                self.executor.execute(provider, entry);
            }
            None => {
                debug_assert!(false, "queued request of unregistered provider");
                entry.release();
            }
        }
    }

    /// Notifies the executor for queued requests, oldest first.
    fn rescan(&mut self, tile_provider_id: Option<&TileProviderId>) {
        for (owner, request_id) in self.queue.scan(tile_provider_id) {
            // Earlier notifications may already have started it.
            if !self.queue.contains(&request_id) {
                continue;
            }
            if let Some(ready) = self.executor.notify(&owner, &request_id) {
                self.handle_ready(ready);
            }
        }
    }

    fn on_settled(&mut self, settlement: Settlement) {
        if let Some(ready) = self.executor.settle(settlement) {
            self.handle_ready(ready);
        }
        self.publish_pending();
    }

    fn stats(&self, tile_provider_id: &TileProviderId) -> Result<TileProviderStats, SchedulerError> {
        let max_active = self.require(tile_provider_id)?.concurrency();
        Ok(TileProviderStats::new(
            &self.tile_type,
            self.queue.get_count(Some(tile_provider_id)),
            self.queue.get_count(None),
            self.executor.get_count(Some(tile_provider_id)),
            self.executor.get_count(None),
            max_active,
        ))
    }

    fn publish_pending(&self) {
        for (id, tx) in &self.pending {
            let pending = self.queue.get_count(Some(id)) + self.executor.get_count(Some(id));
            tx.send_if_modified(|current| {
                if *current == pending {
                    false
                } else {
                    *current = pending;
                    true
                }
            });
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
