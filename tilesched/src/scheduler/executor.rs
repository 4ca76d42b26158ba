//! Request executor.
//!
//! Tracks active (executing) requests and enforces two hard limits:
//!
//! - a global budget shared by every provider of one tile type, and
//! - each provider's own concurrency.
//!
//! The executor spawns the provider fetch for every executed request on the
//! tokio runtime it was given. When a fetch settles, the spawned task reports a
//! [`Settlement`] through the settle hook; the owner feeds it back into
//! [`RequestExecutor::settle`] under its lock. Bookkeeping is therefore always
//! mutated synchronously by the owner, never by the fetch tasks.
//!
//! # Attempts
//!
//! Each execution of a request is one attempt with its own child cancellation
//! token and attempt number. Cancelling a request (release, preemption,
//! disabling its provider) removes it from the active set immediately and
//! cancels the attempt token. A settlement for an attempt that is no longer
//! active is ignored, so late results of aborted fetches never reach the
//! response channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::policy::{self, Candidate, PreemptionReason, ProviderLoad, Requester};
use super::queue::QueuedRequest;
use crate::provider::TileProvider;
use crate::request::{RequestId, TileProviderId};
use crate::response::TileOutcome;

// =============================================================================
// Events
// =============================================================================

/// Capacity became available.
#[derive(Debug)]
pub struct Ready {
    /// Providers that may start a request now.
    pub tile_provider_ids: Vec<TileProviderId>,

    /// Request preempted to make room, to be resubmitted by the owner.
    pub cancelled: Option<QueuedRequest>,
}

/// Result of one execution attempt, reported by the fetch task.
#[derive(Debug)]
pub struct Settlement {
    /// Provider that executed the request.
    pub tile_provider_id: TileProviderId,
    /// The executed request.
    pub request_id: RequestId,
    /// Attempt number the result belongs to.
    pub attempt: u64,
    /// Fetch outcome, or `None` if the attempt token was cancelled.
    pub outcome: Option<TileOutcome>,
}

/// Callback invoked by fetch tasks when an attempt settles.
pub type SettleHook = Arc<dyn Fn(Settlement) + Send + Sync>;

// =============================================================================
// Bookkeeping
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct ProviderSlots {
    concurrency: usize,
    hidden: bool,
    enabled: bool,
    active: usize,
}

impl ProviderSlots {
    fn has_room(&self) -> bool {
        self.enabled && self.active < self.concurrency
    }

    fn load(&self) -> ProviderLoad {
        ProviderLoad {
            hidden: self.hidden,
            active: self.active,
        }
    }
}

/// A request currently executing.
struct ActiveRequest {
    entry: QueuedRequest,
    token: CancellationToken,
    attempt: u64,
    started_at: Instant,
}

// =============================================================================
// Request Executor
// =============================================================================

/// Active-request tracker with concurrency budgets and preemption.
pub struct RequestExecutor {
    concurrency: usize,
    providers: HashMap<TileProviderId, ProviderSlots>,
    active: HashMap<RequestId, ActiveRequest>,

    /// Requests preempted by this executor and not yet re-executed.
    /// They may only preempt hidden work, never balance load.
    yielding: HashMap<RequestId, TileProviderId>,

    next_attempt: u64,
    runtime: Handle,
    on_settled: SettleHook,
}

impl RequestExecutor {
    /// Creates an executor.
    ///
    /// # Arguments
    ///
    /// * `concurrency` - Global budget across all providers (at least 1)
    /// * `runtime` - Runtime the fetch tasks are spawned on
    /// * `on_settled` - Receives the settlement of every attempt
    pub fn new(concurrency: usize, runtime: Handle, on_settled: SettleHook) -> Self {
        Self {
            concurrency: concurrency.max(1),
            providers: HashMap::new(),
            active: HashMap::new(),
            yielding: HashMap::new(),
            next_attempt: 0,
            runtime,
            on_settled,
        }
    }

    /// Global concurrency budget.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Registers a provider. Providers start visible and enabled.
    ///
    /// Re-registering keeps the existing state.
    pub fn add_tile_provider(&mut self, tile_provider_id: TileProviderId, concurrency: usize) {
        self.providers
            .entry(tile_provider_id)
            .or_insert(ProviderSlots {
                concurrency: concurrency.max(1),
                hidden: false,
                enabled: true,
                active: 0,
            });
    }

    /// Forgets a provider, cancelling its active requests.
    ///
    /// Returns the cancelled entries.
    pub fn remove_tile_provider(&mut self, tile_provider_id: &TileProviderId) -> Vec<QueuedRequest> {
        let cancelled = self.cancel_by_tile_provider_id(tile_provider_id);
        self.providers.remove(tile_provider_id);
        self.yielding.retain(|_, owner| owner != tile_provider_id);
        cancelled
    }

    /// Marks a provider hidden or visible.
    pub fn set_hidden(&mut self, tile_provider_id: &TileProviderId, hidden: bool) {
        if let Some(slots) = self.providers.get_mut(tile_provider_id) {
            slots.hidden = hidden;
        }
    }

    /// Enables or disables a provider. Disabled providers get no capacity.
    pub fn set_enabled(&mut self, tile_provider_id: &TileProviderId, enabled: bool) {
        if let Some(slots) = self.providers.get_mut(tile_provider_id) {
            slots.enabled = enabled;
        }
    }

    /// Signals that a request of `tile_provider_id` may be runnable.
    ///
    /// Returns a [`Ready`] event when capacity exists, naming the providers
    /// that may start a request. When the global budget is exhausted, a
    /// requester with spare per-provider capacity may preempt one active
    /// request (see [`policy`]); the event then names only the requester and
    /// carries the cancelled entry.
    pub fn notify(&mut self, tile_provider_id: &TileProviderId, request_id: &RequestId) -> Option<Ready> {
        let requester = *self.providers.get(tile_provider_id)?;
        if !requester.enabled {
            trace!(tile_provider_id = %tile_provider_id, "Notify skipped: provider disabled");
            return None;
        }

        if self.active.len() < self.concurrency {
            let tile_provider_ids = self.available_tile_provider_ids();
            return (!tile_provider_ids.is_empty()).then_some(Ready {
                tile_provider_ids,
                cancelled: None,
            });
        }

        if !requester.has_room() {
            return None;
        }
        let requester = Requester {
            tile_provider_id,
            provider: requester.load(),
            yielding: self.yielding.contains_key(request_id),
        };

        let (victim_id, reason) = {
            let candidates = self.active.iter().filter_map(|(id, active)| {
                self.providers
                    .get(&active.entry.tile_provider_id)
                    .map(|slots| Candidate {
                        request_id: id,
                        tile_provider_id: &active.entry.tile_provider_id,
                        provider: slots.load(),
                        started: active.attempt,
                    })
            });
            policy::select_victim(requester, candidates)?
        };

        let cancelled = self.preempt(&victim_id, reason)?;
        Some(Ready {
            tile_provider_ids: vec![tile_provider_id.clone()],
            cancelled: Some(cancelled),
        })
    }

    /// Starts executing a dequeued request.
    ///
    /// The caller must have obtained capacity for the request's provider via
    /// a [`Ready`] event.
    pub fn execute(&mut self, provider: Arc<dyn TileProvider>, entry: QueuedRequest) {
        let tile_provider_id = entry.tile_provider_id.clone();
        let request_id = entry.request.id.clone();

        debug_assert!(
            !self.active.contains_key(&request_id),
            "request executed twice"
        );
        debug_assert!(self.active.len() < self.concurrency, "global budget exceeded");

        if let Some(slots) = self.providers.get_mut(&tile_provider_id) {
            debug_assert!(slots.active < slots.concurrency, "provider budget exceeded");
            slots.active += 1;
        }
        self.yielding.remove(&request_id);

        let attempt = self.next_attempt;
        self.next_attempt += 1;
        let token = entry.cancel.child_token();

        debug!(
            tile_provider_id = %tile_provider_id,
            request_id = %request_id,
            attempt,
            waited_ms = entry.wait_time().as_millis() as u64,
            "Executing request"
        );

        let request = entry.request.clone();
        let fetch_token = token.clone();
        let on_settled = Arc::clone(&self.on_settled);
        let settled_request_id = request_id.clone();
        self.runtime.spawn(async move {
            let outcome = tokio::select! {
                biased;

                _ = fetch_token.cancelled() => None,

                outcome = provider.load_tile(request, fetch_token.clone()) => Some(outcome),
            };
            on_settled(Settlement {
                tile_provider_id,
                request_id: settled_request_id,
                attempt,
                outcome,
            });
        });

        self.active.insert(
            request_id,
            ActiveRequest {
                entry,
                token,
                attempt,
                started_at: Instant::now(),
            },
        );
    }

    /// Applies the settlement of an attempt.
    ///
    /// Delivers the outcome to the response channel and frees the slot. A
    /// settlement for an attempt that is no longer active is ignored.
    /// Returns a [`Ready`] event if capacity is available afterwards.
    pub fn settle(&mut self, settlement: Settlement) -> Option<Ready> {
        let current = self
            .active
            .get(&settlement.request_id)
            .map(|active| active.attempt);
        if current != Some(settlement.attempt) {
            trace!(
                tile_provider_id = %settlement.tile_provider_id,
                request_id = %settlement.request_id,
                attempt = settlement.attempt,
                "Ignoring result of inactive attempt"
            );
            return None;
        }

        let active = self.remove_active(&settlement.request_id)?;
        let elapsed_ms = active.started_at.elapsed().as_millis() as u64;
        match settlement.outcome {
            Some(outcome) => {
                debug!(
                    tile_provider_id = %settlement.tile_provider_id,
                    request_id = %settlement.request_id,
                    elapsed_ms,
                    success = outcome.is_ok(),
                    "Request settled"
                );
                active.entry.response.settle(outcome);
            }
            None => {
                debug!(
                    tile_provider_id = %settlement.tile_provider_id,
                    request_id = %settlement.request_id,
                    "Request cancelled by caller"
                );
                active.entry.response.release();
            }
        }

        let tile_provider_ids = self.available_tile_provider_ids();
        (!tile_provider_ids.is_empty()).then_some(Ready {
            tile_provider_ids,
            cancelled: None,
        })
    }

    /// Cancels an active request.
    ///
    /// Signals the attempt token, frees the slot and returns the entry so the
    /// caller can release or re-enqueue it. Also clears any preemption marker
    /// for the id. Returns `None` if the request is not active.
    pub fn cancel_by_request_id(&mut self, request_id: &RequestId) -> Option<QueuedRequest> {
        self.yielding.remove(request_id);
        let active = self.remove_active(request_id)?;
        active.token.cancel();
        Some(active.entry)
    }

    /// Cancels every active request of a provider.
    ///
    /// Returns the cancelled entries in the order they started.
    pub fn cancel_by_tile_provider_id(&mut self, tile_provider_id: &TileProviderId) -> Vec<QueuedRequest> {
        let mut ids: Vec<(u64, RequestId)> = self
            .active
            .iter()
            .filter(|(_, active)| &active.entry.tile_provider_id == tile_provider_id)
            .map(|(id, active)| (active.attempt, id.clone()))
            .collect();
        ids.sort();

        ids.into_iter()
            .filter_map(|(_, id)| self.remove_active(&id))
            .map(|active| {
                active.token.cancel();
                active.entry
            })
            .collect()
    }

    /// Number of active requests for one provider, or in total.
    pub fn get_count(&self, tile_provider_id: Option<&TileProviderId>) -> usize {
        match tile_provider_id {
            Some(id) => self.providers.get(id).map_or(0, |slots| slots.active),
            None => self.active.len(),
        }
    }

    /// Returns true if the request is executing.
    pub fn is_active(&self, request_id: &RequestId) -> bool {
        self.active.contains_key(request_id)
    }

    /// Provider owning an active request.
    pub fn tile_provider_of(&self, request_id: &RequestId) -> Option<&TileProviderId> {
        self.active
            .get(request_id)
            .map(|active| &active.entry.tile_provider_id)
    }

    /// Providers that may start a request now, in id order.
    ///
    /// Empty when the global budget is exhausted.
    pub fn available_tile_provider_ids(&self) -> Vec<TileProviderId> {
        if self.active.len() >= self.concurrency {
            return Vec::new();
        }
        let mut ids: Vec<_> = self
            .providers
            .iter()
            .filter(|(_, slots)| slots.has_room())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn preempt(&mut self, request_id: &RequestId, reason: PreemptionReason) -> Option<QueuedRequest> {
        let active = self.remove_active(request_id)?;
        active.token.cancel();
        debug!(
            tile_provider_id = %active.entry.tile_provider_id,
            request_id = %request_id,
            %reason,
            "Preempted request"
        );
        self.yielding
            .insert(request_id.clone(), active.entry.tile_provider_id.clone());
        Some(active.entry)
    }

    fn remove_active(&mut self, request_id: &RequestId) -> Option<ActiveRequest> {
        let active = self.active.remove(request_id)?;
        if let Some(slots) = self.providers.get_mut(&active.entry.tile_provider_id) {
            slots.active = slots.active.saturating_sub(1);
        }
        Some(active)
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("concurrency", &self.concurrency)
            .field("active", &self.active.len())
            .field("providers", &self.providers)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
