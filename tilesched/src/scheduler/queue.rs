//! Pending request queue.
//!
//! Holds requests that are waiting for executor capacity, grouped by tile
//! provider. Each provider has its own FIFO; a queue-wide sequence number
//! decides between providers, so the oldest runnable request among the
//! candidate providers is dequeued first.
//!
//! Disabled providers keep their entries but are skipped by
//! [`RequestQueue::dequeue_by_tile_provider_ids`] until re-enabled.
//!
//! The queue is a plain data structure with no concurrency semantics; the
//! tile manager wraps it in its state mutex.
//!
//! # Example
//!
//! ```ignore
//! let mut queue = RequestQueue::new();
//! queue.enqueue(entry_a1);
//! queue.enqueue(entry_b1);
//! queue.enqueue(entry_a2);
//!
//! // Only provider A has free capacity
//! let next = queue.dequeue_by_tile_provider_ids(&[provider_a]);
//! assert_eq!(next.unwrap().request_id(), &a1);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::request::{RequestId, TileProviderId, TileRequest};
use crate::response::ResponseSender;

// =============================================================================
// Queued Request
// =============================================================================

/// A tile request together with its delivery and cancellation plumbing.
///
/// The same value moves between the queue and the executor's active set, so a
/// request that is preempted and resubmitted keeps its id, response channel
/// and release token.
pub struct QueuedRequest {
    /// Provider that issued the request.
    pub tile_provider_id: TileProviderId,

    /// The request payload handed to the provider.
    pub request: TileRequest,

    /// Where the outcome is delivered.
    pub response: ResponseSender,

    /// Release token. Cancelled when the caller gives up on the request.
    /// Every execution attempt runs under a child of this token.
    pub cancel: CancellationToken,

    /// Queue-assigned sequence number for FIFO ordering.
    sequence: u64,

    /// When the request was (last) enqueued.
    pub enqueued_at: Instant,
}

impl QueuedRequest {
    /// Creates a queued request.
    pub fn new(
        tile_provider_id: TileProviderId,
        request: TileRequest,
        response: ResponseSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tile_provider_id,
            request,
            response,
            cancel,
            sequence: 0,
            enqueued_at: Instant::now(),
        }
    }

    /// Returns the request id.
    pub fn request_id(&self) -> &RequestId {
        &self.request.id
    }

    /// Returns how long this request has been waiting in the queue.
    pub fn wait_time(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Finalizes the request without a value and cancels its release token.
    pub(crate) fn release(&self) {
        self.cancel.cancel();
        self.response.release();
    }
}

impl std::fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("tile_provider_id", &self.tile_provider_id)
            .field("request_id", &self.request.id)
            .field("sequence", &self.sequence)
            .finish()
    }
}

// =============================================================================
// Request Queue
// =============================================================================

/// Pending requests, grouped by tile provider.
#[derive(Default)]
pub struct RequestQueue {
    /// Per-provider FIFO of pending requests.
    pending: HashMap<TileProviderId, VecDeque<QueuedRequest>>,

    /// Request id → owning provider, for discards.
    locations: HashMap<RequestId, TileProviderId>,

    /// Providers whose entries are frozen.
    disabled: HashSet<TileProviderId>,

    next_sequence: u64,
}

impl RequestQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pending request at the back of its provider's FIFO.
    ///
    /// The queue is unbounded; backpressure comes from executor capacity.
    pub fn enqueue(&mut self, mut entry: QueuedRequest) {
        entry.sequence = self.next_sequence;
        entry.enqueued_at = Instant::now();
        self.next_sequence += 1;

        self.locations
            .insert(entry.request.id.clone(), entry.tile_provider_id.clone());
        self.pending
            .entry(entry.tile_provider_id.clone())
            .or_default()
            .push_back(entry);
    }

    /// Removes and returns the oldest pending request of an enabled provider
    /// in `tile_provider_ids`.
    ///
    /// Returns `None` if nothing is runnable for these providers.
    pub fn dequeue_by_tile_provider_ids(
        &mut self,
        tile_provider_ids: &[TileProviderId],
    ) -> Option<QueuedRequest> {
        let tile_provider_id = tile_provider_ids
            .iter()
            .filter(|id| !self.disabled.contains(*id))
            .filter_map(|id| {
                self.pending
                    .get(id)
                    .and_then(|fifo| fifo.front())
                    .map(|front| (front.sequence, id))
            })
            .min_by_key(|(sequence, _)| *sequence)
            .map(|(_, id)| id.clone())?;

        let fifo = self.pending.get_mut(&tile_provider_id)?;
        let entry = fifo.pop_front()?;
        if fifo.is_empty() {
            self.pending.remove(&tile_provider_id);
        }
        self.locations.remove(&entry.request.id);
        Some(entry)
    }

    /// Removes a pending request by id.
    ///
    /// Returns the removed entry, or `None` if the request is not queued.
    pub fn discard_by_request_id(&mut self, request_id: &RequestId) -> Option<QueuedRequest> {
        let tile_provider_id = self.locations.remove(request_id)?;
        let fifo = self.pending.get_mut(&tile_provider_id)?;
        let position = fifo.iter().position(|e| &e.request.id == request_id)?;
        let entry = fifo.remove(position);
        if fifo.is_empty() {
            self.pending.remove(&tile_provider_id);
        }
        entry
    }

    /// Provider owning a queued request.
    pub fn tile_provider_of(&self, request_id: &RequestId) -> Option<&TileProviderId> {
        self.locations.get(request_id)
    }

    /// Drops all pending requests of a provider and forgets its enabled state.
    ///
    /// Returns the removed entries in FIFO order.
    pub fn remove_tile_provider(&mut self, tile_provider_id: &TileProviderId) -> Vec<QueuedRequest> {
        self.disabled.remove(tile_provider_id);
        let removed: Vec<_> = self
            .pending
            .remove(tile_provider_id)
            .map(Vec::from)
            .unwrap_or_default();
        for entry in &removed {
            self.locations.remove(&entry.request.id);
        }
        removed
    }

    /// Marks a provider's entries as eligible or frozen.
    pub fn set_enabled(&mut self, tile_provider_id: &TileProviderId, enabled: bool) {
        if enabled {
            self.disabled.remove(tile_provider_id);
        } else {
            self.disabled.insert(tile_provider_id.clone());
        }
    }

    /// Number of pending requests for one provider, or in total.
    ///
    /// Frozen entries of disabled providers are counted.
    pub fn get_count(&self, tile_provider_id: Option<&TileProviderId>) -> usize {
        match tile_provider_id {
            Some(id) => self.pending.get(id).map_or(0, VecDeque::len),
            None => self.locations.len(),
        }
    }

    /// Returns true if no eligible pending request exists.
    pub fn is_empty(&self) -> bool {
        !self
            .pending
            .iter()
            .any(|(id, fifo)| !fifo.is_empty() && !self.disabled.contains(id))
    }

    /// Returns true if the request is pending.
    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.locations.contains_key(request_id)
    }

    /// Lists eligible pending requests in queue order.
    ///
    /// With a provider id, only that provider's entries are listed.
    pub fn scan(&self, tile_provider_id: Option<&TileProviderId>) -> Vec<(TileProviderId, RequestId)> {
        let mut entries: Vec<&QueuedRequest> = self
            .pending
            .iter()
            .filter(|(id, _)| !self.disabled.contains(*id))
            .filter(|(id, _)| tile_provider_id.map_or(true, |wanted| wanted == *id))
            .flat_map(|(_, fifo)| fifo.iter())
            .collect();
        entries.sort_by_key(|e| e.sequence);
        entries
            .into_iter()
            .map(|e| (e.tile_provider_id.clone(), e.request.id.clone()))
            .collect()
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("len", &self.locations.len())
            .field("providers", &self.pending.len())
            .field("disabled", &self.disabled)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
