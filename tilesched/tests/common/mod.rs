//! Controllable tile providers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use tilesched::provider::{BoxFuture, TileProvider};
use tilesched::{FetchError, RequestId, Tile, TileCoord, TileOutcome, TileRequest};

/// Lifecycle of a request as observed by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Active,
    Completed,
    Canceled,
}

#[derive(Default)]
struct MockState {
    gates: HashMap<RequestId, oneshot::Sender<TileOutcome>>,
    states: HashMap<RequestId, Vec<FetchState>>,
    started: Vec<RequestId>,
    live: HashMap<RequestId, usize>,
}

/// Provider whose fetches either block until completed by the test, or
/// complete on their own after a delay.
pub struct MockProvider {
    tile_type: String,
    concurrency: usize,
    auto_complete: Option<Duration>,
    inner: Mutex<MockState>,
}

impl MockProvider {
    /// Fetches block until [`MockProvider::complete`] is called.
    pub fn blocking(tile_type: &str, concurrency: usize) -> Self {
        Self {
            tile_type: tile_type.to_string(),
            concurrency,
            auto_complete: None,
            inner: Mutex::new(MockState::default()),
        }
    }

    /// Fetches complete successfully after `delay`.
    pub fn completing(tile_type: &str, concurrency: usize, delay: Duration) -> Self {
        Self {
            auto_complete: Some(delay),
            ..Self::blocking(tile_type, concurrency)
        }
    }

    /// Latest state of a request, `None` if it never started.
    pub fn state(&self, request_id: &str) -> Option<FetchState> {
        self.inner
            .lock()
            .states
            .get(&RequestId::new(request_id))
            .and_then(|history| history.last().copied())
    }

    /// Every state a request went through, in order.
    pub fn history(&self, request_id: &str) -> Vec<FetchState> {
        self.inner
            .lock()
            .states
            .get(&RequestId::new(request_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Request ids in the order their fetches started (with repeats).
    pub fn started(&self) -> Vec<String> {
        self.inner
            .lock()
            .started
            .iter()
            .map(|id| id.to_string())
            .collect()
    }

    /// Ids of requests currently blocked in a fetch, sorted.
    pub fn blocked(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .inner
            .lock()
            .gates
            .keys()
            .map(|id| id.to_string())
            .collect();
        ids.sort();
        ids
    }

    /// Completes a blocked fetch. Returns false if it is not blocked.
    pub fn complete(&self, request_id: &str) -> bool {
        let gate = self.inner.lock().gates.remove(&RequestId::new(request_id));
        match gate {
            Some(gate) => {
                let tile = Tile::new(TileCoord::new(0, 0, 0), request_id.as_bytes().to_vec());
                gate.send(Ok(tile)).is_ok()
            }
            None => false,
        }
    }

    /// Fails a blocked fetch. Returns false if it is not blocked.
    pub fn fail(&self, request_id: &str) -> bool {
        let gate = self.inner.lock().gates.remove(&RequestId::new(request_id));
        match gate {
            Some(gate) => gate
                .send(Err(FetchError::Http {
                    status: 500,
                    url: request_id.to_string(),
                }))
                .is_ok(),
            None => false,
        }
    }

    /// Fetches running right now, across all requests.
    pub fn live(&self) -> usize {
        self.inner.lock().live.values().sum()
    }

    /// Fetches of one request running right now.
    pub fn live_for(&self, request_id: &str) -> usize {
        self.inner
            .lock()
            .live
            .get(&RequestId::new(request_id))
            .copied()
            .unwrap_or(0)
    }

    fn transition(&self, request_id: &RequestId, state: FetchState) {
        let mut inner = self.inner.lock();
        inner
            .states
            .entry(request_id.clone())
            .or_default()
            .push(state);
        if state != FetchState::Active {
            inner.gates.remove(request_id);
        }
    }
}

/// Tracks one running fetch. Marks it canceled if dropped before completion.
struct LiveFetch<'a> {
    provider: &'a MockProvider,
    request_id: RequestId,
}

impl<'a> LiveFetch<'a> {
    fn start(provider: &'a MockProvider, request_id: RequestId) -> Self {
        {
            let mut inner = provider.inner.lock();
            inner.started.push(request_id.clone());
            *inner.live.entry(request_id.clone()).or_default() += 1;
        }
        provider.transition(&request_id, FetchState::Active);
        Self {
            provider,
            request_id,
        }
    }
}

impl Drop for LiveFetch<'_> {
    fn drop(&mut self) {
        let still_active = {
            let mut inner = self.provider.inner.lock();
            let remaining = inner.live.get_mut(&self.request_id).map(|live| {
                *live -= 1;
                *live
            });
            if remaining == Some(0) {
                inner.live.remove(&self.request_id);
            }
            inner
                .states
                .get(&self.request_id)
                .and_then(|h| h.last())
                .copied()
                == Some(FetchState::Active)
        };
        if still_active {
            self.provider
                .transition(&self.request_id, FetchState::Canceled);
        }
    }
}

impl TileProvider for MockProvider {
    fn tile_type(&self) -> &str {
        &self.tile_type
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn load_tile(&self, request: TileRequest, cancel: CancellationToken) -> BoxFuture<'_, TileOutcome> {
        Box::pin(async move {
            let fetch = LiveFetch::start(self, request.id.clone());

            let outcome = match self.auto_complete {
                Some(delay) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(FetchError::Provider("cancelled".to_string())),
                        _ = tokio::time::sleep(delay) => Ok(Tile::new(request.coord, vec![1u8; 16])),
                    }
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    self.inner.lock().gates.insert(request.id.clone(), tx);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(FetchError::Provider("cancelled".to_string())),
                        outcome = rx => outcome
                            .unwrap_or_else(|_| Err(FetchError::Provider("gate dropped".to_string()))),
                    }
                }
            };

            self.transition(&fetch.request_id, FetchState::Completed);
            outcome
        })
    }
}

/// Lets spawned fetch tasks and settle hooks run.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
