//! Per-provider facade over a shared [`TileManager`].
//!
//! Map layers do not talk to the manager directly. Each layer holds a
//! [`TileProviderHandle`] bound to its own provider id, and each tile it asks
//! for is represented by a [`TileLoad`]. Dropping a `TileLoad` before it
//! settles releases the request; dropping the handle deregisters the provider.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::manager::TileManager;
use super::queue::QueuedRequest;
use super::stats::TileProviderStats;
use crate::error::SchedulerError;
use crate::request::{RequestId, TileProviderId, TileRequest};
use crate::response::{response_channel, ResponseState, TileOutcome, TileResponse};

/// A tile provider's view of its tile manager.
pub struct TileProviderHandle {
    tile_provider_id: TileProviderId,
    manager: TileManager,
    pending: watch::Receiver<usize>,
    closed: AtomicBool,
}

impl TileProviderHandle {
    /// Binds a registered provider to its manager.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is not registered with `manager`.
    pub(crate) fn new(tile_provider_id: TileProviderId, manager: TileManager) -> Result<Self, SchedulerError> {
        let pending = manager.subscribe_pending(&tile_provider_id)?;
        Ok(Self {
            tile_provider_id,
            manager,
            pending,
            closed: AtomicBool::new(false),
        })
    }

    /// This provider's id.
    pub fn tile_provider_id(&self) -> &TileProviderId {
        &self.tile_provider_id
    }

    /// The shared manager.
    pub fn manager(&self) -> &TileManager {
        &self.manager
    }

    /// Submits a tile request.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle was closed or the request id is
    /// already in flight.
    pub fn load_tile(&self, request: TileRequest) -> Result<TileLoad, SchedulerError> {
        let (tx, response) = response_channel();
        let cancel = CancellationToken::new();
        let request_id = request.id.clone();

        self.manager.load_tile(QueuedRequest::new(
            self.tile_provider_id.clone(),
            request,
            tx,
            cancel.clone(),
        ))?;

        Ok(TileLoad {
            tile_provider_id: self.tile_provider_id.clone(),
            request_id,
            response,
            cancel,
            manager: self.manager.clone(),
        })
    }

    /// Releases a request by id. No-op if it already settled.
    pub fn release_tile(&self, request_id: &RequestId) {
        self.manager.release_tile(&self.tile_provider_id, request_id);
    }

    /// Shows or hides this provider.
    pub fn set_visibility(&self, visible: bool) -> Result<(), SchedulerError> {
        self.manager.set_visibility(&self.tile_provider_id, visible)
    }

    /// Enables or disables this provider.
    pub fn set_enabled(&self, enabled: bool) -> Result<(), SchedulerError> {
        self.manager.set_enabled(&self.tile_provider_id, enabled)
    }

    /// Live count of this provider's queued plus executing requests.
    ///
    /// The channel closes when the provider is deregistered.
    pub fn pending(&self) -> watch::Receiver<usize> {
        self.pending.clone()
    }

    /// Snapshot of this provider's counts.
    pub fn stats(&self) -> Result<TileProviderStats, SchedulerError> {
        self.manager.get_stats(&self.tile_provider_id)
    }

    /// Deregisters the provider, releasing all its requests.
    ///
    /// Idempotent. Also called on drop.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(tile_provider_id = %self.tile_provider_id, "Closing tile provider handle");
        self.manager.remove_tile_provider(&self.tile_provider_id);
    }
}

impl Drop for TileProviderHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TileProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileProviderHandle")
            .field("tile_provider_id", &self.tile_provider_id)
            .field("tile_type", &self.manager.tile_type())
            .finish()
    }
}

/// One in-flight tile request.
///
/// Resolves once with the fetch outcome. Dropping it releases the request
/// if it has not settled yet.
pub struct TileLoad {
    tile_provider_id: TileProviderId,
    request_id: RequestId,
    response: TileResponse,
    cancel: CancellationToken,
    manager: TileManager,
}

impl TileLoad {
    /// Id of the request.
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Additional subscriber to the outcome. Outlives the `TileLoad`.
    pub fn subscribe(&self) -> TileResponse {
        self.response.clone()
    }

    /// Current state of the request's response.
    pub fn state(&self) -> ResponseState {
        self.response.state()
    }

    /// Waits for the outcome.
    ///
    /// Returns `None` if the request was released (or its provider removed)
    /// before it settled.
    pub async fn wait(mut self) -> Option<TileOutcome> {
        self.response.wait().await
    }
}

impl Drop for TileLoad {
    fn drop(&mut self) {
        self.cancel.cancel();
        if !self.response.state().is_final() {
            self.manager
                .release_tile(&self.tile_provider_id, &self.request_id);
        }
    }
}

impl std::fmt::Debug for TileLoad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileLoad")
            .field("tile_provider_id", &self.tile_provider_id)
            .field("request_id", &self.request_id)
            .field("state", &self.response.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::provider::{BoxFuture, TileProvider};
    use crate::request::{Tile, TileCoord};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::runtime::Handle;

    /// Completes every fetch after a short delay.
    struct DelayProvider {
        delay: Duration,
    }

    impl TileProvider for DelayProvider {
        fn tile_type(&self) -> &str {
            "delay"
        }

        fn concurrency(&self) -> usize {
            1
        }

        fn load_tile(&self, request: TileRequest, _cancel: CancellationToken) -> BoxFuture<'_, TileOutcome> {
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                if request.url.as_deref() == Some("fail") {
                    Err(FetchError::Provider("boom".to_string()))
                } else {
                    Ok(Tile::new(request.coord, vec![0u8; 8]))
                }
            })
        }
    }

    fn handle(delay_ms: u64) -> TileProviderHandle {
        let manager = TileManager::new("delay", 1, Handle::current());
        let id = TileProviderId::new("layer");
        manager
            .add_tile_provider(
                id.clone(),
                Arc::new(DelayProvider {
                    delay: Duration::from_millis(delay_ms),
                }),
            )
            .unwrap();
        TileProviderHandle::new(id, manager).unwrap()
    }

    fn request(id: &str) -> TileRequest {
        TileRequest::new(id, TileCoord::new(1, 1, 2))
    }

    #[tokio::test]
    async fn test_load_tile_resolves() {
        let handle = handle(1);
        let load = handle.load_tile(request("t1")).unwrap();
        let tile = load.wait().await.unwrap().unwrap();
        assert_eq!(tile.len(), 8);
    }

    #[tokio::test]
    async fn test_fetch_error_is_delivered() {
        let handle = handle(1);
        let load = handle.load_tile(request("t1").with_url("fail")).unwrap();
        assert_eq!(
            load.wait().await,
            Some(Err(FetchError::Provider("boom".to_string())))
        );
    }

    #[tokio::test]
    async fn test_dropping_load_releases_request() {
        let handle = handle(10_000);
        let first = handle.load_tile(request("t1")).unwrap();
        let second = handle.load_tile(request("t2")).unwrap();
        let mut observer = second.subscribe();
        assert_eq!(*handle.pending().borrow(), 2);

        drop(second);
        assert_eq!(observer.wait().await, None);
        assert_eq!(*handle.pending().borrow(), 1);

        drop(first);
        assert_eq!(*handle.pending().borrow(), 0);
    }

    #[tokio::test]
    async fn test_release_tile_by_id() {
        let handle = handle(10_000);
        let load = handle.load_tile(request("t1")).unwrap();
        handle.release_tile(load.request_id());
        handle.release_tile(load.request_id());
        assert_eq!(load.state(), ResponseState::Released);
    }

    #[tokio::test]
    async fn test_close_deregisters() {
        let handle = handle(10_000);
        let load = handle.load_tile(request("t1")).unwrap();
        let manager = handle.manager().clone();

        handle.close();
        handle.close();
        assert!(manager.tile_provider_ids().is_empty());
        assert_eq!(load.wait().await, None);
        assert!(matches!(
            handle.load_tile(request("t2")),
            Err(SchedulerError::UnknownTileProvider(_))
        ));
    }

    #[tokio::test]
    async fn test_handle_drop_closes() {
        let handle = handle(10_000);
        let manager = handle.manager().clone();
        drop(handle);
        assert!(manager.tile_provider_ids().is_empty());
    }
}
