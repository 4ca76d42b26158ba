//! Tile provider abstraction.
//!
//! A tile provider is one map layer instance that knows how to fetch tiles.
//! Providers sharing a [`TileProvider::tile_type`] share one scheduling domain
//! (one [`TileManager`](crate::scheduler::TileManager)), and each provider caps
//! its own in-flight requests with [`TileProvider::concurrency`].
//!
//! # Cancellation
//!
//! `load_tile` receives a [`CancellationToken`]. The scheduler cancels it when
//! the request is released or preempted. Implementations should stop work and
//! release resources promptly; any result produced after cancellation is
//! ignored by the scheduler.
//!
//! # Example
//!
//! ```ignore
//! use tilesched::provider::{HttpTileProvider, ReqwestClient};
//!
//! let client = ReqwestClient::new()?;
//! let provider = HttpTileProvider::new(client, "osm", 4);
//! ```

mod http;

pub use http::{HttpClient, HttpTileProvider, ReqwestClient};

#[cfg(test)]
pub use http::tests::MockHttpClient;

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::request::TileRequest;
use crate::response::TileOutcome;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A source of map tiles.
///
/// Uses `Pin<Box<dyn Future>>` so providers can be held as
/// `Arc<dyn TileProvider>`.
pub trait TileProvider: Send + Sync + 'static {
    /// Provider type. Providers of the same type share one tile manager and
    /// its global concurrency budget.
    fn tile_type(&self) -> &str;

    /// Maximum number of requests of this provider executing at once.
    ///
    /// Must be greater than zero.
    fn concurrency(&self) -> usize;

    /// Fetches one tile.
    ///
    /// # Arguments
    ///
    /// * `request` - The tile to fetch
    /// * `cancel` - Cancelled when the scheduler no longer wants the result
    fn load_tile(&self, request: TileRequest, cancel: CancellationToken)
        -> BoxFuture<'_, TileOutcome>;
}
