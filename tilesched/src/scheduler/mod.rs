//! Tile request scheduling.
//!
//! Tile providers of the same type share one [`TileManager`], which
//! coordinates a pending [`RequestQueue`] and a [`RequestExecutor`] enforcing
//! a global concurrency budget plus each provider's own limit. Visible
//! providers win capacity from hidden ones, and busy providers yield capacity
//! to idle ones (see [`policy`]).
//!
//! Map layers use the per-provider facade returned by
//! [`SchedulerRegistry::get_tile_manager`].
//!
//! # Example
//!
//! ```ignore
//! let registry = SchedulerRegistry::new(SchedulerConfig::default(), Handle::current());
//! let layer = registry.get_tile_manager(None, Arc::new(provider))?;
//!
//! let load = layer.load_tile(TileRequest::generated(TileCoord::new(1, 2, 3)))?;
//! match load.wait().await {
//!     Some(Ok(tile)) => println!("{} bytes", tile.len()),
//!     Some(Err(e)) => eprintln!("fetch failed: {}", e),
//!     None => println!("released"),
//! }
//! ```

mod executor;
mod handle;
mod manager;
pub mod policy;
mod queue;
mod registry;
mod stats;

pub use executor::{Ready, RequestExecutor, SettleHook, Settlement};
pub use handle::{TileLoad, TileProviderHandle};
pub use manager::TileManager;
pub use queue::{QueuedRequest, RequestQueue};
pub use registry::SchedulerRegistry;
pub use stats::TileProviderStats;
