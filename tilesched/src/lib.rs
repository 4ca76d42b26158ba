//! tilesched - Map tile request scheduling
//!
//! Coordinates many concurrent, cancelable tile fetches across map layers
//! ("tile providers") that share a concurrency budget per tile type. Work is
//! queued per provider, executed under global and per-provider limits, and
//! preempted in favor of visible or under-served providers.
//!
//! # Modules
//!
//! - [`request`] - request, tile and identifier types
//! - [`response`] - replay-of-one response channel
//! - [`provider`] - `TileProvider` trait and HTTP provider
//! - [`scheduler`] - queue, executor, tile manager and registry
//! - [`config`] - INI configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod error;
pub mod logging;
pub mod provider;
pub mod request;
pub mod response;
pub mod scheduler;

pub use config::{ConfigFileError, LoggingConfig, SchedulerConfig};
pub use error::{FetchError, SchedulerError};
pub use provider::{HttpTileProvider, TileProvider};
pub use request::{RequestId, Tile, TileCoord, TileProviderId, TileRequest};
pub use response::{ResponseState, TileOutcome, TileResponse};
pub use scheduler::{SchedulerRegistry, TileLoad, TileManager, TileProviderHandle, TileProviderStats};
