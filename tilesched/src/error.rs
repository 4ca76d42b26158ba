//! Error types for the tile scheduler.
//!
//! Two families of errors exist:
//!
//! - [`SchedulerError`]: caller bugs such as addressing a tile provider that was
//!   never registered. These are returned synchronously and are not meant to be
//!   recovered from at runtime.
//! - [`FetchError`]: failures of the underlying tile fetch. These are delivered
//!   through the request's response channel and replayed to every subscriber,
//!   which is why the type is `Clone`.
//!
//! Cancellation is not an error. A released request simply never produces a
//! value.

use thiserror::Error;

use crate::request::{RequestId, TileProviderId};

/// Errors raised by the scheduler itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The tile provider id was never registered (or was already removed).
    #[error("Unknown TileProvider<{0}>")]
    UnknownTileProvider(TileProviderId),

    /// A provider reported a concurrency limit of zero.
    #[error("TileProvider<{tile_provider_id}> has invalid concurrency {concurrency} (must be > 0)")]
    InvalidConcurrency {
        tile_provider_id: TileProviderId,
        concurrency: usize,
    },

    /// A provider was registered with a manager serving another provider type.
    #[error("TileProvider type mismatch: manager serves '{expected}', provider is '{actual}'")]
    TypeMismatch { expected: String, actual: String },

    /// A request with this id is already queued or executing.
    #[error("Request<{0}> is already scheduled")]
    DuplicateRequest(RequestId),
}

/// Errors produced by a tile fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// The request could not be sent or the body could not be read.
    #[error("Network error: {0}")]
    Network(String),

    /// Provider-specific failure.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The request carries no URL but the provider needs one.
    #[error("Request<{0}> has no URL")]
    MissingUrl(RequestId),
}
