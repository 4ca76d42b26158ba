//! Tile request types.
//!
//! A [`TileRequest`] describes one tile fetch. It carries the caller-supplied
//! (or generated) [`RequestId`], the tile coordinates and an optional URL. The
//! scheduler treats everything but the id as opaque payload handed to the
//! provider's fetch.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

// =============================================================================
// Identifiers
// =============================================================================

/// Global counter for generated identifiers.
static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Identifies one tile fetch.
///
/// Stable for the lifetime of the fetch, including re-executions after the
/// request was preempted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(String);

impl RequestId {
    /// Creates a request id from a caller-supplied value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a process-unique request id.
    pub fn generate() -> Self {
        Self(format!("req-{}", next_id()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifies one tile provider (one map layer instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileProviderId(String);

impl TileProviderId {
    /// Creates a provider id from a caller-supplied value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a process-unique provider id.
    pub fn generate() -> Self {
        Self(format!("provider-{}", next_id()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TileProviderId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// =============================================================================
// Tile coordinates and payload
// =============================================================================

/// Web Mercator tile coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    /// Tile column (X, increases eastward).
    pub x: u32,
    /// Tile row (Y, increases southward).
    pub y: u32,
    /// Zoom level.
    pub zoom: u8,
}

impl TileCoord {
    /// Creates tile coordinates.
    pub fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self { x, y, zoom }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Request to load one tile.
///
/// # Example
///
/// ```
/// use tilesched::request::{TileCoord, TileRequest};
///
/// let request = TileRequest::new("tile-1", TileCoord::new(10, 20, 5))
///     .with_url("https://tiles.example/5/10/20.png");
/// assert_eq!(request.id.as_str(), "tile-1");
/// assert_eq!(request.url.as_deref(), Some("https://tiles.example/5/10/20.png"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    /// Unique request id.
    pub id: RequestId,
    /// Coordinates of the requested tile.
    pub coord: TileCoord,
    /// Fully-resolved URL, for providers fetching over HTTP.
    pub url: Option<String>,
}

impl TileRequest {
    /// Creates a request with a caller-supplied id.
    pub fn new(id: impl Into<RequestId>, coord: TileCoord) -> Self {
        Self {
            id: id.into(),
            coord,
            url: None,
        }
    }

    /// Creates a request with a generated id.
    pub fn generated(coord: TileCoord) -> Self {
        Self::new(RequestId::generate(), coord)
    }

    /// Attaches the URL the provider should fetch.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A loaded tile.
///
/// Cheap to clone; the data is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    /// Coordinates of the tile.
    pub coord: TileCoord,
    /// Encoded tile bytes (PNG, JPEG, ...).
    pub data: Bytes,
}

impl Tile {
    /// Creates a tile.
    pub fn new(coord: TileCoord, data: impl Into<Bytes>) -> Self {
        Self {
            coord,
            data: data.into(),
        }
    }

    /// Size of the tile data in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the tile has no data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
