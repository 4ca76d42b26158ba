//! Per-provider scheduler statistics.

use std::fmt;

/// Snapshot of one provider's queue and executor counts.
///
/// `pending` is always `enqueued + active`, and `total_pending` is always
/// `total_enqueued + total_active`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileProviderStats {
    /// Tile type of the manager.
    pub tile_type: String,
    /// Queued requests of this provider.
    pub enqueued: usize,
    /// Queued requests of all providers.
    pub total_enqueued: usize,
    /// Executing requests of this provider.
    pub active: usize,
    /// Executing requests of all providers.
    pub total_active: usize,
    /// This provider's concurrency limit.
    pub max_active: usize,
    /// Queued plus executing requests of this provider.
    pub pending: usize,
    /// Queued plus executing requests of all providers.
    pub total_pending: usize,
}

impl TileProviderStats {
    pub(crate) fn new(
        tile_type: &str,
        enqueued: usize,
        total_enqueued: usize,
        active: usize,
        total_active: usize,
        max_active: usize,
    ) -> Self {
        Self {
            tile_type: tile_type.to_string(),
            enqueued,
            total_enqueued,
            active,
            total_active,
            max_active,
            pending: enqueued + active,
            total_pending: total_enqueued + total_active,
        }
    }

    /// Returns true if the provider has nothing queued or executing.
    pub fn is_idle(&self) -> bool {
        self.pending == 0
    }
}

impl fmt::Display for TileProviderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type: {}, enqueued: {}/{}, active: {}/{}/{}, pending: {}/{}",
            self.tile_type,
            self.enqueued,
            self.total_enqueued,
            self.active,
            self.total_active,
            self.max_active,
            self.pending,
            self.total_pending
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_is_derived() {
        let stats = TileProviderStats::new("osm", 3, 5, 2, 4, 2);
        assert_eq!(stats.pending, 5);
        assert_eq!(stats.total_pending, 9);
        assert!(!stats.is_idle());
    }

    #[test]
    fn test_display_message() {
        let stats = TileProviderStats::new("osm", 3, 5, 2, 4, 2);
        assert_eq!(
            stats.to_string(),
            "type: osm, enqueued: 3/5, active: 2/4/2, pending: 5/9"
        );
    }
}
