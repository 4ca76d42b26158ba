//! Preemption policy.
//!
//! When the global budget is exhausted and a provider with spare per-provider
//! capacity has pending work, the executor may cancel one active request to
//! make room. This module decides which one.
//!
//! # Eligible victims
//!
//! An active request of another provider is eligible when either:
//!
//! 1. its provider is hidden and the requester is visible, or
//! 2. its provider has more active requests than the requester. A hidden
//!    requester only balances against other hidden providers.
//!
//! A request that was itself preempted and is waiting to run again only
//! applies rule 1, so two providers cannot evict each other back and forth.
//!
//! # Ranking
//!
//! Among eligible victims:
//!
//! 1. hidden providers before visible ones,
//! 2. then the provider with the most active requests,
//! 3. then the most recently started request (least work lost).
//!
//! The ranking is total, so selection is deterministic regardless of map
//! iteration order.
//!
//! # Example
//!
//! ```
//! use tilesched::request::{RequestId, TileProviderId};
//! use tilesched::scheduler::policy::{select_victim, Candidate, PreemptionReason, ProviderLoad, Requester};
//!
//! let a = TileProviderId::new("a");
//! let r1 = RequestId::new("r1");
//! let candidates = vec![Candidate {
//!     request_id: &r1,
//!     tile_provider_id: &a,
//!     provider: ProviderLoad { hidden: false, active: 1 },
//!     started: 0,
//! }];
//!
//! let b = TileProviderId::new("b");
//! let requester = Requester {
//!     tile_provider_id: &b,
//!     provider: ProviderLoad { hidden: false, active: 0 },
//!     yielding: false,
//! };
//! let victim = select_victim(requester, candidates);
//! assert_eq!(victim, Some((r1.clone(), PreemptionReason::LoadBalance)));
//! ```

use std::fmt;

use crate::request::{RequestId, TileProviderId};

/// Visibility and load of one provider, as seen by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderLoad {
    /// Whether the provider's layer is hidden.
    pub hidden: bool,
    /// Number of the provider's requests currently active.
    pub active: usize,
}

/// An active request considered for preemption.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// The active request.
    pub request_id: &'a RequestId,
    /// Provider owning the request.
    pub tile_provider_id: &'a TileProviderId,
    /// That provider's state.
    pub provider: ProviderLoad,
    /// Execution start order (higher = started later).
    pub started: u64,
}

/// Why a request was preempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreemptionReason {
    /// Visible work outranks hidden work.
    HiddenProvider,
    /// The victim's provider holds more slots than the requester.
    LoadBalance,
}

impl fmt::Display for PreemptionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HiddenProvider => write!(f, "hidden provider"),
            Self::LoadBalance => write!(f, "load balance"),
        }
    }
}

/// The provider asking for a slot.
#[derive(Debug, Clone, Copy)]
pub struct Requester<'a> {
    /// Provider with pending work.
    pub tile_provider_id: &'a TileProviderId,
    /// That provider's state.
    pub provider: ProviderLoad,
    /// The pending request was preempted earlier and has not run since.
    pub yielding: bool,
}

/// Picks the active request to cancel on behalf of `requester`.
///
/// Returns `None` if no candidate is eligible, in which case the requester's
/// work stays queued.
pub fn select_victim<'a>(
    requester: Requester<'_>,
    candidates: impl IntoIterator<Item = Candidate<'a>>,
) -> Option<(RequestId, PreemptionReason)> {
    candidates
        .into_iter()
        .filter(|c| c.tile_provider_id != requester.tile_provider_id)
        .filter_map(|c| reason(&requester, c.provider).map(|reason| (c, reason)))
        .max_by_key(|(c, _)| (c.provider.hidden, c.provider.active, c.started))
        .map(|(c, reason)| (c.request_id.clone(), reason))
}

fn reason(requester: &Requester<'_>, victim: ProviderLoad) -> Option<PreemptionReason> {
    let own = requester.provider;
    if victim.hidden && !own.hidden {
        Some(PreemptionReason::HiddenProvider)
    } else if requester.yielding || (own.hidden && !victim.hidden) {
        None
    } else if victim.active > own.active {
        Some(PreemptionReason::LoadBalance)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VISIBLE_IDLE: ProviderLoad = ProviderLoad {
        hidden: false,
        active: 0,
    };

    const HIDDEN_IDLE: ProviderLoad = ProviderLoad {
        hidden: true,
        active: 0,
    };

    struct Fixture {
        providers: Vec<TileProviderId>,
        requests: Vec<RequestId>,
    }

    impl Fixture {
        fn new(n: usize) -> Self {
            Self {
                providers: (0..n).map(|i| TileProviderId::new(format!("p{}", i))).collect(),
                requests: (0..n).map(|i| RequestId::new(format!("r{}", i))).collect(),
            }
        }

        fn candidate(&self, i: usize, hidden: bool, active: usize, started: u64) -> Candidate<'_> {
            Candidate {
                request_id: &self.requests[i],
                tile_provider_id: &self.providers[i],
                provider: ProviderLoad { hidden, active },
                started,
            }
        }

        fn requester(&self, i: usize, provider: ProviderLoad) -> Requester<'_> {
            Requester {
                tile_provider_id: &self.providers[i],
                provider,
                yielding: false,
            }
        }
    }

    #[test]
    fn test_hidden_requester_balances_against_busier_hidden() {
        let f = Fixture::new(2);
        let victim = select_victim(f.requester(1, HIDDEN_IDLE), vec![f.candidate(0, true, 2, 0)]);
        assert_eq!(
            victim,
            Some((f.requests[0].clone(), PreemptionReason::LoadBalance))
        );
    }

    #[test]
    fn test_hidden_requester_never_preempts_visible() {
        let f = Fixture::new(2);
        let victim = select_victim(f.requester(1, HIDDEN_IDLE), vec![f.candidate(0, false, 3, 0)]);
        assert_eq!(victim, None);
    }

    #[test]
    fn test_hidden_requester_needs_strictly_busier_victim() {
        let f = Fixture::new(2);
        let requester = ProviderLoad {
            hidden: true,
            active: 1,
        };
        let victim = select_victim(f.requester(1, requester), vec![f.candidate(0, true, 1, 0)]);
        assert_eq!(victim, None);
    }

    #[test]
    fn test_visible_preempts_hidden() {
        let f = Fixture::new(2);
        let victim = select_victim(f.requester(1, VISIBLE_IDLE), vec![f.candidate(0, true, 1, 0)]);
        assert_eq!(
            victim,
            Some((f.requests[0].clone(), PreemptionReason::HiddenProvider))
        );
    }

    #[test]
    fn test_yielding_request_only_preempts_hidden() {
        let f = Fixture::new(3);
        let requester = Requester {
            yielding: true,
            ..f.requester(2, VISIBLE_IDLE)
        };

        let victim = select_victim(requester, vec![f.candidate(0, false, 2, 0)]);
        assert_eq!(victim, None);

        let victim = select_victim(
            requester,
            vec![f.candidate(0, false, 2, 0), f.candidate(1, true, 1, 1)],
        );
        assert_eq!(
            victim,
            Some((f.requests[1].clone(), PreemptionReason::HiddenProvider))
        );
    }

    #[test]
    fn test_equal_load_is_not_preempted() {
        let f = Fixture::new(2);
        let requester = ProviderLoad {
            hidden: false,
            active: 1,
        };
        let victim = select_victim(f.requester(1, requester), vec![f.candidate(0, false, 1, 0)]);
        assert_eq!(victim, None);
    }

    #[test]
    fn test_own_requests_are_never_victims() {
        let f = Fixture::new(1);
        let victim = select_victim(f.requester(0, VISIBLE_IDLE), vec![f.candidate(0, true, 5, 0)]);
        assert_eq!(victim, None);
    }

    #[test]
    fn test_hidden_ranks_before_busier_visible() {
        let f = Fixture::new(3);
        let candidates = vec![f.candidate(0, false, 5, 10), f.candidate(1, true, 1, 0)];
        let victim = select_victim(f.requester(2, VISIBLE_IDLE), candidates);
        assert_eq!(
            victim,
            Some((f.requests[1].clone(), PreemptionReason::HiddenProvider))
        );
    }

    #[test]
    fn test_busiest_provider_then_latest_started() {
        let providers = [TileProviderId::new("busy"), TileProviderId::new("light")];
        let requests = [
            RequestId::new("busy-old"),
            RequestId::new("busy-new"),
            RequestId::new("light"),
        ];
        let busy = ProviderLoad {
            hidden: false,
            active: 2,
        };
        let light = ProviderLoad {
            hidden: false,
            active: 1,
        };
        let candidates = vec![
            Candidate {
                request_id: &requests[0],
                tile_provider_id: &providers[0],
                provider: busy,
                started: 1,
            },
            Candidate {
                request_id: &requests[1],
                tile_provider_id: &providers[0],
                provider: busy,
                started: 2,
            },
            Candidate {
                request_id: &requests[2],
                tile_provider_id: &providers[1],
                provider: light,
                started: 3,
            },
        ];

        let new = TileProviderId::new("new");
        let requester = Requester {
            tile_provider_id: &new,
            provider: VISIBLE_IDLE,
            yielding: false,
        };
        let victim = select_victim(requester, candidates);
        assert_eq!(
            victim,
            Some((RequestId::new("busy-new"), PreemptionReason::LoadBalance))
        );
    }
}
