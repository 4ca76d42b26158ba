//! Replay-of-one response channel.
//!
//! Each tile request owns one response channel. The scheduler settles it exactly
//! once with the fetch outcome, or finalizes it without a value when the request
//! is released. Any number of [`TileResponse`] subscribers may wait on it, and a
//! subscriber that arrives after settlement still observes the final state.
//!
//! Built on `tokio::sync::watch`, which retains the last value for late
//! receivers.

use tokio::sync::watch;

use crate::error::FetchError;
use crate::request::Tile;

/// Outcome of a tile fetch.
pub type TileOutcome = Result<Tile, FetchError>;

/// Lifecycle of a response channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseState {
    /// No outcome yet. The request is queued or executing.
    Pending,
    /// The fetch completed or failed.
    Settled(TileOutcome),
    /// The request was released before it settled. No value will follow.
    Released,
}

impl ResponseState {
    /// Returns true once the channel will not change anymore.
    pub fn is_final(&self) -> bool {
        !matches!(self, ResponseState::Pending)
    }
}

/// Creates a response channel.
pub fn response_channel() -> (ResponseSender, TileResponse) {
    let (tx, rx) = watch::channel(ResponseState::Pending);
    (ResponseSender { tx }, TileResponse { rx })
}

/// Writing side of a response channel. Owned by the scheduler.
#[derive(Debug)]
pub struct ResponseSender {
    tx: watch::Sender<ResponseState>,
}

impl ResponseSender {
    /// Delivers the fetch outcome.
    ///
    /// Returns false if the channel was already finalized, in which case the
    /// outcome is dropped.
    pub fn settle(&self, outcome: TileOutcome) -> bool {
        self.finalize(ResponseState::Settled(outcome))
    }

    /// Finalizes the channel without a value.
    ///
    /// Returns false if the channel was already finalized.
    pub fn release(&self) -> bool {
        self.finalize(ResponseState::Released)
    }

    /// Creates another subscriber.
    pub fn subscribe(&self) -> TileResponse {
        TileResponse {
            rx: self.tx.subscribe(),
        }
    }

    fn finalize(&self, state: ResponseState) -> bool {
        // Works without live receivers; the value is retained for late subscribers.
        self.tx.send_if_modified(|current| {
            if current.is_final() {
                false
            } else {
                *current = state;
                true
            }
        })
    }
}

/// Reading side of a response channel.
///
/// Cloning yields an independent subscriber of the same channel.
#[derive(Debug, Clone)]
pub struct TileResponse {
    rx: watch::Receiver<ResponseState>,
}

impl TileResponse {
    /// Waits for the outcome.
    ///
    /// Returns `None` if the request was released, or if the scheduler dropped
    /// the channel without settling it.
    pub async fn wait(&mut self) -> Option<TileOutcome> {
        match self.rx.wait_for(ResponseState::is_final).await {
            Ok(state) => match &*state {
                ResponseState::Settled(outcome) => Some(outcome.clone()),
                _ => None,
            },
            Err(_) => None,
        }
    }

    /// Returns a snapshot of the current state.
    pub fn state(&self) -> ResponseState {
        self.rx.borrow().clone()
    }
}
