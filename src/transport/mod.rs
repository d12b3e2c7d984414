//! Cross-context transports.
//!
//! A transport makes a catalog change visible to every other context sharing
//! the same collection. Three interchangeable strategies exist behind the
//! [`Transport`] trait; the hosting environment picks one at construction
//! time:
//!
//! - [`StorageEventTransport`]: same-origin contexts sharing one
//!   [`LocalStorage`](crate::storage::LocalStorage); propagation rides the
//!   substrate's change events.
//! - [`BridgeTransport`]: cross-origin contexts exchanging correlated
//!   request/response frames over a hidden bridge.
//! - [`BroadcastTransport`]: members of a named broadcast channel exchanging
//!   uncorrelated `{type, payload}` messages.
//!
//! Every inbound delivery converges on the same effect, wired by the façade:
//! update the record store, then publish on the change bus.

mod bridge;
mod broadcast;
pub mod protocol;
mod storage_events;

pub use bridge::{pair, BridgeConfig, BridgeEndpoint, BridgeTransport};
pub use broadcast::{BroadcastChannel, BroadcastHub, BroadcastTransport};
pub use storage_events::StorageEventTransport;

use crate::error::Result;
use crate::types::Song;
use std::sync::Arc;

/// Callback invoked with a collection delivered by a remote peer.
pub type RemoteUpdateFn = Arc<dyn Fn(Vec<Song>) + Send + Sync>;

/// Source of the local authoritative collection, used when answering a
/// peer's snapshot request.
pub type SnapshotFn = Arc<dyn Fn() -> Vec<Song> + Send + Sync>;

/// Connection state of a transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportStatus {
    /// Inbound channels registered, peer not yet confirmed.
    Connecting,
    /// Peer confirmed (or no confirmation needed for this strategy).
    Connected,
    /// Shut down; no further propagation.
    Closed,
}

/// A pluggable cross-context propagation strategy.
pub trait Transport: Send + Sync {
    /// Register inbound channels and begin delivering remote updates to
    /// `on_remote`.
    fn start(&self, on_remote: RemoteUpdateFn) -> Result<()>;

    /// Pull the peer's authoritative collection.
    ///
    /// Returns `Ok(None)` when the strategy has no peer to ask (or the peer
    /// has not announced itself yet); errors mean the peer was asked and did
    /// not answer in time. Callers treat any failure as "peer unreachable"
    /// and fall back to local data.
    fn request_snapshot(&self) -> Result<Option<Vec<Song>>>;

    /// Best-effort push of a local change to the peer.
    fn push_update(&self, songs: &[Song]) -> Result<()>;

    /// Whether a delivered collection is already persisted in the shared
    /// store when it arrives.
    ///
    /// True for strategies where the delivery *is* the persisted write (the
    /// storage-event stream); the receiver must then publish without writing
    /// back, or a stale delivery could overwrite a newer persisted value.
    fn delivery_is_persisted(&self) -> bool {
        false
    }

    fn status(&self) -> TransportStatus;

    /// Stop delivering updates. Idempotent.
    fn shutdown(&self);
}
