//! # Catalog Sync
//!
//! A cross-context synchronization service for a shared song catalog: any
//! number of independent contexts (processes, windows, embedded frames)
//! converge on one mutable, ordered collection with no server and no
//! coordinator.
//!
//! ## Core Concepts
//!
//! - **Catalog store**: the persisted collection under one well-known key
//!   on a shared [`storage::LocalStorage`] substrate
//! - **Change bus**: synchronous in-process publish/subscribe for local
//!   observers
//! - **Transports**: pluggable cross-context propagation: storage events,
//!   a correlated request/response bridge, or a broadcast channel
//! - **Service**: the façade unifying CRUD, subscriptions, and periodic
//!   reconciliation
//!
//! Convergence is eventually consistent and last-writer-wins: concurrent
//! writers race, the last persist wins, and the reconciliation interval
//! bounds how stale any context can stay.
//!
//! ## Example
//!
//! ```ignore
//! use catalog_sync::{CatalogStore, LocalStorage, SongInput, SyncConfig, SyncService};
//! use std::sync::Arc;
//!
//! let storage = Arc::new(LocalStorage::open("./shared")?);
//! let service = SyncService::new(
//!     SyncConfig::default(),
//!     CatalogStore::attach(&storage),
//!     None,
//! );
//! service.start()?;
//!
//! let song = service.add_song(
//!     SongInput::new("Respect", "Aretha Franklin").with_year("1967"),
//! )?;
//! println!("added #{}", song.id);
//! ```

pub mod auth;
pub mod bus;
pub mod error;
pub mod service;
pub mod storage;
pub mod transport;
pub mod types;

// Re-exports
pub use auth::{identity_from_token, is_admin, mint_token, AuthService, Identity, Role, Session};
pub use bus::{ChangeBus, SubscriptionId};
pub use error::{Result, SyncError};
pub use service::{ServiceState, SyncConfig, SyncService, DEFAULT_RECONCILE_INTERVAL};
pub use storage::{default_catalog, CatalogStore, LocalStorage, StorageEvent, WriteOutcome, SONGS_KEY};
pub use transport::{
    pair, BridgeConfig, BridgeEndpoint, BridgeTransport, BroadcastChannel, BroadcastHub,
    BroadcastTransport, StorageEventTransport, Transport, TransportStatus,
};
pub use types::{CatalogStats, Song, SongId, SongInput, Timestamp};
