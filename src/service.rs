//! The sync service façade: the only object consumers talk to.

use crate::bus::{ChangeBus, SubscriptionId};
use crate::error::{Result, SyncError};
use crate::storage::{CatalogStore, WriteOutcome};
use crate::transport::{Transport, TransportStatus};
use crate::types::{next_song_id, CatalogStats, Song, SongId, SongInput, Timestamp};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default spacing of the periodic reconciliation pass.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_millis(1000);

/// Service configuration.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// How often the service re-reads shared storage while visible. Bounds
    /// the staleness window when a live event is missed.
    pub reconcile_interval: Duration,

    /// Whether the owning context starts in the foreground. While not
    /// visible, periodic reconciliation is paused.
    pub start_visible: bool,

    /// Whether the periodic tick also re-requests the peer's collection.
    ///
    /// Off by default: when two symmetric peers both poll, a stale peer
    /// snapshot can overwrite a fresh local mutation whose push is still in
    /// flight. Enable it on the side that treats its peer as authoritative
    /// (an embedded context polling its host), where it self-heals a missed
    /// push within one interval.
    pub pull_peer_on_tick: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            start_visible: true,
            pull_peer_on_tick: false,
        }
    }
}

/// Lifecycle state of a service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Initializing,
    Ready,
    Stopped,
}

struct ServiceInner {
    config: SyncConfig,
    store: CatalogStore,
    bus: ChangeBus,
    transport: Option<Arc<dyn Transport>>,
    state: RwLock<ServiceState>,
    visible: AtomicBool,
    /// Last collection handed to subscribers; bounds republish chatter.
    last_published: Mutex<Vec<Song>>,
    /// When the last reconciliation pass finished.
    last_reconciled_at: Mutex<Option<Timestamp>>,
}

impl ServiceInner {
    fn publish(&self, songs: Vec<Song>) {
        self.bus.publish(&songs);
        *self.last_published.lock() = songs;
    }

    fn publish_if_changed(&self, songs: Vec<Song>) {
        let changed = *self.last_published.lock() != songs;
        if changed {
            self.publish(songs);
        }
    }

    /// Converge on a collection delivered by another context: persist it
    /// (the no-op guard keeps re-delivered own writes quiet on disk), then
    /// let local subscribers know.
    fn apply_remote(&self, songs: Vec<Song>) {
        if let Err(e) = self.store.write(&songs) {
            warn!(error = %e, "failed to persist remotely delivered catalog");
        }
        self.publish_if_changed(songs);
    }

    /// One reconciliation pass: re-read shared storage and, when asked,
    /// re-request the peer's collection.
    ///
    /// Peer pulls happen at sync points (start, regaining visibility) and,
    /// when [`SyncConfig::pull_peer_on_tick`] is set, on every periodic
    /// tick.
    fn reconcile(&self, pull_peer: bool) {
        let songs = self.store.read();
        self.publish_if_changed(songs);

        if pull_peer {
            if let Some(transport) = &self.transport {
                match transport.request_snapshot() {
                    Ok(Some(peer_songs)) => self.apply_remote(peer_songs),
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, "peer snapshot failed during reconciliation"),
                }
            }
        }

        *self.last_reconciled_at.lock() = Some(Timestamp::now());
    }
}

/// Unified entry point over the record store, the change bus, and an
/// optional cross-context transport.
///
/// Constructed explicitly and passed by reference to whoever owns the
/// consuming code; lifecycle is `new → start → stop` (stop also runs on
/// drop). Mutations persist locally, publish to local subscribers, and
/// propagate to peers best-effort; cross-context propagation is eventually
/// consistent, last-writer-wins, with staleness bounded by the
/// reconciliation interval.
pub struct SyncService {
    inner: Arc<ServiceInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    kick_tx: Sender<()>,
    kick_rx: Receiver<()>,
}

impl SyncService {
    /// Create a service over a catalog store and an optional transport.
    pub fn new(
        config: SyncConfig,
        store: CatalogStore,
        transport: Option<Arc<dyn Transport>>,
    ) -> Self {
        let (stop_tx, stop_rx) = bounded(1);
        let (kick_tx, kick_rx) = bounded(1);
        let visible = config.start_visible;

        Self {
            inner: Arc::new(ServiceInner {
                config,
                store,
                bus: ChangeBus::new(),
                transport,
                state: RwLock::new(ServiceState::Uninitialized),
                visible: AtomicBool::new(visible),
                last_published: Mutex::new(Vec::new()),
                last_reconciled_at: Mutex::new(None),
            }),
            worker: Mutex::new(None),
            stop_tx,
            stop_rx,
            kick_tx,
            kick_rx,
        }
    }

    /// Initialize: seed the store if needed, register inbound channels,
    /// request the current authoritative collection from any peer, and spawn
    /// the reconciliation worker. Idempotent while running.
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write();
            match *state {
                ServiceState::Ready | ServiceState::Initializing => return Ok(()),
                ServiceState::Stopped => {
                    return Err(SyncError::InvalidState("service is stopped".into()))
                }
                ServiceState::Uninitialized => *state = ServiceState::Initializing,
            }
        }

        if self.inner.store.seed_if_empty()? {
            info!("seeded default catalog on first use");
        }
        *self.inner.last_published.lock() = self.inner.store.read();

        if let Some(transport) = &self.inner.transport {
            let weak: Weak<ServiceInner> = Arc::downgrade(&self.inner);
            let prepersisted = transport.delivery_is_persisted();
            transport.start(Arc::new(move |songs| {
                if let Some(inner) = weak.upgrade() {
                    if prepersisted {
                        inner.publish_if_changed(songs);
                    } else {
                        inner.apply_remote(songs);
                    }
                }
            }))?;

            match transport.request_snapshot() {
                Ok(Some(songs)) => self.inner.apply_remote(songs),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "initial peer snapshot failed, using local data"),
            }
        }

        let inner = Arc::clone(&self.inner);
        let stop_rx = self.stop_rx.clone();
        let kick_rx = self.kick_rx.clone();
        let ticker = tick(self.inner.config.reconcile_interval);
        let handle = thread::spawn(move || loop {
            select! {
                recv(stop_rx) -> _ => break,
                recv(kick_rx) -> msg => {
                    if msg.is_err() {
                        break;
                    }
                    inner.reconcile(true);
                }
                recv(ticker) -> msg => {
                    if msg.is_err() {
                        break;
                    }
                    if inner.visible.load(Ordering::SeqCst) {
                        inner.reconcile(inner.config.pull_peer_on_tick);
                    }
                }
            }
        });
        *self.worker.lock() = Some(handle);

        *self.inner.state.write() = ServiceState::Ready;
        debug!("sync service ready");
        Ok(())
    }

    /// Stop the worker and the transport. Idempotent.
    pub fn stop(&self) {
        if let Some(handle) = self.worker.lock().take() {
            let _ = self.stop_tx.try_send(());
            let _ = handle.join();
        }
        if let Some(transport) = &self.inner.transport {
            transport.shutdown();
        }
        *self.inner.state.write() = ServiceState::Stopped;
    }

    // --- Read Operations ---

    /// The current collection. Never fails; empty on any failure.
    pub fn get_data(&self) -> Vec<Song> {
        self.inner.store.read()
    }

    pub fn get_song_by_id(&self, id: SongId) -> Option<Song> {
        self.get_data().into_iter().find(|s| s.id == id)
    }

    /// Distinct-value counts, recomputed from current data.
    pub fn get_stats(&self) -> CatalogStats {
        CatalogStats::compute(&self.get_data())
    }

    // --- Mutations ---

    /// Persist `songs` and propagate. Idempotent: writing a structurally
    /// identical collection persists nothing and publishes nothing.
    pub fn set_data(&self, songs: &[Song]) -> Vec<Song> {
        match self.inner.store.write(songs) {
            Ok(WriteOutcome::Written) => {
                self.inner.publish(songs.to_vec());
                self.push_to_peer(songs.to_vec());
                songs.to_vec()
            }
            Ok(WriteOutcome::Unchanged) => songs.to_vec(),
            Err(e) => {
                warn!(error = %e, "failed to persist catalog");
                Vec::new()
            }
        }
    }

    /// Append a new song. The id is assigned as `max(existing, 0) + 1` and
    /// the free-form year is coerced to an integer or dropped.
    pub fn add_song(&self, input: SongInput) -> Result<Song> {
        input.validate()?;

        let mut songs = self.get_data();
        let song = input.into_song(next_song_id(&songs));
        songs.push(song.clone());
        self.set_data(&songs);
        Ok(song)
    }

    /// Replace the song with the matching id. Returns `None` (and mutates
    /// nothing) when no song has that id.
    pub fn update_song(&self, id: SongId, input: SongInput) -> Option<Song> {
        let mut songs = self.get_data();
        let position = songs.iter().position(|s| s.id == id)?;

        let replacement = input.into_song(id);
        songs[position] = replacement.clone();
        self.set_data(&songs);
        Some(replacement)
    }

    /// Remove the song with the matching id. No-op if absent. Returns the
    /// updated collection.
    pub fn delete_song(&self, id: SongId) -> Vec<Song> {
        let mut songs = self.get_data();
        let before = songs.len();
        songs.retain(|s| s.id != id);
        if songs.len() != before {
            self.set_data(&songs);
        }
        songs
    }

    /// Remove the persisted collection and tell subscribers it is gone.
    pub fn clear_data(&self) {
        if let Err(e) = self.inner.store.clear() {
            warn!(error = %e, "failed to clear catalog");
        }
        self.inner.publish(Vec::new());
    }

    // --- Subscriptions ---

    /// Register a listener for collection changes, locally-originated and
    /// remotely-propagated alike.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&[Song]) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.bus.unsubscribe(id);
    }

    // --- Reconciliation ---

    /// Force a storage read and unconditional republish. Manual recovery
    /// action for consumers that suspect they missed an event.
    pub fn sync_from_storage(&self) -> Vec<Song> {
        let songs = self.inner.store.read();
        debug!(count = songs.len(), "manual sync from storage");
        self.inner.publish(songs.clone());
        songs
    }

    /// Report whether the owning context is in the foreground. Becoming
    /// visible forces an immediate reconciliation pass instead of waiting
    /// for the next periodic tick.
    pub fn set_visible(&self, visible: bool) {
        let was_visible = self.inner.visible.swap(visible, Ordering::SeqCst);
        if visible && !was_visible {
            let _ = self.kick_tx.try_send(());
        }
    }

    // --- Observability ---

    pub fn state(&self) -> ServiceState {
        *self.inner.state.read()
    }

    /// When the last reconciliation pass finished, if any.
    pub fn last_reconciled_at(&self) -> Option<Timestamp> {
        *self.inner.last_reconciled_at.lock()
    }

    pub fn transport_status(&self) -> Option<TransportStatus> {
        self.inner.transport.as_ref().map(|t| t.status())
    }

    /// Best-effort peer push on a detached thread; the mutation path never
    /// waits on the peer. Failures are logged, and the periodic
    /// reconciliation pass is the backstop.
    fn push_to_peer(&self, songs: Vec<Song>) {
        if let Some(transport) = self.inner.transport.clone() {
            thread::spawn(move || {
                if let Err(e) = transport.push_update(&songs) {
                    debug!(error = %e, "peer push failed, peer will catch up on its next pull");
                }
            });
        }
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        self.stop();
    }
}
