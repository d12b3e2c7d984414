//! Same-origin transport over storage change events.

use crate::error::Result;
use crate::storage::StorageEvent;
use crate::types::Song;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

use super::{RemoteUpdateFn, Transport, TransportStatus};

/// Propagates catalog changes between contexts attached to the same shared
/// storage.
///
/// The substrate already fans writes out to every other connection, so this
/// transport only listens: it filters the connection's event stream by the
/// catalog key and delivers each new serialized collection as a remote
/// update. Pushing is a no-op (the store write itself is the propagation)
/// and there is no separate peer to snapshot from.
pub struct StorageEventTransport {
    key: String,
    events: Mutex<Option<Receiver<StorageEvent>>>,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
    status: RwLock<TransportStatus>,
}

impl StorageEventTransport {
    /// Build over a connection's change-event stream, filtering by `key`.
    pub fn new(events: Receiver<StorageEvent>, key: impl Into<String>) -> Self {
        let (stop_tx, stop_rx) = bounded(1);
        Self {
            key: key.into(),
            events: Mutex::new(Some(events)),
            stop_tx,
            stop_rx,
            handle: Mutex::new(None),
            status: RwLock::new(TransportStatus::Connecting),
        }
    }
}

impl Transport for StorageEventTransport {
    fn start(&self, on_remote: RemoteUpdateFn) -> Result<()> {
        let events = match self.events.lock().take() {
            Some(events) => events,
            None => return Ok(()),
        };

        let key = self.key.clone();
        let stop_rx = self.stop_rx.clone();
        let handle = thread::spawn(move || loop {
            select! {
                recv(stop_rx) -> _ => break,
                recv(events) -> event => {
                    let event = match event {
                        Ok(event) => event,
                        Err(_) => break,
                    };
                    if event.key != key {
                        continue;
                    }
                    let raw = match event.new_value {
                        Some(raw) => raw,
                        // Key removed; an empty collection is the new truth.
                        None => {
                            debug!(key = %key, "catalog key removed by another context");
                            on_remote(Vec::new());
                            continue;
                        }
                    };
                    match serde_json::from_str::<Vec<Song>>(&raw) {
                        Ok(songs) => {
                            debug!(key = %key, count = songs.len(), "storage event received");
                            on_remote(songs);
                        }
                        Err(e) => {
                            warn!(key = %key, error = %e, "ignoring unparsable storage event");
                        }
                    }
                }
            }
        });

        *self.handle.lock() = Some(handle);
        *self.status.write() = TransportStatus::Connected;
        Ok(())
    }

    fn request_snapshot(&self) -> Result<Option<Vec<Song>>> {
        // The shared substrate is authoritative; reconciliation re-reads it.
        Ok(None)
    }

    fn push_update(&self, _songs: &[Song]) -> Result<()> {
        // The store write already fanned out via storage events.
        Ok(())
    }

    fn delivery_is_persisted(&self) -> bool {
        // An event is the write; the receiver must not write it back.
        true
    }

    fn status(&self) -> TransportStatus {
        *self.status.read()
    }

    fn shutdown(&self) {
        *self.status.write() = TransportStatus::Closed;
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StorageEventTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
