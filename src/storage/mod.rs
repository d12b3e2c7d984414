//! Shared key/value storage substrate.
//!
//! `LocalStorage` is a directory-backed key/value store shared by every
//! context that synchronizes on the same catalog. Each context attaches via
//! [`LocalStorage::connect`], which hands out a [`StorageConnection`] with a
//! change-event stream. Writes notify every *other* connection; the writer
//! never receives its own event. Same-tab consumers are covered by the change
//! bus instead, which is why the service publishes locally after every write.

mod catalog;

pub use catalog::{default_catalog, CatalogStore, WriteOutcome, SONGS_KEY};

use crate::error::{Result, SyncError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier for an attached connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(pub u64);

impl fmt::Debug for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WatcherId({})", self.0)
    }
}

/// A change notification for a single key.
///
/// `new_value` is `None` when the key was removed.
#[derive(Clone, Debug)]
pub struct StorageEvent {
    pub key: String,
    pub new_value: Option<String>,
}

/// Directory-backed key/value store with cross-connection change events.
pub struct LocalStorage {
    root: PathBuf,
    watchers: RwLock<HashMap<WatcherId, Sender<StorageEvent>>>,
    next_watcher: AtomicU64,
}

impl LocalStorage {
    /// Open (creating if necessary) a storage directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        Ok(Self {
            root,
            watchers: RwLock::new(HashMap::new()),
            next_watcher: AtomicU64::new(1),
        })
    }

    /// Attach a new connection with its own change-event stream.
    pub fn connect(self: &Arc<Self>) -> StorageConnection {
        let id = WatcherId(self.next_watcher.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = unbounded();
        self.watchers.write().insert(id, sender);

        StorageConnection {
            id,
            storage: Arc::clone(self),
            events: Mutex::new(Some(receiver)),
        }
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\', '\0']) {
            return Err(SyncError::InvalidInput(format!("invalid storage key: {key:?}")));
        }
        Ok(self.root.join(key))
    }

    fn read_key(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.key_path(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_key(&self, key: &str, value: &str, source: WatcherId) -> Result<()> {
        fs::write(self.key_path(key)?, value)?;
        self.notify(key, Some(value.to_string()), source);
        Ok(())
    }

    fn remove_key(&self, key: &str, source: WatcherId) -> Result<()> {
        match fs::remove_file(self.key_path(key)?) {
            Ok(()) => {
                self.notify(key, None, source);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Deliver a change event to every connection except the writer.
    fn notify(&self, key: &str, new_value: Option<String>, source: WatcherId) {
        let watchers = self.watchers.read();
        for (id, sender) in watchers.iter() {
            if *id == source {
                continue;
            }
            let _ = sender.send(StorageEvent {
                key: key.to_string(),
                new_value: new_value.clone(),
            });
        }
    }

    fn detach(&self, id: WatcherId) {
        self.watchers.write().remove(&id);
    }

    /// Number of attached connections.
    pub fn connection_count(&self) -> usize {
        self.watchers.read().len()
    }
}

/// One context's attachment to the shared storage.
pub struct StorageConnection {
    id: WatcherId,
    storage: Arc<LocalStorage>,
    events: Mutex<Option<Receiver<StorageEvent>>>,
}

impl StorageConnection {
    /// Read the value stored under `key`, or `None`.
    pub fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.storage.read_key(key)
    }

    /// Write `value` under `key` and notify all other connections.
    pub fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.storage.write_key(key, value, self.id)
    }

    /// Remove `key` and notify all other connections. No-op if absent.
    pub fn remove_item(&self, key: &str) -> Result<()> {
        self.storage.remove_key(key, self.id)
    }

    /// Take the change-event receiver. Can only be taken once; subsequent
    /// calls return `None`.
    pub fn take_events(&self) -> Option<Receiver<StorageEvent>> {
        self.events.lock().take()
    }

    pub fn watcher_id(&self) -> WatcherId {
        self.id
    }
}

impl Drop for StorageConnection {
    fn drop(&mut self) {
        self.storage.detach(self.id);
    }
}
