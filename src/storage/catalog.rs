//! Persistent catalog store over the shared storage substrate.

use crate::error::Result;
use crate::types::{Song, SongId};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{LocalStorage, StorageConnection, StorageEvent};

/// Well-known storage key for the song collection.
pub const SONGS_KEY: &str = "musicLibrarySongs";

/// Outcome of a catalog write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The collection was persisted.
    Written,
    /// The collection was structurally identical to the persisted one; the
    /// write was skipped. Callers must also skip downstream notification,
    /// which is the guard against feedback loops when a transport re-delivers
    /// a change this store originated.
    Unchanged,
}

struct CatalogInner {
    conn: StorageConnection,
    key: String,
}

/// Durable holder of the song collection, scoped to a single well-known key.
///
/// Cheap to clone; clones share the same storage connection.
#[derive(Clone)]
pub struct CatalogStore {
    inner: Arc<CatalogInner>,
}

impl CatalogStore {
    /// Attach to the shared storage under the default key.
    pub fn attach(storage: &Arc<LocalStorage>) -> Self {
        Self::attach_with_key(storage, SONGS_KEY)
    }

    /// Attach to the shared storage under a custom key.
    pub fn attach_with_key(storage: &Arc<LocalStorage>, key: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(CatalogInner {
                conn: storage.connect(),
                key: key.into(),
            }),
        }
    }

    /// The storage key this store reads and writes.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Read the current collection.
    ///
    /// Returns an empty collection when nothing is persisted or when the
    /// persisted content fails to parse; a parse failure is logged and never
    /// surfaced to the caller.
    pub fn read(&self) -> Vec<Song> {
        let raw = match self.inner.conn.get_item(&self.inner.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(key = %self.inner.key, error = %e, "failed to read catalog, treating as empty");
                return Vec::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(songs) => songs,
            Err(e) => {
                warn!(key = %self.inner.key, error = %e, "corrupt persisted catalog, treating as empty");
                Vec::new()
            }
        }
    }

    /// Persist the given collection.
    ///
    /// Skips persistence entirely when the decoded persisted form is
    /// structurally equal to `songs`. Comparison is on the decoded
    /// collection rather than the serialized text, so key-order differences
    /// in structurally-equal data do not defeat the guard.
    pub fn write(&self, songs: &[Song]) -> Result<WriteOutcome> {
        if let Ok(Some(existing)) = self.inner.conn.get_item(&self.inner.key) {
            if let Ok(current) = serde_json::from_str::<Vec<Song>>(&existing) {
                if current == songs {
                    debug!(key = %self.inner.key, "catalog unchanged, skipping write");
                    return Ok(WriteOutcome::Unchanged);
                }
            }
        }

        let serialized = serde_json::to_string(songs)?;
        self.inner.conn.set_item(&self.inner.key, &serialized)?;
        debug!(key = %self.inner.key, count = songs.len(), "catalog persisted");
        Ok(WriteOutcome::Written)
    }

    /// Seed the default catalog when nothing usable is persisted.
    ///
    /// Seeds when the key is absent, when the persisted data parses to an
    /// empty collection, or when the persisted data is corrupt. Returns
    /// whether seeding happened.
    pub fn seed_if_empty(&self) -> Result<bool> {
        let needs_seed = match self.inner.conn.get_item(&self.inner.key)? {
            None => true,
            Some(raw) => match serde_json::from_str::<Vec<Song>>(&raw) {
                Ok(songs) => songs.is_empty(),
                Err(e) => {
                    warn!(key = %self.inner.key, error = %e, "corrupt persisted catalog, reseeding defaults");
                    true
                }
            },
        };

        if needs_seed {
            let defaults = default_catalog();
            let serialized = serde_json::to_string(&defaults)?;
            self.inner.conn.set_item(&self.inner.key, &serialized)?;
            debug!(count = defaults.len(), "seeded default catalog");
        }

        Ok(needs_seed)
    }

    /// Remove the persisted collection.
    pub fn clear(&self) -> Result<()> {
        self.inner.conn.remove_item(&self.inner.key)
    }

    /// Take the storage change-event receiver for this store's connection.
    pub fn take_events(&self) -> Option<Receiver<StorageEvent>> {
        self.inner.conn.take_events()
    }
}

fn song(
    id: u64,
    title: &str,
    artist: &str,
    album: &str,
    duration: &str,
    year: i32,
    genre: &str,
) -> Song {
    Song {
        id: SongId(id),
        title: title.to_string(),
        artist: artist.to_string(),
        album: Some(album.to_string()),
        duration: Some(duration.to_string()),
        year: Some(year),
        genre: Some(genre.to_string()),
    }
}

/// The fixed default catalog used to seed a fresh store.
pub fn default_catalog() -> Vec<Song> {
    vec![
        song(1, "Bohemian Rhapsody", "Queen", "A Night at the Opera", "5:55", 1975, "Rock"),
        song(2, "Hotel California", "Eagles", "Hotel California", "6:30", 1976, "Rock"),
        song(3, "Imagine", "John Lennon", "Imagine", "3:07", 1971, "Pop"),
        song(4, "Billie Jean", "Michael Jackson", "Thriller", "4:54", 1982, "Pop"),
        song(5, "Stairway to Heaven", "Led Zeppelin", "Led Zeppelin IV", "8:02", 1971, "Rock"),
        song(6, "Sweet Child O' Mine", "Guns N' Roses", "Appetite for Destruction", "5:03", 1987, "Rock"),
        song(7, "Smells Like Teen Spirit", "Nirvana", "Nevermind", "5:01", 1991, "Grunge"),
        song(8, "Like a Rolling Stone", "Bob Dylan", "Highway 61 Revisited", "6:13", 1965, "Folk Rock"),
        song(9, "Purple Haze", "Jimi Hendrix", "Are You Experienced", "2:50", 1967, "Rock"),
        song(10, "What's Going On", "Marvin Gaye", "What's Going On", "3:53", 1971, "Soul"),
        song(11, "Thriller", "Michael Jackson", "Thriller", "5:57", 1982, "Pop"),
        song(12, "Comfortably Numb", "Pink Floyd", "The Wall", "6:23", 1979, "Progressive Rock"),
        song(13, "Yesterday", "The Beatles", "Help!", "2:05", 1965, "Pop"),
        song(14, "Good Vibrations", "The Beach Boys", "Smiley Smile", "3:39", 1966, "Pop"),
        song(15, "Respect", "Aretha Franklin", "I Never Loved a Man the Way I Love You", "2:28", 1967, "Soul"),
    ]
}
