//! Core types for the song catalog.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a song, assigned by the store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SongId(pub u64);

impl fmt::Debug for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SongId({})", self.0)
    }
}

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_millis() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A single song record in the catalog.
///
/// `id` is unique within the collection and stable for the lifetime of the
/// record. The next id is derived from the current maximum, so after deleting
/// the highest-id song the freed id can be reissued to an unrelated record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    /// Unique identifier (assigned by the store).
    pub id: SongId,

    /// Song title (required, non-empty).
    pub title: String,

    /// Artist name (required, non-empty).
    pub artist: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,

    /// Free-form "M:SS" duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    /// Release year; `None` when absent or unparsable.
    #[serde(default)]
    pub year: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
}

/// Input for creating or replacing a song (before an id is assigned).
///
/// `year` arrives as free-form text (e.g. from a form field) and is coerced
/// to an integer, or `None` when it does not parse.
#[derive(Clone, Debug, Default)]
pub struct SongInput {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
}

impl SongInput {
    /// Create a new song input with the required fields.
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            ..Default::default()
        }
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = Some(duration.into());
        self
    }

    pub fn with_year(mut self, year: impl Into<String>) -> Self {
        self.year = Some(year.into());
        self
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    /// Check the required fields. Title and artist must be non-empty.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.title.trim().is_empty() {
            return Err(crate::error::SyncError::InvalidInput(
                "title is required".into(),
            ));
        }
        if self.artist.trim().is_empty() {
            return Err(crate::error::SyncError::InvalidInput(
                "artist is required".into(),
            ));
        }
        Ok(())
    }

    /// Coerce the free-form year to an integer, or `None` if unparsable.
    pub fn coerced_year(&self) -> Option<i32> {
        self.year
            .as_deref()
            .and_then(|y| y.trim().parse::<i32>().ok())
    }

    /// Finalize into a `Song` with the given id.
    pub fn into_song(self, id: SongId) -> Song {
        let year = self.coerced_year();
        Song {
            id,
            title: self.title,
            artist: self.artist,
            album: self.album,
            duration: self.duration,
            year,
            genre: self.genre,
        }
    }
}

/// Catalog statistics, recomputed from current data (never cached).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub total_songs: usize,
    pub artists: usize,
    pub albums: usize,
    pub genres: usize,
}

impl CatalogStats {
    /// Count distinct non-empty artist/album/genre values.
    pub fn compute(songs: &[Song]) -> Self {
        fn distinct<'a>(values: impl Iterator<Item = Option<&'a str>>) -> usize {
            values
                .flatten()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .collect::<HashSet<_>>()
                .len()
        }

        Self {
            total_songs: songs.len(),
            artists: distinct(songs.iter().map(|s| Some(s.artist.as_str()))),
            albums: distinct(songs.iter().map(|s| s.album.as_deref())),
            genres: distinct(songs.iter().map(|s| s.genre.as_deref())),
        }
    }
}

/// Next id for a collection: `max(existing ids, 0) + 1`.
///
/// Deliberately max-based rather than monotonic; see the crate docs for the
/// id-reuse consequence after deleting the highest-id record.
pub fn next_song_id(songs: &[Song]) -> SongId {
    SongId(songs.iter().map(|s| s.id.0).max().unwrap_or(0) + 1)
}
