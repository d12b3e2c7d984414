//! Façade behavior: CRUD, id assignment, idempotent writes, seeding, stats.

use catalog_sync::{
    default_catalog, CatalogStats, CatalogStore, LocalStorage, ServiceState, SongId, SongInput,
    SyncConfig, SyncService, SyncError, SONGS_KEY,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn test_config() -> SyncConfig {
    SyncConfig {
        reconcile_interval: Duration::from_millis(50),
        ..SyncConfig::default()
    }
}

fn storage(dir: &TempDir) -> Arc<LocalStorage> {
    Arc::new(LocalStorage::open(dir.path().join("storage")).unwrap())
}

fn service(dir: &TempDir) -> SyncService {
    let storage = storage(dir);
    SyncService::new(test_config(), CatalogStore::attach(&storage), None)
}

fn three_songs() -> Vec<catalog_sync::Song> {
    vec![
        SongInput::new("One", "A").into_song(SongId(1)),
        SongInput::new("Two", "B").into_song(SongId(2)),
        SongInput::new("Three", "C").into_song(SongId(3)),
    ]
}

// --- Lifecycle ---

#[test]
fn test_start_seeds_default_catalog() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    assert_eq!(service.state(), ServiceState::Uninitialized);
    service.start().unwrap();
    assert_eq!(service.state(), ServiceState::Ready);

    assert_eq!(service.get_data(), default_catalog());
    service.stop();
    assert_eq!(service.state(), ServiceState::Stopped);
}

#[test]
fn test_start_is_idempotent_and_stop_is_final() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    service.start().unwrap();
    service.start().unwrap();
    service.stop();
    service.stop();

    assert!(matches!(service.start(), Err(SyncError::InvalidState(_))));
}

#[test]
fn test_corrupt_storage_recovers_to_defaults_on_start() {
    let dir = TempDir::new().unwrap();
    let shared = storage(&dir);
    shared.connect().set_item(SONGS_KEY, "{not valid json").unwrap();

    let service = SyncService::new(test_config(), CatalogStore::attach(&shared), None);
    service.start().unwrap();

    assert_eq!(service.get_data(), default_catalog());
    // The defaults were persisted, not just returned.
    let raw = shared.connect().get_item(SONGS_KEY).unwrap().unwrap();
    let persisted: Vec<catalog_sync::Song> = serde_json::from_str(&raw).unwrap();
    assert_eq!(persisted, default_catalog());
}

// --- Id Assignment ---

#[test]
fn test_first_song_in_empty_catalog_gets_id_one() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let song = service
        .add_song(SongInput::new("Respect", "Aretha Franklin"))
        .unwrap();
    assert_eq!(song.id, SongId(1));
}

#[test]
fn test_id_is_max_plus_one() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let mut songs = three_songs();
    songs[2].id = SongId(7);
    service.set_data(&songs);

    let song = service.add_song(SongInput::new("A", "B")).unwrap();
    assert_eq!(song.id, SongId(8));
}

#[test]
fn test_deleting_max_id_frees_it_for_reuse() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    service.set_data(&three_songs());
    service.delete_song(SongId(3));

    let song = service.add_song(SongInput::new("Replacement", "X")).unwrap();
    assert_eq!(song.id, SongId(3));
}

// --- Mutations ---

#[test]
fn test_add_song_coerces_year_and_appends() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let song = service
        .add_song(
            SongInput::new("Purple Haze", "Jimi Hendrix")
                .with_album("Are You Experienced")
                .with_year("1967"),
        )
        .unwrap();
    assert_eq!(song.year, Some(1967));

    let unparsable = service
        .add_song(SongInput::new("Untitled", "Unknown").with_year("someday"))
        .unwrap();
    assert_eq!(unparsable.year, None);

    let data = service.get_data();
    assert_eq!(data.last().unwrap().id, unparsable.id);
}

#[test]
fn test_add_song_rejects_missing_required_fields() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    assert!(matches!(
        service.add_song(SongInput::new("", "Queen")),
        Err(SyncError::InvalidInput(_))
    ));
    assert!(matches!(
        service.add_song(SongInput::new("Bohemian Rhapsody", "  ")),
        Err(SyncError::InvalidInput(_))
    ));
    assert!(service.get_data().is_empty());
}

#[test]
fn test_update_preserves_id_and_replaces_fields() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    service.set_data(&three_songs());

    let updated = service
        .update_song(SongId(2), SongInput::new("New", "Artist").with_year("1999"))
        .unwrap();
    assert_eq!(updated.id, SongId(2));
    assert_eq!(updated.title, "New");
    assert_eq!(updated.year, Some(1999));

    let fetched = service.get_song_by_id(SongId(2)).unwrap();
    assert_eq!(fetched, updated);
}

#[test]
fn test_update_unknown_id_is_noop() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    service.set_data(&three_songs());

    assert!(service
        .update_song(SongId(99), SongInput::new("Ghost", "Nobody"))
        .is_none());
    assert_eq!(service.get_data(), three_songs());
}

#[test]
fn test_delete_unknown_id_is_noop() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    service.set_data(&three_songs());

    let remaining = service.delete_song(SongId(99));
    assert_eq!(remaining, three_songs());
}

#[test]
fn test_clear_data_empties_catalog_and_notifies() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    service.set_data(&three_songs());

    let emptied = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&emptied);
    service.subscribe(move |songs| {
        if songs.is_empty() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    service.clear_data();
    assert!(service.get_data().is_empty());
    assert_eq!(emptied.load(Ordering::SeqCst), 1);
}

// --- Idempotent Writes ---

#[test]
fn test_identical_set_data_publishes_exactly_once() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    service.start().unwrap();

    let publishes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&publishes);
    service.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let songs = three_songs();
    service.set_data(&songs);
    service.set_data(&songs);

    // Let a few reconciliation ticks pass; unchanged data must stay quiet.
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(publishes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_sync_from_storage_republishes_unconditionally() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    service.set_data(&three_songs());

    let publishes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&publishes);
    service.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(service.sync_from_storage(), three_songs());
    assert_eq!(service.sync_from_storage(), three_songs());
    assert_eq!(publishes.load(Ordering::SeqCst), 2);
}

// --- Stats ---

#[test]
fn test_stats_for_default_catalog() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    service.start().unwrap();

    let stats = service.get_stats();
    assert_eq!(
        stats,
        CatalogStats {
            total_songs: 15,
            // Michael Jackson and the Thriller album each appear twice.
            artists: 14,
            albums: 14,
            genres: 6,
        }
    );
}

#[test]
fn test_stats_recomputed_after_mutation() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    service.start().unwrap();

    service
        .add_song(SongInput::new("New Genre Song", "Brand New Artist").with_genre("Ska"))
        .unwrap();

    let stats = service.get_stats();
    assert_eq!(stats.total_songs, 16);
    assert_eq!(stats.artists, 15);
    assert_eq!(stats.genres, 7);
}

// --- Observability ---

#[test]
fn test_last_reconciled_at_advances() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    service.start().unwrap();

    assert!(service.transport_status().is_none());

    std::thread::sleep(Duration::from_millis(150));
    let first = service.last_reconciled_at().expect("no reconcile pass ran");
    std::thread::sleep(Duration::from_millis(150));
    let second = service.last_reconciled_at().unwrap();
    assert!(second >= first);
}
