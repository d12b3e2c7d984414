//! Performance benchmarks for the catalog store and change bus.

use catalog_sync::{CatalogStore, ChangeBus, LocalStorage, Song, SongId, SongInput};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tempfile::TempDir;

fn catalog(size: u64) -> Vec<Song> {
    (1..=size)
        .map(|i| {
            SongInput::new(format!("Song {i}"), format!("Artist {}", i % 20))
                .with_album(format!("Album {}", i % 50))
                .with_year("1985")
                .into_song(SongId(i))
        })
        .collect()
}

fn store(dir: &TempDir) -> CatalogStore {
    let storage = Arc::new(LocalStorage::open(dir.path().join("storage")).unwrap());
    CatalogStore::attach(&storage)
}

/// Benchmark persisting catalogs of varying sizes
fn bench_catalog_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("catalog_write");

    for size in [15, 100, 1000, 10000] {
        group.bench_with_input(BenchmarkId::new("songs", size), &size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let store = store(&dir);
            let songs = catalog(size);
            let mut flip = false;

            b.iter(|| {
                // Alternate two collections so the no-op guard never skips
                // the write.
                let mut songs = songs.clone();
                flip = !flip;
                if flip {
                    songs[0].title = "flipped".into();
                }
                black_box(store.write(&songs).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark the no-op detection path on an unchanged catalog
fn bench_unchanged_write(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let songs = catalog(1000);
    store.write(&songs).unwrap();

    c.bench_function("unchanged_write_1000", |b| {
        b.iter(|| {
            black_box(store.write(&songs).unwrap());
        });
    });
}

/// Benchmark reading and deserializing a persisted catalog
fn bench_catalog_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("catalog_read");

    for size in [15, 1000, 10000] {
        group.bench_with_input(BenchmarkId::new("songs", size), &size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let store = store(&dir);
            store.write(&catalog(size)).unwrap();

            b.iter(|| {
                black_box(store.read());
            });
        });
    }

    group.finish();
}

/// Benchmark bus publish with varying subscriber counts
fn bench_bus_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("bus_publish");

    for listeners in [1, 10, 100] {
        group.bench_with_input(
            BenchmarkId::new("listeners", listeners),
            &listeners,
            |b, &count| {
                let bus = ChangeBus::new();
                for _ in 0..count {
                    bus.subscribe(|songs| {
                        black_box(songs.len());
                    });
                }
                let songs = catalog(100);

                b.iter(|| {
                    bus.publish(black_box(&songs));
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_catalog_write,
    bench_unchanged_write,
    bench_catalog_read,
    bench_bus_publish,
);

criterion_main!(benches);
