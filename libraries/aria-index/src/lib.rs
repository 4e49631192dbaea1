//! Aria Index
//!
//! Filesystem music library indexing for Aria.
//!
//! This crate provides:
//! - Recursive, incremental directory indexing with tag extraction (lofty)
//! - Pure substring search and random selection over immutable snapshots
//! - Best-effort JSON persistence of the index
//!
//! The crate knows nothing about HTTP or the speaker; the daemon composes a
//! [`Library`] from the pieces here.

#![forbid(unsafe_code)]

pub mod error;
pub mod indexer;
pub mod search;
pub mod store;
pub mod tags;
pub mod types;

pub use error::{IndexError, Result};
pub use indexer::{Indexer, IndexerConfig};
pub use store::IndexStore;
pub use tags::{LoftyTagReader, TagReader};
pub use types::{IndexedSong, SongTags};

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::info;

/// The shared music library: an atomically swapped index snapshot plus the
/// machinery to rebuild and persist it.
///
/// Readers clone the snapshot `Arc` under a short lock and then search
/// without it, so a concurrent refresh can never tear a search mid-flight.
/// Refreshes themselves must be serialized by the caller.
pub struct Library {
    music_dirs: Vec<PathBuf>,
    max_results: usize,
    indexer: Indexer,
    store: IndexStore,
    snapshot: RwLock<Arc<Vec<IndexedSong>>>,
}

impl Library {
    pub fn new(
        music_dirs: Vec<PathBuf>,
        max_results: usize,
        indexer: Indexer,
        store: IndexStore,
    ) -> Self {
        Self {
            music_dirs,
            max_results,
            indexer,
            store,
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn has_dirs(&self) -> bool {
        !self.music_dirs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current index snapshot.
    pub fn snapshot(&self) -> Arc<Vec<IndexedSong>> {
        Arc::clone(&self.snapshot.read().expect("snapshot lock poisoned"))
    }

    /// Warm the snapshot from the on-disk cache. Returns the loaded count.
    pub fn load_persisted(&self) -> usize {
        let songs = self.store.load();
        let count = songs.len();
        self.swap(songs);
        count
    }

    /// Rebuild the snapshot from the filesystem, reusing unchanged records,
    /// then persist it best-effort. Returns the total song count.
    pub async fn refresh(&self) -> Result<usize> {
        let previous = self.snapshot();
        let songs = self.indexer.build(&self.music_dirs, &previous).await?;
        let total = songs.len();
        self.store.save(&songs);
        self.swap(songs);
        Ok(total)
    }

    /// Search the current snapshot. `needle` must be pre-normalized and
    /// lowercased; results are shuffled and capped at `max_results`.
    pub fn find(&self, needle: &str) -> Vec<PathBuf> {
        self.find_with_count(needle).1
    }

    pub fn find_with_count(&self, needle: &str) -> (usize, Vec<PathBuf>) {
        let snapshot = self.snapshot();
        let (total, hits) = search::search_with_count(&snapshot, needle, self.max_results);
        info!(
            needle,
            total,
            limit = self.max_results,
            "in-memory search complete"
        );
        (total, hits)
    }

    pub fn random_pick(&self) -> Vec<PathBuf> {
        let snapshot = self.snapshot();
        search::random_pick(&snapshot, self.max_results)
    }

    fn swap(&self, songs: Vec<IndexedSong>) {
        *self.snapshot.write().expect("snapshot lock poisoned") = Arc::new(songs);
    }
}
