/// On-disk JSON persistence for the index
///
/// The store is strictly best-effort: a missing, unreadable or corrupt index
/// file loads as an empty list, and write failures are logged and swallowed.
/// The playing experience never depends on the cache being intact.
use crate::types::IndexedSong;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct IndexStore {
    path: Option<PathBuf>,
}

impl IndexStore {
    /// An empty `path` disables persistence entirely.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            path: (!path.as_os_str().is_empty()).then(|| path.to_path_buf()),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn load(&self) -> Vec<IndexedSong> {
        let Some(path) = &self.path else {
            return Vec::new();
        };
        if !path.is_file() {
            return Vec::new();
        }
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to read index file");
                return Vec::new();
            }
        };
        let value: Value = match serde_json::from_str(&data) {
            Ok(value) => value,
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to parse index file");
                return Vec::new();
            }
        };
        let Value::Array(items) = value else {
            warn!(path = %path.display(), "index file is not a JSON array");
            return Vec::new();
        };

        let songs: Vec<IndexedSong> = items
            .into_iter()
            .filter(|item| item.is_object())
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect();
        info!(count = songs.len(), "loaded songs from index file");
        songs
    }

    pub fn save(&self, songs: &[IndexedSong]) {
        let Some(path) = &self.path else {
            return;
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(err) = std::fs::create_dir_all(parent) {
                    warn!(path = %path.display(), %err, "failed to create index directory");
                    return;
                }
            }
        }
        // serde_json leaves non-ASCII unescaped, matching the on-disk format.
        let payload = match serde_json::to_string(songs) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%err, "failed to serialize index");
                return;
            }
        };
        if let Err(err) = std::fs::write(path, payload) {
            warn!(path = %path.display(), %err, "failed to write index file");
        }
    }
}
