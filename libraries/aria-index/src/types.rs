/// Record types for the music index
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tags read from an audio file. Empty strings mean the tag was absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SongTags {
    pub title: String,
    pub artist: String,
    pub album: String,
}

/// One indexed audio file.
///
/// The searchable fields are stored pre-lowercased so searches never
/// re-normalize. Two records with the same path but different
/// `(size, mtime_ns)` are different versions of the song; the indexer only
/// reuses a cached record when both match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedSong {
    #[serde(default)]
    pub path: PathBuf,
    #[serde(default)]
    pub name_lower: String,
    #[serde(default)]
    pub title_lower: String,
    #[serde(default)]
    pub artist_lower: String,
    #[serde(default)]
    pub album_lower: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mtime_ns: i64,
}

impl IndexedSong {
    /// True when `needle` (pre-lowercased, non-empty) occurs in any of the
    /// four searchable fields.
    pub fn matches(&self, needle: &str) -> bool {
        self.name_lower.contains(needle)
            || self.title_lower.contains(needle)
            || self.artist_lower.contains(needle)
            || self.album_lower.contains(needle)
    }
}
