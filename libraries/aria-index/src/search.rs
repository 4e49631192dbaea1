/// Pure search functions over an index snapshot
///
/// Matches are shuffled before truncation so a broad keyword ("beatles")
/// yields varied selections across invocations instead of a deterministic
/// prefix of the library.
use crate::types::IndexedSong;
use rand::seq::SliceRandom;
use std::path::PathBuf;

/// Substring search across filename/title/artist/album.
///
/// `needle` must be pre-normalized and lowercased. Returns the total match
/// count and up to `limit` matched paths in shuffled order. An empty needle
/// yields nothing; `limit == 0` yields the count only.
pub fn search_with_count(
    songs: &[IndexedSong],
    needle: &str,
    limit: usize,
) -> (usize, Vec<PathBuf>) {
    if needle.is_empty() {
        return (0, Vec::new());
    }

    let mut matched: Vec<PathBuf> = songs
        .iter()
        .filter(|song| song.matches(needle))
        .map(|song| song.path.clone())
        .collect();
    let total = matched.len();
    if limit == 0 {
        return (total, Vec::new());
    }

    matched.shuffle(&mut rand::thread_rng());
    matched.truncate(limit);
    (total, matched)
}

pub fn search(songs: &[IndexedSong], needle: &str, limit: usize) -> Vec<PathBuf> {
    search_with_count(songs, needle, limit).1
}

/// Uniform random selection of up to `limit` paths from the whole snapshot.
pub fn random_pick(songs: &[IndexedSong], limit: usize) -> Vec<PathBuf> {
    if limit == 0 || songs.is_empty() {
        return Vec::new();
    }
    let mut paths: Vec<PathBuf> = songs.iter().map(|song| song.path.clone()).collect();
    paths.shuffle(&mut rand::thread_rng());
    paths.truncate(limit);
    paths
}
