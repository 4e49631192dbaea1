/// Recursive, incremental music indexer
use crate::error::{IndexError, Result};
use crate::tags::{LoftyTagReader, TagReader};
use crate::types::{IndexedSong, SongTags};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

/// Hard cap on a single tag read; a file that takes longer is indexed with
/// empty tags.
const TAG_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Indexer configuration
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Accepted extensions, lowercased with a leading dot. An empty set
    /// accepts every file.
    pub extensions: HashSet<String>,

    /// Number of parallel tag-extraction workers
    pub workers: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            extensions: [".mp3", ".flac", ".wav", ".m4a", ".aac", ".ogg"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            workers: default_workers(),
        }
    }
}

pub fn default_workers() -> usize {
    num_cpus::get().min(8).max(1)
}

/// A file that passed the extension filter, before tag extraction.
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    name_lower: String,
    size: u64,
    mtime_ns: i64,
}

/// Walks the configured directories and produces a sorted song list.
///
/// The indexer is idempotent and never fails a whole refresh on individual
/// files; unreadable entries are skipped and tag failures yield empty tags.
/// Callers serialize concurrent refreshes.
pub struct Indexer {
    config: IndexerConfig,
    reader: Arc<dyn TagReader>,
}

impl Indexer {
    pub fn new(config: IndexerConfig) -> Self {
        Self::with_reader(config, Arc::new(LoftyTagReader::new()))
    }

    pub fn with_reader(config: IndexerConfig, reader: Arc<dyn TagReader>) -> Self {
        let mut config = config;
        config.workers = config.workers.max(1);
        Self { config, reader }
    }

    /// Build a fresh snapshot of `dirs`, reusing records from `previous`
    /// whose `(size, mtime_ns)` are unchanged.
    pub async fn build(
        &self,
        dirs: &[PathBuf],
        previous: &[IndexedSong],
    ) -> Result<Vec<IndexedSong>> {
        let dirs = dirs.to_vec();
        let extensions = self.config.extensions.clone();
        let candidates =
            spawn_blocking(move || collect_candidates(&dirs, &extensions))
                .await
                .map_err(|e| IndexError::Task(e.to_string()))?;

        if candidates.is_empty() {
            info!(total = 0, "music index refresh complete");
            return Ok(Vec::new());
        }

        let cached: HashMap<&Path, &IndexedSong> = previous
            .iter()
            .map(|song| (song.path.as_path(), song))
            .collect();

        let mut songs = Vec::with_capacity(candidates.len());
        let mut fresh = Vec::new();
        for candidate in candidates {
            match cached.get(candidate.path.as_path()) {
                Some(prev) if prev.size == candidate.size && prev.mtime_ns == candidate.mtime_ns => {
                    songs.push((*prev).clone());
                }
                _ => fresh.push(candidate),
            }
        }

        let reused = songs.len();
        let extracted = fresh.len();
        songs.extend(self.extract_all(fresh).await?);
        songs.sort_by(|a, b| a.path.cmp(&b.path));

        info!(
            total = songs.len(),
            reused,
            extracted,
            workers = self.config.workers,
            "music index refresh complete"
        );
        Ok(songs)
    }

    /// Run tag extraction for new/changed files across the worker pool.
    async fn extract_all(&self, fresh: Vec<Candidate>) -> Result<Vec<IndexedSong>> {
        if fresh.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_size = fresh.len().div_ceil(self.config.workers);
        let mut handles = Vec::new();
        for chunk in fresh.chunks(chunk_size) {
            let chunk = chunk.to_vec();
            let reader = Arc::clone(&self.reader);
            handles.push(tokio::spawn(async move {
                let mut out = Vec::with_capacity(chunk.len());
                for candidate in chunk {
                    out.push(read_song(&reader, candidate).await);
                }
                out
            }));
        }

        let mut songs = Vec::new();
        for handle in handles {
            songs.extend(
                handle
                    .await
                    .map_err(|e| IndexError::Task(e.to_string()))?,
            );
        }
        Ok(songs)
    }
}

/// Walk every directory, filter by extension and stat the survivors.
/// Unreadable entries are skipped, never fatal.
fn collect_candidates(dirs: &[PathBuf], extensions: &HashSet<String>) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    info!(?dirs, "refreshing music index");

    for dir in dirs {
        let dir = absolutize(&expand_home(dir));
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "skipping invalid music directory");
            continue;
        }
        for entry in walkdir::WalkDir::new(&dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if !has_supported_extension(entry.path(), extensions) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let name_lower = entry.file_name().to_string_lossy().to_lowercase();
            candidates.push(Candidate {
                path: entry.path().to_path_buf(),
                name_lower,
                size: metadata.len(),
                mtime_ns: mtime_ns(&metadata),
            });
        }
    }

    candidates
}

fn has_supported_extension(path: &Path, extensions: &HashSet<String>) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.contains(&format!(".{}", e.to_lowercase())))
        .unwrap_or(false)
}

fn mtime_ns(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn expand_home(path: &Path) -> PathBuf {
    let Some(text) = path.to_str() else {
        return path.to_path_buf();
    };
    if let Some(rest) = text.strip_prefix("~") {
        if rest.is_empty() {
            return dirs::home_dir().unwrap_or_else(|| path.to_path_buf());
        }
        if let Some(rest) = rest.strip_prefix('/') {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
    }
    path.to_path_buf()
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Read one song's tags under the per-file timeout. Failures degrade to
/// empty tags rather than dropping the file from the index.
async fn read_song(reader: &Arc<dyn TagReader>, candidate: Candidate) -> IndexedSong {
    let path = candidate.path.clone();
    let blocking_reader = Arc::clone(reader);
    let blocking_path = path.clone();
    let tags = match tokio::time::timeout(
        TAG_READ_TIMEOUT,
        spawn_blocking(move || blocking_reader.read_tags(&blocking_path)),
    )
    .await
    {
        Ok(Ok(Ok(tags))) => tags,
        Ok(Ok(Err(err))) => {
            debug!(path = %path.display(), %err, "tag read failed, indexing with empty tags");
            SongTags::default()
        }
        Ok(Err(err)) => {
            warn!(path = %path.display(), %err, "tag reader panicked, indexing with empty tags");
            SongTags::default()
        }
        Err(_) => {
            warn!(path = %path.display(), "tag read timed out, indexing with empty tags");
            SongTags::default()
        }
    };

    IndexedSong {
        path: candidate.path,
        name_lower: candidate.name_lower,
        title_lower: tags.title.to_lowercase(),
        artist_lower: tags.artist.to_lowercase(),
        album_lower: tags.album.to_lowercase(),
        size: candidate.size,
        mtime_ns: candidate.mtime_ns,
    }
}
