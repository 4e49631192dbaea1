/// Tag extraction behind a trait so the indexer can be tested without media files
use crate::error::{IndexError, Result};
use crate::types::SongTags;
use lofty::TaggedFileExt;
use std::path::Path;

/// Reads title/artist/album tags from an audio file.
///
/// Implementations must be cheap to share across worker tasks; the indexer
/// calls `read_tags` from `spawn_blocking` contexts.
pub trait TagReader: Send + Sync {
    fn read_tags(&self, path: &Path) -> Result<SongTags>;
}

/// Tag reader using the lofty library
pub struct LoftyTagReader;

impl LoftyTagReader {
    pub fn new() -> Self {
        Self
    }

    fn extract_from_tag(tag: &lofty::Tag) -> SongTags {
        let mut tags = SongTags::default();
        for item in tag.items() {
            match item.key() {
                lofty::ItemKey::TrackTitle => {
                    tags.title = item.value().text().unwrap_or_default().trim().to_string();
                }
                lofty::ItemKey::TrackArtist => {
                    tags.artist = item.value().text().unwrap_or_default().trim().to_string();
                }
                lofty::ItemKey::AlbumTitle => {
                    tags.album = item.value().text().unwrap_or_default().trim().to_string();
                }
                _ => {}
            }
        }
        tags
    }
}

impl Default for LoftyTagReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TagReader for LoftyTagReader {
    fn read_tags(&self, path: &Path) -> Result<SongTags> {
        let tagged_file =
            lofty::read_from_path(path).map_err(|e| IndexError::Tag(e.to_string()))?;

        // Prefer the primary tag, fall back to the first one present.
        let tags = if let Some(primary) = tagged_file.primary_tag() {
            Self::extract_from_tag(primary)
        } else if let Some(first) = tagged_file.tags().first() {
            Self::extract_from_tag(first)
        } else {
            SongTags::default()
        };

        Ok(tags)
    }
}
