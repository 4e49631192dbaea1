/// Audio duration probing
///
/// The auto-advance timer is driven entirely by probed durations, so a song
/// whose duration cannot be determined is dropped from the queue rather than
/// played without a scheduled advance.
use crate::error::Result;
use async_trait::async_trait;
use lofty::AudioFile;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::spawn_blocking;
use tracing::warn;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// Probe the playable duration in seconds, `None` when undeterminable.
    async fn probe(&self, path: &Path) -> Option<f64>;

    /// Startup check; an implementation backed by an external tool fails
    /// here when the tool is missing, which aborts the daemon.
    fn preflight(&self) -> Result<()> {
        Ok(())
    }
}

/// Duration probe reading WAV headers directly and everything else through
/// lofty's format properties.
pub struct TrackProber;

impl TrackProber {
    pub fn new() -> Self {
        Self
    }

    fn read_duration(path: &Path) -> Option<f64> {
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if is_wav {
            if let Some(duration) = wav_duration(path) {
                return Some(duration);
            }
        }
        lofty_duration(path)
    }
}

impl Default for TrackProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurationProbe for TrackProber {
    async fn probe(&self, path: &Path) -> Option<f64> {
        let owned: PathBuf = path.to_path_buf();
        match tokio::time::timeout(
            PROBE_TIMEOUT,
            spawn_blocking(move || Self::read_duration(&owned)),
        )
        .await
        {
            Ok(Ok(duration)) => duration,
            Ok(Err(err)) => {
                warn!(path = %path.display(), %err, "duration probe panicked");
                None
            }
            Err(_) => {
                warn!(path = %path.display(), "duration probe timed out");
                None
            }
        }
    }

    fn preflight(&self) -> Result<()> {
        // In-process probing has no external tool to check.
        Ok(())
    }
}

fn lofty_duration(path: &Path) -> Option<f64> {
    let tagged_file = lofty::read_from_path(path).ok()?;
    let seconds = tagged_file.properties().duration().as_secs_f64();
    (seconds > 0.0).then_some(seconds)
}

/// Duration from a RIFF/WAVE header: data-chunk bytes over byte rate.
fn wav_duration(path: &Path) -> Option<f64> {
    let mut file = std::fs::File::open(path).ok()?;

    let mut riff = [0u8; 12];
    file.read_exact(&mut riff).ok()?;
    if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
        return None;
    }

    let mut byte_rate: Option<u64> = None;
    let mut data_len: Option<u64> = None;
    let mut chunk_header = [0u8; 8];
    while byte_rate.is_none() || data_len.is_none() {
        if file.read_exact(&mut chunk_header).is_err() {
            break;
        }
        let chunk_id = &chunk_header[0..4];
        let chunk_size = u32::from_le_bytes(chunk_header[4..8].try_into().ok()?) as u64;
        match chunk_id {
            b"fmt " => {
                let mut fmt = [0u8; 16];
                if chunk_size < 16 || file.read_exact(&mut fmt).is_err() {
                    return None;
                }
                byte_rate = Some(u32::from_le_bytes(fmt[8..12].try_into().ok()?) as u64);
                // Skip any fmt extension bytes (chunks are word-aligned).
                let consumed = 16;
                let remaining = chunk_size - consumed + (chunk_size % 2);
                file.seek(SeekFrom::Current(remaining as i64)).ok()?;
            }
            b"data" => {
                data_len = Some(chunk_size);
                file.seek(SeekFrom::Current((chunk_size + chunk_size % 2) as i64))
                    .ok()?;
            }
            _ => {
                file.seek(SeekFrom::Current((chunk_size + chunk_size % 2) as i64))
                    .ok()?;
            }
        }
    }

    let byte_rate = byte_rate?;
    let data_len = data_len?;
    if byte_rate == 0 || data_len == 0 {
        return None;
    }
    Some(data_len as f64 / byte_rate as f64)
}
