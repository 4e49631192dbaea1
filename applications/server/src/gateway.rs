/// File URL gateway - range-capable HTTP serving of whitelisted files
///
/// Song files are exposed as `{base_url}/file/{hex}/{name}` where `hex` is
/// the lowercase hex of the absolute UTF-8 path. Hex keeps CJK filenames out
/// of URL-escaping trouble on the speaker's fetcher and makes the path
/// opaque; the allow-set makes the opacity enforceable.
use crate::config::HttpSettings;
use axum::{
    body::Body,
    extract::{Path as UrlPath, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use std::collections::HashSet;
use std::io::SeekFrom;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

pub struct FileGateway {
    base_url: String,
    allowed: Mutex<HashSet<PathBuf>>,
}

impl FileGateway {
    pub fn new(base_url: impl Into<String>) -> Arc<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Arc::new(Self {
            base_url,
            allowed: Mutex::new(HashSet::new()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whitelist `path` and mint its URL. Entries are never revoked; songs
    /// from superseded queues stay fetchable until the process exits.
    pub fn create_file_url(&self, path: &Path) -> String {
        let path = absolutize(path);
        let encoded = hex::encode(path.to_string_lossy().as_bytes());
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.allowed
            .lock()
            .expect("allow-set lock poisoned")
            .insert(path);
        format!("{}/file/{}/{}", self.base_url, encoded, name)
    }

    fn is_allowed(&self, path: &Path) -> bool {
        self.allowed
            .lock()
            .expect("allow-set lock poisoned")
            .contains(path)
    }

    /// Router serving `GET|HEAD /file/{hex}/{name}`; every other path 404s
    /// through the fallback.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/file/:encoded/:name", get(serve_file))
            .with_state(self)
    }
}

async fn serve_file(
    State(gateway): State<Arc<FileGateway>>,
    UrlPath((encoded, _name)): UrlPath<(String, String)>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let Some(path) = decode_path(&encoded) else {
        return status_response(StatusCode::BAD_REQUEST);
    };
    if !gateway.is_allowed(&path) {
        return status_response(StatusCode::FORBIDDEN);
    }
    let file_size = match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => metadata.len(),
        _ => return status_response(StatusCode::NOT_FOUND),
    };

    let content_type = mime_guess::from_path(&path).first_or_octet_stream();

    let (status, start, length) = match range_window(&headers, file_size) {
        Ok(window) => window,
        Err(()) => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{file_size}"))
                .body(Body::empty())
                .expect("static response");
        }
    };

    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, length);
    if status == StatusCode::PARTIAL_CONTENT {
        response = response.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, start + length - 1, file_size),
        );
    }

    if method == Method::HEAD {
        return response
            .body(Body::empty())
            .unwrap_or_else(|_| status_response(StatusCode::INTERNAL_SERVER_ERROR));
    }

    let mut file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(err) => {
            debug!(path = %path.display(), %err, "file vanished before streaming");
            return status_response(StatusCode::NOT_FOUND);
        }
    };
    if start > 0 {
        if let Err(err) = file.seek(SeekFrom::Start(start)).await {
            debug!(path = %path.display(), %err, "seek failed");
            return status_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    // Client disconnects surface as write errors inside hyper and simply
    // end the stream; nothing propagates.
    let reader = ReaderStream::with_capacity(file.take(length), STREAM_CHUNK_SIZE);
    response
        .body(Body::from_stream(reader))
        .unwrap_or_else(|_| status_response(StatusCode::INTERNAL_SERVER_ERROR))
}

fn status_response(status: StatusCode) -> Response {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .expect("static response")
}

fn decode_path(encoded: &str) -> Option<PathBuf> {
    let bytes = hex::decode(encoded).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    Some(PathBuf::from(text))
}

/// Resolve the requested byte window: `(status, start, length)`.
/// `Err(())` means the Range header was present but unsatisfiable.
fn range_window(headers: &HeaderMap, file_size: u64) -> std::result::Result<(StatusCode, u64, u64), ()> {
    let Some(range) = headers.get(header::RANGE) else {
        return Ok((StatusCode::OK, 0, file_size));
    };
    let Some((start, end)) = range.to_str().ok().and_then(|v| parse_range(v, file_size)) else {
        return Err(());
    };
    Ok((StatusCode::PARTIAL_CONTENT, start, end - start + 1))
}

/// Parse a single byte-range spec against `file_size`.
///
/// Accepts `bytes=S-E`, `bytes=S-` and `bytes=-N`; the end is clamped to the
/// last byte and an over-long suffix means the whole file. `None` is
/// unsatisfiable or malformed.
fn parse_range(value: &str, file_size: u64) -> Option<(u64, u64)> {
    let value = value.trim().to_ascii_lowercase();
    let spec = value.strip_prefix("bytes=")?;
    let spec = spec.split(',').next()?.trim();
    let (start_text, end_text) = spec.split_once('-')?;

    if file_size == 0 {
        return None;
    }

    if start_text.is_empty() {
        let suffix: u64 = end_text.parse().ok()?;
        if suffix == 0 {
            return None;
        }
        Some((file_size.saturating_sub(suffix), file_size - 1))
    } else {
        let start: u64 = start_text.parse().ok()?;
        let end: u64 = if end_text.is_empty() {
            file_size - 1
        } else {
            end_text.parse().ok()?
        };
        if end < start || start >= file_size {
            return None;
        }
        Some((start, end.min(file_size - 1)))
    }
}

/// Pick the base URL the speaker will fetch from: configured `base_url`,
/// else `device_ip`, else the local address a UDP connect would use.
pub fn resolve_base_url(http: &HttpSettings) -> String {
    let base_url = http.base_url.trim();
    if !base_url.is_empty() {
        return base_url.trim_end_matches('/').to_string();
    }
    let device_ip = http.device_ip.trim();
    if !device_ip.is_empty() {
        return format!("http://{}:{}", device_ip, http.port);
    }
    format!("http://{}:{}", guess_local_ip(), http.port)
}

fn guess_local_ip() -> IpAddr {
    UdpSocket::bind(("0.0.0.0", 0))
        .and_then(|socket| {
            socket.connect(("8.8.8.8", 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_encoding_is_an_involution() {
        let gateway = FileGateway::new("http://10.0.0.2:18080");
        let url = gateway.create_file_url(Path::new("/music/周杰伦/晴天.mp3"));
        let encoded = url
            .strip_prefix("http://10.0.0.2:18080/file/")
            .unwrap()
            .split('/')
            .next()
            .unwrap();
        assert_eq!(
            decode_path(encoded).unwrap(),
            PathBuf::from("/music/周杰伦/晴天.mp3")
        );
        assert!(url.ends_with("/晴天.mp3"));
    }

    #[test]
    fn malformed_hex_decodes_to_none() {
        assert!(decode_path("zz").is_none());
        assert!(decode_path("abc").is_none()); // odd length
        assert!(decode_path(&hex::encode([0xff, 0xfe])).is_none()); // not UTF-8
    }

    #[test]
    fn parse_range_forms() {
        assert_eq!(parse_range("bytes=100-199", 1000), Some((100, 199)));
        assert_eq!(parse_range("bytes=100-", 1000), Some((100, 999)));
        assert_eq!(parse_range("bytes=-100", 1000), Some((900, 999)));
        assert_eq!(parse_range("bytes=0-0", 1000), Some((0, 0)));
        assert_eq!(parse_range("BYTES=0-0", 1000), Some((0, 0)));
    }

    #[test]
    fn parse_range_clamps() {
        // End past EOF clamps to the last byte.
        assert_eq!(parse_range("bytes=900-5000", 1000), Some((900, 999)));
        // Over-long suffix means the whole file.
        assert_eq!(parse_range("bytes=-5000", 1000), Some((0, 999)));
    }

    #[test]
    fn parse_range_rejects_unsatisfiable() {
        assert_eq!(parse_range("bytes=1000-", 1000), None);
        assert_eq!(parse_range("bytes=1200-1300", 1000), None);
        assert_eq!(parse_range("bytes=200-100", 1000), None);
        assert_eq!(parse_range("bytes=-0", 1000), None);
        assert_eq!(parse_range("bytes=5-5", 0), None);
    }

    #[test]
    fn parse_range_rejects_malformed() {
        assert_eq!(parse_range("items=0-1", 1000), None);
        assert_eq!(parse_range("bytes=abc-def", 1000), None);
        assert_eq!(parse_range("bytes=15", 1000), None);
    }

    #[test]
    fn base_url_resolution_order() {
        let mut http = crate::config::AppConfig::default().http;
        http.base_url = "http://192.168.1.20:18080/".to_string();
        http.device_ip = "10.1.1.1".to_string();
        assert_eq!(resolve_base_url(&http), "http://192.168.1.20:18080");

        http.base_url = String::new();
        assert_eq!(resolve_base_url(&http), "http://10.1.1.1:18080");

        http.device_ip = String::new();
        assert!(resolve_base_url(&http).starts_with("http://"));
    }
}
