//! Range-aware streaming proxy over the upstream object store.
//!
//! Serves object bytes through the edge cache: cache hits stream straight
//! from disk, misses presign a GET, relay the upstream body to the caller,
//! and tee a copy into the cache as a detached background task the response
//! never waits on. Bodies are relayed chunk-by-chunk and never materialized —
//! objects can be larger than this process's memory budget.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::errors::{GatewayError, GatewayResult};
use crate::models::object::ObjectRecord;
use crate::services::cache::{DiskCache, StoredEntry, cache_key};
use crate::services::range::{ByteRange, RangeOutcome, parse_range};
use crate::services::signer::Signer;
use crate::services::tee::TeeStream;

/// Boxed chunk stream handed back to the route layer.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'static>>;

/// Cached responses are immutable by construction (keys embed the record id),
/// so downstream caches may hold them for a year.
const CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Bound on the tee's duplication buffer, in chunks. A cache writer that
/// falls further behind than this loses its copy; the client stream is
/// unaffected.
const CACHE_CHANNEL_CAPACITY: usize = 64;

/// Time to first byte for small control requests (probe, delete).
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// A response ready to hand to the route layer: status, signature-free
/// headers, and the body stream.
pub struct ServedObject {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ByteStream,
}

impl std::fmt::Debug for ServedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServedObject")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &"<stream>")
            .finish()
    }
}

/// Orchestrates cache lookup, presigning, upstream fetch, and background
/// cache population for object downloads.
#[derive(Clone)]
pub struct StreamProxy {
    signer: Signer,
    cache: DiskCache,
    client: reqwest::Client,
}

impl StreamProxy {
    /// The hosting environment imposes no request deadline, so the client
    /// carries its own: a few seconds to connect and a generous
    /// between-chunks window for streaming bodies.
    pub fn new(signer: Signer, cache: DiskCache) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            signer,
            cache,
            client,
        })
    }

    /// Serve an object, honoring an optional inbound `Range` header.
    ///
    /// Only the record and raw header come in; the caller has already gated
    /// on record status. Returns 200 for whole-object responses and 206 with
    /// `Content-Range` for partial ones.
    pub async fn serve(
        &self,
        record: &ObjectRecord,
        range_header: Option<&str>,
    ) -> GatewayResult<ServedObject> {
        let range = match parse_range(range_header, record.total_bytes()) {
            RangeOutcome::Whole => None,
            RangeOutcome::Partial(range) => Some(range),
            RangeOutcome::Invalid => {
                return Err(GatewayError::Validation("unsatisfiable range".into()));
            }
        };

        let key = cache_key(&record.id, range);

        match self.cache.get(&key).await {
            Ok(Some((entry, file))) => {
                debug!("cache hit for {}", key);
                let mut headers = entry.headers;
                headers.push(("x-cache".to_string(), "hit".to_string()));
                return Ok(ServedObject {
                    status: entry.status,
                    headers,
                    body: Box::pin(ReaderStream::new(file)),
                });
            }
            Ok(None) => {}
            Err(err) => {
                // A broken cache never takes down the read path.
                warn!("cache lookup for {} failed: {}", key, err);
            }
        }

        self.fetch_and_store(record, range, key).await
    }

    /// Cache miss path: presign, fetch upstream with the validated range
    /// forwarded, split the body, and return the client half immediately.
    async fn fetch_and_store(
        &self,
        record: &ObjectRecord,
        range: Option<ByteRange>,
        key: String,
    ) -> GatewayResult<ServedObject> {
        let url = self.signer.presigned_get_url(&record.object_key);
        let mut request = self.client.get(&url);
        if let Some(range) = range {
            debug!(
                "forwarding {} upstream ({} bytes)",
                range.header_value(),
                range.len()
            );
            request = request.header("range", range.header_value());
        }

        // Single attempt, no retry: callers wanting retry semantics wrap this.
        let response = request.send().await?;
        let status = response.status().as_u16();
        if status != 200 && status != 206 {
            return Err(GatewayError::UpstreamStatus(status));
        }

        let content_length = response.content_length();
        // Forward the upstream Content-Range; synthesize one from the
        // validated window if a 206 arrives without it.
        let content_range = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| {
                (status == 206)
                    .then(|| range.map(|r| r.content_range(record.total_bytes())))
                    .flatten()
            });
        let headers = response_headers(record, content_length, content_range.as_deref());

        let upstream: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err))),
        );

        // Without a declared length the cache writer cannot tell a complete
        // body from a truncated one, so the response is served uncached.
        let body: ByteStream = match content_length {
            Some(expected) => {
                let (tx, rx) = mpsc::channel::<Bytes>(CACHE_CHANNEL_CAPACITY);
                let cache = self.cache.clone();
                let entry = StoredEntry {
                    status,
                    headers: headers.clone(),
                };
                let store_key = key.clone();
                tokio::spawn(async move {
                    if let Err(err) = cache.put(&store_key, &entry, expected, rx).await {
                        warn!("cache store for {} failed: {}", store_key, err);
                    }
                });
                Box::pin(TeeStream::new(upstream, tx))
            }
            None => {
                debug!("upstream sent no content-length for {}, skipping cache", key);
                upstream
            }
        };

        Ok(ServedObject {
            status,
            headers,
            body,
        })
    }

    /// Check that the object's bytes exist upstream via a 1-byte ranged GET.
    ///
    /// Deliberately not HEAD: some S3-compatible backends answer HEAD
    /// unreliably, and a 1-byte GET is just as cheap.
    ///
    /// `Ok(false)` means a definitive upstream 404; any other non-success is
    /// an error so the caller can distinguish "absent" from "unknown".
    pub async fn verify_exists(&self, record: &ObjectRecord) -> GatewayResult<bool> {
        let url = self.signer.presigned_get_url(&record.object_key);
        let response = self
            .client
            .get(&url)
            .header("range", "bytes=0-0")
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?;
        match response.status().as_u16() {
            200 | 206 => Ok(true),
            404 => Ok(false),
            status => Err(GatewayError::UpstreamStatus(status)),
        }
    }

    /// Delete the object upstream and purge its whole-object cache entry.
    ///
    /// Upstream 404 counts as success — the object being already gone is the
    /// desired end state.
    pub async fn delete(&self, record: &ObjectRecord) -> GatewayResult<()> {
        let url = self.signer.presigned_delete_url(&record.object_key);
        let response = self
            .client
            .delete(&url)
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() && status.as_u16() != 404 {
            return Err(GatewayError::UpstreamStatus(status.as_u16()));
        }

        if let Err(err) = self.cache.remove(&cache_key(&record.id, None)).await {
            warn!("cache purge for {} failed: {}", record.id, err);
        }
        Ok(())
    }

    /// Presigned PUT URL for the record's upload. `Content-Type` and
    /// `Content-Length` are signed, so the uploader must send them verbatim.
    pub fn upload_url(&self, record: &ObjectRecord) -> String {
        self.signer
            .presigned_put_url(&record.object_key, &record.content_type, record.size_bytes)
    }

    /// Presigned download URL surfaced in authenticated confirm diagnostics.
    pub fn debug_download_url(&self, record: &ObjectRecord) -> String {
        self.signer.presigned_get_url(&record.object_key)
    }
}

/// Build the signature-free response header set. `Content-Length` and
/// `Content-Range` are forwarded from upstream; everything else is derived
/// from the metadata record.
fn response_headers(
    record: &ObjectRecord,
    content_length: Option<u64>,
    content_range: Option<&str>,
) -> Vec<(String, String)> {
    let mut headers = vec![
        ("content-type".to_string(), record.content_type.clone()),
        ("accept-ranges".to_string(), "bytes".to_string()),
        ("cache-control".to_string(), CACHE_CONTROL.to_string()),
    ];
    if let Some(length) = content_length {
        headers.push(("content-length".to_string(), length.to_string()));
    }
    if let Some(range) = content_range {
        headers.push(("content-range".to_string(), range.to_string()));
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::object::ObjectStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(size: i64) -> ObjectRecord {
        let id = Uuid::new_v4();
        ObjectRecord {
            id,
            object_key: format!("{id}/photo.png"),
            filename: "photo.png".into(),
            content_type: "image/png".into(),
            size_bytes: size,
            status: ObjectStatus::Complete,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn proxy(cache_root: &std::path::Path) -> StreamProxy {
        let signer = Signer::new(
            "http://localhost:9000",
            "us-east-1",
            "media",
            "AKIDEXAMPLE",
            "secret",
        );
        StreamProxy::new(signer, DiskCache::new(cache_root)).unwrap()
    }

    #[test]
    fn response_headers_full_object_has_no_content_range() {
        let headers = response_headers(&record(1000), Some(1000), None);
        assert!(headers.iter().any(|(k, v)| k == "content-type" && v == "image/png"));
        assert!(headers.iter().any(|(k, v)| k == "accept-ranges" && v == "bytes"));
        assert!(headers.iter().any(|(k, v)| k == "content-length" && v == "1000"));
        assert!(headers.iter().all(|(k, _)| k != "content-range"));
    }

    #[test]
    fn response_headers_partial_forwards_content_range() {
        let headers = response_headers(&record(1000), Some(100), Some("bytes 0-99/1000"));
        assert!(
            headers
                .iter()
                .any(|(k, v)| k == "content-range" && v == "bytes 0-99/1000")
        );
    }

    #[tokio::test]
    async fn invalid_range_fails_before_any_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy(dir.path());
        let err = proxy
            .serve(&record(1000), Some("bytes=10-5"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn cache_hit_serves_stored_bytes_with_marker() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy(dir.path());
        let record = record(11);

        let cache = DiskCache::new(dir.path());
        let entry = StoredEntry {
            status: 200,
            headers: response_headers(&record, Some(11), None),
        };
        let (tx, rx) = mpsc::channel(4);
        tx.send(Bytes::from_static(b"hello world")).await.unwrap();
        drop(tx);
        cache
            .put(&cache_key(&record.id, None), &entry, 11, rx)
            .await
            .unwrap();

        let served = proxy.serve(&record, None).await.unwrap();
        assert_eq!(served.status, 200);
        assert!(served.headers.iter().any(|(k, v)| k == "x-cache" && v == "hit"));

        let chunks: Vec<_> = served.body.collect::<Vec<_>>().await;
        let body: Vec<u8> = chunks
            .into_iter()
            .flat_map(|chunk| chunk.unwrap().to_vec())
            .collect();
        assert_eq!(body, b"hello world");
    }

    /// Minimal upstream stub: serves a fixed body, honoring single ranges,
    /// and answers DELETE with 404 (object already gone).
    async fn spawn_stub_upstream(body: &'static [u8]) -> String {
        use axum::http::HeaderMap as AxumHeaderMap;
        use axum::response::IntoResponse;

        let app = axum::Router::new().fallback(
            move |method: axum::http::Method, headers: AxumHeaderMap| async move {
                if method == axum::http::Method::DELETE {
                    return axum::http::StatusCode::NOT_FOUND.into_response();
                }
                if let Some(range) = headers.get("range").and_then(|v| v.to_str().ok()) {
                    let spec = range.trim_start_matches("bytes=");
                    let (start, end) = spec.split_once('-').unwrap();
                    let start: usize = start.parse().unwrap();
                    let end: usize = end.parse::<usize>().unwrap().min(body.len() - 1);
                    let slice = &body[start..=end];
                    return (
                        axum::http::StatusCode::PARTIAL_CONTENT,
                        [(
                            "content-range",
                            format!("bytes {}-{}/{}", start, end, body.len()),
                        )],
                        slice.to_vec(),
                    )
                        .into_response();
                }
                body.to_vec().into_response()
            },
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn proxy_for(endpoint: &str, cache_root: &std::path::Path) -> StreamProxy {
        let signer = Signer::new(endpoint, "us-east-1", "media", "AKIDEXAMPLE", "secret");
        StreamProxy::new(signer, DiskCache::new(cache_root)).unwrap()
    }

    async fn collect(body: ByteStream) -> Vec<u8> {
        body.collect::<Vec<_>>()
            .await
            .into_iter()
            .flat_map(|chunk| chunk.unwrap().to_vec())
            .collect()
    }

    #[tokio::test]
    async fn miss_serves_upstream_bytes_and_populates_cache() {
        const BODY: &[u8] = b"hello from upstream";
        let endpoint = spawn_stub_upstream(BODY).await;
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy_for(&endpoint, dir.path());
        let record = record(BODY.len() as i64);

        let served = proxy.serve(&record, None).await.unwrap();
        assert_eq!(served.status, 200);
        assert!(served.headers.iter().all(|(k, _)| k != "content-range"));
        assert!(served.headers.iter().all(|(k, _)| k != "x-cache"));
        assert_eq!(collect(served.body).await, BODY);

        // The cache write is detached; poll briefly for it to land.
        let cache = DiskCache::new(dir.path());
        let key = cache_key(&record.id, None);
        let mut cached = None;
        for _ in 0..50 {
            if let Some(hit) = cache.get(&key).await.unwrap() {
                cached = Some(hit);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        let (entry, _) = cached.expect("background cache store never landed");
        assert_eq!(entry.status, 200);

        // A second request is served from cache, marker included.
        let again = proxy.serve(&record, None).await.unwrap();
        assert!(again.headers.iter().any(|(k, v)| k == "x-cache" && v == "hit"));
        assert_eq!(collect(again.body).await, BODY);
    }

    #[tokio::test]
    async fn ranged_miss_returns_206_with_content_range() {
        const BODY: &[u8] = b"0123456789abcdefghij";
        let endpoint = spawn_stub_upstream(BODY).await;
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy_for(&endpoint, dir.path());
        let record = record(BODY.len() as i64);

        let served = proxy.serve(&record, Some("bytes=0-9")).await.unwrap();
        assert_eq!(served.status, 206);
        assert!(
            served
                .headers
                .iter()
                .any(|(k, v)| k == "content-range" && v == "bytes 0-9/20")
        );
        assert_eq!(collect(served.body).await, &BODY[..10]);
    }

    #[tokio::test]
    async fn verify_exists_reflects_upstream_presence() {
        let endpoint = spawn_stub_upstream(b"data!").await;
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy_for(&endpoint, dir.path());
        assert!(proxy.verify_exists(&record(5)).await.unwrap());

        let gone = axum::Router::new()
            .fallback(|| async { axum::http::StatusCode::NOT_FOUND });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, gone).await.unwrap();
        });
        let proxy = proxy_for(&format!("http://{}", addr), dir.path());
        assert!(!proxy.verify_exists(&record(5)).await.unwrap());
    }

    #[tokio::test]
    async fn delete_succeeds_when_upstream_already_gone() {
        let endpoint = spawn_stub_upstream(b"irrelevant").await;
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy_for(&endpoint, dir.path());
        let record = record(10);

        // Stub answers DELETE with 404; that still counts as removed.
        proxy.delete(&record).await.unwrap();
    }

    #[tokio::test]
    async fn ranged_cache_hit_uses_the_range_entry() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy(dir.path());
        let record = record(1000);

        let range = ByteRange { start: 0, end: 99 };
        let cache = DiskCache::new(dir.path());
        let entry = StoredEntry {
            status: 206,
            headers: response_headers(&record, Some(100), Some("bytes 0-99/1000")),
        };
        let (tx, rx) = mpsc::channel(4);
        tx.send(Bytes::from(vec![7u8; 100])).await.unwrap();
        drop(tx);
        cache
            .put(&cache_key(&record.id, Some(range)), &entry, 100, rx)
            .await
            .unwrap();

        let served = proxy.serve(&record, Some("bytes=0-99")).await.unwrap();
        assert_eq!(served.status, 206);
        assert!(
            served
                .headers
                .iter()
                .any(|(k, v)| k == "content-range" && v == "bytes 0-99/1000")
        );
    }
}
