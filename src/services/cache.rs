//! Edge cache: stable cache keys plus a disk-backed entry store.
//!
//! Cache keys are derived from the object id and the effective byte window
//! only — never from the upstream URL, whose query string carries a fresh
//! signature on every presign. Two requests for the same logical bytes always
//! share an entry regardless of when they were signed.
//!
//! Entries live on disk as a JSON sidecar (status + headers) next to a body
//! file, sharded two levels deep to keep directory fan-out bounded. Writes go
//! through a temp file and are renamed into place only when the full body
//! arrived, so readers never observe a truncated entry.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::mpsc,
};
use tracing::debug;
use uuid::Uuid;

use crate::services::range::ByteRange;

/// Derive the signature-free cache key for an object and optional range.
///
/// Whole-object requests map to `objects/{id}`; ranged requests append a
/// normalized `:range:start-end` suffix.
pub fn cache_key(object_id: &Uuid, range: Option<ByteRange>) -> String {
    match range {
        Some(r) => format!("objects/{}:range:{}-{}", object_id, r.start, r.end),
        None => format!("objects/{}", object_id),
    }
}

/// Response metadata stored alongside a cached body.
///
/// Only the gateway-built, signature-free header set goes in here; nothing
/// from the presigned upstream URL is ever persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

/// Disk-backed byte-stream cache keyed by derived cache key.
///
/// Eviction is left to the operator (or an external reaper); this layer only
/// implements `get`/`put`/`remove`.
#[derive(Clone, Debug)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Shard an entry beneath `root/{aa}/{bb}/{digest}` using the first two
    /// bytes of the key digest, keeping per-directory file counts small.
    fn entry_paths(&self, key: &str) -> (PathBuf, PathBuf) {
        let digest = md5::compute(key);
        let hex = format!("{:x}", digest);
        let mut dir = self.root.clone();
        dir.push(format!("{:02x}", digest[0]));
        dir.push(format!("{:02x}", digest[1]));
        (dir.join(format!("{hex}.meta")), dir.join(format!("{hex}.body")))
    }

    /// Look up an entry. Returns the stored metadata and an open body file
    /// ready for streaming, or `None` when either half is missing.
    pub async fn get(&self, key: &str) -> io::Result<Option<(StoredEntry, File)>> {
        let (meta_path, body_path) = self.entry_paths(key);

        let meta_bytes = match fs::read(&meta_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let entry: StoredEntry = match serde_json::from_slice(&meta_bytes) {
            Ok(entry) => entry,
            Err(err) => {
                // Unreadable sidecar: drop the entry rather than serve junk.
                debug!("discarding corrupt cache metadata for {}: {}", key, err);
                let _ = fs::remove_file(&meta_path).await;
                let _ = fs::remove_file(&body_path).await;
                return Ok(None);
            }
        };

        match File::open(&body_path).await {
            Ok(file) => Ok(Some((entry, file))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Stream a body into the cache from a channel of chunks.
    ///
    /// The body lands in a temp file first; it is renamed into place (body
    /// before sidecar) only when exactly `expected_len` bytes arrived. A
    /// producer that stopped early — client disconnect, dropped tee chunk —
    /// leaves no trace.
    pub async fn put(
        &self,
        key: &str,
        entry: &StoredEntry,
        expected_len: u64,
        mut chunks: mpsc::Receiver<Bytes>,
    ) -> io::Result<()> {
        let (meta_path, body_path) = self.entry_paths(key);
        let parent = body_path
            .parent()
            .ok_or_else(|| io::Error::new(ErrorKind::Other, "cache path missing parent"))?
            .to_path_buf();
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut written: u64 = 0;
        while let Some(chunk) = chunks.recv().await {
            written += chunk.len() as u64;
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        }

        if written != expected_len {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("cache body truncated: {written} of {expected_len} bytes"),
            ));
        }

        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        if let Err(err) = fs::rename(&tmp_path, &body_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        let meta_json = serde_json::to_vec(entry)
            .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))?;
        if let Err(err) = fs::write(&meta_path, meta_json).await {
            let _ = fs::remove_file(&body_path).await;
            return Err(err);
        }

        debug!("cached {} ({} bytes)", key, written);
        Ok(())
    }

    /// Remove an entry. Missing files are not an error; empty shard
    /// directories are pruned afterwards.
    pub async fn remove(&self, key: &str) -> io::Result<()> {
        let (meta_path, body_path) = self.entry_paths(key);
        for path in [&meta_path, &body_path] {
            match fs::remove_file(path).await {
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        if let Some(parent) = body_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// Walk empty shard directories back up toward the cache root, removing
    /// as far as possible. Stops at the root, a non-empty directory, or any
    /// unexpected error.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune cache directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn entry() -> StoredEntry {
        StoredEntry {
            status: 200,
            headers: vec![
                ("content-type".into(), "image/png".into()),
                ("accept-ranges".into(), "bytes".into()),
            ],
        }
    }

    #[test]
    fn cache_key_ignores_everything_but_id_and_range() {
        let id = Uuid::new_v4();
        let whole = cache_key(&id, None);
        assert_eq!(whole, format!("objects/{}", id));

        let range = ByteRange { start: 0, end: 99 };
        assert_eq!(
            cache_key(&id, Some(range)),
            format!("objects/{}:range:0-99", id)
        );
    }

    #[test]
    fn same_window_always_derives_the_same_key() {
        // The signature and timestamp of the upstream URL play no part, so
        // two presign calls at different instants still share one entry.
        let id = Uuid::new_v4();
        let range = Some(ByteRange { start: 10, end: 20 });
        assert_eq!(cache_key(&id, range), cache_key(&id, range));
        assert_ne!(cache_key(&id, range), cache_key(&id, None));
        assert_ne!(cache_key(&id, None), cache_key(&Uuid::new_v4(), None));
    }

    async fn send_all(tx: mpsc::Sender<Bytes>, chunks: Vec<&'static [u8]>) {
        for chunk in chunks {
            tx.send(Bytes::from_static(chunk)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());

        let (tx, rx) = mpsc::channel(4);
        send_all(tx, vec![b"hello ", b"world"]).await;
        cache.put("objects/x", &entry(), 11, rx).await.unwrap();

        let (stored, mut file) = cache.get("objects/x").await.unwrap().unwrap();
        assert_eq!(stored.status, 200);
        let mut body = Vec::new();
        file.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"hello world");
    }

    #[tokio::test]
    async fn short_write_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());

        let (tx, rx) = mpsc::channel(4);
        send_all(tx, vec![b"hel"]).await;
        let err = cache.put("objects/x", &entry(), 11, rx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(cache.get("objects/x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_prunes_shards() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());

        let (tx, rx) = mpsc::channel(4);
        send_all(tx, vec![b"data"]).await;
        cache.put("objects/y", &entry(), 4, rx).await.unwrap();
        assert!(cache.get("objects/y").await.unwrap().is_some());

        cache.remove("objects/y").await.unwrap();
        assert!(cache.get("objects/y").await.unwrap().is_none());
        // Removing again is a no-op.
        cache.remove("objects/y").await.unwrap();
    }

    #[tokio::test]
    async fn missing_entry_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        assert!(cache.get("objects/none").await.unwrap().is_none());
    }
}
