//! Content-addressed audio cache in front of the acquisition coordinator.
//!
//! The cache is keyed by the canonical video id extracted from the source
//! reference. It sits on top of the external [`BlobStore`], which is
//! best-effort and eventually consistent: a miss and an unreachable store
//! look identical to callers, and writes happen off the critical path.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use sha2::{Digest, Sha256};

use crate::audio::AudioAsset;

/// External put/get-by-key blob store. Both operations are best-effort:
/// failures are reported as `None`, never as errors.
pub trait BlobStore: Send + Sync {
    /// Store bytes under `key`; returns a retrieval URL when the store
    /// provides one.
    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Option<String>;

    /// Fetch bytes by `key`; `None` for both "not found" and "unreachable".
    fn get(&self, key: &str) -> Option<Vec<u8>>;
}

/// Filesystem-backed blob store. Keys are hashed into filenames so arbitrary
/// key strings cannot escape the root directory.
pub struct LocalDirStore {
    root: std::path::PathBuf,
}

impl LocalDirStore {
    #[must_use]
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> std::path::PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.root.join(format!("{digest:x}"))
    }
}

impl BlobStore for LocalDirStore {
    fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Option<String> {
        if let Err(err) = fs::create_dir_all(&self.root) {
            tracing::warn!(error = %err, "blob store root unavailable");
            return None;
        }
        let path = self.path_for(key);
        match fs::write(&path, bytes) {
            Ok(()) => Some(format!("file://{}", path.display())),
            Err(err) => {
                tracing::warn!(key, error = %err, "blob store put failed");
                None
            }
        }
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        fs::read(self.path_for(key)).ok()
    }
}

// ---------------------------------------------------------------------------
// Audio cache
// ---------------------------------------------------------------------------

/// Store-and-retrieve layer for acquired audio, avoiding redundant
/// downloads across runs.
pub struct AudioCache {
    store: Arc<dyn BlobStore>,
}

impl AudioCache {
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    fn key(video_id: &str) -> String {
        format!("audio/{video_id}.wav")
    }

    /// Look up cached audio for `video_id`, materializing it into the run's
    /// work dir on a hit. A miss, an unreachable store, and a blob that
    /// cannot be materialized all yield `None`; acquisition remains the
    /// rescue path.
    pub fn get(&self, video_id: &str, work_dir: &Path) -> Option<AudioAsset> {
        let Some(bytes) = self.store.get(&Self::key(video_id)) else {
            tracing::debug!(video_id, "audio cache miss");
            return None;
        };
        let path = work_dir.join("cached_audio.wav");
        if let Err(err) = fs::write(&path, bytes) {
            tracing::warn!(video_id, error = %err, "cached audio unwritable; treating as miss");
            return None;
        }
        match AudioAsset::from_path(&path) {
            Ok(asset) => {
                tracing::info!(video_id, size_mb = format!("{:.1}", asset.size_mb()), "audio cache hit");
                Some(asset)
            }
            Err(err) => {
                tracing::warn!(video_id, error = %err, "cached audio unreadable; treating as miss");
                None
            }
        }
    }

    /// Populate the cache for `video_id` from `asset`, off the critical
    /// path. The spawned write never blocks or fails the caller; a failure
    /// is logged and forgotten.
    pub fn put(&self, video_id: &str, asset: &AudioAsset) {
        let bytes = match fs::read(&asset.path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(video_id, error = %err, "skipping cache put; audio unreadable");
                return;
            }
        };
        let store = Arc::clone(&self.store);
        let key = Self::key(video_id);
        let video_id = video_id.to_owned();
        thread::spawn(move || {
            if store.put(&key, &bytes, "audio/wav").is_none() {
                tracing::warn!(video_id, "cache put failed (non-fatal)");
            } else {
                tracing::debug!(video_id, "cache populated");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Video id extraction
// ---------------------------------------------------------------------------

/// Extract the canonical 11-character video id from a source reference.
///
/// Accepted shapes: long-form (`watch?v=ID`), short-form (`youtu.be/ID`),
/// and embed/shorts aliases (`/embed/ID`, `/shorts/ID`). Returns `None` when
/// no id can be derived, in which case caching is skipped for the run.
#[must_use]
pub fn extract_video_id(source_ref: &str) -> Option<String> {
    let candidate = if let Some(rest) = source_ref.split("watch?v=").nth(1) {
        rest
    } else if let Some(rest) = source_ref.split("youtu.be/").nth(1) {
        rest
    } else if let Some(rest) = source_ref.split("/embed/").nth(1) {
        rest
    } else if let Some(rest) = source_ref.split("/shorts/").nth(1) {
        rest
    } else {
        return None;
    };

    let id: String = candidate
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if id.len() == 11 {
        Some(id)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_long_form_ids() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10"),
            Some("dQw4w9WgXcQ".to_owned())
        );
        assert_eq!(
            extract_video_id("https://x/watch?v=abc12345678"),
            Some("abc12345678".to_owned())
        );
    }

    #[test]
    fn extracts_short_form_and_alias_ids() {
        assert_eq!(
            extract_video_id("https://youtu.be/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_owned())
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/embed/dQw4w9WgXcQ?rel=0"),
            Some("dQw4w9WgXcQ".to_owned())
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/shorts/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_owned())
        );
    }

    #[test]
    fn underivable_references_yield_none() {
        assert_eq!(extract_video_id("https://example.com/video.mp4"), None);
        assert_eq!(extract_video_id("watch?v=tooshort"), None);
        assert_eq!(extract_video_id(""), None);
    }

    #[test]
    fn local_store_round_trips_and_misses() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalDirStore::new(dir.path());
        assert!(store.get("audio/none.wav").is_none());

        let url = store.put("audio/abc.wav", b"bytes", "audio/wav");
        assert!(url.is_some_and(|u| u.starts_with("file://")));
        assert_eq!(store.get("audio/abc.wav").as_deref(), Some(&b"bytes"[..]));
    }

    #[test]
    fn hostile_keys_stay_inside_the_store_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalDirStore::new(dir.path());
        store.put("../../etc/passwd", b"x", "text/plain");
        let entries: Vec<_> = fs::read_dir(dir.path()).expect("read dir").collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn cache_get_materializes_hit_into_work_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(LocalDirStore::new(dir.path().join("store")));
        store.put("audio/dQw4w9WgXcQ.wav", b"fake-wav", "audio/wav");

        let cache = AudioCache::new(store);
        let work = dir.path().join("run");
        fs::create_dir_all(&work).expect("work dir");
        let asset = cache.get("dQw4w9WgXcQ", &work).expect("hit");
        assert_eq!(asset.size_bytes, 8);
        assert!(asset.path.starts_with(&work));

        assert!(cache.get("missing00000", &work).is_none());
    }

    #[test]
    fn unmaterializable_hit_degrades_to_miss() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(LocalDirStore::new(dir.path().join("store")));
        store.put("audio/dQw4w9WgXcQ.wav", b"fake-wav", "audio/wav");

        let cache = AudioCache::new(store);
        // A work dir that does not exist makes the blob unwritable.
        let bogus_work = dir.path().join("never_created");
        assert!(cache.get("dQw4w9WgXcQ", &bogus_work).is_none());
    }
}
