//! Persisted pending edits
//!
//! Unsaved tiddlers are written to a JSON file keyed by title every time the
//! pending set changes, so edits survive a restart and can be restored with
//! `Store::retrieve_cached`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::types::Tiddler;

/// Serialized pending set, taken while the store is locked and written after
pub struct CacheSnapshot {
    generation: u64,
    json: String,
}

/// Pending tiddlers read back from disk
#[derive(Debug, Default)]
pub struct CachedPending {
    /// Generation of the write this content came from
    pub generation: u64,
    pub tiddlers: HashMap<String, Tiddler>,
}

pub struct PendingCache {
    path: Option<PathBuf>,
    /// Last write failed; retried on the next change
    dirty: AtomicBool,
    /// Bumped for every snapshot
    latest: AtomicU64,
    /// Generation currently on disk. Held while reading or writing the file.
    written: Mutex<u64>,
}

impl PendingCache {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            dirty: AtomicBool::new(false),
            latest: AtomicU64::new(0),
            written: Mutex::new(0),
        }
    }

    /// A cache that never touches disk
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Generation of the most recent snapshot
    pub fn generation(&self) -> u64 {
        self.latest.load(Ordering::Acquire)
    }

    /// Load cached pending tiddlers. A corrupt file is removed and treated as empty.
    ///
    /// Returns None while the file lags behind the latest snapshot, since its
    /// content may hold entries that have been saved or discarded since.
    pub fn load(&self) -> Option<CachedPending> {
        let Some(path) = &self.path else {
            return Some(CachedPending::default());
        };
        let written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = self.generation();
        if *written != generation {
            tracing::debug!("Pending cache {:?} is behind, not restoring", path);
            return None;
        }
        let mut cached = CachedPending {
            generation,
            tiddlers: HashMap::new(),
        };
        if !path.exists() {
            return Some(cached);
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(tiddlers) => cached.tiddlers = tiddlers,
                Err(e) => {
                    tracing::warn!("Corrupt pending cache {:?}, discarding: {}", path, e);
                    let _ = std::fs::remove_file(path);
                }
            },
            Err(e) => tracing::warn!("Failed to read pending cache {:?}: {}", path, e),
        }
        Some(cached)
    }

    /// Serialize the pending set. Call with the store locked so generations
    /// follow the order of changes, then hand the result to `write` unlocked.
    pub fn snapshot(&self, pending: &HashMap<String, Tiddler>) -> Option<CacheSnapshot> {
        self.path.as_ref()?;
        let generation = self.latest.fetch_add(1, Ordering::AcqRel) + 1;
        match serde_json::to_string(pending) {
            Ok(json) => Some(CacheSnapshot { generation, json }),
            Err(e) => {
                tracing::warn!("Failed to serialize pending cache: {}", e);
                self.dirty.store(true, Ordering::Release);
                None
            }
        }
    }

    /// Write a snapshot unless a newer one is already on disk
    pub fn write(&self, snapshot: CacheSnapshot) {
        let Some(path) = &self.path else {
            return;
        };
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        if snapshot.generation <= *written {
            return;
        }
        let result = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| std::fs::write(path, &snapshot.json));
        match result {
            Ok(()) => {
                *written = snapshot.generation;
                if self.dirty.swap(false, Ordering::AcqRel) {
                    tracing::info!("Pending cache {:?} written after earlier failure", path);
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to write pending cache {:?}: {} (will retry on next change)",
                    path,
                    e
                );
                self.dirty.store(true, Ordering::Release);
            }
        }
    }

    pub fn save(&self, pending: &HashMap<String, Tiddler>) {
        if let Some(snapshot) = self.snapshot(pending) {
            self.write(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PendingCache::new(Some(dir.path().join("nested").join("pending.json")));
        assert!(cache.load().unwrap().tiddlers.is_empty());

        let mut pending = HashMap::new();
        let mut tiddler = Tiddler::new("foo");
        tiddler.text = Some("body".into());
        tiddler.bag = "dev_public".into();
        pending.insert("foo".to_string(), tiddler.clone());
        cache.save(&pending);

        assert!(!cache.is_dirty());
        let cached = cache.load().unwrap();
        assert_eq!(cached.generation, 1);
        assert_eq!(cached.tiddlers.get("foo"), Some(&tiddler));
    }

    #[test]
    fn test_corrupt_file_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.json");
        std::fs::write(&path, "{not json").unwrap();
        let cache = PendingCache::new(Some(path.clone()));
        assert!(cache.load().unwrap().tiddlers.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_in_memory_is_noop() {
        let cache = PendingCache::in_memory();
        let mut pending = HashMap::new();
        pending.insert("foo".to_string(), Tiddler::new("foo"));
        cache.save(&pending);
        assert!(cache.load().unwrap().tiddlers.is_empty());
        assert!(cache.path().is_none());
    }

    #[test]
    fn test_unwritten_snapshot_blocks_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PendingCache::new(Some(dir.path().join("pending.json")));
        let mut pending = HashMap::new();
        pending.insert("foo".to_string(), Tiddler::new("foo"));
        cache.save(&pending);

        pending.clear();
        let snapshot = cache.snapshot(&pending).unwrap();
        // The file still holds "foo", which is no longer pending
        assert!(cache.load().is_none());

        cache.write(snapshot);
        let cached = cache.load().unwrap();
        assert_eq!(cached.generation, 2);
        assert!(cached.tiddlers.is_empty());
    }

    #[test]
    fn test_older_snapshot_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PendingCache::new(Some(dir.path().join("pending.json")));
        let mut pending = HashMap::new();
        pending.insert("old".to_string(), Tiddler::new("old"));
        let older = cache.snapshot(&pending).unwrap();
        pending.clear();
        pending.insert("new".to_string(), Tiddler::new("new"));
        let newer = cache.snapshot(&pending).unwrap();

        cache.write(newer);
        cache.write(older);
        let cached = cache.load().unwrap();
        assert!(cached.tiddlers.contains_key("new"));
        assert!(!cached.tiddlers.contains_key("old"));
    }
}
