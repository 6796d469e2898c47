// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! A hierarchical key-value store over the local filesystem.
//!
//! Keys are path-like (`session/<id>`, `session/<id>/message/<id>`, ...) and
//! map onto nested files under a root directory. Writes are atomic (temp
//! file + rename); per-key access is serialized by an in-process mutex so a
//! single writer owns a key at a time. There are no cross-process or
//! distributed guarantees.
mod error;

pub use error::StorageError;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use sha2::{Digest, Sha256};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// File suffix for leaf values. Keeps a key's file distinct from a
/// same-named directory holding child keys (e.g. `session/01ABC` the record
/// vs. `session/01ABC/message/...` the children).
const VALUE_EXT: &str = "kv";

fn key_to_path(root: &Path, key: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in key.split('/') {
        path.push(segment);
    }
    path.set_extension(VALUE_EXT);
    path
}

fn path_to_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let rel = rel.with_extension("");
    let key = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
    Some(key)
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// A hierarchical KV store rooted at a single directory on disk, typically
/// `<state-dir>/<hash(project_directory)>/`.
#[derive(Clone)]
pub struct Store {
    root: PathBuf,
    locks: Arc<StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl Store {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), locks: Arc::new(StdMutex::new(HashMap::new())) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(key.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Write `value` at `key`. If `if_match` is `Some(hash)`, the write is
    /// rejected with `Conflict` unless the key's current content hash equals
    /// `hash` (a missing key counts as hash `""`). Returns the new content
    /// hash on success.
    pub async fn put(
        &self,
        key: &str,
        value: &[u8],
        if_match: Option<&str>,
    ) -> Result<String, StorageError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let path = key_to_path(&self.root, key);
        if let Some(expected) = if_match {
            let current = match tokio::fs::read(&path).await {
                Ok(bytes) => content_hash(&bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(source) => return Err(StorageError::Io { key: key.to_string(), source }),
            };
            if current != expected {
                return Err(StorageError::Conflict {
                    key: key.to_string(),
                    expected: expected.to_string(),
                    actual: current,
                });
            }
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io { key: key.to_string(), source })?;
        }

        atomic_write(&path, value).map_err(|source| StorageError::Io { key: key.to_string(), source })?;
        debug!(key, bytes = value.len(), "storage: put");
        Ok(content_hash(value))
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = key_to_path(&self.root, key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound { key: key.to_string() })
            }
            Err(source) => Err(StorageError::Io { key: key.to_string(), source }),
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        tokio::fs::try_exists(key_to_path(&self.root, key)).await.unwrap_or(false)
    }

    /// List all `(key, value)` pairs whose key starts with `prefix`, ordered
    /// lexicographically by key.
    pub async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let entries = tokio::task::spawn_blocking(move || collect_keys(&root, &prefix))
            .await
            .expect("list scan task panicked")?;

        let mut out = Vec::with_capacity(entries.len());
        for key in entries {
            let bytes = self.get(&key).await?;
            out.push((key, bytes));
        }
        Ok(out)
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        let path = key_to_path(&self.root, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { key: key.to_string(), source }),
        }
    }

    /// Delete every key under `prefix`. Returns the number of keys removed.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let keys = {
            let root = self.root.clone();
            let prefix = prefix.to_string();
            tokio::task::spawn_blocking(move || collect_keys(&root, &prefix))
                .await
                .expect("delete_prefix scan task panicked")?
        };
        let count = keys.len();
        for key in keys {
            self.delete(&key).await?;
        }
        if count == 0 {
            warn!(prefix, "storage: delete_prefix matched no keys");
        }
        Ok(count)
    }
}

fn collect_keys(root: &Path, prefix: &str) -> Result<Vec<String>, StorageError> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut keys: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| path_to_key(root, e.path()))
        .filter(|k| k.starts_with(prefix))
        .collect();
    keys.sort();
    Ok(keys)
}

fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    use std::io::Write;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (_dir, store) = store();
        store.put("session/s1", b"hello", None).await.unwrap();
        assert_eq!(store.get("session/s1").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(store.get("session/missing").await, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn if_match_rejects_stale_write() {
        let (_dir, store) = store();
        store.put("session/s1", b"v1", None).await.unwrap();
        let result = store.put("session/s1", b"v2", Some("wrong-hash")).await;
        assert!(matches!(result, Err(StorageError::Conflict { .. })));
        assert_eq!(store.get("session/s1").await.unwrap(), b"v1");
    }

    #[tokio::test]
    async fn if_match_accepts_correct_hash() {
        let (_dir, store) = store();
        let hash = store.put("session/s1", b"v1", None).await.unwrap();
        store.put("session/s1", b"v2", Some(&hash)).await.unwrap();
        assert_eq!(store.get("session/s1").await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn exists_reflects_presence() {
        let (_dir, store) = store();
        assert!(!store.exists("session/s1").await);
        store.put("session/s1", b"v", None).await.unwrap();
        assert!(store.exists("session/s1").await);
    }

    #[tokio::test]
    async fn list_returns_lexicographic_prefix_matches() {
        let (_dir, store) = store();
        store.put("session/s1", b"a", None).await.unwrap();
        store.put("session/s1/message/m2", b"b", None).await.unwrap();
        store.put("session/s1/message/m1", b"c", None).await.unwrap();
        store.put("session/s2", b"d", None).await.unwrap();

        let listed = store.list("session/s1").await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["session/s1", "session/s1/message/m1", "session/s1/message/m2"]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, store) = store();
        store.put("session/s1", b"a", None).await.unwrap();
        store.delete("session/s1").await.unwrap();
        store.delete("session/s1").await.unwrap();
        assert!(!store.exists("session/s1").await);
    }

    #[tokio::test]
    async fn delete_prefix_removes_cascade() {
        let (_dir, store) = store();
        store.put("session/s1", b"a", None).await.unwrap();
        store.put("session/s1/message/m1", b"b", None).await.unwrap();
        store.put("session/s1/message/m1/part/p1", b"c", None).await.unwrap();
        store.put("session/s2", b"d", None).await.unwrap();

        let removed = store.delete_prefix("session/s1").await.unwrap();
        assert_eq!(removed, 3);
        assert!(store.list("session/s1").await.unwrap().is_empty());
        assert!(store.exists("session/s2").await);
    }
}
