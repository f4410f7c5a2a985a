//! Opaque key → bytes persistence.

use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use parking_lot::RwLock;

use crate::error::StoreError;

/// Persistent object store collaborator.
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under `key`, replacing any previous value.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Bytes stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Removes `key`; returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Every stored key in ascending order.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Volatile store for tests and one-shot CLI runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        self.blobs.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.read().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.blobs.write().remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.blobs.read().keys().cloned().collect())
    }
}

/// One file per key inside a base directory.
#[derive(Debug, Clone)]
pub struct DirBlobStore {
    base_path: PathBuf,
}

impl DirBlobStore {
    /// Store rooted at `base_path`; the directory is created on first write.
    #[must_use]
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Root directory.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }
}

impl BlobStore for DirBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let io = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };
        fs::create_dir_all(&self.base_path).map_err(io)?;
        // Readers never observe a partially written blob.
        let staging = self.base_path.join(format!(".{key}.tmp"));
        fs::write(&staging, bytes).map_err(io)?;
        fs::rename(&staging, &path).map_err(io)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let read_dir = match fs::read_dir(&self.base_path) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    key: String::new(),
                    source,
                })
            }
        };
        let mut keys: Vec<String> = read_dir
            .flatten()
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn dir_store_round_trips_and_lists() {
        let dir = tempdir().unwrap();
        let store = DirBlobStore::new(dir.path().join("blobs"));
        assert_eq!(store.keys().unwrap(), Vec::<String>::new());
        store.put("world_state.json", b"{}").unwrap();
        store.put("audit.json", b"[]").unwrap();
        assert_eq!(store.get("world_state.json").unwrap().as_deref(), Some(&b"{}"[..]));
        assert_eq!(store.keys().unwrap(), vec!["audit.json", "world_state.json"]);
        assert!(store.delete("audit.json").unwrap());
        assert!(!store.delete("audit.json").unwrap());
        assert_eq!(store.get("audit.json").unwrap(), None);
    }

    #[test]
    fn keys_cannot_escape_the_directory() {
        let dir = tempdir().unwrap();
        let store = DirBlobStore::new(dir.path());
        for key in ["", "../state", "a/b", ".hidden"] {
            assert!(matches!(store.put(key, b"x"), Err(StoreError::InvalidKey(_))));
        }
    }

    #[test]
    fn memory_store_overwrites() {
        let store = MemoryBlobStore::new();
        store.put("k", b"one").unwrap();
        store.put("k", b"two").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.keys().unwrap(), vec!["k"]);
    }
}
