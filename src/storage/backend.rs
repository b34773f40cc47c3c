//! Pluggable persistence for encrypted wallet blobs.
//!
//! Backends store opaque ciphertext by handle and never interpret its
//! contents. Writes must be atomic from the caller's perspective: a failed
//! `save` never leaves a partially written blob readable by a later `load`.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::errors::StorageError;

/// Opaque reference to where a wallet record lives. Owned by the wallet
/// store; callers never inspect it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageHandle(String);

impl StorageHandle {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    fn as_str(&self) -> &str {
        &self.0
    }
}

pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    fn save(&self, handle: &StorageHandle, blob: &[u8]) -> Result<(), StorageError>;
    fn load(&self, handle: &StorageHandle) -> Result<Vec<u8>, StorageError>;
    fn delete(&self, handle: &StorageHandle) -> Result<(), StorageError>;

    fn exists(&self, handle: &StorageHandle) -> bool {
        self.load(handle).is_ok()
    }
}

/// File-backed storage. Each handle maps to `<root>/<handle>.vault`; saves
/// go through a temp file followed by a rename so a crash mid-write leaves
/// the previous blob intact.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root_dir: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root_dir = root.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(StorageError::WriteFailure(
                "storage root directory cannot be empty".to_string(),
            ));
        }
        Ok(Self { root_dir })
    }

    fn blob_path(&self, handle: &StorageHandle) -> PathBuf {
        self.root_dir.join(format!("{}.vault", handle.as_str()))
    }
}

impl StorageBackend for FileBackend {
    fn save(&self, handle: &StorageHandle, blob: &[u8]) -> Result<(), StorageError> {
        let path = self.blob_path(handle);
        fs::create_dir_all(&self.root_dir)
            .map_err(|e| StorageError::WriteFailure(e.to_string()))?;

        let tmp_path = path.with_extension("vault.new");
        let mut file =
            File::create(&tmp_path).map_err(|e| StorageError::WriteFailure(e.to_string()))?;
        file.write_all(blob)
            .and_then(|_| file.sync_all())
            .map_err(|e| {
                let _ = fs::remove_file(&tmp_path);
                StorageError::WriteFailure(e.to_string())
            })?;
        drop(file);

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StorageError::WriteFailure(e.to_string())
        })
    }

    fn load(&self, handle: &StorageHandle) -> Result<Vec<u8>, StorageError> {
        let path = self.blob_path(handle);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(StorageError::ReadFailure(e.to_string())),
        }
    }

    fn delete(&self, handle: &StorageHandle) -> Result<(), StorageError> {
        let path = self.blob_path(handle);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(StorageError::WriteFailure(e.to_string())),
        }
    }
}

/// In-memory storage for tests and ephemeral contexts.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<StorageHandle, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn save(&self, handle: &StorageHandle, blob: &[u8]) -> Result<(), StorageError> {
        self.entries
            .lock()
            .insert(handle.clone(), blob.to_vec());
        Ok(())
    }

    fn load(&self, handle: &StorageHandle) -> Result<Vec<u8>, StorageError> {
        self.entries
            .lock()
            .get(handle)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(handle.as_str().to_string()))
    }

    fn delete(&self, handle: &StorageHandle) -> Result<(), StorageError> {
        self.entries
            .lock()
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(handle.as_str().to_string()))
    }
}
