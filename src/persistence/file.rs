//! File-backed key-value storage.
//!
//! Each key lives in its own file, named by the SHA-256 of the key and
//! sharded into directories by the first byte of the hash. Entry layout:
//!
//! ```text
//! magic "KVS\0" | version u8 | key len u16 | key | payload len u64 | payload (MessagePack) | crc32 u32
//! ```
//!
//! Writes go to a temporary file that is renamed into place, so a crash
//! never leaves a half-written entry behind.

use crate::error::{Result, StoreError};
use crate::persistence::storage::KeyValueStorage;
use fs2::FileExt;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Magic bytes for entry files.
const ENTRY_MAGIC: &[u8; 4] = b"KVS\0";

/// Current entry format version.
const ENTRY_VERSION: u8 = 1;

/// Upper bound on a single payload.
const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// File storage configuration.
#[derive(Clone, Debug)]
pub struct FileStorageConfig {
    /// Directory holding the entries.
    pub path: PathBuf,

    /// Decoded-value cache size (number of keys).
    pub cache_size: usize,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./state"),
            cache_size: 64,
            create_if_missing: true,
        }
    }
}

/// Durable storage with one file per key.
///
/// Holds an exclusive lock on the directory for its lifetime.
pub struct FileStorage {
    path: PathBuf,
    cache: Mutex<LruCache<String, serde_json::Value>>,
    _lock_file: File,
}

impl FileStorage {
    /// Open the storage directory, creating it if allowed.
    pub fn open(config: FileStorageConfig) -> Result<Self> {
        if !config.path.exists() {
            if !config.create_if_missing {
                return Err(StoreError::NotInitialized);
            }
            fs::create_dir_all(&config.path)?;
        }

        let lock_file = Self::acquire_lock(&config.path)?;
        let cache_size = NonZeroUsize::new(config.cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);

        debug!(path = %config.path.display(), "opened file storage");

        Ok(Self {
            path: config.path,
            cache: Mutex::new(LruCache::new(cache_size)),
            _lock_file: lock_file,
        })
    }

    /// Directory the entries live in.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every key currently stored.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            for file_entry in fs::read_dir(entry.path())? {
                let file_entry = file_entry?;
                let name = file_entry.file_name();
                if name.to_string_lossy().ends_with(".tmp") {
                    continue;
                }
                let mut file = File::open(file_entry.path())?;
                let (key, _) = Self::read_entry(&mut file)?;
                keys.push(key);
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }

    fn key_hash(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn shard_path(&self, hash: &str) -> PathBuf {
        self.path.join(&hash[..2])
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let hash = Self::key_hash(key);
        self.shard_path(&hash).join(hash)
    }

    fn write_entry(file: &mut File, key: &str, payload: &[u8]) -> Result<()> {
        file.write_all(ENTRY_MAGIC)?;
        file.write_all(&[ENTRY_VERSION])?;

        let key_bytes = key.as_bytes();
        let key_len = u16::try_from(key_bytes.len())
            .map_err(|_| StoreError::Persistence(format!("key too long: {} bytes", key_bytes.len())))?;
        file.write_all(&key_len.to_le_bytes())?;
        file.write_all(key_bytes)?;

        file.write_all(&(payload.len() as u64).to_le_bytes())?;
        file.write_all(payload)?;

        let checksum = crc32fast::hash(payload);
        file.write_all(&checksum.to_le_bytes())?;

        Ok(())
    }

    fn read_entry(file: &mut File) -> Result<(String, serde_json::Value)> {
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != ENTRY_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid entry magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != ENTRY_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported entry version: {}",
                version[0]
            )));
        }

        let mut key_len_bytes = [0u8; 2];
        file.read_exact(&mut key_len_bytes)?;
        let key_len = u16::from_le_bytes(key_len_bytes) as usize;
        let mut key_bytes = vec![0u8; key_len];
        file.read_exact(&mut key_bytes)?;
        let key = String::from_utf8(key_bytes)
            .map_err(|_| StoreError::InvalidFormat("Entry key is not UTF-8".into()))?;

        let mut payload_len_bytes = [0u8; 8];
        file.read_exact(&mut payload_len_bytes)?;
        let payload_len = u64::from_le_bytes(payload_len_bytes) as usize;
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(StoreError::InvalidFormat("Entry payload too large".into()));
        }

        let mut payload = vec![0u8; payload_len];
        file.read_exact(&mut payload)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&payload);
        if stored_checksum != computed_checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let value = rmp_serde::from_slice(&payload)?;
        Ok((key, value))
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        if let Some(cached) = self.cache.lock().get(key).cloned() {
            return Ok(Some(cached));
        }

        let entry_path = self.entry_path(key);
        if !entry_path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&entry_path)?;
        let (stored_key, value) = Self::read_entry(&mut file)?;
        if stored_key != key {
            return Err(StoreError::InvalidFormat(format!(
                "Entry for {:?} holds key {:?}",
                key, stored_key
            )));
        }

        self.cache.lock().put(key.to_string(), value.clone());
        Ok(Some(value))
    }

    fn put(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let payload = rmp_serde::to_vec(value)?;

        let entry_path = self.entry_path(key);
        if let Some(shard) = entry_path.parent() {
            fs::create_dir_all(shard)?;
        }

        let tmp_path = entry_path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            Self::write_entry(&mut file, key, &payload)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &entry_path)?;

        self.cache.lock().put(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.cache.lock().pop(key);

        let entry_path = self.entry_path(key);
        if entry_path.exists() {
            fs::remove_file(&entry_path)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage").field("path", &self.path).finish()
    }
}
