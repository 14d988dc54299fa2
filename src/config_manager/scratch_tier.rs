//! Tier C: small synchronous string store
//!
//! A single JSON file of string entries, read and written synchronously. It
//! is the least capable tier: values are JSON-serialized strings, a byte cap
//! bounds the whole file, and the host may evict it at any time. The file is
//! shared with other kiosk features, so `clear()` removes only
//! configuration/backup-prefixed keys and leaves foreign entries alone.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::models::{
    BACKUP_INDEX_KEY, BACKUP_KEY_PREFIX, COMPREHENSIVE_CONFIG_KEY, IMPACT_CONFIG_KEY,
};
use super::tier::{open_envelope, seal_envelope, StorageTier};

pub const SCRATCH_TIER_NAME: &str = "scratch";

/// Single-file synchronous string store with a capacity cap
pub struct ScratchTier {
    path: PathBuf,
    capacity_bytes: usize,
    entries: Mutex<BTreeMap<String, String>>,
}

impl ScratchTier {
    /// Load the store, tolerating a missing or corrupt file
    pub fn new<P: AsRef<Path>>(path: P, capacity_bytes: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("scratch tier: discarding corrupt store file: {}", e);
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        Self {
            path,
            capacity_bytes,
            entries: Mutex::new(entries),
        }
    }

    /// Whether a key belongs to this crate's configuration/backup namespace
    fn is_config_key(key: &str) -> bool {
        key == COMPREHENSIVE_CONFIG_KEY
            || key == IMPACT_CONFIG_KEY
            || key == BACKUP_INDEX_KEY
            || key.starts_with(BACKUP_KEY_PREFIX)
    }

    /// Persist the whole map; the caller holds the entries lock
    fn persist(&self, entries: &BTreeMap<String, String>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string(entries)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&self.path, serialized)
    }
}

#[async_trait]
impl StorageTier for ScratchTier {
    fn name(&self) -> &'static str {
        SCRATCH_TIER_NAME
    }

    async fn store(&self, key: &str, value: &serde_json::Value) -> bool {
        let Some(envelope) = seal_envelope(value) else {
            return false;
        };

        let mut entries = self.entries.lock();
        let previous = entries.insert(key.to_string(), envelope);

        let serialized_len = entries
            .iter()
            .map(|(k, v)| k.len() + v.len() + 8)
            .sum::<usize>();
        if serialized_len > self.capacity_bytes {
            // Over capacity: undo the insert so the store stays consistent
            match previous {
                Some(old) => {
                    entries.insert(key.to_string(), old);
                }
                None => {
                    entries.remove(key);
                }
            }
            log::warn!(
                "scratch tier: write of '{}' exceeds capacity of {} bytes",
                key,
                self.capacity_bytes
            );
            return false;
        }

        match self.persist(&entries) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("scratch tier: failed to persist '{}': {}", key, e);
                false
            }
        }
    }

    async fn retrieve(&self, key: &str) -> Option<serde_json::Value> {
        let raw = self.entries.lock().get(key).cloned()?;
        open_envelope(SCRATCH_TIER_NAME, key, &raw)
    }

    async fn remove(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_none() {
            return false;
        }
        if let Err(e) = self.persist(&entries) {
            log::warn!("scratch tier: failed to persist removal of '{}': {}", key, e);
        }
        true
    }

    async fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.retain(|key, _| !Self::is_config_key(key));
        if let Err(e) = self.persist(&entries) {
            log::warn!("scratch tier: failed to persist clear: {}", e);
        }
    }
}
