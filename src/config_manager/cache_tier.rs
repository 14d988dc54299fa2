//! Tier B: response-cache-style file storage
//!
//! One file per key inside a versioned namespace directory. Binary-capable
//! and asynchronous, but less durable than the database tier: the host may
//! reclaim the cache directory, and a missing namespace is simply a miss.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::tier::{open_envelope, seal_envelope, StorageTier};

pub const CACHE_TIER_NAME: &str = "cache";

/// Namespace version; bumping it orphans (and effectively invalidates) every
/// previously written cache file.
const CACHE_NAMESPACE_VERSION: u32 = 1;

/// File-per-key cache tier under a versioned namespace directory
pub struct CacheTier {
    namespace_dir: PathBuf,
}

impl CacheTier {
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Self {
        let namespace_dir = cache_dir
            .as_ref()
            .join(format!("config-cache-v{}", CACHE_NAMESPACE_VERSION));
        Self { namespace_dir }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        // Keys are logical names, not paths; keep the file name safe.
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        self.namespace_dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl StorageTier for CacheTier {
    fn name(&self) -> &'static str {
        CACHE_TIER_NAME
    }

    async fn store(&self, key: &str, value: &serde_json::Value) -> bool {
        let Some(envelope) = seal_envelope(value) else {
            return false;
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.namespace_dir).await {
            log::warn!("cache tier: failed to create namespace: {}", e);
            return false;
        }

        match tokio::fs::write(self.entry_path(key), envelope).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("cache tier: failed to write '{}': {}", key, e);
                false
            }
        }
    }

    async fn retrieve(&self, key: &str) -> Option<serde_json::Value> {
        let raw = tokio::fs::read_to_string(self.entry_path(key)).await.ok()?;
        open_envelope(CACHE_TIER_NAME, key, &raw)
    }

    async fn remove(&self, key: &str) -> bool {
        tokio::fs::remove_file(self.entry_path(key)).await.is_ok()
    }

    async fn clear(&self) {
        // Namespace-level deletion; a missing directory is already clear.
        if let Err(e) = tokio::fs::remove_dir_all(&self.namespace_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("cache tier: failed to clear namespace: {}", e);
            }
        }
    }
}
