//! Persistent storage coordinator
//!
//! Fans writes out to every tier, reads through an ordered fallback chain
//! with opportunistic promotion, and reports per-tier health. Tier failures
//! are soft: the coordinator keeps working as long as one tier does.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;

use super::tier::StorageTier;
use super::models::StorageHealth;
use super::{ConfigError, ConfigResult};

/// Reserved key used by health probes; never a real configuration key
const HEALTH_PROBE_KEY: &str = "healthProbe";

/// Outcome of a fan-out store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOutcome {
    /// True when at least one tier accepted the write
    pub success: bool,
    /// Names of the tiers that accepted the write, in coordinator order
    pub stored_in: Vec<&'static str>,
}

/// Envelope written to disk by [`StorageCoordinator::create_download_backup`]
#[derive(Debug, Serialize)]
struct DownloadEnvelope<'a> {
    key: &'a str,
    exported_at: String,
    version: &'static str,
    data: serde_json::Value,
}

/// Coordinates an ordered list of storage tiers
pub struct StorageCoordinator {
    tiers: Vec<Arc<dyn StorageTier>>,
    export_dir: PathBuf,
}

impl StorageCoordinator {
    pub fn new(tiers: Vec<Arc<dyn StorageTier>>, export_dir: PathBuf) -> Self {
        Self { tiers, export_dir }
    }

    /// Tier names in fallback order
    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|tier| tier.name()).collect()
    }

    /// Write to every tier concurrently; no short-circuit on tier failure
    pub async fn store(&self, key: &str, value: &serde_json::Value) -> StoreOutcome {
        let writes = self
            .tiers
            .iter()
            .map(|tier| async move { (tier.name(), tier.store(key, value).await) });

        let results = join_all(writes).await;
        let stored_in: Vec<&'static str> = results
            .into_iter()
            .filter_map(|(name, ok)| ok.then_some(name))
            .collect();

        if stored_in.is_empty() {
            log::error!("store of '{}' failed on every tier", key);
        } else if stored_in.len() < self.tiers.len() {
            log::warn!("store of '{}' reached only {:?}", key, stored_in);
        }

        StoreOutcome {
            success: !stored_in.is_empty(),
            stored_in,
        }
    }

    /// Read through the fallback chain, promoting hits into earlier tiers
    pub async fn retrieve(&self, key: &str) -> Option<serde_json::Value> {
        for (position, tier) in self.tiers.iter().enumerate() {
            let Some(value) = tier.retrieve(key).await else {
                continue;
            };

            if position > 0 {
                // Self-healing promotion: future reads hit the durable tiers
                let promotions = self.tiers[..position]
                    .iter()
                    .map(|earlier| earlier.store(key, &value));
                let promoted = join_all(promotions).await;
                log::debug!(
                    "promoted '{}' from {} into {} earlier tier(s)",
                    key,
                    tier.name(),
                    promoted.iter().filter(|ok| **ok).count()
                );
            }

            return Some(value);
        }

        None
    }

    /// Best-effort single-key delete across every tier
    pub async fn remove(&self, key: &str) {
        join_all(self.tiers.iter().map(|tier| tier.remove(key))).await;
    }

    /// Probe each tier with a disposable sentinel round trip
    ///
    /// A tier is healthy iff the sentinel written is the sentinel read back.
    /// Real configuration keys are never touched.
    pub async fn check_health(&self) -> StorageHealth {
        let mut health = StorageHealth::default();

        for tier in &self.tiers {
            let nonce: u64 = rand::random();
            let sentinel = serde_json::json!({ "nonce": nonce });

            let healthy = if tier.store(HEALTH_PROBE_KEY, &sentinel).await {
                tier.retrieve(HEALTH_PROBE_KEY).await.as_ref() == Some(&sentinel)
            } else {
                false
            };
            tier.remove(HEALTH_PROBE_KEY).await;

            if !healthy {
                health
                    .errors
                    .push(format!("{}: sentinel round trip failed", tier.name()));
            }
            health.tiers.push((tier.name(), healthy));
        }

        health
    }

    /// Clear every tier (each tier scopes its own clear; see the tier docs)
    pub async fn clear_all(&self) {
        join_all(self.tiers.iter().map(|tier| tier.clear())).await;
        log::info!("cleared all storage tiers");
    }

    /// Export the stored value for a key as a user-facing download file
    ///
    /// Returns `Ok(false)` when no data exists for the key instead of
    /// producing an empty file.
    pub async fn create_download_backup(&self, key: &str) -> ConfigResult<bool> {
        let Some(data) = self.retrieve(key).await else {
            log::info!("no data stored under '{}'; skipping download export", key);
            return Ok(false);
        };

        let now = Utc::now();
        let envelope = DownloadEnvelope {
            key,
            exported_at: now.to_rfc3339(),
            version: env!("CARGO_PKG_VERSION"),
            data,
        };
        let serialized =
            serde_json::to_string_pretty(&envelope).map_err(|e| ConfigError::Serialization {
                message: format!("Failed to serialize download export: {}", e),
            })?;

        tokio::fs::create_dir_all(&self.export_dir)
            .await
            .map_err(|e| ConfigError::Storage {
                message: format!("Failed to create export directory: {}", e),
            })?;

        let file_name = format!("export_{}_{}.json", key, now.format("%Y-%m-%dT%H-%M-%SZ"));
        let path = self.export_dir.join(file_name);
        tokio::fs::write(&path, serialized)
            .await
            .map_err(|e| ConfigError::Storage {
                message: format!("Failed to write download export: {}", e),
            })?;

        log::info!("exported '{}' to {:?}", key, path);
        Ok(true)
    }
}
