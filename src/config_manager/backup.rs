//! Backup, restore, and storage integrity
//!
//! Snapshots of the live configuration are stored as checksummed envelopes
//! next to an ordered index. The index is capped; creating a backup past the
//! cap evicts the oldest snapshots, metadata and payload both. Restores
//! first snapshot the current state so an admin can undo a restore.

use std::sync::Arc;

use chrono::Utc;

use super::coordinator::StorageCoordinator;
use super::models::{
    backup_key, BackupEnvelope, BackupMetadata, BackupTrigger, ConfigKind, ConfigurationRecord,
    BACKUP_INDEX_KEY, FORCE_STATIC_KEY,
};
use super::scratch_tier::ScratchTier;
use super::sync::{decode_payload, ConfigBroadcaster};
use super::tier::StorageTier;
use super::{ConfigError, ConfigResult};

/// Result of a storage integrity sweep
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Manages configuration snapshots and their rotation
pub struct BackupManager {
    coordinator: Arc<StorageCoordinator>,
    /// Direct last-resort read path for backups the chain cannot find
    scratch: Arc<ScratchTier>,
    broadcaster: Arc<ConfigBroadcaster>,
    max_backups: usize,
}

impl BackupManager {
    pub fn new(
        coordinator: Arc<StorageCoordinator>,
        scratch: Arc<ScratchTier>,
        broadcaster: Arc<ConfigBroadcaster>,
        max_backups: usize,
    ) -> Self {
        Self {
            coordinator,
            scratch,
            broadcaster,
            max_backups,
        }
    }

    /// Snapshot the live configuration of a kind
    ///
    /// Fails loudly when no configuration exists; a backup of nothing helps
    /// nobody. Rotation runs immediately after the index update.
    pub async fn create_backup(
        &self,
        kind: ConfigKind,
        trigger: BackupTrigger,
    ) -> ConfigResult<BackupMetadata> {
        let value = match self.coordinator.retrieve(kind.storage_key()).await {
            Some(value) => value,
            None => self
                .scratch
                .retrieve(kind.storage_key())
                .await
                .ok_or_else(|| ConfigError::Backup {
                    message: format!("No {} configuration exists to back up", kind),
                })?,
        };

        let payload = decode_payload(kind, value).ok_or_else(|| ConfigError::Backup {
            message: format!("Stored {} configuration is corrupt; refusing to back it up", kind),
        })?;

        let serialized = serde_json::to_string(&payload).map_err(|e| ConfigError::Serialization {
            message: format!("Failed to serialize backup payload: {}", e),
        })?;

        let now = Utc::now();
        let metadata = BackupMetadata {
            id: backup_key(kind, now, trigger),
            timestamp: now.timestamp_millis(),
            kind,
            trigger,
            size_bytes: serialized.len() as u64,
            content_summary: payload.summary(),
        };

        let envelope = BackupEnvelope {
            metadata: metadata.clone(),
            checksum: blake3::hash(serialized.as_bytes()).to_hex().to_string(),
            data: payload,
        };
        let envelope_value =
            serde_json::to_value(&envelope).map_err(|e| ConfigError::Serialization {
                message: format!("Failed to serialize backup envelope: {}", e),
            })?;

        let outcome = self.coordinator.store(&metadata.id, &envelope_value).await;
        if !outcome.success {
            return Err(ConfigError::Backup {
                message: format!("No storage tier accepted backup {}", metadata.id),
            });
        }

        let mut index = self.load_index().await;
        index.insert(0, metadata.clone());
        index.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.rotate(&mut index).await;
        self.store_index(&index).await?;

        log::info!(
            "created {} backup {} ({} bytes)",
            trigger.as_str(),
            metadata.id,
            metadata.size_bytes
        );
        Ok(metadata)
    }

    /// Restore a snapshot as the live configuration
    ///
    /// The current state is snapshotted first as a manual backup; if that
    /// fails (typically because nothing is stored), the restore proceeds
    /// anyway.
    pub async fn restore_from_backup(&self, id: &str) -> ConfigResult<BackupMetadata> {
        let value = match self.coordinator.retrieve(id).await {
            Some(value) => value,
            None => self
                .scratch
                .retrieve(id)
                .await
                .ok_or_else(|| ConfigError::NotFound {
                    resource: format!("backup {}", id),
                })?,
        };

        let envelope: BackupEnvelope =
            serde_json::from_value(value).map_err(|e| ConfigError::Backup {
                message: format!("Backup {} is corrupt: {}", id, e),
            })?;

        let serialized =
            serde_json::to_string(&envelope.data).map_err(|e| ConfigError::Serialization {
                message: format!("Failed to serialize restored payload: {}", e),
            })?;
        let checksum = blake3::hash(serialized.as_bytes()).to_hex().to_string();
        if checksum != envelope.checksum {
            return Err(ConfigError::Backup {
                message: format!("Backup {} failed checksum verification", id),
            });
        }

        let kind = envelope.metadata.kind;
        if let Err(e) = self.create_backup(kind, BackupTrigger::Manual).await {
            log::warn!("pre-restore snapshot failed (continuing): {}", e);
        }

        self.broadcaster
            .store_configuration(envelope.data.clone())
            .await?;

        log::info!("restored {} configuration from {}", kind, id);
        Ok(envelope.metadata)
    }

    /// List known backups, newest first; never fails
    pub async fn list_backups(&self) -> Vec<BackupMetadata> {
        self.load_index().await
    }

    /// Remove one backup, metadata and payload; missing entries are a no-op
    pub async fn delete_backup(&self, id: &str) -> ConfigResult<()> {
        let mut index = self.load_index().await;
        let before = index.len();
        index.retain(|metadata| metadata.id != id);
        if index.len() != before {
            self.store_index(&index).await?;
        }
        self.coordinator.remove(id).await;
        log::info!("deleted backup {}", id);
        Ok(())
    }

    /// Parse every configuration-like value in storage
    ///
    /// Collects one named error per unparsable value rather than stopping at
    /// the first.
    pub async fn validate_storage_integrity(&self) -> IntegrityReport {
        let mut errors = Vec::new();

        for kind in ConfigKind::ALL {
            if let Some(value) = self.coordinator.retrieve(kind.storage_key()).await {
                match serde_json::from_value::<ConfigurationRecord>(value) {
                    Ok(record) if record.payload.kind() != kind => {
                        errors.push(format!(
                            "{}: holds a {} payload",
                            kind.storage_key(),
                            record.payload.kind()
                        ));
                    }
                    Ok(_) => {}
                    Err(e) => errors.push(format!("{}: {}", kind.storage_key(), e)),
                }
            }
        }

        if let Some(value) = self.coordinator.retrieve(FORCE_STATIC_KEY).await {
            if !value.is_boolean() {
                errors.push(format!("{}: expected a boolean flag", FORCE_STATIC_KEY));
            }
        }

        if let Some(value) = self.coordinator.retrieve(BACKUP_INDEX_KEY).await {
            match serde_json::from_value::<Vec<BackupMetadata>>(value) {
                Ok(index) => {
                    for metadata in index {
                        match self.coordinator.retrieve(&metadata.id).await {
                            Some(value) => {
                                if let Err(e) = serde_json::from_value::<BackupEnvelope>(value) {
                                    errors.push(format!("{}: {}", metadata.id, e));
                                }
                            }
                            None => {
                                errors.push(format!("{}: indexed but missing", metadata.id));
                            }
                        }
                    }
                }
                Err(e) => errors.push(format!("{}: {}", BACKUP_INDEX_KEY, e)),
            }
        }

        IntegrityReport {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    /// Evict entries past the cap, oldest first, payloads included
    async fn rotate(&self, index: &mut Vec<BackupMetadata>) {
        if index.len() <= self.max_backups {
            return;
        }
        let evicted = index.split_off(self.max_backups);
        for old in &evicted {
            self.coordinator.remove(&old.id).await;
        }
        log::info!("rotated out {} old backup(s)", evicted.len());
    }

    async fn load_index(&self) -> Vec<BackupMetadata> {
        let Some(value) = self.coordinator.retrieve(BACKUP_INDEX_KEY).await else {
            return Vec::new();
        };
        match serde_json::from_value(value) {
            Ok(index) => index,
            Err(e) => {
                log::warn!("backup index is unreadable, treating as empty: {}", e);
                Vec::new()
            }
        }
    }

    async fn store_index(&self, index: &[BackupMetadata]) -> ConfigResult<()> {
        let value = serde_json::to_value(index).map_err(|e| ConfigError::Serialization {
            message: format!("Failed to serialize backup index: {}", e),
        })?;
        let outcome = self.coordinator.store(BACKUP_INDEX_KEY, &value).await;
        if !outcome.success {
            return Err(ConfigError::Backup {
                message: "No storage tier accepted the backup index".to_string(),
            });
        }
        Ok(())
    }
}
