//! Configuration management for the Tidepool kiosk
//!
//! This module provides the kiosk's offline-durable configuration store:
//! - Three independently-failing storage tiers behind one coordinator
//! - Cross-context synchronization over an in-process broadcast bus
//! - Static-first content resolution with invalid-data quarantine
//! - Rotated, checksummed backups with restore
//! - Live CSV re-configuration

pub mod backup;
pub mod cache_tier;
pub mod coordinator;
pub mod import;
pub mod models;
pub mod resolver;
pub mod scratch_tier;
pub mod sqlite_tier;
pub mod sync;
pub mod tier;

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::content::StaticContent;

pub use backup::{BackupManager, IntegrityReport};
pub use cache_tier::CacheTier;
pub use coordinator::{StorageCoordinator, StoreOutcome};
pub use import::{
    parse_comprehensive_csv, parse_impact_csv, validate_comprehensive, ConfigImporter,
    ImportReport,
};
pub use models::{
    BackupMetadata, BackupTrigger, ComprehensiveConfig, ConfigKind, ConfigPayload,
    ConfigurationRecord, ImpactConfig, ImpactValues, StorageHealth,
};
pub use resolver::ContentResolver;
pub use scratch_tier::ScratchTier;
pub use sqlite_tier::SqliteTier;
pub use sync::{ConfigBroadcaster, SyncBus, UpdateEvent};
pub use tier::StorageTier;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Error type for configuration operations
///
/// Tier-level failures never surface here; they are logged and converted to
/// boolean/health signals at the tier boundary. These are the errors a user
/// action can meaningfully react to.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Backup error: {message}")]
    Backup { message: String },

    #[error("Import rejected: {message}")]
    Import { message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Configuration for the kiosk's configuration store itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigManagerConfig {
    /// Base directory for all stored data
    pub data_dir: PathBuf,
    /// SQLite database file (tier A)
    pub database_path: PathBuf,
    /// Cache namespace parent directory (tier B)
    pub cache_dir: PathBuf,
    /// Scratch store file (tier C)
    pub scratch_path: PathBuf,
    /// Directory for user-facing download exports
    pub export_dir: PathBuf,
    /// Maximum number of backups kept by rotation
    pub max_backup_count: usize,
    /// Byte cap for the scratch store file
    pub scratch_capacity_bytes: usize,
    /// Language every imported scenario must cover
    pub primary_language: String,
    /// One-shot session override of the persisted force-static flag
    pub force_static_override: Option<bool>,
}

impl Default for ConfigManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("tidepool_data"),
            database_path: PathBuf::from("tidepool_data/config.db"),
            cache_dir: PathBuf::from("tidepool_data/cache"),
            scratch_path: PathBuf::from("tidepool_data/scratch.json"),
            export_dir: PathBuf::from("tidepool_data/exports"),
            max_backup_count: 10,
            scratch_capacity_bytes: 512 * 1024,
            primary_language: "en".to_string(),
            force_static_override: None,
        }
    }
}

/// Validate configuration parameters
pub fn validate_config(config: &ConfigManagerConfig) -> ConfigResult<()> {
    if config.max_backup_count == 0 {
        return Err(ConfigError::Configuration {
            message: "max_backup_count must be greater than 0".to_string(),
        });
    }

    if config.scratch_capacity_bytes == 0 {
        return Err(ConfigError::Configuration {
            message: "scratch_capacity_bytes must be greater than 0".to_string(),
        });
    }

    if config.primary_language.is_empty() {
        return Err(ConfigError::Configuration {
            message: "primary_language must not be empty".to_string(),
        });
    }

    Ok(())
}

/// The assembled configuration service for one kiosk context
///
/// Explicitly constructed and injected — no module-load side effects. Call
/// [`ConfigManagerState::initialize`] before use and
/// [`ConfigManagerState::shutdown`] when the context closes.
pub struct ConfigManagerState {
    config: ConfigManagerConfig,
    sqlite: Arc<SqliteTier>,
    coordinator: Arc<StorageCoordinator>,
    broadcaster: Arc<ConfigBroadcaster>,
    resolver: Arc<ContentResolver>,
    backup: Arc<BackupManager>,
    importer: Arc<ConfigImporter>,
    reload_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigManagerState {
    /// Create a service with default configuration and the bundled content
    pub async fn new(bus: Option<SyncBus>) -> ConfigResult<Self> {
        Self::with_config(ConfigManagerConfig::default(), StaticContent::bundled(), bus).await
    }

    /// Create a service with custom configuration, content, and sync bus
    pub async fn with_config(
        config: ConfigManagerConfig,
        content: Arc<StaticContent>,
        bus: Option<SyncBus>,
    ) -> ConfigResult<Self> {
        validate_config(&config)?;
        create_directories(&config)?;

        // A failed open is soft: the tier stays listed but answers nothing,
        // and the coordinator degrades to the remaining tiers.
        let sqlite = match SqliteTier::open(&config.database_path).await {
            Ok(tier) => Arc::new(tier),
            Err(e) => {
                log::warn!("sqlite tier unavailable: {}", e);
                Arc::new(SqliteTier::unavailable())
            }
        };
        let cache = Arc::new(CacheTier::new(&config.cache_dir));
        let scratch = Arc::new(ScratchTier::new(
            &config.scratch_path,
            config.scratch_capacity_bytes,
        ));

        let tiers: Vec<Arc<dyn StorageTier>> = vec![sqlite.clone(), cache, scratch.clone()];
        let coordinator = Arc::new(StorageCoordinator::new(tiers, config.export_dir.clone()));
        let broadcaster = Arc::new(ConfigBroadcaster::new(coordinator.clone(), bus));
        let resolver = Arc::new(ContentResolver::new(
            content,
            coordinator.clone(),
            scratch.clone(),
            broadcaster.clone(),
            config.force_static_override,
        ));
        let backup = Arc::new(BackupManager::new(
            coordinator.clone(),
            scratch,
            broadcaster.clone(),
            config.max_backup_count,
        ));
        let importer = Arc::new(ConfigImporter::new(
            broadcaster.clone(),
            backup.clone(),
            config.primary_language.clone(),
        ));

        Ok(Self {
            config,
            sqlite,
            coordinator,
            broadcaster,
            resolver,
            backup,
            importer,
            reload_task: Mutex::new(None),
        })
    }

    /// Start the service: sync, initial loads, and event wiring
    pub async fn initialize(&self) -> ConfigResult<()> {
        // Subscribe before anything fires so no early event is missed
        let mut events = self.broadcaster.subscribe_updates();

        self.broadcaster.initialize().await;
        self.resolver.initialize().await;

        let resolver = self.resolver.clone();
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(UpdateEvent::ComprehensiveConfigUpdated)
                    | Ok(UpdateEvent::CacheInvalidated) => resolver.reload().await,
                    Ok(UpdateEvent::ImpactConfigUpdated) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("resolver event listener lagged, dropped {} events", missed);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.reload_task.lock() = Some(handle);

        log::info!("configuration manager initialized");
        Ok(())
    }

    /// Stop background tasks and close the database
    pub async fn shutdown(&self) {
        if let Some(handle) = self.reload_task.lock().take() {
            handle.abort();
        }
        self.broadcaster.shutdown();
        self.sqlite.close().await;
        log::info!("configuration manager shut down");
    }

    pub fn config(&self) -> &ConfigManagerConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<StorageCoordinator> {
        &self.coordinator
    }

    pub fn broadcaster(&self) -> &Arc<ConfigBroadcaster> {
        &self.broadcaster
    }

    pub fn resolver(&self) -> &Arc<ContentResolver> {
        &self.resolver
    }

    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.backup
    }

    pub fn importer(&self) -> &Arc<ConfigImporter> {
        &self.importer
    }
}

fn create_directories(config: &ConfigManagerConfig) -> ConfigResult<()> {
    let mut dirs = vec![
        config.data_dir.clone(),
        config.cache_dir.clone(),
        config.export_dir.clone(),
    ];
    if let Some(parent) = config.database_path.parent() {
        dirs.push(parent.to_path_buf());
    }
    if let Some(parent) = config.scratch_path.parent() {
        dirs.push(parent.to_path_buf());
    }

    for dir in dirs {
        if dir.as_os_str().is_empty() {
            continue;
        }
        std::fs::create_dir_all(&dir).map_err(|e| ConfigError::Storage {
            message: format!("Failed to create directory {}: {}", dir.display(), e),
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = ConfigManagerConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.max_backup_count, 10);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ConfigManagerConfig::default();
        config.max_backup_count = 0;
        assert!(validate_config(&config).is_err());

        config.max_backup_count = 10;
        config.primary_language = String::new();
        assert!(validate_config(&config).is_err());
    }
}
