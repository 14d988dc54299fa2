//! Integration tests for the assembled configuration pipeline

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use crate::config_manager::models::{COMPREHENSIVE_CONFIG_KEY, IMPACT_CONFIG_KEY};
use crate::config_manager::{
    CacheTier, ComprehensiveConfig, ConfigKind, ConfigManagerConfig, ConfigManagerState,
    ConfigPayload, ScratchTier, SqliteTier, StorageCoordinator, StorageTier, SyncBus,
};
use crate::content::StaticContent;

const COMPREHENSIVE_HEADER: &str = "Section,Type,ID,Language,Field,Content,\
Ecosystem Impact (-50 to +50),Economic Impact (-50 to +50),Community Impact (-50 to +50),Notes";

fn test_config(dir: &Path) -> ConfigManagerConfig {
    ConfigManagerConfig {
        data_dir: dir.to_path_buf(),
        database_path: dir.join("config.db"),
        cache_dir: dir.join("cache"),
        scratch_path: dir.join("scratch.json"),
        export_dir: dir.join("exports"),
        max_backup_count: 10,
        scratch_capacity_bytes: 256 * 1024,
        primary_language: "en".to_string(),
        force_static_override: None,
    }
}

async fn state_at(dir: &Path, bus: Option<SyncBus>) -> ConfigManagerState {
    let state = ConfigManagerState::with_config(test_config(dir), StaticContent::bundled(), bus)
        .await
        .unwrap();
    state.initialize().await.unwrap();
    state
}

/// A valid comprehensive CSV: bundled scenarios in both languages plus a
/// "hint" field the bundle does not define.
fn valid_csv() -> String {
    format!(
        "{}\n\
         SCENARIOS,scenario,plastic-pollution,en,title,Different Title,,,,\n\
         SCENARIOS,scenario,plastic-pollution,en,hint,Look under the pier,,,,\n\
         SCENARIOS,scenario,plastic-pollution,es,title,Otro título,,,,\n\
         UI_ELEMENTS,label,welcome,en,title,Welcome to the Reef,,,,\n",
        COMPREHENSIVE_HEADER
    )
}

#[tokio::test]
async fn test_fallback_chain_promotes_hits() {
    let temp_dir = tempdir().unwrap();
    let sqlite = Arc::new(
        SqliteTier::open(temp_dir.path().join("config.db"))
            .await
            .unwrap(),
    );
    let cache = Arc::new(CacheTier::new(temp_dir.path().join("cache")));
    let scratch = Arc::new(ScratchTier::new(
        temp_dir.path().join("scratch.json"),
        64 * 1024,
    ));

    // Only the last tier holds the value
    scratch
        .store(IMPACT_CONFIG_KEY, &serde_json::json!({"x": 1}))
        .await;

    let coordinator = StorageCoordinator::new(
        vec![sqlite.clone(), cache.clone(), scratch],
        temp_dir.path().join("exports"),
    );

    assert_eq!(
        coordinator.retrieve(IMPACT_CONFIG_KEY).await,
        Some(serde_json::json!({"x": 1}))
    );
    // Both earlier tiers now hold the promoted value
    assert_eq!(
        sqlite.retrieve(IMPACT_CONFIG_KEY).await,
        Some(serde_json::json!({"x": 1}))
    );
    assert_eq!(
        cache.retrieve(IMPACT_CONFIG_KEY).await,
        Some(serde_json::json!({"x": 1}))
    );
}

#[tokio::test]
async fn test_write_independence_without_sqlite() {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    // Point the database at an existing directory so the open fails
    config.database_path = temp_dir.path().join("not-a-database");
    std::fs::create_dir_all(&config.database_path).unwrap();

    let state = ConfigManagerState::with_config(config, StaticContent::bundled(), None)
        .await
        .unwrap();
    state.initialize().await.unwrap();

    let outcome = state
        .broadcaster()
        .store_configuration(ConfigPayload::Impact(Default::default()))
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.stored_in, vec!["cache", "scratch"]);

    assert!(state.coordinator().retrieve(IMPACT_CONFIG_KEY).await.is_some());

    let health = state.coordinator().check_health().await;
    assert!(!health.is_healthy("sqlite"));
    assert!(health.is_healthy("cache"));
    assert!(health.is_healthy("scratch"));

    state.shutdown().await;
}

#[tokio::test]
async fn test_backup_rotation_evicts_oldest() {
    let temp_dir = tempdir().unwrap();
    let state = state_at(temp_dir.path(), None).await;

    state
        .broadcaster()
        .store_configuration(ConfigPayload::Impact(Default::default()))
        .await
        .unwrap();

    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(
            state
                .backups()
                .create_backup(ConfigKind::Impact, crate::config_manager::BackupTrigger::Manual)
                .await
                .unwrap()
                .id,
        );
    }
    assert_eq!(state.backups().list_backups().await.len(), 10);

    let eleventh = state
        .backups()
        .create_backup(ConfigKind::Impact, crate::config_manager::BackupTrigger::Manual)
        .await
        .unwrap();

    let listed = state.backups().list_backups().await;
    assert_eq!(listed.len(), 10);
    assert!(!listed.iter().any(|m| m.id == ids[0]), "oldest was evicted");
    assert!(listed.iter().any(|m| m.id == eleventh.id));

    state.shutdown().await;
}

#[tokio::test]
async fn test_import_then_static_first_resolution() {
    let temp_dir = tempdir().unwrap();
    let state = state_at(temp_dir.path(), None).await;

    let report = state.importer().import_comprehensive(&valid_csv()).await.unwrap();
    assert_eq!(report.errors.len(), 0);
    assert_eq!(report.imported_rows, 4);

    // Give the update event a moment to reach the resolver
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Static text exists, so the override title is never consulted
    assert_eq!(
        state.resolver().scenario_text("plastic-pollution", "title", "en"),
        Some("Plastic on the Shore".to_string())
    );
    // The bundle has no "hint" field, so the override fills the gap
    assert_eq!(
        state.resolver().scenario_text("plastic-pollution", "hint", "en"),
        Some("Look under the pier".to_string())
    );
    // UI text is override-first
    assert_eq!(
        state.resolver().ui_text("welcome", "title", "en"),
        Some("Welcome to the Reef".to_string())
    );

    state.shutdown().await;
}

#[tokio::test]
async fn test_invalid_override_is_quarantined() {
    let temp_dir = tempdir().unwrap();
    let state = state_at(temp_dir.path(), None).await;

    let mut config = ComprehensiveConfig::default();
    config
        .scenarios
        .entry("ghost-scenario".to_string())
        .or_default()
        .entry("en".to_string())
        .or_default()
        .insert("title".to_string(), "Boo".to_string());

    // Committing the payload fires the update event; the resolver reloads,
    // detects the unknown id, and quarantines everything.
    state
        .broadcaster()
        .store_configuration(ConfigPayload::Comprehensive(config))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!state.resolver().override_loaded());
    assert_eq!(
        state.coordinator().retrieve(COMPREHENSIVE_CONFIG_KEY).await,
        None
    );
    // Static content still resolves
    assert_eq!(
        state.resolver().scenario_text("plastic-pollution", "title", "en"),
        Some("Plastic on the Shore".to_string())
    );

    state.shutdown().await;
}

#[tokio::test]
async fn test_restore_is_idempotent() {
    let temp_dir = tempdir().unwrap();
    let state = state_at(temp_dir.path(), None).await;

    state.importer().import_comprehensive(&valid_csv()).await.unwrap();
    let snapshot = state
        .backups()
        .create_backup(
            ConfigKind::Comprehensive,
            crate::config_manager::BackupTrigger::Manual,
        )
        .await
        .unwrap();

    // Live configuration moves on
    let newer_csv = format!(
        "{}\nSCENARIOS,scenario,overfishing,en,title,Newer content,,,,\n",
        COMPREHENSIVE_HEADER
    );
    state.importer().import_comprehensive(&newer_csv).await.unwrap();

    state.backups().restore_from_backup(&snapshot.id).await.unwrap();
    let first_restore = serde_json::to_string(
        &state.broadcaster().cached(ConfigKind::Comprehensive).unwrap(),
    )
    .unwrap();

    // A new backup in between must not change what a second restore yields
    state
        .backups()
        .create_backup(
            ConfigKind::Comprehensive,
            crate::config_manager::BackupTrigger::Manual,
        )
        .await
        .unwrap();
    state.backups().restore_from_backup(&snapshot.id).await.unwrap();
    let second_restore = serde_json::to_string(
        &state.broadcaster().cached(ConfigKind::Comprehensive).unwrap(),
    )
    .unwrap();

    assert_eq!(first_restore, second_restore);

    state.shutdown().await;
}

#[tokio::test]
async fn test_second_context_syncs_without_storage() {
    let temp_dir = tempdir().unwrap();
    let bus = SyncBus::new(32);

    let ctx1 = state_at(&temp_dir.path().join("ctx1"), Some(bus.clone())).await;
    ctx1.importer().import_comprehensive(&valid_csv()).await.unwrap();

    // Context 2 starts afterwards with its own empty storage
    let ctx2 = state_at(&temp_dir.path().join("ctx2"), Some(bus.clone())).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let synced = ctx2.broadcaster().cached(ConfigKind::Comprehensive);
    assert_eq!(synced, ctx1.broadcaster().cached(ConfigKind::Comprehensive));
    assert!(synced.is_some());

    // Context 2 never wrote its own tiers
    assert_eq!(
        ctx2.coordinator().retrieve(COMPREHENSIVE_CONFIG_KEY).await,
        None
    );

    ctx1.shutdown().await;
    ctx2.shutdown().await;
}

#[tokio::test]
async fn test_cross_context_update_broadcast() {
    let temp_dir = tempdir().unwrap();
    let bus = SyncBus::new(32);

    let ctx1 = state_at(&temp_dir.path().join("ctx1"), Some(bus.clone())).await;
    let ctx2 = state_at(&temp_dir.path().join("ctx2"), Some(bus.clone())).await;

    ctx1.importer().import_comprehensive(&valid_csv()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Context 2's broadcast cache reflects the update without re-reading
    // storage; last broadcast wins.
    assert_eq!(
        ctx2.broadcaster().cached(ConfigKind::Comprehensive),
        ctx1.broadcaster().cached(ConfigKind::Comprehensive)
    );
    assert_eq!(
        ctx2.resolver().scenario_text("plastic-pollution", "title", "en"),
        Some("Plastic on the Shore".to_string())
    );

    ctx1.shutdown().await;
    ctx2.shutdown().await;
}

#[tokio::test]
async fn test_rejected_import_commits_nothing() {
    let temp_dir = tempdir().unwrap();
    let state = state_at(temp_dir.path(), None).await;

    // Spanish-only content violates the required-language rule
    let csv = format!(
        "{}\nSCENARIOS,scenario,plastic-pollution,es,title,Sólo español,,,,\n",
        COMPREHENSIVE_HEADER
    );
    let result = state.importer().import_comprehensive(&csv).await;
    assert!(result.is_err());

    assert_eq!(
        state.coordinator().retrieve(COMPREHENSIVE_CONFIG_KEY).await,
        None
    );
    assert!(state.broadcaster().cached(ConfigKind::Comprehensive).is_none());

    state.shutdown().await;
}

#[tokio::test]
async fn test_import_creates_pre_import_backup() {
    let temp_dir = tempdir().unwrap();
    let state = state_at(temp_dir.path(), None).await;

    // First import has nothing to back up
    state.importer().import_comprehensive(&valid_csv()).await.unwrap();
    assert!(state.backups().list_backups().await.is_empty());

    // The second import snapshots the first configuration
    state.importer().import_comprehensive(&valid_csv()).await.unwrap();
    let backups = state.backups().list_backups().await;
    assert_eq!(backups.len(), 1);
    assert_eq!(
        backups[0].trigger,
        crate::config_manager::BackupTrigger::AutoImport
    );

    state.shutdown().await;
}

#[tokio::test]
async fn test_complete_configuration_pipeline() {
    let temp_dir = tempdir().unwrap();
    let state = state_at(temp_dir.path(), None).await;

    // 1. Import content
    let report = state.importer().import_comprehensive(&valid_csv()).await.unwrap();
    assert_eq!(report.imported_rows, 4);

    // 2. All tiers healthy
    let health = state.coordinator().check_health().await;
    assert!(health.all_healthy());

    // 3. Manual backup
    let metadata = state
        .backups()
        .create_backup(
            ConfigKind::Comprehensive,
            crate::config_manager::BackupTrigger::Manual,
        )
        .await
        .unwrap();
    assert!(metadata.content_summary.contains("scenario"));

    // 4. Storage integrity is clean
    let integrity = state.backups().validate_storage_integrity().await;
    assert!(integrity.is_valid, "errors: {:?}", integrity.errors);

    // 5. Download export lands on disk
    assert!(state
        .coordinator()
        .create_download_backup(COMPREHENSIVE_CONFIG_KEY)
        .await
        .unwrap());
    assert!(std::fs::read_dir(temp_dir.path().join("exports"))
        .unwrap()
        .count()
        > 0);

    // 6. Force-static hides the override but keeps bundled text
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(state
        .resolver()
        .scenario_text("plastic-pollution", "hint", "en")
        .is_some());
    state.resolver().set_force_static(true).await.unwrap();
    assert_eq!(
        state.resolver().scenario_text("plastic-pollution", "hint", "en"),
        None
    );
    assert_eq!(
        state.resolver().scenario_text("plastic-pollution", "title", "en"),
        Some("Plastic on the Shore".to_string())
    );

    state.shutdown().await;
}
