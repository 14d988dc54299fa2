//! Content override resolution
//!
//! Decides, for every text lookup, whether the kiosk renders bundled content
//! or an admin-supplied override. Scenario and choice text is static-first:
//! an override is consulted only where the bundle has no text at all. UI
//! text is the other way around, override-first with a built-in fallback
//! table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::content::StaticContent;

use super::coordinator::StorageCoordinator;
use super::models::{ComprehensiveConfig, ConfigKind, ConfigPayload, FORCE_STATIC_KEY};
use super::scratch_tier::ScratchTier;
use super::sync::{decode_payload, ConfigBroadcaster};
use super::tier::StorageTier;
use super::{ConfigError, ConfigResult};

/// Resolves content lookups against the bundle and the loaded override
pub struct ContentResolver {
    content: Arc<StaticContent>,
    coordinator: Arc<StorageCoordinator>,
    /// Direct last-resort read path, used when the coordinator chain misses
    scratch: Arc<ScratchTier>,
    broadcaster: Arc<ConfigBroadcaster>,
    override_payload: RwLock<Option<ComprehensiveConfig>>,
    force_static: AtomicBool,
    /// One-shot session override of the persisted flag (startup parameter)
    session_force_static: Option<bool>,
}

impl ContentResolver {
    pub fn new(
        content: Arc<StaticContent>,
        coordinator: Arc<StorageCoordinator>,
        scratch: Arc<ScratchTier>,
        broadcaster: Arc<ConfigBroadcaster>,
        session_force_static: Option<bool>,
    ) -> Self {
        Self {
            content,
            coordinator,
            scratch,
            broadcaster,
            override_payload: RwLock::new(None),
            force_static: AtomicBool::new(session_force_static.unwrap_or(false)),
            session_force_static,
        }
    }

    /// Load the force-static flag and the override payload
    pub async fn initialize(&self) {
        if self.session_force_static.is_none() {
            if let Some(value) = self.coordinator.retrieve(FORCE_STATIC_KEY).await {
                if let Some(enabled) = value.as_bool() {
                    self.force_static.store(enabled, Ordering::Relaxed);
                }
            }
        }
        self.reload().await;
    }

    /// Whether force-static mode is active
    pub fn force_static(&self) -> bool {
        self.force_static.load(Ordering::Relaxed)
    }

    /// Toggle force-static mode; the flag is sticky across sessions
    pub async fn set_force_static(&self, enabled: bool) -> ConfigResult<()> {
        let outcome = self
            .coordinator
            .store(FORCE_STATIC_KEY, &serde_json::json!(enabled))
            .await;
        if !outcome.success {
            return Err(ConfigError::Storage {
                message: "No storage tier accepted the force-static flag".to_string(),
            });
        }
        self.force_static.store(enabled, Ordering::Relaxed);
        log::info!("force-static mode {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Whether an override payload is currently loaded
    pub fn override_loaded(&self) -> bool {
        self.override_payload.read().is_some()
    }

    /// Re-run the full load chain and validate what it finds
    ///
    /// Called on every update or invalidation event; the payload is replaced
    /// wholesale rather than patched incrementally.
    pub async fn reload(&self) {
        match self.load_override().await {
            Some(config) => {
                let unknown = self.unknown_scenario_ids(&config);
                if unknown.is_empty() {
                    *self.override_payload.write() = Some(config);
                    log::debug!("override payload loaded");
                } else {
                    log::warn!(
                        "override references unknown scenarios {:?}; quarantining stored configuration",
                        unknown
                    );
                    self.quarantine().await;
                }
            }
            None => {
                *self.override_payload.write() = None;
            }
        }
    }

    /// Check the stored override without committing it
    pub async fn detect_invalid_cached_data(&self) -> bool {
        match self.load_override().await {
            Some(config) => !self.unknown_scenario_ids(&config).is_empty(),
            None => false,
        }
    }

    /// Scenario text: static-first
    pub fn scenario_text(&self, content_id: &str, field: &str, language: &str) -> Option<String> {
        let static_text = self.content.scenario_field(language, content_id, field);
        if self.force_static() {
            return static_text;
        }

        let overrides = self.override_payload.read();
        let Some(config) = overrides.as_ref() else {
            return static_text;
        };
        if static_text.is_some() {
            // Static always wins when both exist; overrides only fill gaps
            return static_text;
        }

        lookup_scenario_override(config, content_id, language, field)
    }

    /// Choice text: static-first, overrides keyed by `scenarioId_choiceId`
    pub fn choice_text(
        &self,
        content_id: &str,
        choice_id: &str,
        field: &str,
        language: &str,
    ) -> Option<String> {
        let static_text = self
            .content
            .choice_field(language, content_id, choice_id, field);
        if self.force_static() {
            return static_text;
        }

        let overrides = self.override_payload.read();
        let Some(config) = overrides.as_ref() else {
            return static_text;
        };
        if static_text.is_some() {
            return static_text;
        }

        let compound = format!("{}_{}", content_id, choice_id);
        lookup_scenario_override(config, &compound, language, field)
    }

    /// UI text: override-first, then the built-in fallback table
    pub fn ui_text(&self, screen_id: &str, element_id: &str, language: &str) -> Option<String> {
        if !self.force_static() {
            let overrides = self.override_payload.read();
            if let Some(config) = overrides.as_ref() {
                let from_override = config
                    .ui_elements
                    .get(screen_id)
                    .and_then(|elements| elements.get(element_id))
                    .and_then(|languages| languages.get(language))
                    .cloned();
                if from_override.is_some() {
                    return from_override;
                }
            }
        }

        self.content.fallback_ui_text(screen_id, element_id, language)
    }

    /// Coordinator chain first, then the scratch tier directly
    async fn load_override(&self) -> Option<ComprehensiveConfig> {
        let value = match self
            .coordinator
            .retrieve(ConfigKind::Comprehensive.storage_key())
            .await
        {
            Some(value) => value,
            None => {
                self.scratch
                    .retrieve(ConfigKind::Comprehensive.storage_key())
                    .await?
            }
        };

        match decode_payload(ConfigKind::Comprehensive, value)? {
            ConfigPayload::Comprehensive(config) => Some(config),
            ConfigPayload::Impact(_) => None,
        }
    }

    /// Scenario ids referenced by the override that the bundle does not know
    ///
    /// Compound `scenarioId_choiceId` keys are valid when their parent id is
    /// known.
    fn unknown_scenario_ids(&self, config: &ComprehensiveConfig) -> Vec<String> {
        let known = self.content.known_scenario_ids();
        config
            .scenarios
            .keys()
            .filter(|id| {
                let parent = id
                    .split_once('_')
                    .map(|(parent, _)| parent)
                    .unwrap_or(id.as_str());
                !known.contains(id.as_str()) && !known.contains(parent)
            })
            .cloned()
            .collect()
    }

    /// Wholesale invalidation: partial repair cannot tell fresh admin content
    /// apart from leftover stale content, so everything goes.
    async fn quarantine(&self) {
        self.coordinator.clear_all().await;
        *self.override_payload.write() = None;
        self.broadcaster.invalidate_cache();
    }
}

fn lookup_scenario_override(
    config: &ComprehensiveConfig,
    content_id: &str,
    language: &str,
    field: &str,
) -> Option<String> {
    config
        .scenarios
        .get(content_id)
        .and_then(|languages| languages.get(language))
        .and_then(|fields| fields.get(field))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_manager::cache_tier::CacheTier;
    use crate::content::{Choice, Scenario};
    use crate::config_manager::models::{ImpactValues, COMPREHENSIVE_CONFIG_KEY};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn small_bundle() -> Arc<StaticContent> {
        let scenario = Scenario {
            id: "plastic-pollution".to_string(),
            fields: [
                ("title".to_string(), "Plastic on the Shore".to_string()),
                ("question".to_string(), "What should the town do?".to_string()),
            ]
            .into_iter()
            .collect(),
            choices: vec![Choice {
                id: "organize-cleanup".to_string(),
                fields: [("title".to_string(), "Organize a cleanup".to_string())]
                    .into_iter()
                    .collect(),
                impacts: ImpactValues::default(),
            }],
        };
        let mut languages = BTreeMap::new();
        languages.insert("en".to_string(), vec![scenario]);
        Arc::new(StaticContent::new(languages))
    }

    struct Fixture {
        resolver: ContentResolver,
        coordinator: Arc<StorageCoordinator>,
        _temp_dir: tempfile::TempDir,
    }

    fn fixture(session_force_static: Option<bool>) -> Fixture {
        let temp_dir = tempdir().unwrap();
        let scratch = Arc::new(ScratchTier::new(
            temp_dir.path().join("scratch.json"),
            64 * 1024,
        ));
        let coordinator = Arc::new(StorageCoordinator::new(
            vec![
                Arc::new(CacheTier::new(temp_dir.path().join("cache"))),
                scratch.clone(),
            ],
            temp_dir.path().join("exports"),
        ));
        let broadcaster = Arc::new(ConfigBroadcaster::new(coordinator.clone(), None));
        let resolver = ContentResolver::new(
            small_bundle(),
            coordinator.clone(),
            scratch,
            broadcaster,
            session_force_static,
        );
        Fixture {
            resolver,
            coordinator,
            _temp_dir: temp_dir,
        }
    }

    fn override_with(entries: &[(&str, &str, &str, &str)]) -> ConfigPayload {
        let mut config = ComprehensiveConfig::default();
        for (id, language, field, text) in entries {
            config
                .scenarios
                .entry((*id).to_string())
                .or_default()
                .entry((*language).to_string())
                .or_default()
                .insert((*field).to_string(), (*text).to_string());
        }
        ConfigPayload::Comprehensive(config)
    }

    async fn store_override(coordinator: &StorageCoordinator, payload: &ConfigPayload) {
        let record = crate::config_manager::models::ConfigurationRecord {
            key: COMPREHENSIVE_CONFIG_KEY.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            payload: payload.clone(),
        };
        let value = serde_json::to_value(&record).unwrap();
        coordinator.store(COMPREHENSIVE_CONFIG_KEY, &value).await;
    }

    #[tokio::test]
    async fn test_static_wins_over_override() {
        let fixture = fixture(None);
        store_override(
            &fixture.coordinator,
            &override_with(&[("plastic-pollution", "en", "title", "OVERRIDDEN")]),
        )
        .await;
        fixture.resolver.initialize().await;

        assert_eq!(
            fixture.resolver.scenario_text("plastic-pollution", "title", "en"),
            Some("Plastic on the Shore".to_string())
        );
    }

    #[tokio::test]
    async fn test_override_fills_static_gap() {
        let fixture = fixture(None);
        store_override(
            &fixture.coordinator,
            &override_with(&[("plastic-pollution", "en", "hint", "Look under the pier")]),
        )
        .await;
        fixture.resolver.initialize().await;

        // No bundled "hint" field, so the override is consulted
        assert_eq!(
            fixture.resolver.scenario_text("plastic-pollution", "hint", "en"),
            Some("Look under the pier".to_string())
        );
    }

    #[tokio::test]
    async fn test_force_static_ignores_override() {
        let fixture = fixture(Some(true));
        store_override(
            &fixture.coordinator,
            &override_with(&[("plastic-pollution", "en", "hint", "Look under the pier")]),
        )
        .await;
        fixture.resolver.initialize().await;

        assert_eq!(
            fixture.resolver.scenario_text("plastic-pollution", "hint", "en"),
            None
        );
    }

    #[tokio::test]
    async fn test_choice_text_compound_key() {
        let fixture = fixture(None);
        store_override(
            &fixture.coordinator,
            &override_with(&[(
                "plastic-pollution_organize-cleanup",
                "en",
                "outcome",
                "The beach sparkles",
            )]),
        )
        .await;
        fixture.resolver.initialize().await;

        // Bundled choice has no "outcome" field; the compound override fills it
        assert_eq!(
            fixture
                .resolver
                .choice_text("plastic-pollution", "organize-cleanup", "outcome", "en"),
            Some("The beach sparkles".to_string())
        );
        // But the bundled title still wins
        assert_eq!(
            fixture
                .resolver
                .choice_text("plastic-pollution", "organize-cleanup", "title", "en"),
            Some("Organize a cleanup".to_string())
        );
    }

    #[tokio::test]
    async fn test_ui_text_is_override_first() {
        let fixture = fixture(None);
        let mut config = ComprehensiveConfig::default();
        config
            .ui_elements
            .entry("welcome".to_string())
            .or_default()
            .entry("title".to_string())
            .or_default()
            .insert("en".to_string(), "Welcome to the Reef".to_string());
        store_override(&fixture.coordinator, &ConfigPayload::Comprehensive(config)).await;
        fixture.resolver.initialize().await;

        assert_eq!(
            fixture.resolver.ui_text("welcome", "title", "en"),
            Some("Welcome to the Reef".to_string())
        );
        // Not overridden: falls back to the built-in table
        assert_eq!(
            fixture.resolver.ui_text("welcome", "start-button", "en"),
            Some("Touch to begin".to_string())
        );
        assert_eq!(fixture.resolver.ui_text("welcome", "missing", "en"), None);
    }

    #[tokio::test]
    async fn test_unknown_scenario_quarantines_everything() {
        let fixture = fixture(None);
        store_override(
            &fixture.coordinator,
            &override_with(&[("ghost-scenario", "en", "title", "Boo")]),
        )
        .await;

        assert!(fixture.resolver.detect_invalid_cached_data().await);
        fixture.resolver.initialize().await;

        assert!(!fixture.resolver.override_loaded());
        assert_eq!(
            fixture.coordinator.retrieve(COMPREHENSIVE_CONFIG_KEY).await,
            None
        );
    }

    #[tokio::test]
    async fn test_compound_key_with_known_parent_is_valid() {
        let fixture = fixture(None);
        store_override(
            &fixture.coordinator,
            &override_with(&[(
                "plastic-pollution_organize-cleanup",
                "en",
                "title",
                "Clean it up",
            )]),
        )
        .await;

        assert!(!fixture.resolver.detect_invalid_cached_data().await);
        fixture.resolver.initialize().await;
        assert!(fixture.resolver.override_loaded());
    }

    #[tokio::test]
    async fn test_force_static_flag_persists() {
        let fixture = fixture(None);
        fixture.resolver.initialize().await;
        assert!(!fixture.resolver.force_static());

        fixture.resolver.set_force_static(true).await.unwrap();
        assert!(fixture.resolver.force_static());

        // A fresh resolver over the same storage picks the flag back up
        let scratch = Arc::new(ScratchTier::new(
            fixture._temp_dir.path().join("scratch.json"),
            64 * 1024,
        ));
        let broadcaster = Arc::new(ConfigBroadcaster::new(fixture.coordinator.clone(), None));
        let fresh = ContentResolver::new(
            small_bundle(),
            fixture.coordinator.clone(),
            scratch,
            broadcaster,
            None,
        );
        fresh.initialize().await;
        assert!(fresh.force_static());
    }
}
