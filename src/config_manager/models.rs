//! Data models for the kiosk configuration store
//!
//! This module defines the configuration payloads, the per-tier storage
//! envelope, storage health reporting, and backup metadata.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Logical key for the comprehensive (scenarios + UI text) configuration
pub const COMPREHENSIVE_CONFIG_KEY: &str = "comprehensiveConfiguration";

/// Logical key for the legacy impact-only configuration
pub const IMPACT_CONFIG_KEY: &str = "impactConfiguration";

/// Logical key for the ordered backup index
pub const BACKUP_INDEX_KEY: &str = "backup_index";

/// Logical key for the persisted force-static flag
pub const FORCE_STATIC_KEY: &str = "forceStaticMode";

/// Prefix shared by all backup payload keys
pub const BACKUP_KEY_PREFIX: &str = "backup_";

/// The configuration type stored under a logical key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigKind {
    Comprehensive,
    Impact,
}

impl ConfigKind {
    pub const ALL: [ConfigKind; 2] = [ConfigKind::Comprehensive, ConfigKind::Impact];

    pub fn as_str(self) -> &'static str {
        match self {
            ConfigKind::Comprehensive => "comprehensive",
            ConfigKind::Impact => "impact",
        }
    }

    /// The logical storage key holding the live configuration of this kind
    pub fn storage_key(self) -> &'static str {
        match self {
            ConfigKind::Comprehensive => COMPREHENSIVE_CONFIG_KEY,
            ConfigKind::Impact => IMPACT_CONFIG_KEY,
        }
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-choice impact deltas, each clamped to [-50, 50] at the import boundary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactValues {
    pub ecosystem: i32,
    pub economic: i32,
    pub community: i32,
}

/// Admin-imported scenario and UI text overrides
///
/// `scenarios` is keyed by content id (a bare scenario id or a compound
/// `scenarioId_choiceId`), then language, then field name. `ui_elements` is
/// keyed by screen id, element id, language.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComprehensiveConfig {
    pub scenarios: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
    #[serde(rename = "uiElements")]
    pub ui_elements: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
}

impl ComprehensiveConfig {
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty() && self.ui_elements.is_empty()
    }
}

/// Legacy impact-only overrides, keyed by scenario id then choice id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactConfig {
    pub scenarios: BTreeMap<String, BTreeMap<String, ImpactValues>>,
}

/// A configuration payload tagged by its kind
///
/// Payloads are deserialized into this type at the storage boundary, so a
/// stored blob that does not match the schema is rejected there instead of
/// flowing untyped through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "config", rename_all = "lowercase")]
pub enum ConfigPayload {
    Comprehensive(ComprehensiveConfig),
    Impact(ImpactConfig),
}

impl ConfigPayload {
    pub fn kind(&self) -> ConfigKind {
        match self {
            ConfigPayload::Comprehensive(_) => ConfigKind::Comprehensive,
            ConfigPayload::Impact(_) => ConfigKind::Impact,
        }
    }

    /// Human-readable content summary used in backup metadata
    pub fn summary(&self) -> String {
        match self {
            ConfigPayload::Comprehensive(config) => format!(
                "{} scenario entries, {} UI screens",
                config.scenarios.len(),
                config.ui_elements.len()
            ),
            ConfigPayload::Impact(config) => {
                format!("{} scenarios with impact overrides", config.scenarios.len())
            }
        }
    }
}

/// One logical configuration record as seen by callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationRecord {
    pub key: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub version: String,
    pub payload: ConfigPayload,
}

/// The envelope each tier stamps independently around a stored value
///
/// There is no cross-tier transaction; tiers may legitimately hold envelopes
/// with different timestamps for the same key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierEnvelope {
    pub timestamp: i64,
    pub version: String,
    pub data: serde_json::Value,
}

impl TierEnvelope {
    pub fn wrap(data: &serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            data: data.clone(),
        }
    }
}

/// Transient per-tier health report, recomputed on demand and never persisted
#[derive(Debug, Clone, Default)]
pub struct StorageHealth {
    /// One entry per tier in coordinator order
    pub tiers: Vec<(&'static str, bool)>,
    pub errors: Vec<String>,
}

impl StorageHealth {
    pub fn is_healthy(&self, tier_name: &str) -> bool {
        self.tiers
            .iter()
            .any(|(name, healthy)| *name == tier_name && *healthy)
    }

    pub fn all_healthy(&self) -> bool {
        !self.tiers.is_empty() && self.tiers.iter().all(|(_, healthy)| *healthy)
    }
}

/// What caused a backup to be created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupTrigger {
    Manual,
    AutoImport,
}

impl BackupTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupTrigger::Manual => "manual",
            BackupTrigger::AutoImport => "auto-import",
        }
    }
}

/// Backup metadata, never mutated after creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub kind: ConfigKind,
    pub trigger: BackupTrigger,
    pub size_bytes: u64,
    pub content_summary: String,
}

/// A stored backup: metadata plus the full payload and its checksum
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEnvelope {
    pub metadata: BackupMetadata,
    pub data: ConfigPayload,
    /// blake3 hex digest of the serialized payload
    pub checksum: String,
}

/// Derive the storage key for a backup: `backup_<kind>_<timestamp>_<trigger>`
///
/// The timestamp is ISO 8601 with colons replaced by dashes so the key stays
/// filename-safe; microsecond precision keeps back-to-back backups distinct.
pub fn backup_key(kind: ConfigKind, at: DateTime<Utc>, trigger: BackupTrigger) -> String {
    format!(
        "{}{}_{}_{}",
        BACKUP_KEY_PREFIX,
        kind.as_str(),
        at.format("%Y-%m-%dT%H-%M-%S%.6fZ"),
        trigger.as_str()
    )
}
