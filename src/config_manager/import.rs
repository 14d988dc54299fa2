//! CSV content import
//!
//! Admins re-configure the kiosk by uploading CSV files; no redeployment.
//! Parsing is permissive — malformed rows become line-numbered error strings
//! and do not abort the parse — but validation of the assembled configuration
//! is wholesale: a failing import commits nothing.

use std::sync::Arc;

use serde::Serialize;

use super::backup::BackupManager;
use super::models::{
    BackupTrigger, ComprehensiveConfig, ConfigKind, ConfigPayload, ImpactConfig, ImpactValues,
};
use super::sync::ConfigBroadcaster;
use super::{ConfigError, ConfigResult};

/// Section tag for scenario/choice rows in the comprehensive format
const SECTION_SCENARIOS: &str = "SCENARIOS";
/// Section tag for UI text rows in the comprehensive format
const SECTION_UI_ELEMENTS: &str = "UI_ELEMENTS";

/// Impact columns are clamped to this range at the import boundary
const IMPACT_MIN: i32 = -50;
const IMPACT_MAX: i32 = 50;

/// Parsed comprehensive CSV: assembled config plus per-row diagnostics
#[derive(Debug, Clone)]
pub struct ParsedComprehensive {
    pub config: ComprehensiveConfig,
    pub imported_rows: usize,
    pub errors: Vec<String>,
}

/// Parsed legacy impact CSV
#[derive(Debug, Clone)]
pub struct ParsedImpact {
    pub config: ImpactConfig,
    pub imported_rows: usize,
    pub errors: Vec<String>,
}

/// What an import actually committed
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub imported_rows: usize,
    pub skipped_rows: usize,
    pub errors: Vec<String>,
}

/// Parse the comprehensive format
///
/// Header: `Section,Type,ID,Language,Field,Content,Ecosystem Impact (-50 to
/// +50),Economic Impact (-50 to +50),Community Impact (-50 to +50),Notes`.
/// SCENARIOS rows carry a bare content id or a compound `contentId_choiceId`;
/// UI_ELEMENTS rows use `ID` as the screen and `Field` as the element.
pub fn parse_comprehensive_csv(text: &str) -> ParsedComprehensive {
    let mut config = ComprehensiveConfig::default();
    let mut imported_rows = 0;
    let mut errors = Vec::new();

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    for (index, record) in reader.records().enumerate() {
        let line = index + 2; // line 1 is the header
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                errors.push(format!("line {}: {}", line, e));
                continue;
            }
        };

        let section = record.get(0).unwrap_or("");
        let id = record.get(2).unwrap_or("");
        let language = record.get(3).unwrap_or("");
        let field = record.get(4).unwrap_or("");
        let content = record.get(5).unwrap_or("");

        let populated = [section, id, language, field, content]
            .iter()
            .filter(|cell| !cell.is_empty())
            .count();
        if populated < 5 {
            errors.push(format!(
                "line {}: only {} of 5 required fields populated",
                line, populated
            ));
            continue;
        }

        match section {
            SECTION_SCENARIOS => {
                let language_fields = config
                    .scenarios
                    .entry(id.to_string())
                    .or_default()
                    .entry(language.to_string())
                    .or_default();
                language_fields.insert(field.to_string(), content.to_string());

                // Impact columns ride along as extra fields when present
                for (column, impact_field) in [
                    (6, "ecosystemImpact"),
                    (7, "economicImpact"),
                    (8, "communityImpact"),
                ] {
                    let raw = record.get(column).unwrap_or("");
                    if raw.is_empty() {
                        continue;
                    }
                    if let Ok(value) = raw.parse::<f64>() {
                        let clamped = (value.round() as i32).clamp(IMPACT_MIN, IMPACT_MAX);
                        language_fields.insert(impact_field.to_string(), clamped.to_string());
                    }
                }
                imported_rows += 1;
            }
            SECTION_UI_ELEMENTS => {
                config
                    .ui_elements
                    .entry(id.to_string())
                    .or_default()
                    .entry(field.to_string())
                    .or_default()
                    .insert(language.to_string(), content.to_string());
                imported_rows += 1;
            }
            other => {
                errors.push(format!("line {}: unknown section '{}'", line, other));
            }
        }
    }

    ParsedComprehensive {
        config,
        imported_rows,
        errors,
    }
}

/// Parse the legacy impact-only format
///
/// Header: `Scenario ID,Scenario Title,Choice ID,Choice Text,Language,Current
/// Impact Type,Ecosystem Impact (-50 to +50),Economic Impact (-50 to +50),
/// Community Impact (-50 to +50)`. Out-of-range values are clamped and
/// non-numeric values coerce to 0.
pub fn parse_impact_csv(text: &str) -> ParsedImpact {
    let mut config = ImpactConfig::default();
    let mut imported_rows = 0;
    let mut errors = Vec::new();

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    for (index, record) in reader.records().enumerate() {
        let line = index + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                errors.push(format!("line {}: {}", line, e));
                continue;
            }
        };

        let scenario_id = record.get(0).unwrap_or("");
        let choice_id = record.get(2).unwrap_or("");
        if scenario_id.is_empty() || choice_id.is_empty() {
            errors.push(format!("line {}: missing scenario or choice id", line));
            continue;
        }

        let impacts = ImpactValues {
            ecosystem: coerce_impact(record.get(6).unwrap_or("")),
            economic: coerce_impact(record.get(7).unwrap_or("")),
            community: coerce_impact(record.get(8).unwrap_or("")),
        };

        config
            .scenarios
            .entry(scenario_id.to_string())
            .or_default()
            .insert(choice_id.to_string(), impacts);
        imported_rows += 1;
    }

    ParsedImpact {
        config,
        imported_rows,
        errors,
    }
}

/// Non-numeric coerces to 0; everything is clamped to the allowed range
fn coerce_impact(raw: &str) -> i32 {
    raw.parse::<f64>()
        .map(|value| value.round() as i32)
        .unwrap_or(0)
        .clamp(IMPACT_MIN, IMPACT_MAX)
}

/// Wholesale validation of an assembled comprehensive configuration
pub fn validate_comprehensive(
    config: &ComprehensiveConfig,
    primary_language: &str,
) -> Vec<String> {
    let mut errors = Vec::new();

    if config.scenarios.is_empty() {
        errors.push("import contains no SCENARIOS rows".to_string());
    }

    for (id, languages) in &config.scenarios {
        if !languages.contains_key(primary_language) {
            errors.push(format!(
                "scenario '{}' is missing required language '{}'",
                id, primary_language
            ));
        }
    }

    errors
}

/// Orchestrates CSV imports end to end
pub struct ConfigImporter {
    broadcaster: Arc<ConfigBroadcaster>,
    backup: Arc<BackupManager>,
    primary_language: String,
}

impl ConfigImporter {
    pub fn new(
        broadcaster: Arc<ConfigBroadcaster>,
        backup: Arc<BackupManager>,
        primary_language: String,
    ) -> Self {
        Self {
            broadcaster,
            backup,
            primary_language,
        }
    }

    /// Import a comprehensive CSV
    ///
    /// Validation failures reject the import wholesale; nothing is committed.
    /// A pre-import backup of the previous configuration is attempted first —
    /// having no previous configuration is not an error.
    pub async fn import_comprehensive(&self, text: &str) -> ConfigResult<ImportReport> {
        let parsed = parse_comprehensive_csv(text);
        let validation = validate_comprehensive(&parsed.config, &self.primary_language);
        if !validation.is_empty() {
            return Err(ConfigError::Import {
                message: validation.join("; "),
            });
        }

        self.pre_import_backup(ConfigKind::Comprehensive).await;
        self.broadcaster
            .store_configuration(ConfigPayload::Comprehensive(parsed.config))
            .await?;

        log::info!(
            "imported comprehensive configuration: {} rows, {} skipped",
            parsed.imported_rows,
            parsed.errors.len()
        );
        Ok(ImportReport {
            imported_rows: parsed.imported_rows,
            skipped_rows: parsed.errors.len(),
            errors: parsed.errors,
        })
    }

    /// Import a legacy impact-only CSV
    pub async fn import_impact(&self, text: &str) -> ConfigResult<ImportReport> {
        let parsed = parse_impact_csv(text);
        if parsed.config.scenarios.is_empty() {
            return Err(ConfigError::Import {
                message: "import contains no usable impact rows".to_string(),
            });
        }

        self.pre_import_backup(ConfigKind::Impact).await;
        self.broadcaster
            .store_configuration(ConfigPayload::Impact(parsed.config))
            .await?;

        log::info!(
            "imported impact configuration: {} rows, {} skipped",
            parsed.imported_rows,
            parsed.errors.len()
        );
        Ok(ImportReport {
            imported_rows: parsed.imported_rows,
            skipped_rows: parsed.errors.len(),
            errors: parsed.errors,
        })
    }

    async fn pre_import_backup(&self, kind: ConfigKind) {
        if let Err(e) = self.backup.create_backup(kind, BackupTrigger::AutoImport).await {
            log::info!("pre-import backup skipped: {}", e);
        }
    }
}
