//! Tidepool Kiosk Configuration Core
//!
//! This library provides the content/configuration backbone for the Tidepool
//! marine conservation kiosk. It keeps admin-supplied content overrides
//! durable across several unequal storage backends and resolves what the
//! kiosk should render at any moment.
//!
//! ## Features
//!
//! - **Tiered offline storage**: three independently-failing key/value
//!   backends behind one coordinator with write fan-out and read fallback
//! - **Cross-context synchronization**: kiosk windows on the same device stay
//!   eventually consistent through an in-process broadcast bus
//! - **Static-first content resolution**: bundled text always wins over
//!   overrides, with wholesale quarantine of invalid override data
//! - **Backup and restore**: rotated snapshots with checksum verification
//! - **Live CSV re-configuration**: permissive parsing, wholesale validation
//!
//! ## Architecture
//!
//! The crate is organized into two modules:
//! - `config_manager`: storage tiers, coordinator, sync, resolver, backups
//! - `content`: the statically bundled scenario and UI text tables

pub mod config_manager;
pub mod content;

#[cfg(test)]
mod tests;

// Re-exports for convenience
pub use config_manager::{
    validate_config, ConfigError, ConfigManagerConfig, ConfigManagerState, ConfigResult,
};
pub use content::StaticContent;

/// Initialize logging for the configuration core
pub fn init_logging() -> ConfigResult<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .try_init()
        .map_err(|e| ConfigError::Configuration {
            message: format!("Failed to initialize logging: {}", e),
        })?;

    log::info!("Configuration core logging initialized");
    Ok(())
}
