//! Storage tier contract
//!
//! The coordinator iterates an ordered list of `StorageTier` handles, so
//! adding or removing a backend is a wiring change in the service assembly
//! rather than a code change in the coordinator.

use async_trait::async_trait;

use super::models::TierEnvelope;

/// One independently-failing key/value backend
///
/// Contract: `store` never propagates an error to the caller — failures are
/// caught at the tier boundary, logged, and converted to `false`. `retrieve`
/// treats unreadable or unparsable data as absent. `remove` and `clear` are
/// best-effort. Every tier stamps its own [`TierEnvelope`] around stored
/// values; no cross-tier transaction exists.
#[async_trait]
pub trait StorageTier: Send + Sync {
    /// Stable tier name used in `stored_in` lists and health reports
    fn name(&self) -> &'static str;

    /// Store a value under a key, returning whether the write succeeded
    async fn store(&self, key: &str, value: &serde_json::Value) -> bool;

    /// Retrieve the value for a key, absent on miss or unreadable data
    async fn retrieve(&self, key: &str) -> Option<serde_json::Value>;

    /// Best-effort single-key delete
    async fn remove(&self, key: &str) -> bool;

    /// Best-effort clear; scope is tier-specific (see the tier docs)
    async fn clear(&self);
}

/// Serialize a value inside a freshly stamped envelope
pub(crate) fn seal_envelope(value: &serde_json::Value) -> Option<String> {
    match serde_json::to_string(&TierEnvelope::wrap(value)) {
        Ok(serialized) => Some(serialized),
        Err(e) => {
            log::warn!("Failed to serialize storage envelope: {}", e);
            None
        }
    }
}

/// Unwrap a stored envelope, treating parse failures as absence
pub(crate) fn open_envelope(tier: &str, key: &str, raw: &str) -> Option<serde_json::Value> {
    match serde_json::from_str::<TierEnvelope>(raw) {
        Ok(envelope) => Some(envelope.data),
        Err(e) => {
            log::warn!("{}: discarding unparsable envelope for '{}': {}", tier, key, e);
            None
        }
    }
}
