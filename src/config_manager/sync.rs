//! Cross-context configuration synchronization
//!
//! Kiosk windows on one device stay eventually consistent without a server:
//! every context holds a `ConfigBroadcaster` with an in-memory cache of the
//! latest known payload per configuration kind, and the broadcasters exchange
//! messages over a shared [`SyncBus`]. A context constructed without a bus
//! degrades silently to single-context operation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::coordinator::{StorageCoordinator, StoreOutcome};
use super::models::{ConfigKind, ConfigPayload, ConfigurationRecord};
use super::{ConfigError, ConfigResult};

/// Message body exchanged between contexts
#[derive(Debug, Clone)]
pub enum SyncBody {
    /// A context committed a new payload; last broadcast wins
    ConfigUpdated {
        kind: ConfigKind,
        timestamp: i64,
        payload: ConfigPayload,
    },
    /// A newly-initializing context asks its peers for their cached payload
    SyncRequest { kind: ConfigKind },
    /// Response to a sync request, carrying the responder's cached payload
    ConfigLoaded {
        kind: ConfigKind,
        payload: ConfigPayload,
    },
}

/// A bus message stamped with its originating context
#[derive(Debug, Clone)]
pub struct SyncMessage {
    pub origin: Uuid,
    pub body: SyncBody,
}

/// Shared broadcast channel connecting every context on the device
#[derive(Clone)]
pub struct SyncBus {
    sender: broadcast::Sender<SyncMessage>,
}

impl SyncBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncMessage> {
        self.sender.subscribe()
    }

    /// Fire-and-forget send; a bus with no listeners is not an error
    pub fn send(&self, message: SyncMessage) {
        let _ = self.sender.send(message);
    }
}

/// Typed in-process update notification delivered within one context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateEvent {
    ComprehensiveConfigUpdated,
    ImpactConfigUpdated,
    CacheInvalidated,
}

impl UpdateEvent {
    pub fn for_kind(kind: ConfigKind) -> Self {
        match kind {
            ConfigKind::Comprehensive => UpdateEvent::ComprehensiveConfigUpdated,
            ConfigKind::Impact => UpdateEvent::ImpactConfigUpdated,
        }
    }
}

type PayloadCache = Arc<RwLock<HashMap<ConfigKind, ConfigPayload>>>;

/// Per-context configuration broadcaster
///
/// The in-memory cache is the only shared mutable state in a context; it is
/// mutated exclusively by this broadcaster's own write path and message
/// handlers, and no lock is held across an await point.
pub struct ConfigBroadcaster {
    context_id: Uuid,
    coordinator: Arc<StorageCoordinator>,
    cache: PayloadCache,
    bus: Option<SyncBus>,
    updates: broadcast::Sender<UpdateEvent>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigBroadcaster {
    pub fn new(coordinator: Arc<StorageCoordinator>, bus: Option<SyncBus>) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            context_id: Uuid::new_v4(),
            coordinator,
            cache: Arc::new(RwLock::new(HashMap::new())),
            bus,
            updates,
            listener: Mutex::new(None),
        }
    }

    /// Subscribe to this context's local update events
    pub fn subscribe_updates(&self) -> broadcast::Receiver<UpdateEvent> {
        self.updates.subscribe()
    }

    /// A clone of the local update sender, for components that fire events
    pub fn update_sender(&self) -> broadcast::Sender<UpdateEvent> {
        self.updates.clone()
    }

    /// Start the receive loop, request sync, then run the normal load chain
    ///
    /// Sync is opportunistic: the load chain proceeds without waiting for any
    /// peer to answer.
    pub async fn initialize(&self) {
        if let Some(bus) = &self.bus {
            let receiver = bus.subscribe();
            let handle = tokio::spawn(Self::listen(
                self.context_id,
                Arc::clone(&self.cache),
                self.updates.clone(),
                bus.clone(),
                receiver,
            ));
            *self.listener.lock() = Some(handle);

            for kind in ConfigKind::ALL {
                bus.send(SyncMessage {
                    origin: self.context_id,
                    body: SyncBody::SyncRequest { kind },
                });
            }
        }

        for kind in ConfigKind::ALL {
            if self.cache.read().contains_key(&kind) {
                continue;
            }
            if let Some(payload) = self.load_from_storage(kind).await {
                self.cache.write().insert(kind, payload);
                let _ = self.updates.send(UpdateEvent::for_kind(kind));
            }
        }

        log::debug!("broadcaster {} initialized", self.context_id);
    }

    /// Stop the receive loop
    pub fn shutdown(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
    }

    /// The latest cached payload for a kind, if any
    pub fn cached(&self, kind: ConfigKind) -> Option<ConfigPayload> {
        self.cache.read().get(&kind).cloned()
    }

    /// Drop every cached payload and notify the context
    pub fn invalidate_cache(&self) {
        self.cache.write().clear();
        let _ = self.updates.send(UpdateEvent::CacheInvalidated);
    }

    /// Write a payload through the coordinator and notify everyone
    ///
    /// The local context gets the same `UpdateEvent` as a context receiving
    /// the broadcast, so UI refresh logic is identical on both sides.
    pub async fn store_configuration(&self, payload: ConfigPayload) -> ConfigResult<StoreOutcome> {
        let kind = payload.kind();
        let record = ConfigurationRecord {
            key: kind.storage_key().to_string(),
            timestamp: Utc::now().timestamp_millis(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            payload: payload.clone(),
        };
        let value = serde_json::to_value(&record).map_err(|e| ConfigError::Serialization {
            message: format!("Failed to serialize {} record: {}", kind, e),
        })?;

        let outcome = self.coordinator.store(kind.storage_key(), &value).await;
        if !outcome.success {
            return Err(ConfigError::Storage {
                message: format!("No storage tier accepted the {} configuration", kind),
            });
        }

        self.cache.write().insert(kind, payload.clone());

        if let Some(bus) = &self.bus {
            bus.send(SyncMessage {
                origin: self.context_id,
                body: SyncBody::ConfigUpdated {
                    kind,
                    timestamp: Utc::now().timestamp_millis(),
                    payload,
                },
            });
        }
        let _ = self.updates.send(UpdateEvent::for_kind(kind));

        Ok(outcome)
    }

    /// Load and schema-check a payload from the coordinator
    async fn load_from_storage(&self, kind: ConfigKind) -> Option<ConfigPayload> {
        let value = self.coordinator.retrieve(kind.storage_key()).await?;
        decode_payload(kind, value)
    }

    /// The stored record for a kind, with its original timestamp and version
    pub async fn current_record(&self, kind: ConfigKind) -> Option<ConfigurationRecord> {
        let value = self.coordinator.retrieve(kind.storage_key()).await?;
        match serde_json::from_value::<ConfigurationRecord>(value) {
            Ok(record) if record.payload.kind() == kind => Some(record),
            _ => None,
        }
    }

    /// Receive loop handling messages from other contexts
    async fn listen(
        context_id: Uuid,
        cache: PayloadCache,
        updates: broadcast::Sender<UpdateEvent>,
        bus: SyncBus,
        mut receiver: broadcast::Receiver<SyncMessage>,
    ) {
        loop {
            let message = match receiver.recv().await {
                Ok(message) => message,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!("sync listener lagged, dropped {} messages", missed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            if message.origin == context_id {
                continue;
            }

            match message.body {
                SyncBody::ConfigUpdated { kind, payload, .. } => {
                    // Last broadcast wins; no storage re-read
                    cache.write().insert(kind, payload);
                    let _ = updates.send(UpdateEvent::for_kind(kind));
                }
                SyncBody::SyncRequest { kind } => {
                    let cached = cache.read().get(&kind).cloned();
                    if let Some(payload) = cached {
                        bus.send(SyncMessage {
                            origin: context_id,
                            body: SyncBody::ConfigLoaded { kind, payload },
                        });
                    }
                }
                SyncBody::ConfigLoaded { kind, payload } => {
                    // Adopt only while still empty; never clobber newer state
                    let mut cache = cache.write();
                    if !cache.contains_key(&kind) {
                        cache.insert(kind, payload);
                        drop(cache);
                        let _ = updates.send(UpdateEvent::for_kind(kind));
                    }
                }
            }
        }
    }
}

/// Deserialize a stored blob into a payload of the expected kind
///
/// Live configurations are stored as [`ConfigurationRecord`]s. Schema
/// validation happens here, at the storage boundary: a blob that does not
/// parse as a record, or whose payload is of the wrong kind, is rejected as
/// absent.
pub fn decode_payload(kind: ConfigKind, value: serde_json::Value) -> Option<ConfigPayload> {
    match serde_json::from_value::<ConfigurationRecord>(value) {
        Ok(record) if record.payload.kind() == kind => Some(record.payload),
        Ok(record) => {
            log::warn!(
                "stored record under '{}' has kind {}, expected {}",
                kind.storage_key(),
                record.payload.kind(),
                kind
            );
            None
        }
        Err(e) => {
            log::warn!("stored {} record failed schema check: {}", kind, e);
            None
        }
    }
}
