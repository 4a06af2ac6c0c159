//! Gateway fleet orchestration
//!
//! The orchestrator is the single source of truth for which rooms exist and
//! are connected. It owns the room table for its whole lifetime and is handed
//! around as an explicit reference, never as ambient global state.

pub mod room;
pub mod router;

pub use room::RoomConnection;
pub use router::TelegramRouter;

use crate::broadcast::SubscriptionBroadcaster;
use crate::config::RoomConfig;
use crate::devices::resolvers::ResolverRegistry;
use crate::devices::snapshot::Snapshot;
use crate::error::{KnxError, Result};
use crate::gateway::backoff::RetryPolicy;
use crate::gateway::GatewayFactory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Outcome of a reconfiguration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconfigureStatus {
    /// Every requested room came up
    Complete,
    /// At least one room failed; the others are live
    Partial,
}

/// Structured summary returned by [`ConnectionOrchestrator::apply_configuration`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconfigureSummary {
    pub status: ReconfigureStatus,
    /// Rooms successfully configured
    pub configured: usize,
    /// Identifiers of rooms whose initialization failed, in request order
    pub failed_rooms: Vec<String>,
}

/// The applied room list and when it was last replaced
#[derive(Debug, Clone, Default)]
struct AppliedConfiguration {
    rooms: Vec<RoomConfig>,
    applied_at: Option<DateTime<Utc>>,
}

/// Owns the set of all room connections
pub struct ConnectionOrchestrator {
    rooms: RwLock<HashMap<String, RoomConnection>>,
    applied: RwLock<AppliedConfiguration>,
    factory: GatewayFactory,
    broadcaster: Arc<SubscriptionBroadcaster>,
    resolvers: Arc<ResolverRegistry>,
    retry: RetryPolicy,
}

impl ConnectionOrchestrator {
    pub fn new(
        factory: GatewayFactory,
        broadcaster: Arc<SubscriptionBroadcaster>,
        resolvers: Arc<ResolverRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            applied: RwLock::new(AppliedConfiguration::default()),
            factory,
            broadcaster,
            resolvers,
            retry,
        }
    }

    /// Apply a full configuration: tear down everything, rebuild room by room
    ///
    /// Teardown is best-effort: a failing disconnect is logged and never
    /// aborts the operation. Each room's initialization failure is captured
    /// independently; one unreachable gateway never prevents the other rooms
    /// from coming up. Reconfiguration is not atomic across rooms: between
    /// teardown and rebuild fewer rooms are live than either configuration
    /// specifies. Callers get no stronger isolation level.
    pub async fn apply_configuration(&self, desired: Vec<RoomConfig>) -> ReconfigureSummary {
        let mut rooms = self.rooms.write().await;

        for (room_id, room) in rooms.iter_mut() {
            if let Err(e) = room.disconnect().await {
                warn!(room_id = %room_id, error = %e, "error disconnecting room during teardown");
            }
        }
        rooms.clear();

        let mut failed = Vec::new();
        for config in &desired {
            // A duplicate identifier later in the list replaces the earlier
            // entry, never leaves two live connections.
            if let Some(mut previous) = rooms.remove(&config.room_id) {
                if let Err(e) = previous.disconnect().await {
                    warn!(room_id = %config.room_id, error = %e, "error disconnecting duplicate room");
                }
            }

            let mut room = self.build_room(config.clone());
            match room.initialize(&self.factory).await {
                Ok(()) => {
                    rooms.insert(config.room_id.clone(), room);
                }
                Err(e) => {
                    error!(room_id = %config.room_id, error = %e, "could not connect room");
                    failed.push(config.room_id.clone());
                }
            }
        }

        let configured = rooms.len();
        drop(rooms);
        *self.applied.write().await = AppliedConfiguration {
            rooms: desired,
            applied_at: Some(Utc::now()),
        };

        let status = if failed.is_empty() {
            ReconfigureStatus::Complete
        } else {
            ReconfigureStatus::Partial
        };
        info!(configured, failed = failed.len(), "configuration applied");
        ReconfigureSummary {
            status,
            configured,
            failed_rooms: failed,
        }
    }

    /// Connect one room, replacing any live connection under the same id
    ///
    /// The identifier match is by value; at most one live connection per id
    /// survives. On initialization failure no entry is retained.
    pub async fn add_or_replace(&self, config: RoomConfig) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        if let Some(mut previous) = rooms.remove(&config.room_id) {
            if let Err(e) = previous.disconnect().await {
                warn!(room_id = %config.room_id, error = %e, "error disconnecting replaced room");
            }
        }

        let mut applied = self.applied.write().await;
        applied.rooms.retain(|c| c.room_id != config.room_id);
        applied.applied_at = Some(Utc::now());

        let mut room = self.build_room(config.clone());
        room.initialize(&self.factory).await?;
        rooms.insert(config.room_id.clone(), room);
        applied.rooms.push(config);
        Ok(())
    }

    /// Disconnect and forget one room; a no-op when the id is absent
    pub async fn remove(&self, room_id: &str) -> bool {
        let removed = {
            let mut rooms = self.rooms.write().await;
            rooms.remove(room_id)
        };
        let Some(mut room) = removed else {
            return false;
        };
        if let Err(e) = room.disconnect().await {
            warn!(room_id = %room_id, error = %e, "error disconnecting removed room");
        }
        let mut applied = self.applied.write().await;
        applied.rooms.retain(|c| c.room_id != room_id);
        applied.applied_at = Some(Utc::now());
        true
    }

    /// Disconnect every room, keeping the applied configuration snapshot
    pub async fn shutdown(&self) {
        let mut rooms = self.rooms.write().await;
        for (room_id, room) in rooms.iter_mut() {
            if let Err(e) = room.disconnect().await {
                warn!(room_id = %room_id, error = %e, "error disconnecting room during shutdown");
            }
        }
        rooms.clear();
    }

    /// Identifiers of the currently live rooms
    pub async fn room_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rooms.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether a room is currently live
    pub async fn has_room(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    /// The combined-channel router of a live room
    pub async fn room_router(&self, room_id: &str) -> Option<Arc<TelegramRouter>> {
        self.rooms.read().await.get(room_id).map(|r| r.router())
    }

    /// Check that a device exists in a live room
    pub async fn verify_device(&self, room_id: &str, device_name: &str) -> Result<()> {
        let rooms = self.rooms.read().await;
        let room = rooms
            .get(room_id)
            .ok_or_else(|| KnxError::unknown_room(room_id))?;
        if room.device_by_name(device_name).await.is_none() {
            return Err(KnxError::unknown_device(device_name));
        }
        Ok(())
    }

    /// Resolve a device's current snapshot on demand
    pub async fn device_snapshot(&self, room_id: &str, device_name: &str) -> Result<Snapshot> {
        let rooms = self.rooms.read().await;
        let room = rooms
            .get(room_id)
            .ok_or_else(|| KnxError::unknown_room(room_id))?;
        let device = room
            .device_by_name(device_name)
            .await
            .ok_or_else(|| KnxError::unknown_device(device_name))?;
        Ok(self.resolvers.resolve(&device))
    }

    /// The applied configuration snapshot
    pub async fn applied_configuration(&self) -> Vec<RoomConfig> {
        self.applied.read().await.rooms.clone()
    }

    /// When the applied configuration last changed
    pub async fn applied_at(&self) -> Option<DateTime<Utc>> {
        self.applied.read().await.applied_at
    }

    fn build_room(&self, config: RoomConfig) -> RoomConnection {
        RoomConnection::new(
            config,
            self.broadcaster.clone(),
            self.resolvers.clone(),
            self.retry.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockNetwork;
    use pretty_assertions::assert_eq;

    fn room_config(room_id: &str, gateway: &str) -> RoomConfig {
        RoomConfig {
            room_id: room_id.to_string(),
            gateway_address: gateway.to_string(),
            devices: Vec::new(),
        }
    }

    fn orchestrator(network: &MockNetwork) -> ConnectionOrchestrator {
        ConnectionOrchestrator::new(
            network.factory(),
            SubscriptionBroadcaster::new(),
            Arc::new(ResolverRegistry::with_defaults()),
            RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
        )
    }

    #[tokio::test]
    async fn test_apply_configuration_complete() {
        let network = MockNetwork::new();
        let orchestrator = orchestrator(&network);

        let summary = orchestrator
            .apply_configuration(vec![
                room_config("a", "10.0.0.1"),
                room_config("b", "10.0.0.2"),
            ])
            .await;

        assert_eq!(
            summary,
            ReconfigureSummary {
                status: ReconfigureStatus::Complete,
                configured: 2,
                failed_rooms: Vec::new(),
            }
        );
        assert_eq!(orchestrator.room_ids().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_apply_configuration_partial_isolation() {
        let network = MockNetwork::new();
        network.set_unreachable("10.0.0.1");
        let orchestrator = orchestrator(&network);

        let summary = orchestrator
            .apply_configuration(vec![
                room_config("a", "10.0.0.1"),
                room_config("b", "10.0.0.2"),
            ])
            .await;

        assert_eq!(summary.status, ReconfigureStatus::Partial);
        assert_eq!(summary.configured, 1);
        assert_eq!(summary.failed_rooms, vec!["a"]);
        // The failed room is absent from the live set, not parked in a
        // failed state.
        assert_eq!(orchestrator.room_ids().await, vec!["b"]);
    }

    #[tokio::test]
    async fn test_reapply_replaces_previous_fleet() {
        let network = MockNetwork::new();
        let orchestrator = orchestrator(&network);

        orchestrator
            .apply_configuration(vec![room_config("a", "10.0.0.1")])
            .await;
        orchestrator
            .apply_configuration(vec![room_config("b", "10.0.0.2")])
            .await;

        assert_eq!(orchestrator.room_ids().await, vec!["b"]);
        assert_eq!(orchestrator.applied_configuration().await.len(), 1);
    }

    #[tokio::test]
    async fn test_add_or_replace_keeps_one_connection_per_id() {
        let network = MockNetwork::new();
        let orchestrator = orchestrator(&network);

        orchestrator
            .add_or_replace(room_config("a", "10.0.0.1"))
            .await
            .unwrap();
        orchestrator
            .add_or_replace(room_config("a", "10.0.0.5"))
            .await
            .unwrap();

        assert_eq!(orchestrator.room_ids().await, vec!["a"]);
        let applied = orchestrator.applied_configuration().await;
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].gateway_address, "10.0.0.5");
    }

    #[tokio::test]
    async fn test_add_or_replace_failure_leaves_no_entry() {
        let network = MockNetwork::new();
        network.set_unreachable("10.0.0.1");
        let orchestrator = orchestrator(&network);

        let result = orchestrator.add_or_replace(room_config("a", "10.0.0.1")).await;
        assert!(result.is_err());
        assert!(orchestrator.room_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_is_noop_for_absent_room() {
        let network = MockNetwork::new();
        let orchestrator = orchestrator(&network);

        assert!(!orchestrator.remove("ghost").await);

        orchestrator
            .add_or_replace(room_config("a", "10.0.0.1"))
            .await
            .unwrap();
        assert!(orchestrator.remove("a").await);
        assert!(orchestrator.room_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_verify_device_errors() {
        let network = MockNetwork::new();
        let orchestrator = orchestrator(&network);
        orchestrator
            .add_or_replace(room_config("a", "10.0.0.1"))
            .await
            .unwrap();

        assert!(matches!(
            orchestrator.verify_device("ghost", "Lamp").await,
            Err(KnxError::UnknownRoom(_))
        ));
        assert!(matches!(
            orchestrator.verify_device("a", "Lamp").await,
            Err(KnxError::UnknownDevice(_))
        ));
    }
}
