//! Device-state subscription broadcaster
//!
//! Process-wide registry of (room, device) keys to live subscriber channels.
//! Delivery triggered from protocol callbacks goes through an unbounded queue
//! consumed by the broadcaster's own task, so callbacks never await delivery
//! inline. Channels that fail delivery are pruned after the delivery pass; a
//! key whose last channel goes away is deleted, keeping the registry
//! garbage-free.

use crate::devices::snapshot::{snapshot_to_json, Snapshot};
use crate::error::{KnxError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifies one subscriber channel across the registry
pub type ChannelId = Uuid;

type SubscriptionKey = (String, String);

/// Handle to one subscriber's outbound frame queue
///
/// The WebSocket layer holds the receiving end and forwards frames to the
/// socket on its own writer task; a slow socket therefore only ever delays
/// itself. Sending fails once the subscriber side is gone, which is how the
/// broadcaster detects dead channels.
#[derive(Debug, Clone)]
pub struct SubscriberChannel {
    id: ChannelId,
    tx: mpsc::UnboundedSender<String>,
}

impl SubscriberChannel {
    /// Create a channel and the receiver its owner drains
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Queue a frame for this subscriber
    pub fn send(&self, frame: String) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| KnxError::delivery("subscriber channel closed"))
    }

    /// Queue a JSON frame for this subscriber
    pub fn send_json(&self, value: &serde_json::Value) -> Result<()> {
        self.send(value.to_string())
    }
}

/// A queued device-state delivery
struct DeliveryJob {
    room_id: String,
    device_name: String,
    state: Snapshot,
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BroadcasterStats {
    /// Live (room, device) keys
    pub subscription_keys: usize,
    /// Live subscriber channels
    pub channels: usize,
}

/// Process-wide device-state broadcaster
pub struct SubscriptionBroadcaster {
    subscriptions: RwLock<HashMap<SubscriptionKey, HashSet<ChannelId>>>,
    channels: RwLock<HashMap<ChannelId, SubscriberChannel>>,
    queue_tx: mpsc::UnboundedSender<DeliveryJob>,
}

impl SubscriptionBroadcaster {
    /// Create the broadcaster and start its delivery task
    pub fn new() -> Arc<Self> {
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<DeliveryJob>();
        let broadcaster = Arc::new(Self {
            subscriptions: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            queue_tx,
        });

        // The delivery task holds only a weak handle: when the last owner
        // drops the broadcaster, the queue sender closes and the task ends.
        let weak = Arc::downgrade(&broadcaster);
        tokio::spawn(async move {
            while let Some(job) = queue_rx.recv().await {
                let Some(broadcaster) = weak.upgrade() else {
                    break;
                };
                broadcaster
                    .broadcast(&job.room_id, &job.device_name, &job.state)
                    .await;
            }
            debug!("broadcast delivery queue closed");
        });

        broadcaster
    }

    /// Queue a device-state delivery without awaiting it
    ///
    /// This is the fire-and-forget entry point used from room listener tasks.
    pub fn enqueue(&self, room_id: &str, device_name: &str, state: Snapshot) {
        let job = DeliveryJob {
            room_id: room_id.to_string(),
            device_name: device_name.to_string(),
            state,
        };
        if self.queue_tx.send(job).is_err() {
            debug!("delivery queue receiver gone, dropping update");
        }
    }

    /// Add a channel to a (room, device) key; adding twice is a no-op
    pub async fn subscribe(&self, room_id: &str, device_name: &str, channel: &SubscriberChannel) {
        {
            let mut subscriptions = self.subscriptions.write().await;
            subscriptions
                .entry((room_id.to_string(), device_name.to_string()))
                .or_default()
                .insert(channel.id());
        }
        self.channels
            .write()
            .await
            .entry(channel.id())
            .or_insert_with(|| channel.clone());
    }

    /// Remove a channel from every key it appears in, deleting emptied keys
    ///
    /// Must be called exactly once when a subscriber connection closes.
    pub async fn unsubscribe(&self, channel_id: ChannelId) {
        self.remove_channels(&[channel_id]).await;
    }

    /// Deliver a device state to every channel subscribed to the key
    ///
    /// Serialization happens once per broadcast; channels whose delivery
    /// fails are collected during the pass and removed afterwards, so one
    /// dead subscriber never affects its siblings.
    pub async fn broadcast(&self, room_id: &str, device_name: &str, state: &Snapshot) {
        let key = (room_id.to_string(), device_name.to_string());
        let targets: Vec<SubscriberChannel> = {
            let subscriptions = self.subscriptions.read().await;
            let Some(ids) = subscriptions.get(&key) else {
                return;
            };
            let channels = self.channels.read().await;
            ids.iter()
                .filter_map(|id| channels.get(id).cloned())
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        let frame = serde_json::json!({
            "device": device_name,
            "room_id": room_id,
            "state": snapshot_to_json(state),
        })
        .to_string();

        let mut dead = Vec::new();
        for channel in &targets {
            if channel.send(frame.clone()).is_err() {
                dead.push(channel.id());
            }
        }

        if !dead.is_empty() {
            warn!(
                room_id,
                device = device_name,
                pruned = dead.len(),
                "pruning dead subscriber channels"
            );
            self.remove_channels(&dead).await;
        }
    }

    /// Whether any channel is subscribed to the key
    pub async fn has_subscribers(&self, room_id: &str, device_name: &str) -> bool {
        self.subscriptions
            .read()
            .await
            .contains_key(&(room_id.to_string(), device_name.to_string()))
    }

    /// Current registry statistics
    pub async fn stats(&self) -> BroadcasterStats {
        BroadcasterStats {
            subscription_keys: self.subscriptions.read().await.len(),
            channels: self.channels.read().await.len(),
        }
    }

    async fn remove_channels(&self, ids: &[ChannelId]) {
        if ids.is_empty() {
            return;
        }
        {
            let mut subscriptions = self.subscriptions.write().await;
            subscriptions.retain(|_, set| {
                for id in ids {
                    set.remove(id);
                }
                !set.is_empty()
            });
        }
        let mut channels = self.channels.write().await;
        for id in ids {
            channels.remove(id);
        }
    }
}
