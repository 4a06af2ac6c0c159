//! Per-room telegram routing for combined channels
//!
//! The combined channel lets one subscriber watch raw group addresses and
//! whole devices at once. Interest is kept in per-room hash tables so the
//! relevance check per inbound telegram is a lookup, never a scan over the
//! full subscription registry.

use crate::broadcast::{ChannelId, SubscriberChannel};
use crate::devices::resolvers::ResolverRegistry;
use crate::devices::snapshot::snapshot_to_json;
use crate::devices::Device;
use crate::gateway::{ApciKind, GroupAddress, Telegram};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

/// Routes inbound telegrams to combined-channel subscribers of one room
///
/// Owned by the room connection; the room's listener task is the only caller
/// of [`route`](TelegramRouter::route), so delivery order per device follows
/// the order the transport raised the telegrams.
pub struct TelegramRouter {
    groups: RwLock<HashMap<GroupAddress, HashSet<ChannelId>>>,
    devices: RwLock<HashMap<String, HashSet<ChannelId>>>,
    channels: RwLock<HashMap<ChannelId, SubscriberChannel>>,
}

impl TelegramRouter {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            devices: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Register interest in a raw group address
    pub async fn subscribe_group(&self, address: GroupAddress, channel: &SubscriberChannel) {
        self.groups
            .write()
            .await
            .entry(address)
            .or_default()
            .insert(channel.id());
        self.register_channel(channel).await;
    }

    /// Register interest in a device's resolved state
    pub async fn subscribe_device(&self, device_name: &str, channel: &SubscriberChannel) {
        self.devices
            .write()
            .await
            .entry(device_name.to_string())
            .or_default()
            .insert(channel.id());
        self.register_channel(channel).await;
    }

    /// Remove a channel from every interest table, deleting emptied entries
    pub async fn unsubscribe(&self, channel_id: ChannelId) {
        self.remove_channels(&[channel_id]).await;
    }

    /// Route one inbound telegram
    ///
    /// Both paths may fire for the same telegram: a raw group-address frame
    /// for direct subscribers of the destination, and a `{device, state}`
    /// frame per device that has device-kind subscribers. Channels that fail
    /// delivery are pruned after the pass.
    pub async fn route(
        &self,
        telegram: &Telegram,
        devices: &[Device],
        resolvers: &ResolverRegistry,
    ) {
        let mut dead = Vec::new();

        // Raw group-address path: group-value-writes only, as on the bus.
        if telegram.kind == ApciKind::GroupValueWrite {
            if let Some(value) = &telegram.value {
                let targets = {
                    let groups = self.groups.read().await;
                    match groups.get(&telegram.destination) {
                        Some(ids) => self.collect_channels(ids).await,
                        None => Vec::new(),
                    }
                };
                if !targets.is_empty() {
                    let frame = serde_json::json!({
                        "group_address": telegram.destination,
                        "value": value,
                    })
                    .to_string();
                    for channel in &targets {
                        if channel.send(frame.clone()).is_err() {
                            dead.push(channel.id());
                        }
                    }
                }
            }
        }

        // Device path: every device with at least one device-kind subscriber
        // gets its state resolved and delivered for this telegram.
        {
            let device_subs = self.devices.read().await;
            if !device_subs.is_empty() {
                for device in devices {
                    let Some(ids) = device_subs.get(device.name()) else {
                        continue;
                    };
                    let channels = self.collect_channels(ids).await;
                    if channels.is_empty() {
                        continue;
                    }
                    let frame = serde_json::json!({
                        "device": device.name(),
                        "state": snapshot_to_json(&resolvers.resolve(device)),
                    })
                    .to_string();
                    for channel in &channels {
                        if channel.send(frame.clone()).is_err() {
                            dead.push(channel.id());
                        }
                    }
                }
            }
        }

        if !dead.is_empty() {
            debug!(pruned = dead.len(), "pruning dead combined-channel subscribers");
            self.remove_channels(&dead).await;
        }
    }

    /// Whether any subscriber is registered at all
    pub async fn is_empty(&self) -> bool {
        self.groups.read().await.is_empty() && self.devices.read().await.is_empty()
    }

    async fn register_channel(&self, channel: &SubscriberChannel) {
        self.channels
            .write()
            .await
            .entry(channel.id())
            .or_insert_with(|| channel.clone());
    }

    async fn collect_channels(&self, ids: &HashSet<ChannelId>) -> Vec<SubscriberChannel> {
        let channels = self.channels.read().await;
        ids.iter()
            .filter_map(|id| channels.get(id).cloned())
            .collect()
    }

    async fn remove_channels(&self, ids: &[ChannelId]) {
        {
            let mut groups = self.groups.write().await;
            groups.retain(|_, set| {
                for id in ids {
                    set.remove(id);
                }
                !set.is_empty()
            });
        }
        {
            let mut devices = self.devices.write().await;
            devices.retain(|_, set| {
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

impl Default for TelegramRouter {
    fn default() -> Self {
        Self::new()
    }
}
