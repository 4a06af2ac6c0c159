//! Room connection lifecycle
//!
//! One room owns one gateway transport and the devices instantiated against
//! it. Devices exist exactly while the transport handle exists: `initialize`
//! creates both, `disconnect` releases both, and nothing else touches them.

use crate::broadcast::SubscriptionBroadcaster;
use crate::config::{DeviceConfig, RoomConfig};
use crate::devices::resolvers::ResolverRegistry;
use crate::devices::Device;
use crate::error::Result;
use crate::fleet::router::TelegramRouter;
use crate::gateway::backoff::{connect_with_backoff, RetryPolicy};
use crate::gateway::{BoxedGateway, GatewayFactory, Telegram};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct ListenerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// One gateway connection and its instantiated devices
pub struct RoomConnection {
    room_id: String,
    gateway_address: String,
    devices_config: Vec<DeviceConfig>,
    gateway: Option<BoxedGateway>,
    devices: Arc<RwLock<Vec<Device>>>,
    router: Arc<TelegramRouter>,
    listener: Option<ListenerHandle>,
    broadcaster: Arc<SubscriptionBroadcaster>,
    resolvers: Arc<ResolverRegistry>,
    retry: RetryPolicy,
}

impl RoomConnection {
    /// Create a disconnected room from its configuration record
    pub fn new(
        config: RoomConfig,
        broadcaster: Arc<SubscriptionBroadcaster>,
        resolvers: Arc<ResolverRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            room_id: config.room_id,
            gateway_address: config.gateway_address,
            devices_config: config.devices,
            gateway: None,
            devices: Arc::new(RwLock::new(Vec::new())),
            router: Arc::new(TelegramRouter::new()),
            listener: None,
            broadcaster,
            resolvers,
            retry,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn gateway_address(&self) -> &str {
        &self.gateway_address
    }

    /// Whether the gateway handle is currently held
    pub fn is_connected(&self) -> bool {
        self.gateway.is_some()
    }

    /// The room's combined-channel router
    pub fn router(&self) -> Arc<TelegramRouter> {
        self.router.clone()
    }

    /// Open the gateway connection and bring the devices up
    ///
    /// Connects under the bounded backoff policy, registers the telegram
    /// listener, then instantiates every configured device whose type tag is
    /// recognized; unrecognized or invalid records are skipped with a
    /// warning. On connect failure nothing is retained: no handle, no
    /// listener, no devices.
    pub async fn initialize(&mut self, factory: &GatewayFactory) -> Result<()> {
        if self.gateway.is_some() {
            debug!(room_id = %self.room_id, "initialize on connected room is a no-op");
            return Ok(());
        }

        debug!(room_id = %self.room_id, gateway = %self.gateway_address, "connecting");
        let mut gateway = factory.as_ref()(&self.gateway_address);
        connect_with_backoff(&mut gateway, &self.retry, &self.gateway_address).await?;

        // Listener first, devices second: devices receive live telegrams the
        // moment they are instantiated.
        let rx = gateway.subscribe();
        let devices = build_devices(&self.room_id, &self.devices_config);
        let device_count = devices.len();
        *self.devices.write().await = devices;
        self.listener = Some(self.spawn_listener(rx));
        self.gateway = Some(gateway);

        info!(
            room_id = %self.room_id,
            gateway = %self.gateway_address,
            devices = device_count,
            "room connected"
        );
        Ok(())
    }

    /// Tear the room down; safe to call on an already-disconnected room
    ///
    /// The telegram listener stops before the handle closes, so no callback
    /// ever fires against a torn-down room. Devices are cleared even when the
    /// transport close reports an error.
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(listener) = self.listener.take() {
            listener.cancel.cancel();
            let _ = listener.task.await;
        }

        let Some(mut gateway) = self.gateway.take() else {
            return Ok(());
        };
        self.devices.write().await.clear();
        let result = gateway.disconnect().await;
        debug!(room_id = %self.room_id, "room disconnected");
        result
    }

    /// Look up a device by name; absence is a normal, reportable condition
    pub async fn device_by_name(&self, name: &str) -> Option<Device> {
        self.devices
            .read()
            .await
            .iter()
            .find(|d| d.name() == name)
            .cloned()
    }

    /// Names of the instantiated devices
    pub async fn device_names(&self) -> Vec<String> {
        self.devices
            .read()
            .await
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }

    fn spawn_listener(&self, mut rx: broadcast::Receiver<Telegram>) -> ListenerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let devices = self.devices.clone();
        let router = self.router.clone();
        let broadcaster = self.broadcaster.clone();
        let resolvers = self.resolvers.clone();
        let room_id = self.room_id.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    result = rx.recv() => match result {
                        Ok(telegram) => {
                            handle_telegram(
                                &room_id,
                                &telegram,
                                &devices,
                                &router,
                                &broadcaster,
                                &resolvers,
                            )
                            .await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(room_id = %room_id, skipped, "telegram listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!(room_id = %room_id, "telegram stream closed");
                            break;
                        }
                    },
                }
            }
        });

        ListenerHandle { cancel, task }
    }
}

/// Apply one inbound telegram: device updates first, then combined-channel
/// routing. Snapshot delivery is enqueued, never awaited here.
async fn handle_telegram(
    room_id: &str,
    telegram: &Telegram,
    devices: &RwLock<Vec<Device>>,
    router: &TelegramRouter,
    broadcaster: &SubscriptionBroadcaster,
    resolvers: &ResolverRegistry,
) {
    let mut updated = Vec::new();
    {
        let mut devices = devices.write().await;
        for device in devices.iter_mut() {
            if device.process_telegram(telegram) {
                updated.push((device.name().to_string(), resolvers.resolve(device)));
            }
        }
    }
    for (name, snapshot) in updated {
        debug!(room_id = %room_id, device = %name, "device updated");
        broadcaster.enqueue(room_id, &name, snapshot);
    }

    let devices = devices.read().await;
    router.route(telegram, &devices, resolvers).await;
}

/// Instantiate the recognized devices of a room configuration
///
/// Partial device sets are acceptable: records with an unsupported type tag,
/// invalid addressing or a duplicate name are skipped with a warning.
fn build_devices(room_id: &str, configs: &[DeviceConfig]) -> Vec<Device> {
    let mut devices: Vec<Device> = Vec::new();
    for config in configs {
        if devices.iter().any(|d| d.name() == config.name) {
            warn!(
                room_id = %room_id,
                device = %config.name,
                "skipping device with duplicate name"
            );
            continue;
        }
        match Device::try_from_config(config) {
            Ok(device) => devices.push(device),
            Err(e) => warn!(
                room_id = %room_id,
                device = %config.name,
                error = %e,
                "skipping device"
            ),
        }
    }
    devices
}
