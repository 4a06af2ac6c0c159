//! Device state resolvers
//!
//! The capability table mapping each device type to the function that projects
//! its live state into a serializable [`Snapshot`]. A tag missing from the
//! table is a non-fatal condition: the snapshot degrades to a placeholder
//! carrying a warning, and delivery proceeds.

use crate::devices::snapshot::{Snapshot, SnapshotValue};
use crate::devices::{Device, DeviceState, DeviceType};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Projects a device's live state into a snapshot
pub type ResolverFn = fn(&Device) -> Snapshot;

static DEFAULT_RESOLVERS: Lazy<HashMap<DeviceType, ResolverFn>> = Lazy::new(|| {
    let mut table: HashMap<DeviceType, ResolverFn> = HashMap::new();
    table.insert(DeviceType::Switch, resolve_switch_state);
    table.insert(DeviceType::Light, resolve_light_state);
    table.insert(DeviceType::BinarySensor, resolve_binary_sensor_state);
    table.insert(DeviceType::Sensor, resolve_sensor_state);
    table.insert(DeviceType::NumericValue, resolve_numeric_value_state);
    table.insert(DeviceType::Cover, resolve_cover_state);
    table.insert(DeviceType::Climate, resolve_climate_state);
    table.insert(DeviceType::Fan, resolve_fan_state);
    table.insert(DeviceType::Scene, resolve_scene_state);
    table.insert(DeviceType::Notification, resolve_notification_state);
    table
});

/// Capability table from device type to resolver
#[derive(Debug, Clone)]
pub struct ResolverRegistry {
    table: HashMap<DeviceType, ResolverFn>,
}

impl ResolverRegistry {
    /// Empty registry; every resolve yields the placeholder snapshot
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Registry covering every supported device type
    pub fn with_defaults() -> Self {
        Self {
            table: DEFAULT_RESOLVERS.clone(),
        }
    }

    /// Register (or replace) the resolver for a type
    pub fn insert(&mut self, device_type: DeviceType, resolver: ResolverFn) {
        self.table.insert(device_type, resolver);
    }

    /// Look up the resolver for a type
    pub fn get(&self, device_type: DeviceType) -> Option<ResolverFn> {
        self.table.get(&device_type).copied()
    }

    /// Resolve a device's snapshot, degrading to a placeholder if no resolver
    /// is registered for its type
    pub fn resolve(&self, device: &Device) -> Snapshot {
        match self.get(device.device_type()) {
            Some(resolver) => resolver(device),
            None => {
                let mut snapshot = Snapshot::new();
                snapshot.insert(
                    "warning".into(),
                    format!("no resolver for {}", device.device_type()).into(),
                );
                snapshot
            }
        }
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn base(device: &Device) -> Snapshot {
    let mut snapshot = Snapshot::new();
    snapshot.insert("name".into(), device.name().into());
    snapshot.insert("type".into(), device.device_type().tag().into());
    snapshot
}

fn resolve_switch_state(device: &Device) -> Snapshot {
    let mut snapshot = base(device);
    snapshot.insert("group_address".into(), device.addressing().primary.into());
    snapshot.insert(
        "group_address_state".into(),
        device.addressing().state.into(),
    );
    if let DeviceState::Switch { on } = device.state() {
        snapshot.insert("state".into(), (*on).into());
    }
    snapshot
}

fn resolve_light_state(device: &Device) -> Snapshot {
    let mut snapshot = base(device);
    snapshot.insert("group_address".into(), device.addressing().primary.into());
    if let DeviceState::Light { on, brightness } = device.state() {
        snapshot.insert("is_on".into(), (*on).into());
        snapshot.insert("brightness".into(), (*brightness).into());
    }
    snapshot
}

fn resolve_binary_sensor_state(device: &Device) -> Snapshot {
    let mut snapshot = base(device);
    snapshot.insert("group_address".into(), device.addressing().primary.into());
    if let DeviceState::BinarySensor { on, counter } = device.state() {
        snapshot.insert("state".into(), (*on).into());
        snapshot.insert("is_on".into(), (*on == Some(true)).into());
        snapshot.insert("is_off".into(), (*on == Some(false)).into());
        snapshot.insert("counter".into(), (*counter).into());
    }
    snapshot
}

fn resolve_sensor_state(device: &Device) -> Snapshot {
    let mut snapshot = base(device);
    snapshot.insert(
        "group_address_state".into(),
        device
            .addressing()
            .state
            .or(device.addressing().primary)
            .into(),
    );
    if let DeviceState::Sensor { value } = device.state() {
        snapshot.insert("value".into(), (*value).into());
    }
    snapshot.insert("unit".into(), device.unit_of_measurement().into());
    snapshot
}

fn resolve_numeric_value_state(device: &Device) -> Snapshot {
    let mut snapshot = base(device);
    snapshot.insert("group_address".into(), device.addressing().primary.into());
    if let DeviceState::NumericValue { value } = device.state() {
        snapshot.insert("value".into(), (*value).into());
    }
    snapshot.insert("unit".into(), device.unit_of_measurement().into());
    snapshot
}

fn resolve_cover_state(device: &Device) -> Snapshot {
    let mut snapshot = base(device);
    if let DeviceState::Cover { position } = device.state() {
        snapshot.insert("position".into(), (*position).into());
        snapshot.insert("is_open".into(), (*position == Some(0)).into());
        snapshot.insert("is_closed".into(), (*position == Some(100)).into());
    }
    snapshot.insert(
        "supports_position".into(),
        device.addressing().primary.is_some().into(),
    );
    snapshot
}

fn resolve_climate_state(device: &Device) -> Snapshot {
    let mut snapshot = base(device);
    if let DeviceState::Climate {
        temperature,
        target_temperature,
        on,
    } = device.state()
    {
        snapshot.insert("temperature".into(), (*temperature).into());
        snapshot.insert("target_temperature".into(), (*target_temperature).into());
        snapshot.insert("on".into(), (*on).into());
    }
    snapshot
}

fn resolve_fan_state(device: &Device) -> Snapshot {
    let mut snapshot = base(device);
    if let DeviceState::Fan { on, speed } = device.state() {
        snapshot.insert("is_on".into(), (*on).into());
        snapshot.insert("current_speed".into(), (*speed).into());
    }
    snapshot
}

fn resolve_scene_state(device: &Device) -> Snapshot {
    let mut snapshot = base(device);
    snapshot.insert("group_address".into(), device.addressing().primary.into());
    if let DeviceState::Scene { last_scene } = device.state() {
        snapshot.insert("scene_number".into(), (*last_scene).into());
    }
    snapshot
}

fn resolve_notification_state(device: &Device) -> Snapshot {
    let mut snapshot = base(device);
    if let DeviceState::Notification { message } = device.state() {
        snapshot.insert("message".into(), message.clone().into());
    }
    snapshot
}
