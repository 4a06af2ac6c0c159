//! In-process device models
//!
//! Each device binds one or more group addresses and carries the live state
//! mutated exclusively by inbound telegrams. The supported type set is closed:
//! a configuration record with an unrecognized tag is skipped by its room (with
//! a warning), never instantiated half-way.

pub mod resolvers;
pub mod snapshot;

use crate::config::DeviceConfig;
use crate::error::{KnxError, Result};
use crate::gateway::{GroupAddress, Telegram, TelegramValue};
use serde::{Deserialize, Serialize};

/// Closed set of supported device types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Switch,
    Light,
    BinarySensor,
    Sensor,
    NumericValue,
    Cover,
    Climate,
    Fan,
    Scene,
    Notification,
}

impl DeviceType {
    /// All supported types, in tag order
    pub const ALL: [DeviceType; 10] = [
        DeviceType::Switch,
        DeviceType::Light,
        DeviceType::BinarySensor,
        DeviceType::Sensor,
        DeviceType::NumericValue,
        DeviceType::Cover,
        DeviceType::Climate,
        DeviceType::Fan,
        DeviceType::Scene,
        DeviceType::Notification,
    ];

    /// Parse a configuration type tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.tag() == tag)
    }

    /// The configuration tag for this type
    pub fn tag(&self) -> &'static str {
        match self {
            DeviceType::Switch => "Switch",
            DeviceType::Light => "Light",
            DeviceType::BinarySensor => "BinarySensor",
            DeviceType::Sensor => "Sensor",
            DeviceType::NumericValue => "NumericValue",
            DeviceType::Cover => "Cover",
            DeviceType::Climate => "Climate",
            DeviceType::Fan => "Fan",
            DeviceType::Scene => "Scene",
            DeviceType::Notification => "Notification",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Group addresses a device listens on
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Addressing {
    /// Primary (command) address
    pub primary: Option<GroupAddress>,
    /// State feedback address
    pub state: Option<GroupAddress>,
    /// Additional addresses the device also listens on
    pub passive: Vec<GroupAddress>,
}

impl Addressing {
    /// Whether the device listens on the given address
    pub fn contains(&self, ga: &GroupAddress) -> bool {
        self.primary.as_ref() == Some(ga)
            || self.state.as_ref() == Some(ga)
            || self.passive.contains(ga)
    }
}

/// Live protocol state, one variant per device type
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceState {
    Switch {
        on: Option<bool>,
    },
    Light {
        on: Option<bool>,
        brightness: Option<u8>,
    },
    BinarySensor {
        on: Option<bool>,
        counter: u32,
    },
    Sensor {
        value: Option<f64>,
    },
    NumericValue {
        value: Option<f64>,
    },
    Cover {
        /// 0 = fully open, 100 = fully closed
        position: Option<u8>,
    },
    Climate {
        temperature: Option<f64>,
        target_temperature: Option<f64>,
        on: Option<bool>,
    },
    Fan {
        on: Option<bool>,
        speed: Option<u8>,
    },
    Scene {
        last_scene: Option<u8>,
    },
    Notification {
        message: Option<String>,
    },
}

impl DeviceState {
    fn initial(device_type: DeviceType) -> Self {
        match device_type {
            DeviceType::Switch => DeviceState::Switch { on: None },
            DeviceType::Light => DeviceState::Light {
                on: None,
                brightness: None,
            },
            DeviceType::BinarySensor => DeviceState::BinarySensor {
                on: None,
                counter: 0,
            },
            DeviceType::Sensor => DeviceState::Sensor { value: None },
            DeviceType::NumericValue => DeviceState::NumericValue { value: None },
            DeviceType::Cover => DeviceState::Cover { position: None },
            DeviceType::Climate => DeviceState::Climate {
                temperature: None,
                target_temperature: None,
                on: None,
            },
            DeviceType::Fan => DeviceState::Fan {
                on: None,
                speed: None,
            },
            DeviceType::Scene => DeviceState::Scene { last_scene: None },
            DeviceType::Notification => DeviceState::Notification { message: None },
        }
    }
}

/// One stateful device bound to a room's gateway connection
#[derive(Debug, Clone)]
pub struct Device {
    name: String,
    device_type: DeviceType,
    addressing: Addressing,
    value_type: Option<String>,
    always_callback: bool,
    state: DeviceState,
}

impl Device {
    /// Instantiate a device from its configuration record
    ///
    /// Fails with `UnsupportedDeviceType` for a tag outside the supported
    /// set; rooms treat any failure here as skip-with-warning, not a crash.
    pub fn try_from_config(config: &DeviceConfig) -> Result<Self> {
        let device_type = DeviceType::from_tag(&config.device_type)
            .ok_or_else(|| KnxError::unsupported_device_type(&config.device_type))?;
        Self::from_config(device_type, config)
    }

    /// Instantiate a device with an already-resolved type tag
    pub fn from_config(device_type: DeviceType, config: &DeviceConfig) -> Result<Self> {
        let parse = |addr: &str| -> Result<GroupAddress> { addr.parse() };

        let primary = config.group_address.as_deref().map(parse).transpose()?;
        let state = config.group_address_state.as_deref().map(parse).transpose()?;
        let passive = config
            .passive_group_addresses
            .iter()
            .map(|a| parse(a))
            .collect::<Result<Vec<_>>>()?;

        if primary.is_none() && state.is_none() && passive.is_empty() {
            return Err(KnxError::config(format!(
                "device '{}' has no group address",
                config.name
            )));
        }

        Ok(Self {
            name: config.name.clone(),
            device_type,
            addressing: Addressing {
                primary,
                state,
                passive,
            },
            value_type: config.value_type.clone(),
            always_callback: config.always_callback.unwrap_or(false),
            state: DeviceState::initial(device_type),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn addressing(&self) -> &Addressing {
        &self.addressing
    }

    pub fn value_type(&self) -> Option<&str> {
        self.value_type.as_deref()
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Measurement unit derived from the configured value type
    pub fn unit_of_measurement(&self) -> Option<&'static str> {
        match self.value_type.as_deref()? {
            "temperature" => Some("°C"),
            "percent" | "humidity" => Some("%"),
            "illuminance" => Some("lx"),
            "wind_speed_ms" => Some("m/s"),
            "power" => Some("W"),
            "current" => Some("mA"),
            "ppm" => Some("ppm"),
            _ => None,
        }
    }

    /// Whether the device listens on the given group address
    pub fn has_group_address(&self, ga: &GroupAddress) -> bool {
        self.addressing.contains(ga)
    }

    /// Apply an inbound telegram to the live state
    ///
    /// Returns whether subscribers should be notified: the state changed, or
    /// the device is configured with `always_callback` and the telegram was
    /// addressed to it.
    pub fn process_telegram(&mut self, telegram: &Telegram) -> bool {
        if !telegram.carries_value() || !self.has_group_address(&telegram.destination) {
            return false;
        }
        let value = match &telegram.value {
            Some(v) => v,
            None => return false,
        };

        let before = self.state.clone();
        self.apply_value(&telegram.destination, value);
        self.always_callback || self.state != before
    }

    fn apply_value(&mut self, destination: &GroupAddress, value: &TelegramValue) {
        let on_state_address = self.addressing.state.as_ref() == Some(destination);

        match &mut self.state {
            DeviceState::Switch { on } => {
                if let Some(b) = value.as_bool() {
                    *on = Some(b);
                }
            }
            DeviceState::Light { on, brightness } => match value {
                TelegramValue::Bool(b) => *on = Some(*b),
                TelegramValue::Number(n) => *brightness = Some(clamp_percent(*n)),
                _ => {}
            },
            DeviceState::BinarySensor { on, counter } => {
                if let Some(b) = value.as_bool() {
                    *on = Some(b);
                    *counter = counter.saturating_add(1);
                }
            }
            DeviceState::Sensor { value: v } | DeviceState::NumericValue { value: v } => {
                if let Some(n) = value.as_number() {
                    *v = Some(n);
                }
            }
            DeviceState::Cover { position } => {
                if let Some(n) = value.as_number() {
                    *position = Some(clamp_percent(n));
                }
            }
            DeviceState::Climate {
                temperature,
                target_temperature,
                on,
            } => match value {
                // Feedback address carries the measured temperature, the
                // primary address the setpoint.
                TelegramValue::Number(n) if on_state_address => *temperature = Some(*n),
                TelegramValue::Number(n) => *target_temperature = Some(*n),
                TelegramValue::Bool(b) => *on = Some(*b),
                _ => {}
            },
            DeviceState::Fan { on, speed } => match value {
                TelegramValue::Bool(b) => *on = Some(*b),
                TelegramValue::Number(n) => *speed = Some(clamp_percent(*n)),
                _ => {}
            },
            DeviceState::Scene { last_scene } => {
                if let Some(n) = value.as_number() {
                    *last_scene = Some(n.round().clamp(0.0, 255.0) as u8);
                }
            }
            DeviceState::Notification { message } => {
                if let Some(t) = value.as_text() {
                    *message = Some(t.to_string());
                }
            }
        }
    }
}

fn clamp_percent(n: f64) -> u8 {
    n.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use pretty_assertions::assert_eq;

    fn config(name: &str, device_type: &str, ga: &str) -> DeviceConfig {
        DeviceConfig {
            name: name.to_string(),
            device_type: device_type.to_string(),
            group_address: Some(ga.to_string()),
            ..DeviceConfig::default()
        }
    }

    #[test]
    fn test_type_tags_round_trip() {
        for device_type in DeviceType::ALL {
            assert_eq!(DeviceType::from_tag(device_type.tag()), Some(device_type));
        }
        assert_eq!(DeviceType::from_tag("Weather"), None);
        assert_eq!(DeviceType::from_tag(""), None);
    }

    #[test]
    fn test_switch_processes_bool_write() {
        let mut device =
            Device::from_config(DeviceType::Switch, &config("Lamp", "Switch", "1/0/1")).unwrap();

        let ga = "1/0/1".parse().unwrap();
        let changed = device.process_telegram(&Telegram::write(ga, TelegramValue::Bool(true)));
        assert!(changed);
        assert_eq!(device.state(), &DeviceState::Switch { on: Some(true) });

        // Same value again: no observable change.
        let changed = device.process_telegram(&Telegram::write(ga, TelegramValue::Bool(true)));
        assert!(!changed);
    }

    #[test]
    fn test_always_callback_forces_notification() {
        let mut cfg = config("Lamp", "Switch", "1/0/1");
        cfg.always_callback = Some(true);
        let mut device = Device::from_config(DeviceType::Switch, &cfg).unwrap();

        let ga = "1/0/1".parse().unwrap();
        assert!(device.process_telegram(&Telegram::write(ga, TelegramValue::Bool(true))));
        assert!(device.process_telegram(&Telegram::write(ga, TelegramValue::Bool(true))));
    }

    #[test]
    fn test_foreign_address_is_ignored() {
        let mut device =
            Device::from_config(DeviceType::Sensor, &config("Temp", "Sensor", "2/1/0")).unwrap();

        let other = "2/1/1".parse().unwrap();
        assert!(!device.process_telegram(&Telegram::write(other, TelegramValue::Number(21.0))));
        assert_eq!(device.state(), &DeviceState::Sensor { value: None });
    }

    #[test]
    fn test_climate_splits_setpoint_and_measurement() {
        let mut cfg = config("Heating", "Climate", "3/0/1");
        cfg.group_address_state = Some("3/0/2".to_string());
        let mut device = Device::from_config(DeviceType::Climate, &cfg).unwrap();

        let setpoint_ga = "3/0/1".parse().unwrap();
        let feedback_ga = "3/0/2".parse().unwrap();
        device.process_telegram(&Telegram::write(setpoint_ga, TelegramValue::Number(22.0)));
        device.process_telegram(&Telegram::response(feedback_ga, TelegramValue::Number(20.5)));

        assert_eq!(
            device.state(),
            &DeviceState::Climate {
                temperature: Some(20.5),
                target_temperature: Some(22.0),
                on: None,
            }
        );
    }

    #[test]
    fn test_binary_sensor_counts_writes() {
        let mut device = Device::from_config(
            DeviceType::BinarySensor,
            &config("Motion", "BinarySensor", "4/0/0"),
        )
        .unwrap();

        let ga = "4/0/0".parse().unwrap();
        device.process_telegram(&Telegram::write(ga, TelegramValue::Bool(true)));
        device.process_telegram(&Telegram::write(ga, TelegramValue::Bool(false)));
        device.process_telegram(&Telegram::write(ga, TelegramValue::Bool(true)));

        assert_eq!(
            device.state(),
            &DeviceState::BinarySensor {
                on: Some(true),
                counter: 3,
            }
        );
    }

    #[test]
    fn test_passive_address_updates_state() {
        let mut cfg = config("Lamp", "Switch", "1/0/1");
        cfg.passive_group_addresses = vec!["7/7/7".to_string()];
        let mut device = Device::from_config(DeviceType::Switch, &cfg).unwrap();

        let passive = "7/7/7".parse().unwrap();
        assert!(device.process_telegram(&Telegram::write(passive, TelegramValue::Bool(true))));
    }

    #[test]
    fn test_read_request_never_mutates() {
        let mut device =
            Device::from_config(DeviceType::Switch, &config("Lamp", "Switch", "1/0/1")).unwrap();
        let ga = "1/0/1".parse().unwrap();
        let read = Telegram {
            source: "1.1.1".into(),
            destination: ga,
            kind: crate::gateway::ApciKind::GroupValueRead,
            value: None,
        };
        assert!(!device.process_telegram(&read));
    }

    #[test]
    fn test_unsupported_tag_is_an_error() {
        let cfg = config("Station", "Weather", "6/0/0");
        assert!(matches!(
            Device::try_from_config(&cfg),
            Err(KnxError::UnsupportedDeviceType(_))
        ));
    }

    #[test]
    fn test_device_without_addresses_is_rejected() {
        let cfg = DeviceConfig {
            name: "Orphan".to_string(),
            device_type: "Switch".to_string(),
            ..DeviceConfig::default()
        };
        assert!(Device::from_config(DeviceType::Switch, &cfg).is_err());
    }

    #[test]
    fn test_invalid_group_address_is_rejected() {
        let cfg = config("Lamp", "Switch", "99/0/0");
        assert!(matches!(
            Device::from_config(DeviceType::Switch, &cfg),
            Err(KnxError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_unit_of_measurement() {
        let mut cfg = config("Temp", "Sensor", "2/1/0");
        cfg.value_type = Some("temperature".to_string());
        let device = Device::from_config(DeviceType::Sensor, &cfg).unwrap();
        assert_eq!(device.unit_of_measurement(), Some("°C"));
    }
}
