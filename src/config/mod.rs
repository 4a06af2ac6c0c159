//! Configuration for the KNX fleet server
//!
//! Two layers: the server's own settings (TOML file plus environment
//! overrides) and the room/device records applied at runtime through the
//! orchestrator. Device records accept unknown extension fields; they are
//! ignored at instantiation but preserved in the applied-configuration
//! snapshot.

use crate::error::{KnxError, Result};
use crate::gateway::backoff::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// One device record inside a room configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name, unique within its room
    pub name: String,

    /// Device type tag; must match a supported type to be instantiated
    #[serde(rename = "type")]
    pub device_type: String,

    /// Primary (command) group address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_address: Option<String>,

    /// State feedback group address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_address_state: Option<String>,

    /// Additional group addresses the device listens on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub passive_group_addresses: Vec<String>,

    /// Datapoint value type (e.g. "temperature", "percent")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,

    /// Whether the device should be synced on startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_state: Option<bool>,

    /// Notify subscribers even when a telegram does not change the state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always_callback: Option<bool>,

    /// Unknown extension fields, preserved but not interpreted
    #[serde(flatten)]
    pub extensions: serde_json::Map<String, serde_json::Value>,
}

/// One room: a gateway connection and its devices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Unique room identifier
    pub room_id: String,

    /// Gateway network address, `host` or `host:port`
    pub gateway_address: String,

    /// Devices to instantiate against the gateway
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// The full room list as accepted by the reconfiguration interface
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    /// List of rooms with KNX devices
    #[serde(default)]
    pub rooms: Vec<RoomConfig>,
}

/// HTTP transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// Shared-credential check at the WebSocket boundary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Token required on WebSocket upgrade; `None` disables the check
    #[serde(default)]
    pub token: Option<String>,
}

/// Gateway connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Connect retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Run against simulated gateways instead of real tunnels
    #[serde(default)]
    pub simulate: bool,
}

/// Bounded-backoff settings for gateway connects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum connection attempts per room initialization
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles afterwards
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,

    /// Upper bound on any single delay
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
        }
    }
}

impl RetryConfig {
    /// Build the runtime retry policy
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            ..RetryPolicy::default()
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP transport settings
    #[serde(default)]
    pub http: HttpConfig,

    /// WebSocket auth settings
    #[serde(default)]
    pub auth: AuthConfig,

    /// Gateway connection settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Rooms applied at startup; more can be applied at runtime
    #[serde(default)]
    pub rooms: Vec<RoomConfig>,
}

impl ServerConfig {
    /// Load from a TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| KnxError::config(format!("{}: {e}", path.display())))
    }

    /// Development defaults: simulated gateways, no auth
    pub fn dev_mode() -> Self {
        Self {
            gateway: GatewayConfig {
                simulate: true,
                ..GatewayConfig::default()
            },
            ..Self::default()
        }
    }

    fn apply_env(&mut self) {
        if let Ok(port) = env::var("KNX_HTTP_PORT") {
            if let Ok(port) = port.parse() {
                self.http.port = port;
            }
        }
        if let Ok(addr) = env::var("KNX_BIND_ADDRESS") {
            self.http.bind_address = addr;
        }
        if let Ok(token) = env::var("KNX_AUTH_TOKEN") {
            if !token.is_empty() {
                self.auth.token = Some(token);
            }
        }
    }
}
