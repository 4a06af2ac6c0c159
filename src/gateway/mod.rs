//! Gateway transport boundary
//!
//! The vocabulary of the bus (group addresses, decoded telegram values) and
//! the contract every gateway transport fulfills. The wire codec itself is an
//! external collaborator behind [`GatewayTransport`]; this crate never frames
//! or parses raw KNXnet/IP packets.

pub mod backoff;

use crate::error::{KnxError, Result};
use async_trait::async_trait;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default KNXnet/IP tunneling port
pub const DEFAULT_GATEWAY_PORT: u16 = 3671;

/// Three-level KNX group address (`main/middle/sub`)
///
/// The canonical form produced by [`fmt::Display`] is the only representation
/// that ever crosses the transport boundary to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupAddress {
    main: u8,
    middle: u8,
    sub: u8,
}

impl GroupAddress {
    /// Create a group address, validating the three-level ranges
    pub fn new(main: u8, middle: u8, sub: u8) -> Result<Self> {
        if main > 31 {
            return Err(KnxError::invalid_address(format!(
                "main group {main} out of range (0..=31)"
            )));
        }
        if middle > 7 {
            return Err(KnxError::invalid_address(format!(
                "middle group {middle} out of range (0..=7)"
            )));
        }
        Ok(Self { main, middle, sub })
    }

    pub fn main(&self) -> u8 {
        self.main
    }

    pub fn middle(&self) -> u8 {
        self.middle
    }

    pub fn sub(&self) -> u8 {
        self.sub
    }
}

impl fmt::Display for GroupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.main, self.middle, self.sub)
    }
}

impl FromStr for GroupAddress {
    type Err = KnxError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('/');
        let (main, middle, sub) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), Some(c), None) => (a, b, c),
            _ => {
                return Err(KnxError::invalid_address(format!(
                    "group address '{s}' is not of the form main/middle/sub"
                )))
            }
        };
        let parse = |part: &str, label: &str| {
            part.trim().parse::<u8>().map_err(|_| {
                KnxError::invalid_address(format!("{label} group '{part}' in '{s}' is not a number"))
            })
        };
        Self::new(parse(main, "main")?, parse(middle, "middle")?, parse(sub, "sub")?)
    }
}

impl Serialize for GroupAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GroupAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Decoded telegram payload value
///
/// The transport decodes datapoint payloads before handing telegrams to this
/// crate; the untagged serde form keeps wire frames primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelegramValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Raw(Vec<u8>),
}

impl TelegramValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TelegramValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            TelegramValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TelegramValue::Text(t) => Some(t),
            _ => None,
        }
    }
}

/// APCI service carried by a telegram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApciKind {
    GroupValueWrite,
    GroupValueResponse,
    GroupValueRead,
}

/// One inbound/outbound bus protocol event
#[derive(Debug, Clone, PartialEq)]
pub struct Telegram {
    /// Individual address of the sending bus participant (e.g. "1.1.4")
    pub source: String,
    /// Group address the telegram targets
    pub destination: GroupAddress,
    /// Service kind
    pub kind: ApciKind,
    /// Decoded payload; `None` for read requests
    pub value: Option<TelegramValue>,
}

impl Telegram {
    /// Convenience constructor for a group-value-write
    pub fn write(destination: GroupAddress, value: TelegramValue) -> Self {
        Self {
            source: String::new(),
            destination,
            kind: ApciKind::GroupValueWrite,
            value: Some(value),
        }
    }

    /// Convenience constructor for a group-value-response
    pub fn response(destination: GroupAddress, value: TelegramValue) -> Self {
        Self {
            source: String::new(),
            destination,
            kind: ApciKind::GroupValueResponse,
            value: Some(value),
        }
    }

    /// Whether the telegram carries a value update
    pub fn carries_value(&self) -> bool {
        matches!(
            self.kind,
            ApciKind::GroupValueWrite | ApciKind::GroupValueResponse
        ) && self.value.is_some()
    }
}

/// Contract for gateway transport implementations
///
/// Inbound telegrams fan out through a broadcast channel: every interested
/// party calls [`subscribe`](GatewayTransport::subscribe) and consumes its own
/// receiver on its own task. Dropping the receiver (or aborting the consuming
/// task) is how a listener unregisters.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// Open the tunnel to the gateway
    async fn connect(&mut self) -> Result<()>;

    /// Close the tunnel; must be a no-op when already disconnected
    async fn disconnect(&mut self) -> Result<()>;

    /// Whether the tunnel is currently open
    async fn is_connected(&self) -> bool;

    /// Send a telegram out on the bus
    async fn send(&self, telegram: Telegram) -> Result<()>;

    /// Register for inbound telegrams
    fn subscribe(&self) -> broadcast::Receiver<Telegram>;
}

/// Boxed transport handle owned by a room connection
pub type BoxedGateway = Box<dyn GatewayTransport>;

/// Produces a transport for a gateway network address
///
/// The orchestrator never names a concrete transport; embedders inject the
/// factory that matches their deployment (the binary wires up the simulator).
pub type GatewayFactory = Arc<dyn Fn(&str) -> BoxedGateway + Send + Sync>;
