//! # KNX Fleet Server
//!
//! Async server managing a fleet of independent KNX/IP gateway connections
//! ("rooms") and fanning live device-state changes out to WebSocket
//! subscribers.
//!
//! ## Features
//!
//! - Per-room gateway lifecycle with bounded-backoff connects and
//!   partial-failure tolerance: one unreachable gateway never prevents the
//!   other rooms from coming up
//! - Closed device model with per-type state resolvers projecting live
//!   protocol state into transport-safe snapshots
//! - Garbage-free subscription registry with fire-and-forget delivery that
//!   isolates slow or dead subscribers
//! - Per-room telegram routing for raw group-address and whole-device
//!   subscriptions on one combined channel
//! - Pluggable gateway transport behind [`gateway::GatewayTransport`], with a
//!   simulator used by tests and the shipped binary

pub mod broadcast;
pub mod config;
pub mod devices;
pub mod error;
pub mod fleet;
pub mod gateway;
pub mod logging;
pub mod mock;
pub mod server;

pub use config::{RoomConfig, ServerConfig};
pub use error::{KnxError, Result};
pub use fleet::{ConnectionOrchestrator, ReconfigureStatus, ReconfigureSummary};
