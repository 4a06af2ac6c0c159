//! Mock gateway implementations for testing and simulation
//!
//! `MockNetwork` stands in for a building full of KNX/IP gateways: addresses
//! can be marked unreachable, telegrams injected as if they arrived from the
//! bus, and outbound telegrams inspected. The binary's simulator mode and the
//! test suite share this module.

use crate::error::{KnxError, Result};
use crate::gateway::{BoxedGateway, GatewayFactory, GatewayTransport, Telegram};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const TELEGRAM_BUFFER: usize = 256;

struct NetworkInner {
    senders: Mutex<HashMap<String, broadcast::Sender<Telegram>>>,
    unreachable: Mutex<HashSet<String>>,
    sent: Mutex<Vec<(String, Telegram)>>,
}

impl NetworkInner {
    fn sender_for(&self, address: &str) -> broadcast::Sender<Telegram> {
        let mut senders = self.senders.lock().expect("mock network lock poisoned");
        senders
            .entry(address.to_string())
            .or_insert_with(|| broadcast::channel(TELEGRAM_BUFFER).0)
            .clone()
    }
}

/// A simulated set of gateways, shared by every transport the factory creates
pub struct MockNetwork {
    inner: Arc<NetworkInner>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                senders: Mutex::new(HashMap::new()),
                unreachable: Mutex::new(HashSet::new()),
                sent: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Factory handing out transports bound to this network
    pub fn factory(&self) -> GatewayFactory {
        let inner = self.inner.clone();
        Arc::new(move |address: &str| -> BoxedGateway {
            Box::new(MockGateway {
                address: address.to_string(),
                connected: false,
                sender: inner.sender_for(address),
                network: inner.clone(),
            })
        })
    }

    /// Make connects to the address fail until marked reachable again
    pub fn set_unreachable(&self, address: &str) {
        self.inner
            .unreachable
            .lock()
            .expect("mock network lock poisoned")
            .insert(address.to_string());
    }

    /// Make connects to the address succeed again
    pub fn set_reachable(&self, address: &str) {
        self.inner
            .unreachable
            .lock()
            .expect("mock network lock poisoned")
            .remove(address);
    }

    /// Deliver a telegram as if it arrived from the bus behind the address
    pub fn inject(&self, address: &str, telegram: Telegram) {
        let sender = self.inner.sender_for(address);
        // No receivers just means nobody is connected to that gateway.
        let _ = sender.send(telegram);
    }

    /// Telegrams sent out through any gateway of this network
    pub fn sent_telegrams(&self) -> Vec<(String, Telegram)> {
        self.inner
            .sent
            .lock()
            .expect("mock network lock poisoned")
            .clone()
    }
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Mock transport for one gateway address
pub struct MockGateway {
    address: String,
    connected: bool,
    sender: broadcast::Sender<Telegram>,
    network: Arc<NetworkInner>,
}

#[async_trait]
impl GatewayTransport for MockGateway {
    async fn connect(&mut self) -> Result<()> {
        let unreachable = self
            .network
            .unreachable
            .lock()
            .expect("mock network lock poisoned")
            .contains(&self.address);
        if unreachable {
            return Err(KnxError::connection(format!(
                "gateway {} unreachable",
                self.address
            )));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send(&self, telegram: Telegram) -> Result<()> {
        if !self.connected {
            return Err(KnxError::connection(format!(
                "gateway {} is not connected",
                self.address
            )));
        }
        self.network
            .sent
            .lock()
            .expect("mock network lock poisoned")
            .push((self.address.clone(), telegram));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Telegram> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GroupAddress, TelegramValue};

    #[tokio::test]
    async fn test_unreachable_address_refuses_connect() {
        let network = MockNetwork::new();
        network.set_unreachable("10.0.0.9");

        let factory = network.factory();
        let mut gateway = factory.as_ref()("10.0.0.9");
        assert!(gateway.connect().await.is_err());
        assert!(!gateway.is_connected().await);

        network.set_reachable("10.0.0.9");
        assert!(gateway.connect().await.is_ok());
        assert!(gateway.is_connected().await);
    }

    #[tokio::test]
    async fn test_injected_telegrams_reach_subscribers() {
        let network = MockNetwork::new();
        let factory = network.factory();
        let mut gateway = factory.as_ref()("10.0.0.1");
        gateway.connect().await.unwrap();

        let mut rx = gateway.subscribe();
        let ga: GroupAddress = "1/0/1".parse().unwrap();
        network.inject("10.0.0.1", Telegram::write(ga, TelegramValue::Bool(true)));

        let telegram = rx.recv().await.unwrap();
        assert_eq!(telegram.destination, ga);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let network = MockNetwork::new();
        let factory = network.factory();
        let mut gateway = factory.as_ref()("10.0.0.1");

        let ga: GroupAddress = "1/0/1".parse().unwrap();
        let telegram = Telegram::write(ga, TelegramValue::Bool(true));
        assert!(gateway.send(telegram.clone()).await.is_err());

        gateway.connect().await.unwrap();
        gateway.send(telegram).await.unwrap();
        assert_eq!(network.sent_telegrams().len(), 1);
    }
}
