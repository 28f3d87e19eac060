//! Relay pool: one map of URL to connection, fanning messages out and
//! events in.

use crate::config::{PoolConfig, ReconnectPolicy};
use crate::error::{ClientError, Result};
use crate::relay::{RelayConnection, RelayEvent, RelayStatus, parse_relay_url};
use futures_util::future::join_all;
use spore::ClientMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A relay event tagged with the relay it came from.
#[derive(Debug)]
pub struct PoolEvent {
    pub relay_url: String,
    pub event: RelayEvent,
}

struct PoolEntry {
    connection: Arc<RelayConnection>,
    forwarder: JoinHandle<()>,
}

/// Owns every relay connection. Mutations of the URL map are serialized by
/// a single lock and never overwrite an existing entry.
pub struct RelayPool {
    relays: RwLock<HashMap<String, PoolEntry>>,
    config: PoolConfig,
    events_tx: mpsc::UnboundedSender<PoolEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PoolEvent>>>,
}

impl RelayPool {
    pub fn new(config: PoolConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            relays: RwLock::new(HashMap::new()),
            config,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The single fan-in stream of every relay's events. Only the first call
    /// gets it.
    pub async fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PoolEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Take ownership of a connection and start routing its events.
    pub async fn add_relay(&self, mut connection: RelayConnection) -> Result<()> {
        let url = connection.url().to_string();
        let mut relays = self.relays.write().await;
        if relays.contains_key(&url) {
            return Err(ClientError::RelayAlreadyExists(url));
        }
        let events = connection.take_events().ok_or_else(|| {
            ClientError::Internal(format!("events for {url} were already taken"))
        })?;

        let connection = Arc::new(connection);
        let forwarder = tokio::spawn(forward_events(
            Arc::clone(&connection),
            events,
            self.events_tx.clone(),
            self.config.reconnect.clone(),
        ));
        relays.insert(
            url.clone(),
            PoolEntry {
                connection,
                forwarder,
            },
        );
        debug!("relay {} added to pool", url);
        Ok(())
    }

    /// Build a connection from the pool's relay config and add it.
    pub async fn add_url(&self, url: &str) -> Result<()> {
        let connection = RelayConnection::with_config(url, self.config.relay.clone())?;
        self.add_relay(connection).await
    }

    /// Disconnect and drop a relay.
    pub async fn remove_relay(&self, url: &str) -> Result<()> {
        let key = canonical_url(url);
        let entry = self
            .relays
            .write()
            .await
            .remove(&key)
            .ok_or_else(|| ClientError::RelayDoesNotExist(url.to_string()))?;

        let result = entry.connection.disconnect().await;
        entry.forwarder.abort();
        debug!("relay {} removed from pool", key);
        result
    }

    /// Deliver to every connected relay. Relays in any other state are
    /// skipped; per-relay send failures are reported on the event stream.
    /// Returns how many relays the message was written to.
    pub async fn send(&self, message: &ClientMessage) -> Result<usize> {
        let relays = self.connections().await;
        if relays.is_empty() {
            return Err(ClientError::NoRelaysAdded);
        }
        let text = message.to_json()?;

        let mut delivered = 0;
        for relay in relays {
            let status = relay.status().await;
            if status != RelayStatus::Connected {
                info!(
                    "skipping {} for {}: relay is {}",
                    message.message_type(),
                    relay.url(),
                    status
                );
                continue;
            }
            match relay.send_text(text.clone()).await {
                Ok(()) => delivered += 1,
                Err(error) => {
                    warn!("send to {} failed: {}", relay.url(), error);
                    let _ = self.events_tx.send(PoolEvent {
                        relay_url: relay.url().to_string(),
                        event: RelayEvent::Error(error),
                    });
                }
            }
        }
        Ok(delivered)
    }

    /// Connect every relay not already connected. Succeeds when at least one
    /// relay ends up connected.
    pub async fn connect_all(&self) -> Result<()> {
        let relays = self.connections().await;
        if relays.is_empty() {
            return Err(ClientError::NoRelaysAdded);
        }

        let attempts = relays.iter().map(|relay| async move {
            match relay.connect().await {
                Ok(()) | Err(ClientError::AlreadyConnected) => true,
                Err(error) => {
                    debug!("relay connect failed for {}: {}", relay.url(), error);
                    false
                }
            }
        });
        let successful = join_all(attempts).await.into_iter().filter(|ok| *ok).count();

        if successful == 0 {
            return Err(ClientError::Connection(
                "failed to connect to any relay".to_string(),
            ));
        }
        info!("connected to {}/{} relays", successful, relays.len());
        Ok(())
    }

    pub async fn disconnect_all(&self) -> Result<()> {
        for relay in self.connections().await {
            relay.disconnect().await?;
        }
        Ok(())
    }

    /// URLs of every relay in the pool, sorted.
    pub async fn relay_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.relays.read().await.keys().cloned().collect();
        urls.sort();
        urls
    }

    pub async fn status(&self, url: &str) -> Option<RelayStatus> {
        let relay = self.relay(url).await?;
        Some(relay.status().await)
    }

    /// Get relay by URL.
    pub async fn relay(&self, url: &str) -> Option<Arc<RelayConnection>> {
        self.relays
            .read()
            .await
            .get(&canonical_url(url))
            .map(|entry| Arc::clone(&entry.connection))
    }

    async fn connections(&self) -> Vec<Arc<RelayConnection>> {
        self.relays
            .read()
            .await
            .values()
            .map(|entry| Arc::clone(&entry.connection))
            .collect()
    }
}

impl Drop for RelayPool {
    fn drop(&mut self) {
        for entry in self.relays.get_mut().values() {
            entry.forwarder.abort();
        }
    }
}

fn canonical_url(url: &str) -> String {
    parse_relay_url(url).map_or_else(|_| url.to_string(), |parsed| parsed.to_string())
}

/// Tag each event with its relay and pass it on. A connection that drops
/// or degrades without being asked to is reconnected under `policy`. After
/// the policy gives up, events keep flowing so a later manual `connect()`
/// works; automatic reconnects resume once the relay is connected again.
async fn forward_events(
    relay: Arc<RelayConnection>,
    mut events: mpsc::UnboundedReceiver<RelayEvent>,
    pool_tx: mpsc::UnboundedSender<PoolEvent>,
    policy: ReconnectPolicy,
) {
    let relay_url = relay.url().to_string();
    let mut gave_up = false;

    while let Some(event) = events.recv().await {
        let lost = matches!(
            event,
            RelayEvent::Status(RelayStatus::Disconnected | RelayStatus::Degraded)
        );
        if matches!(event, RelayEvent::Status(RelayStatus::Connected)) {
            gave_up = false;
        }
        if pool_tx
            .send(PoolEvent {
                relay_url: relay_url.clone(),
                event,
            })
            .is_err()
        {
            break;
        }
        if !lost || gave_up || !policy.enabled || relay.is_closing() {
            continue;
        }
        // Queued statuses can be stale after an earlier reconnect.
        if matches!(
            relay.status().await,
            RelayStatus::Connected | RelayStatus::Connecting
        ) {
            continue;
        }

        if let Err(error) = reconnect(&relay, &policy).await {
            warn!("{}", error);
            gave_up = true;
            if pool_tx
                .send(PoolEvent {
                    relay_url: relay_url.clone(),
                    event: RelayEvent::Error(error),
                })
                .is_err()
            {
                break;
            }
        }
    }
}

async fn reconnect(relay: &RelayConnection, policy: &ReconnectPolicy) -> Result<()> {
    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.delay_for(attempt)).await;
        if relay.is_closing() {
            return Ok(());
        }
        info!(
            "reconnecting to {} (attempt {}/{})",
            relay.url(),
            attempt,
            policy.max_attempts
        );
        match relay.connect().await {
            Ok(()) | Err(ClientError::AlreadyConnected) => return Ok(()),
            Err(error) => debug!("reconnect to {} failed: {}", relay.url(), error),
        }
    }
    Err(ClientError::MaxReconnectAttemptsExceeded {
        url: relay.url().to_string(),
        attempts: policy.max_attempts,
    })
}
