//! Client orchestrator: validates outbound events, fans requests out
//! through the pool and de-duplicates inbound events per subscription.
//!
//! All subscription state lives in one dispatcher task fed by the pool's
//! event stream and by commands from [`Client`] methods, so it is never
//! touched concurrently.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::pool::{PoolEvent, RelayPool};
use crate::relay::{RelayEvent, RelayStatus};
use crate::subscription::{CollectResult, EventOutcome, SubscriptionRegistry};
use spore::{
    ClientMessage, Event, Filter, KeyPair, Kind, Metadata, RelayMessage, Subscription, Tag, nip19,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

const NOTIFICATION_CAPACITY: usize = 256;

/// Relay-side happenings that are not subscription events.
#[derive(Debug, Clone)]
pub enum Notification {
    Ok {
        relay_url: String,
        event_id: String,
        accepted: bool,
        message: String,
    },
    Notice {
        relay_url: String,
        message: String,
    },
    EndOfStoredEvents {
        relay_url: String,
        subscription_id: String,
    },
    Status {
        relay_url: String,
        status: RelayStatus,
    },
    Error {
        relay_url: String,
        error: Arc<ClientError>,
    },
}

/// Publish confirmation from a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishConfirmation {
    pub relay_url: String,
    pub event_id: String,
    pub accepted: bool,
    pub message: String,
}

impl PublishConfirmation {
    /// A refusal becomes `RelayError` carrying the relay's own message.
    pub fn ensure_accepted(&self) -> Result<()> {
        if self.accepted {
            return Ok(());
        }
        Err(ClientError::RelayError {
            url: self.relay_url.clone(),
            message: self.message.clone(),
        })
    }
}

/// Answer to a registration: fails if the id is already open.
type Registered = oneshot::Sender<Result<()>>;

enum Command {
    Collect {
        id: String,
        reply: oneshot::Sender<CollectResult>,
        registered: Registered,
    },
    Stream {
        id: String,
        sender: mpsc::UnboundedSender<Event>,
        registered: Registered,
    },
    ExpectEose {
        id: String,
        relays: usize,
    },
    /// Resolve a pending collect with what it has.
    Finish {
        id: String,
    },
    /// Drop local state only.
    Forget {
        id: String,
    },
    /// Drop local state and send CLOSE to the relays.
    Close {
        id: String,
    },
}

pub struct Client {
    pool: Arc<RelayPool>,
    commands: mpsc::UnboundedSender<Command>,
    notifications: broadcast::Sender<Notification>,
    keys: Option<KeyPair>,
    collect_timeout: Duration,
    dispatcher: JoinHandle<()>,
}

impl Client {
    /// Build the pool from `config.relays` and start the dispatcher. Relays
    /// are not connected until [`connect`](Self::connect).
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let pool = Arc::new(RelayPool::new(config.pool));
        for url in &config.relays {
            pool.add_url(url).await?;
        }
        let events = pool
            .take_events()
            .await
            .ok_or_else(|| ClientError::Internal("pool events already taken".to_string()))?;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let dispatcher = tokio::spawn(dispatch(
            Arc::clone(&pool),
            commands_rx,
            events,
            notifications.clone(),
        ));

        Ok(Self {
            pool,
            commands,
            notifications,
            keys: config.secret_key,
            collect_timeout: config.collect_timeout,
            dispatcher,
        })
    }

    pub fn pool(&self) -> &RelayPool {
        &self.pool
    }

    pub fn keys(&self) -> Option<&KeyPair> {
        self.keys.as_ref()
    }

    pub async fn add_relay(&self, url: &str) -> Result<()> {
        self.pool.add_url(url).await
    }

    pub async fn remove_relay(&self, url: &str) -> Result<()> {
        self.pool.remove_relay(url).await
    }

    pub async fn connect(&self) -> Result<()> {
        self.pool.connect_all().await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.pool.disconnect_all().await
    }

    /// OK, NOTICE, status and error reports from every relay.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Sign a new event with the configured key.
    pub fn create_event(
        &self,
        kind: Kind,
        tags: Vec<Tag>,
        content: impl Into<String>,
    ) -> Result<Event> {
        let keys = self.keys.as_ref().ok_or(ClientError::MissingSecretKey)?;
        Ok(Event::create(keys, kind, tags, content)?)
    }

    /// Validate locally, then send to every connected relay. An event that
    /// fails validation never reaches the pool.
    pub async fn publish(&self, event: &Event) -> Result<usize> {
        event.validate()?;
        let delivered = self.pool.send(&ClientMessage::Event(event.clone())).await?;
        if delivered == 0 {
            warn!("event {} was not sent: no relay is connected", event.id);
        } else {
            debug!("event {} sent to {} relays", event.id, delivered);
        }
        Ok(delivered)
    }

    /// Publish and wait up to `wait` for each relay's OK.
    pub async fn publish_and_wait(
        &self,
        event: &Event,
        wait: Duration,
    ) -> Result<Vec<PublishConfirmation>> {
        let mut notifications = self.notifications();
        let delivered = self.publish(event).await?;

        let deadline = Instant::now() + wait;
        let mut confirmations = Vec::new();
        let mut answered = HashSet::new();
        while answered.len() < delivered {
            let notification = match timeout_at(deadline, notifications.recv()).await {
                Ok(Ok(notification)) => notification,
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    warn!("missed {} notifications while waiting for OK", skipped);
                    continue;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
            };
            if let Notification::Ok {
                relay_url,
                event_id,
                accepted,
                message,
            } = notification
                && event_id == event.id
                && answered.insert(relay_url.clone())
            {
                confirmations.push(PublishConfirmation {
                    relay_url,
                    event_id,
                    accepted,
                    message,
                });
            }
        }
        Ok(confirmations)
    }

    /// Open a standing subscription. Each distinct valid event is delivered
    /// once on the returned channel until [`unsubscribe`](Self::unsubscribe)
    /// or the receiver is dropped.
    pub async fn subscribe(
        &self,
        subscription: Subscription,
    ) -> Result<mpsc::UnboundedReceiver<Event>> {
        let id = subscription.id.clone();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.register(|registered| Command::Stream {
            id: id.clone(),
            sender,
            registered,
        })
        .await?;

        match self.pool.send(&ClientMessage::Req(subscription)).await {
            Ok(relays) => {
                self.command(Command::ExpectEose { id, relays })?;
                Ok(receiver)
            }
            Err(error) => {
                self.command(Command::Forget { id })?;
                Err(error)
            }
        }
    }

    /// Subscribe, gather de-duplicated events until every relay sent
    /// end-of-stored-events, then close the subscription.
    ///
    /// On timeout the events gathered so far are returned if at least one
    /// relay finished; otherwise the call fails with `Timeout`. If the
    /// returned future is dropped early, the subscription is still cleaned
    /// up.
    pub async fn subscribe_and_collect(
        &self,
        subscription: Subscription,
        wait: Option<Duration>,
    ) -> Result<Vec<Event>> {
        let id = subscription.id.clone();
        let (reply, mut results) = oneshot::channel();
        self.register(|registered| Command::Collect {
            id: id.clone(),
            reply,
            registered,
        })
        .await?;
        let _guard = CloseOnDrop {
            id: id.clone(),
            commands: self.commands.clone(),
        };

        let relays = self.pool.send(&ClientMessage::Req(subscription)).await?;
        if relays == 0 {
            return Err(ClientError::NotConnected);
        }
        self.command(Command::ExpectEose {
            id: id.clone(),
            relays,
        })?;

        let wait = wait.unwrap_or(self.collect_timeout);
        match timeout(wait, &mut results).await {
            Ok(result) => result.map_err(|_| ClientError::SubscriptionClosed(id))?,
            Err(_) => {
                debug!("collect for {} timed out after {:?}", id, wait);
                self.command(Command::Finish { id: id.clone() })?;
                results
                    .await
                    .map_err(|_| ClientError::SubscriptionClosed(id))?
            }
        }
    }

    /// Send CLOSE and drop local state. Late events for `id` are ignored.
    pub async fn unsubscribe(&self, id: &str) -> Result<()> {
        self.command(Command::Forget { id: id.to_string() })?;
        self.pool
            .send(&ClientMessage::Close(id.to_string()))
            .await?;
        Ok(())
    }

    /// Publish a set-metadata event carrying `metadata`.
    pub async fn update_profile(&self, metadata: &Metadata) -> Result<Event> {
        let event = self.create_event(Kind::SET_METADATA, Vec::new(), metadata.to_content()?)?;
        self.publish(&event).await?;
        Ok(event)
    }

    /// Newest profile metadata for a public key (hex or `npub`).
    pub async fn fetch_profile(
        &self,
        public_key: &str,
        wait: Option<Duration>,
    ) -> Result<Option<Metadata>> {
        let Some(event) = self.newest(public_key, Kind::SET_METADATA, wait).await? else {
            return Ok(None);
        };
        Ok(Some(Metadata::from_content(&event.content)?))
    }

    /// Public keys followed by `public_key`, from its newest contact list.
    pub async fn fetch_contacts(
        &self,
        public_key: &str,
        wait: Option<Duration>,
    ) -> Result<Vec<String>> {
        let contacts = self
            .newest(public_key, Kind::CONTACT_LIST, wait)
            .await?
            .map(|event| event.referenced_pubkeys().map(str::to_string).collect())
            .unwrap_or_default();
        Ok(contacts)
    }

    async fn newest(
        &self,
        public_key: &str,
        kind: Kind,
        wait: Option<Duration>,
    ) -> Result<Option<Event>> {
        let author = nip19::decode_public_key(public_key)?;
        let filter = Filter::new().authors([author.clone()]).kind(kind);
        let events = self
            .subscribe_and_collect(Subscription::new(vec![filter]), wait)
            .await?;

        Ok(events
            .into_iter()
            .filter(|event| event.kind == kind && event.public_key == author)
            .max_by_key(|event| event.created_at))
    }

    /// Send a registration and wait for the dispatcher to accept the id.
    async fn register(&self, build: impl FnOnce(Registered) -> Command) -> Result<()> {
        let (registered, accepted) = oneshot::channel();
        self.command(build(registered))?;
        accepted
            .await
            .map_err(|_| ClientError::Internal("dispatcher stopped".to_string()))?
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::Internal("dispatcher stopped".to_string()))
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Closes a subscription when a collect finishes or is abandoned.
struct CloseOnDrop {
    id: String,
    commands: mpsc::UnboundedSender<Command>,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close {
            id: std::mem::take(&mut self.id),
        });
    }
}

async fn dispatch(
    pool: Arc<RelayPool>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: mpsc::UnboundedReceiver<PoolEvent>,
    notifications: broadcast::Sender<Notification>,
) {
    let mut registry = SubscriptionRegistry::new();

    loop {
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(command) => handle_command(&mut registry, &pool, command),
                None => break,
            },
            Some(event) = events.recv() => {
                handle_pool_event(&mut registry, &pool, &notifications, event);
            }
        }
    }
}

fn handle_command(registry: &mut SubscriptionRegistry, pool: &Arc<RelayPool>, command: Command) {
    match command {
        Command::Collect {
            id,
            reply,
            registered,
        } => {
            let _ = registered.send(registry.register_collect(id, reply));
        }
        Command::Stream {
            id,
            sender,
            registered,
        } => {
            let _ = registered.send(registry.register_stream(id, sender));
        }
        Command::ExpectEose { id, relays } => registry.expect_eose(&id, relays),
        Command::Finish { id } => registry.finish(&id),
        Command::Forget { id } => {
            registry.remove(&id);
        }
        Command::Close { id } => {
            registry.remove(&id);
            send_close(pool, id);
        }
    }
}

fn handle_pool_event(
    registry: &mut SubscriptionRegistry,
    pool: &Arc<RelayPool>,
    notifications: &broadcast::Sender<Notification>,
    PoolEvent { relay_url, event }: PoolEvent,
) {
    let notification = match event {
        RelayEvent::Message(RelayMessage::Event {
            subscription_id,
            event,
        }) => {
            let event_id = event.id.clone();
            match registry.handle_event(&subscription_id, event) {
                EventOutcome::Delivered | EventOutcome::Duplicate => {}
                EventOutcome::UnknownSubscription => debug!(
                    "ignoring event {} from {} for closed subscription {}",
                    event_id, relay_url, subscription_id
                ),
                EventOutcome::Rejected(error) => warn!(
                    "dropping invalid event {} from {}: {}",
                    event_id, relay_url, error
                ),
                EventOutcome::ReceiverClosed => {
                    debug!("subscription {} receiver dropped", subscription_id);
                    send_close(pool, subscription_id);
                }
            }
            return;
        }
        RelayEvent::Message(RelayMessage::Eose(subscription_id)) => {
            if registry.handle_eose(&subscription_id, &relay_url) {
                debug!("collect for {} complete", subscription_id);
            }
            Notification::EndOfStoredEvents {
                relay_url,
                subscription_id,
            }
        }
        RelayEvent::Message(RelayMessage::Notice(message)) => {
            info!("notice from {}: {}", relay_url, message);
            Notification::Notice { relay_url, message }
        }
        RelayEvent::Message(RelayMessage::Ok {
            event_id,
            accepted,
            message,
        }) => {
            if !accepted {
                warn!("{} rejected event {}: {}", relay_url, event_id, message);
            }
            Notification::Ok {
                relay_url,
                event_id,
                accepted,
                message,
            }
        }
        RelayEvent::Status(status) => Notification::Status { relay_url, status },
        RelayEvent::Error(error) => Notification::Error {
            relay_url,
            error: Arc::new(error),
        },
    };
    // No listeners is fine.
    let _ = notifications.send(notification);
}

fn send_close(pool: &Arc<RelayPool>, id: String) {
    let pool = Arc::clone(pool);
    tokio::spawn(async move {
        if let Err(error) = pool.send(&ClientMessage::Close(id.clone())).await {
            debug!("CLOSE for {} not sent: {}", id, error);
        }
    });
}
