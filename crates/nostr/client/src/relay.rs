//! Single relay connection management.

use crate::config::RelayConfig;
use crate::error::{ClientError, Result};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use spore::{ClientMessage, RelayMessage};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;

/// Lifecycle of a relay connection.
///
/// `Unopened -> Connecting -> Connected -> (Degraded) -> Disconnected`, and
/// back to `Connecting` on reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatus {
    Unopened,
    Connecting,
    Connected,
    /// Keepalive failed; the socket may be dead.
    Degraded,
    Disconnected,
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unopened => "unopened",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Everything a connection reports, in the order it happened.
#[derive(Debug)]
pub enum RelayEvent {
    Message(RelayMessage),
    Status(RelayStatus),
    Error(ClientError),
}

/// Status plus the channel it is announced on. Writing the status and
/// queueing the announcement happen under one lock, so a listener never
/// sees a frame ordered after the teardown that ended it.
struct StatusCell {
    url: String,
    status: RwLock<RelayStatus>,
    events: mpsc::UnboundedSender<RelayEvent>,
}

impl StatusCell {
    async fn set(&self, next: RelayStatus) {
        let mut status = self.status.write().await;
        if *status == next {
            return;
        }
        debug!("relay {} status {} -> {}", self.url, *status, next);
        *status = next;
        let _ = self.events.send(RelayEvent::Status(next));
    }

    /// Move to Connecting unless a connection is already up or underway.
    /// The check and the transition happen under one write lock.
    async fn begin_connect(&self) -> Result<()> {
        let mut status = self.status.write().await;
        if matches!(*status, RelayStatus::Connected | RelayStatus::Connecting) {
            return Err(ClientError::AlreadyConnected);
        }
        debug!(
            "relay {} status {} -> {}",
            self.url,
            *status,
            RelayStatus::Connecting
        );
        *status = RelayStatus::Connecting;
        let _ = self.events.send(RelayEvent::Status(RelayStatus::Connecting));
        Ok(())
    }

    async fn get(&self) -> RelayStatus {
        *self.status.read().await
    }

    fn emit(&self, event: RelayEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

/// One WebSocket connection to one relay.
///
/// Inbound frames are decoded on a background task and reported through the
/// receiver returned by [`RelayConnection::take_events`]. Sends may happen
/// concurrently with receiving.
pub struct RelayConnection {
    url: Url,
    config: RelayConfig,
    cell: Arc<StatusCell>,
    writer: Arc<Mutex<Option<WsWriter>>>,
    events_rx: Option<mpsc::UnboundedReceiver<RelayEvent>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closing: AtomicBool,
}

impl RelayConnection {
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, RelayConfig::default())
    }

    pub fn with_config(url: &str, config: RelayConfig) -> Result<Self> {
        let parsed_url = parse_relay_url(url)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            cell: Arc::new(StatusCell {
                url: parsed_url.to_string(),
                status: RwLock::new(RelayStatus::Unopened),
                events: events_tx,
            }),
            url: parsed_url,
            config,
            writer: Arc::new(Mutex::new(None)),
            events_rx: Some(events_rx),
            tasks: Mutex::new(Vec::new()),
            closing: AtomicBool::new(false),
        })
    }

    /// Relay URL as string.
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub async fn status(&self) -> RelayStatus {
        self.cell.get().await
    }

    /// Hand out the event stream. Only the first call gets it.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<RelayEvent>> {
        self.events_rx.take()
    }

    /// True once [`disconnect`](Self::disconnect) has been called and no
    /// connect has happened since.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Open the socket and start the receive loop and keepalive timer.
    ///
    /// Allowed from any state except `Connecting`/`Connected`; a degraded or
    /// dropped connection is torn down first.
    pub async fn connect(&self) -> Result<()> {
        self.cell.begin_connect().await?;
        self.stop_tasks().await;
        self.closing.store(false, Ordering::SeqCst);

        let connected = timeout(self.config.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| {
                ClientError::Timeout(format!(
                    "connection to {} timed out after {:?}",
                    self.url, self.config.connect_timeout
                ))
            })
            .and_then(|result| result.map_err(|error| ClientError::WebSocket(error.to_string())));

        let (stream, _response) = match connected {
            Ok(connected) => connected,
            Err(error) => {
                warn!("relay {} connect failed: {}", self.url, error);
                self.cell.set(RelayStatus::Disconnected).await;
                return Err(error);
            }
        };

        let (writer, reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        self.cell.set(RelayStatus::Connected).await;
        info!("connected to relay {}", self.url);

        let recv_task = tokio::spawn(receive_loop(
            reader,
            Arc::clone(&self.cell),
            Arc::clone(&self.writer),
        ));
        let ping_task = tokio::spawn(keepalive_loop(
            self.config.ping_interval,
            Arc::clone(&self.cell),
            Arc::clone(&self.writer),
        ));

        let mut tasks = self.tasks.lock().await;
        tasks.push(recv_task);
        tasks.push(ping_task);
        Ok(())
    }

    /// Close with a normal-closure code and stop background tasks.
    pub async fn disconnect(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);

        if let Some(mut writer) = self.writer.lock().await.take() {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            if let Err(error) = writer.send(Message::Close(Some(frame))).await {
                debug!("relay {} close frame not sent: {}", self.url, error);
            }
        }
        self.stop_tasks().await;
        self.cell.set(RelayStatus::Disconnected).await;
        Ok(())
    }

    /// Send one keepalive ping now. A transport failure marks the
    /// connection degraded but does not reconnect.
    pub async fn ping(&self) -> Result<()> {
        ping_once(&self.cell, &self.writer).await
    }

    /// Serialize and transmit. Failure is returned to the caller and leaves
    /// the status untouched.
    pub async fn send(&self, message: &ClientMessage) -> Result<()> {
        let text = message.to_json()?;
        self.send_text(text).await
    }

    pub(crate) async fn send_text(&self, text: String) -> Result<()> {
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer
            .send(Message::Text(text))
            .await
            .map_err(|error| ClientError::SendFailed(format!("{}: {}", self.url, error)))
    }

    async fn stop_tasks(&self) {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

impl fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConnection")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

/// Parse and check a relay URL. Only `ws` and `wss` are accepted.
pub fn parse_relay_url(url: &str) -> Result<Url> {
    let parsed_url = Url::parse(url.trim())?;
    if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
        return Err(ClientError::InvalidUrl(format!(
            "URL must use ws:// or wss:// scheme, got: {}",
            parsed_url.scheme()
        )));
    }
    Ok(parsed_url)
}

async fn receive_loop(
    mut reader: futures_util::stream::SplitStream<WsStream>,
    cell: Arc<StatusCell>,
    writer: Arc<Mutex<Option<WsWriter>>>,
) {
    let relay_url = cell.url.clone();

    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let event = match RelayMessage::from_json(text.as_str()) {
                    Ok(message) => RelayEvent::Message(message),
                    Err(error) => {
                        warn!("protocol parse error on {}: {}", relay_url, error);
                        RelayEvent::Error(ClientError::Message(error))
                    }
                };
                if !cell.emit(event) {
                    break;
                }
            }
            Ok(Message::Ping(payload)) => {
                debug!("received ping from {} ({} bytes)", relay_url, payload.len());
            }
            Ok(Message::Close(frame)) => {
                debug!("relay {} closed the connection: {:?}", relay_url, frame);
                break;
            }
            Ok(Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {}
            Err(error) => {
                warn!("websocket read error on {}: {}", relay_url, error);
                cell.emit(RelayEvent::Error(ClientError::WebSocket(error.to_string())));
                break;
            }
        }
    }

    writer.lock().await.take();
    cell.set(RelayStatus::Disconnected).await;
}

async fn keepalive_loop(
    period: std::time::Duration,
    cell: Arc<StatusCell>,
    writer: Arc<Mutex<Option<WsWriter>>>,
) {
    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if ping_once(&cell, &writer).await.is_err() {
            break;
        }
    }
}

async fn ping_once(cell: &StatusCell, writer: &Mutex<Option<WsWriter>>) -> Result<()> {
    let result = {
        let mut guard = writer.lock().await;
        let writer = guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer.send(Message::Ping(Vec::new())).await
    };

    if let Err(reason) = result {
        warn!("keepalive to {} failed: {}", cell.url, reason);
        cell.set(RelayStatus::Degraded).await;
        cell.emit(RelayEvent::Error(ClientError::Degraded(cell.url.clone())));
        return Err(ClientError::Degraded(cell.url.clone()));
    }
    Ok(())
}
