//! In-process relay for integration tests.
//!
//! Answers `REQ` with its stored events followed by `EOSE`, answers `EVENT`
//! with an accepting `OK`, and records every text frame it receives.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use spore::Event;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub struct MockRelay {
    pub url: String,
    frames: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    server: JoinHandle<()>,
}

impl MockRelay {
    pub async fn start(stored: Vec<Event>) -> std::io::Result<Self> {
        Self::spawn(stored, false).await
    }

    /// A relay that hangs up on its first client right after the handshake.
    pub async fn start_dropping_first(stored: Vec<Event>) -> std::io::Result<Self> {
        Self::spawn(stored, true).await
    }

    /// Serve on an already bound listener, e.g. to bring a relay back on
    /// an address that was down.
    pub fn start_on(listener: TcpListener, stored: Vec<Event>) -> std::io::Result<Self> {
        Self::serve_on(listener, stored, false)
    }

    async fn spawn(stored: Vec<Event>, drop_first: bool) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Self::serve_on(listener, stored, drop_first)
    }

    fn serve_on(
        listener: TcpListener,
        stored: Vec<Event>,
        drop_first: bool,
    ) -> std::io::Result<Self> {
        let url = format!("ws://{}", listener.local_addr()?);
        let frames = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let server = tokio::spawn(serve(
            listener,
            Arc::new(stored),
            Arc::clone(&frames),
            Arc::clone(&connections),
            drop_first,
        ));

        Ok(Self {
            url,
            frames,
            connections,
            server,
        })
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames
            .lock()
            .map(|frames| frames.clone())
            .unwrap_or_default()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Stop accepting new connections.
    pub fn shutdown(&self) {
        self.server.abort();
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn serve(
    listener: TcpListener,
    stored: Arc<Vec<Event>>,
    frames: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    drop_first: bool,
) {
    while let Ok((stream, _)) = listener.accept().await {
        let index = connections.fetch_add(1, Ordering::SeqCst);
        let stored = Arc::clone(&stored);
        let frames = Arc::clone(&frames);

        tokio::spawn(async move {
            let Ok(mut socket) = accept_async(stream).await else {
                return;
            };
            if drop_first && index == 0 {
                let _ = socket.close(None).await;
                return;
            }

            while let Some(Ok(message)) = socket.next().await {
                let Message::Text(text) = message else {
                    continue;
                };
                if let Ok(mut frames) = frames.lock() {
                    frames.push(text.to_string());
                }
                let Ok(Value::Array(parts)) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };

                let mut replies = Vec::new();
                match parts.first().and_then(Value::as_str) {
                    Some("REQ") => {
                        let subscription_id = parts.get(1).cloned().unwrap_or(Value::Null);
                        for event in stored.iter() {
                            replies.push(json!(["EVENT", subscription_id, event]));
                        }
                        replies.push(json!(["EOSE", subscription_id]));
                    }
                    Some("EVENT") => {
                        let event_id = parts
                            .get(1)
                            .and_then(|event| event.get("id"))
                            .cloned()
                            .unwrap_or(Value::Null);
                        replies.push(json!(["OK", event_id, true, ""]));
                    }
                    _ => {}
                }

                for reply in replies {
                    if socket.send(Message::Text(reply.to_string())).await.is_err() {
                        return;
                    }
                }
            }
        });
    }
}

/// Poll `check` until it returns true or `within` elapses.
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
