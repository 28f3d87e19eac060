//! Client error types.

use spore::{Bech32Error, EventError, KeysError, MessageError, Nip05Error};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("timeout error: {0}")]
    Timeout(String),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("connection to {0} is degraded")]
    Degraded(String),

    #[error("gave up reconnecting to {url} after {attempts} attempts")]
    MaxReconnectAttemptsExceeded { url: String, attempts: u32 },

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("relay {0} is already in the pool")]
    RelayAlreadyExists(String),

    #[error("relay {0} is not in the pool")]
    RelayDoesNotExist(String),

    #[error("no relays added")]
    NoRelaysAdded,

    #[error("relay {url} reported: {message}")]
    RelayError { url: String, message: String },

    #[error("subscription id {0} is already open")]
    InvalidSubscriptionId(String),

    #[error("subscription {0} was closed")]
    SubscriptionClosed(String),

    #[error("no secret key configured")]
    MissingSecretKey,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Keys(#[from] KeysError),

    #[error(transparent)]
    Nip05(#[from] Nip05Error),

    #[error(transparent)]
    Bech32(#[from] Bech32Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
