//! Wire envelopes exchanged with relays.
//!
//! Every message is a JSON array whose first element is the message type.

use serde_json::{Value, json};
use thiserror::Error;

use crate::event::Event;
use crate::subscription::Subscription;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed relay message: {0}")]
    DecodingFailed(String),

    #[error("{message_type} message is missing its {field}")]
    MissingField {
        message_type: &'static str,
        field: &'static str,
    },

    #[error("{message_type} message has an invalid {field}: {reason}")]
    ValueNotFound {
        message_type: &'static str,
        field: &'static str,
        reason: String,
    },

    #[error("unknown relay message type `{0}`")]
    UnknownType(String),

    #[error("failed to encode client message: {0}")]
    Encoding(String),
}

/// Messages a client sends to a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `["EVENT", <event>]`
    Event(Event),
    /// `["REQ", <subscription id>, <filter>, ...]`
    Req(Subscription),
    /// `["CLOSE", <subscription id>]`
    Close(String),
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, MessageError> {
        let value = match self {
            Self::Event(event) => json!(["EVENT", event]),
            Self::Req(subscription) => {
                if subscription.filters.is_empty() {
                    return Err(MessageError::Encoding(format!(
                        "subscription {} has no filters",
                        subscription.id
                    )));
                }
                let mut parts = Vec::with_capacity(subscription.filters.len() + 2);
                parts.push(json!("REQ"));
                parts.push(json!(subscription.id));
                for filter in &subscription.filters {
                    parts.push(
                        serde_json::to_value(filter)
                            .map_err(|error| MessageError::Encoding(error.to_string()))?,
                    );
                }
                Value::Array(parts)
            }
            Self::Close(subscription_id) => json!(["CLOSE", subscription_id]),
        };
        serde_json::to_string(&value).map_err(|error| MessageError::Encoding(error.to_string()))
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Event(_) => "EVENT",
            Self::Req(_) => "REQ",
            Self::Close(_) => "CLOSE",
        }
    }
}

/// Messages a relay sends to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: Event,
    },
    Notice(String),
    /// End of stored events for a subscription.
    Eose(String),
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
}

impl RelayMessage {
    /// Decode one text frame. Unknown message types are an error, never
    /// silently dropped.
    pub fn from_json(text: &str) -> Result<Self, MessageError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|error| MessageError::DecodingFailed(error.to_string()))?;
        let Value::Array(array) = value else {
            return Err(MessageError::DecodingFailed(
                "expected a JSON array".to_string(),
            ));
        };
        let message_type = array
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| MessageError::DecodingFailed("missing message type".to_string()))?;

        match message_type {
            "EVENT" => {
                let subscription_id = string_at(&array, 1, "EVENT", "subscription id")?;
                let payload = array.get(2).ok_or(MessageError::MissingField {
                    message_type: "EVENT",
                    field: "event",
                })?;
                let event: Event = serde_json::from_value(payload.clone()).map_err(|error| {
                    MessageError::ValueNotFound {
                        message_type: "EVENT",
                        field: "event",
                        reason: error.to_string(),
                    }
                })?;
                Ok(Self::Event {
                    subscription_id,
                    event,
                })
            }
            "NOTICE" => Ok(Self::Notice(string_at(&array, 1, "NOTICE", "message")?)),
            "EOSE" => Ok(Self::Eose(string_at(&array, 1, "EOSE", "subscription id")?)),
            "OK" => {
                let event_id = string_at(&array, 1, "OK", "event id")?;
                let accepted = array
                    .get(2)
                    .ok_or(MessageError::MissingField {
                        message_type: "OK",
                        field: "status",
                    })?
                    .as_bool()
                    .ok_or_else(|| MessageError::ValueNotFound {
                        message_type: "OK",
                        field: "status",
                        reason: "expected a boolean".to_string(),
                    })?;
                let message = string_at(&array, 3, "OK", "message")?;
                Ok(Self::Ok {
                    event_id,
                    accepted,
                    message,
                })
            }
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }

    /// Subscription this message belongs to, if any.
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            Self::Event {
                subscription_id, ..
            }
            | Self::Eose(subscription_id) => Some(subscription_id),
            Self::Notice(_) | Self::Ok { .. } => None,
        }
    }
}

fn string_at(
    array: &[Value],
    index: usize,
    message_type: &'static str,
    field: &'static str,
) -> Result<String, MessageError> {
    let value = array.get(index).ok_or(MessageError::MissingField {
        message_type,
        field,
    })?;
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| MessageError::ValueNotFound {
            message_type,
            field,
            reason: "expected a string".to_string(),
        })
}
