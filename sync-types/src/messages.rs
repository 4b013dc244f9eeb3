//! Relay protocol messages.
//!
//! Both directions are JSON arrays whose first element is a label:
//!
//! ```text
//! client → relay   ["EVENT", <event>]
//!                  ["REQ", <sub id>, <filter>, ...]
//!                  ["CLOSE", <sub id>]
//! relay → client   ["EVENT", <sub id>, <event>]
//!                  ["OK", <event id>, <accepted>, <message>]
//!                  ["EOSE", <sub id>]
//!                  ["CLOSED", <sub id>, <message>]
//!                  ["NOTICE", <message>]
//! ```

use serde_json::Value;

use crate::{Event, EventId, Filter, ProtocolError, SubscriptionId};

/// Messages a client sends to a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Publish an event.
    Event(Event),
    /// Open a subscription.
    Req {
        /// Subscription id chosen by the client.
        subscription_id: SubscriptionId,
        /// Filters; an event matching any of them is delivered.
        filters: Vec<Filter>,
    },
    /// Close a subscription.
    Close(SubscriptionId),
}

impl ClientMessage {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        let value = match self {
            ClientMessage::Event(event) => {
                Value::Array(vec![Value::from("EVENT"), serde_json::to_value(event)?])
            }
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut parts = vec![Value::from("REQ"), Value::from(subscription_id.as_str())];
                for filter in filters {
                    parts.push(serde_json::to_value(filter)?);
                }
                Value::Array(parts)
            }
            ClientMessage::Close(subscription_id) => Value::Array(vec![
                Value::from("CLOSE"),
                Value::from(subscription_id.as_str()),
            ]),
        };
        Ok(value.to_string())
    }

    /// Parse a JSON text frame.
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        let (label, mut parts) = split_frame(json)?;
        match label.as_str() {
            "EVENT" => {
                let event = take(&mut parts, 1, "EVENT")?;
                Ok(ClientMessage::Event(serde_json::from_value(event)?))
            }
            "REQ" => {
                let subscription_id = take_string(&mut parts, 1, "REQ")?;
                let filters = parts
                    .into_iter()
                    .skip(2)
                    .map(serde_json::from_value)
                    .collect::<Result<Vec<Filter>, _>>()?;
                Ok(ClientMessage::Req {
                    subscription_id: SubscriptionId::from(subscription_id.as_str()),
                    filters,
                })
            }
            "CLOSE" => {
                let subscription_id = take_string(&mut parts, 1, "CLOSE")?;
                Ok(ClientMessage::Close(SubscriptionId::from(
                    subscription_id.as_str(),
                )))
            }
            other => Err(ProtocolError::InvalidMessage(format!(
                "unknown client message {:?}",
                other
            ))),
        }
    }
}

/// Messages a relay sends to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// An event matching one of our subscriptions.
    Event {
        /// Which subscription matched.
        subscription_id: SubscriptionId,
        /// The event.
        event: Box<Event>,
    },
    /// Result of publishing an event.
    Ok {
        /// The published event.
        event_id: EventId,
        /// Whether the relay stored it.
        accepted: bool,
        /// Relay-provided reason.
        message: String,
    },
    /// End of stored events for a subscription.
    Eose(SubscriptionId),
    /// The relay closed a subscription.
    Closed {
        /// The closed subscription.
        subscription_id: SubscriptionId,
        /// Relay-provided reason.
        message: String,
    },
    /// Human-readable notice.
    Notice(String),
}

impl RelayMessage {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        let value = match self {
            RelayMessage::Event {
                subscription_id,
                event,
            } => Value::Array(vec![
                Value::from("EVENT"),
                Value::from(subscription_id.as_str()),
                serde_json::to_value(event)?,
            ]),
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => Value::Array(vec![
                Value::from("OK"),
                Value::from(event_id.to_hex()),
                Value::from(*accepted),
                Value::from(message.as_str()),
            ]),
            RelayMessage::Eose(subscription_id) => Value::Array(vec![
                Value::from("EOSE"),
                Value::from(subscription_id.as_str()),
            ]),
            RelayMessage::Closed {
                subscription_id,
                message,
            } => Value::Array(vec![
                Value::from("CLOSED"),
                Value::from(subscription_id.as_str()),
                Value::from(message.as_str()),
            ]),
            RelayMessage::Notice(message) => {
                Value::Array(vec![Value::from("NOTICE"), Value::from(message.as_str())])
            }
        };
        Ok(value.to_string())
    }

    /// Parse a JSON text frame.
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        let (label, mut parts) = split_frame(json)?;
        match label.as_str() {
            "EVENT" => {
                let subscription_id = take_string(&mut parts, 1, "EVENT")?;
                let event = take(&mut parts, 2, "EVENT")?;
                Ok(RelayMessage::Event {
                    subscription_id: SubscriptionId::from(subscription_id.as_str()),
                    event: Box::new(serde_json::from_value(event)?),
                })
            }
            "OK" => {
                let event_id = take_string(&mut parts, 1, "OK")?;
                let accepted = take(&mut parts, 2, "OK")?.as_bool().ok_or_else(|| {
                    ProtocolError::InvalidMessage("OK accepted flag is not a bool".into())
                })?;
                let message = take_string(&mut parts, 3, "OK").unwrap_or_default();
                Ok(RelayMessage::Ok {
                    event_id: EventId::from_hex(&event_id)?,
                    accepted,
                    message,
                })
            }
            "EOSE" => {
                let subscription_id = take_string(&mut parts, 1, "EOSE")?;
                Ok(RelayMessage::Eose(SubscriptionId::from(
                    subscription_id.as_str(),
                )))
            }
            "CLOSED" => {
                let subscription_id = take_string(&mut parts, 1, "CLOSED")?;
                let message = take_string(&mut parts, 2, "CLOSED").unwrap_or_default();
                Ok(RelayMessage::Closed {
                    subscription_id: SubscriptionId::from(subscription_id.as_str()),
                    message,
                })
            }
            "NOTICE" => Ok(RelayMessage::Notice(
                take_string(&mut parts, 1, "NOTICE").unwrap_or_default(),
            )),
            other => Err(ProtocolError::InvalidMessage(format!(
                "unknown relay message {:?}",
                other
            ))),
        }
    }
}

/// Parse a frame into its label and raw elements.
fn split_frame(json: &str) -> Result<(String, Vec<Value>), ProtocolError> {
    let value: Value = serde_json::from_str(json)?;
    let parts = match value {
        Value::Array(parts) => parts,
        _ => {
            return Err(ProtocolError::InvalidMessage(
                "frame is not a JSON array".into(),
            ))
        }
    };
    let label = parts
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::InvalidMessage("frame has no label".into()))?
        .to_string();
    Ok((label, parts))
}

fn take(parts: &mut [Value], index: usize, label: &str) -> Result<Value, ProtocolError> {
    parts
        .get_mut(index)
        .map(Value::take)
        .ok_or_else(|| ProtocolError::InvalidMessage(format!("{} frame missing element {}", label, index)))
}

fn take_string(parts: &mut [Value], index: usize, label: &str) -> Result<String, ProtocolError> {
    match take(parts, index, label)? {
        Value::String(s) => Ok(s),
        _ => Err(ProtocolError::InvalidMessage(format!(
            "{} element {} is not a string",
            label, index
        ))),
    }
}
