// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! Thin facade over the connection supervisor. `send` encodes the payload
//! first (failing fast if it cannot be serialized), waits for the
//! connection to be Ready and publishes through the supervisor. A publish
//! that fails after readiness surfaces `ChannelClosedError`; re-invoking
//! `send` re-waits for readiness.

use crate::{errors::AmqpError, supervisor::ConnectionSupervisor};
use lapin::{types::ShortString, BasicProperties};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type for textual messages
pub const TEXT_CONTENT_TYPE: &str = "text/plain";
/// Content type for raw byte messages
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// Outbound payload: structured JSON, raw bytes or text.
///
/// Structured values are serialized to canonical UTF-8 JSON, bytes pass
/// through unchanged, text is encoded as UTF-8. Values that cannot be
/// serialized fail with `UnencodableError` before any network operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Bytes(Vec<u8>),
    Text(String),
}

impl Payload {
    /// Builds a structured payload from any serializable value.
    pub fn json<T: Serialize>(value: &T) -> Result<Payload, AmqpError> {
        match serde_json::to_value(value) {
            Ok(value) => Ok(Payload::Json(value)),
            Err(err) => {
                error!(error = err.to_string(), "can not convert payload");
                Err(AmqpError::UnencodableError)
            }
        }
    }

    pub(crate) fn content_type(&self) -> &'static str {
        match self {
            Payload::Json(_) => JSON_CONTENT_TYPE,
            Payload::Bytes(_) => BINARY_CONTENT_TYPE,
            Payload::Text(_) => TEXT_CONTENT_TYPE,
        }
    }

    pub(crate) fn into_bytes(self) -> Result<Vec<u8>, AmqpError> {
        match self {
            Payload::Json(value) => serde_json::to_vec(&value).map_err(|err| {
                error!(error = err.to_string(), "can not convert payload");
                AmqpError::UnencodableError
            }),
            Payload::Bytes(bytes) => Ok(bytes),
            Payload::Text(text) => Ok(text.into_bytes()),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Payload {
        Payload::Json(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Payload {
        Payload::Bytes(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Payload {
        Payload::Bytes(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Payload {
    fn from(bytes: &[u8; N]) -> Payload {
        Payload::Bytes(bytes.to_vec())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Payload {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Payload {
        Payload::Text(text.to_owned())
    }
}

/// Publisher facade sharing one supervised connection.
pub struct Publisher {
    supervisor: Arc<ConnectionSupervisor>,
}

impl Publisher {
    pub fn new(supervisor: Arc<ConnectionSupervisor>) -> Publisher {
        Publisher { supervisor }
    }

    /// Sends one message to the given exchange.
    ///
    /// Suspends until the connection is Ready; the payload is encoded
    /// before waiting, so an unencodable value fails without any network
    /// attempt. Default properties carry the payload content type and a
    /// fresh message id.
    pub async fn send(
        &self,
        payload: impl Into<Payload>,
        exchange: &str,
        routing_key: &str,
        properties: Option<BasicProperties>,
    ) -> Result<(), AmqpError> {
        let payload = payload.into();

        let properties = properties.unwrap_or_else(|| {
            BasicProperties::default()
                .with_content_type(ShortString::from(payload.content_type()))
                .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
        });

        let bytes = payload.into_bytes()?;

        self.supervisor
            .publish(exchange, routing_key, &bytes, properties)
            .await?;

        debug!(exchange, routing_key, "message successfully sent");
        Ok(())
    }
}
