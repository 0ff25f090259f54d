// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Inbound Message Model
//!
//! One [`InboundMessage`] is created per delivery and carries the payload
//! plus the acknowledgment capability back to the owning channel. Ack and
//! reject consume the message, so a delivery is acknowledged exactly once,
//! never both, never neither.
//!
//! Handlers implement [`MessageHandler`]; plain synchronous callbacks are
//! adapted through [`FnHandler`].

use crate::errors::AmqpError;
use async_trait::async_trait;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions},
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Error type returned by message handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Acknowledgment capability for one delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), AmqpError>;

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError>;
}

struct ChannelAcker {
    inner: lapin::acker::Acker,
}

#[async_trait]
impl Acknowledger for ChannelAcker {
    async fn ack(&self) -> Result<(), AmqpError> {
        self.inner
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        self.inner
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                AmqpError::NackMessageError
            })
    }
}

/// A single broker delivery, consumed exactly once by ack or reject.
pub struct InboundMessage {
    data: Vec<u8>,
    delivery_tag: u64,
    exchange: String,
    routing_key: String,
    acker: Box<dyn Acknowledger>,
}

impl InboundMessage {
    pub(crate) fn new(
        data: Vec<u8>,
        delivery_tag: u64,
        exchange: String,
        routing_key: String,
        acker: Box<dyn Acknowledger>,
    ) -> InboundMessage {
        InboundMessage {
            data,
            delivery_tag,
            exchange,
            routing_key,
            acker,
        }
    }

    pub(crate) fn from_delivery(delivery: Delivery) -> InboundMessage {
        InboundMessage::new(
            delivery.data,
            delivery.delivery_tag,
            delivery.exchange.to_string(),
            delivery.routing_key.to_string(),
            Box::new(ChannelAcker {
                inner: delivery.acker,
            }),
        )
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// Broker-assigned delivery tag.
    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Exchange the message was published to.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Decodes the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AmqpError> {
        serde_json::from_slice(&self.data).map_err(|err| {
            warn!(error = err.to_string(), "failure to parse payload");
            AmqpError::ParsePayloadError
        })
    }

    /// Acknowledges the delivery, consuming the message.
    pub async fn ack(self) -> Result<(), AmqpError> {
        self.acker.ack().await
    }

    /// Rejects the delivery without requeue, consuming the message.
    pub async fn reject(self) -> Result<(), AmqpError> {
        self.acker.nack(false).await
    }
}

/// Per-message handler capability.
///
/// Implementations may suspend; synchronous callbacks go through
/// [`FnHandler`].
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &InboundMessage) -> Result<(), HandlerError>;
}

/// Adapts an immediately-resolving callback into a [`MessageHandler`].
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: Fn(&InboundMessage) -> Result<(), HandlerError> + Send + Sync,
{
    pub fn new(callback: F) -> FnHandler<F> {
        FnHandler(callback)
    }
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&InboundMessage) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, message: &InboundMessage) -> Result<(), HandlerError> {
        (self.0)(message)
    }
}

/// Runs the handler for one delivery and settles it from the outcome:
/// success acknowledges, failure rejects without requeue. A failed ack or
/// nack is only logged, the handler has already completed its work.
///
/// With `no_ack` the broker settled the delivery on send; acking it again
/// would be a protocol violation closing the channel, so the outcome is
/// only logged.
pub(crate) async fn dispatch(
    handler: Arc<dyn MessageHandler>,
    message: InboundMessage,
    no_ack: bool,
) {
    let delivery_tag = message.delivery_tag();

    if no_ack {
        if let Err(err) = handler.handle(&message).await {
            warn!(error = err.to_string(), delivery_tag, "handler failed");
        }
        return;
    }

    match handler.handle(&message).await {
        Ok(()) => {
            debug!(delivery_tag, "message successfully processed");
            if let Err(err) = message.ack().await {
                error!(error = err.to_string(), delivery_tag, "failure to ack message");
            }
        }
        Err(err) => {
            warn!(
                error = err.to_string(),
                delivery_tag, "handler failed, rejecting message"
            );
            if let Err(err) = message.reject().await {
                error!(
                    error = err.to_string(),
                    delivery_tag, "failure to reject message"
                );
            }
        }
    }
}
