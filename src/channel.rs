// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Primitives
//!
//! This module owns exactly one physical connection and one channel to the
//! broker and exposes the non-retrying primitives the rest of the crate is
//! built on: open/close, declare, bind, publish and consumer registration.
//! Retry is the connection supervisor's responsibility, never this
//! module's; any primitive invoked after the channel was invalidated fails
//! with `ChannelClosedError` and propagates to the caller.

use crate::{
    config::ConnectionConfig,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::QueueDefinition,
    topology::Binding,
};
use async_trait::async_trait;
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, ExchangeBindOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, warn};

/// Non-retrying channel primitives, the seam between the reconnect state
/// machine and the wire-level transport library.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    /// Establishes the transport and opens one channel. On failure no
    /// partial state is kept.
    async fn open(&mut self, cfg: &ConnectionConfig) -> Result<(), AmqpError>;

    /// Best-effort teardown of channel then connection; failures are logged
    /// and never propagated.
    async fn close(&mut self);

    /// Liveness probe for the supervisor's bounded-interval monitoring.
    fn is_open(&self) -> bool;

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    async fn bind_exchange(&self, binding: &Binding) -> Result<(), AmqpError>;

    async fn bind_queue(&self, binding: &Binding) -> Result<(), AmqpError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;

    async fn subscribe(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<lapin::Consumer, AmqpError>;
}

/// Production implementation of [`Broker`] over lapin.
#[derive(Default)]
pub struct AmqpChannel {
    connection: Option<Connection>,
    channel: Option<Channel>,
}

impl AmqpChannel {
    pub fn new() -> AmqpChannel {
        AmqpChannel::default()
    }

    fn current(&self) -> Result<&Channel, AmqpError> {
        match &self.channel {
            Some(channel) if channel.status().connected() => Ok(channel),
            _ => Err(AmqpError::ChannelClosedError),
        }
    }
}

#[async_trait]
impl Broker for AmqpChannel {
    async fn open(&mut self, cfg: &ConnectionConfig) -> Result<(), AmqpError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(cfg.name.clone()));

        let conn = match Connection::connect(&cfg.uri(), options).await {
            Ok(c) => c,
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                return Err(AmqpError::ConnectionError);
            }
        };
        debug!("amqp connected");

        debug!("creating amqp channel...");
        match conn.create_channel().await {
            Ok(channel) => {
                debug!("channel created");
                self.channel = Some(channel);
                self.connection = Some(conn);
                Ok(())
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                let _ = conn.close(200, "channel creation failed").await;
                Err(AmqpError::ChannelError)
            }
        }
    }

    async fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(err) = channel.close(200, "client shutdown").await {
                warn!(error = err.to_string(), "error closing channel");
            }
        }
        if let Some(conn) = self.connection.take() {
            if let Err(err) = conn.close(200, "client shutdown").await {
                warn!(error = err.to_string(), "error closing connection");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.channel
            .as_ref()
            .map(|channel| channel.status().connected())
            .unwrap_or(false)
    }

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let channel = self.current()?;

        match channel
            .exchange_declare(
                &def.name,
                def.kind.into(),
                ExchangeDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    auto_delete: def.auto_delete,
                    internal: false,
                    nowait: def.no_wait,
                },
                field_table(&def.arguments),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name,
                    "error to declare the exchange"
                );
                Err(declaration_error(
                    err,
                    AmqpError::DeclareExchangeError(def.name.clone()),
                ))
            }
        }
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        let channel = self.current()?;

        match channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.auto_delete,
                    nowait: def.no_wait,
                },
                field_table(&def.arguments),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name,
                    "error to declare the queue"
                );
                Err(declaration_error(
                    err,
                    AmqpError::DeclareQueueError(def.name.clone()),
                ))
            }
        }
    }

    async fn bind_exchange(&self, binding: &Binding) -> Result<(), AmqpError> {
        let channel = self.current()?;

        match channel
            .exchange_bind(
                &binding.destination,
                &binding.source,
                &binding.routing_key,
                ExchangeBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(error = err.to_string(), "error to bind exchange to exchange");
                Err(declaration_error(
                    err,
                    AmqpError::BindingError(binding.source.clone(), binding.destination.clone()),
                ))
            }
        }
    }

    async fn bind_queue(&self, binding: &Binding) -> Result<(), AmqpError> {
        let channel = self.current()?;

        match channel
            .queue_bind(
                &binding.destination,
                &binding.source,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(declaration_error(
                    err,
                    AmqpError::BindingError(binding.source.clone(), binding.destination.clone()),
                ))
            }
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        let channel = self.current()?;

        match channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                properties,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                match err {
                    lapin::Error::ProtocolError(_) => Err(AmqpError::PublishingError),
                    _ => Err(AmqpError::ChannelClosedError),
                }
            }
        }
    }

    async fn subscribe(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<lapin::Consumer, AmqpError> {
        let channel = self.current()?;

        match channel
            .basic_consume(queue, consumer_tag, options, FieldTable::default())
            .await
        {
            Ok(consumer) => Ok(consumer),
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::ConsumerError(queue.to_owned()))
            }
        }
    }
}

/// Broker-level rejections (conflicting redeclare and the like) surface as
/// declaration errors and end the reconnect cycle; transport-level failures
/// surface as `ChannelClosedError` and are retried by the supervisor.
fn declaration_error(err: lapin::Error, rejected: AmqpError) -> AmqpError {
    match err {
        lapin::Error::ProtocolError(_) => rejected,
        _ => AmqpError::ChannelClosedError,
    }
}

/// Converts the scalar values of a declaration argument map into an AMQP
/// field table; non-scalar values are skipped with a warning.
fn field_table(arguments: &HashMap<String, Value>) -> FieldTable {
    let mut table = BTreeMap::new();

    for (key, value) in arguments {
        let amqp_value = match value {
            Value::Bool(v) => AMQPValue::Boolean(*v),
            Value::Number(n) => match n.as_i64() {
                Some(v) => AMQPValue::LongLongInt(v),
                None => AMQPValue::Double(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => AMQPValue::LongString(LongString::from(s.as_str())),
            other => {
                warn!(key = key, value = %other, "unsupported argument value, skipping");
                continue;
            }
        };

        table.insert(ShortString::from(key.as_str()), amqp_value);
    }

    FieldTable::from(table)
}
