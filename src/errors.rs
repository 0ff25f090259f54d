// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Client
//!
//! This module provides the error types for the resilient RabbitMQ client.
//! The `AmqpError` enum covers connection, channel, declaration, publishing
//! and acknowledgment failures; `ConfigError` covers fatal configuration and
//! topology-validation failures raised at construction time.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Transient connectivity errors (`ConnectionError`, `ChannelError`,
/// `ChannelClosedError`) are recovered by the connection supervisor via
/// backoff retry. Declaration errors are fatal to the reconnect cycle since
/// the broker rejected the topology itself. Encoding and acknowledgment
/// errors are surfaced to (or swallowed for) the immediate caller.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// The channel was invalidated between readiness and use
    #[error("channel is closed")]
    ChannelClosedError,

    /// The broker rejected an exchange declaration
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// The broker rejected a queue declaration
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// The broker rejected a binding between a source and a destination
    #[error("failure to bind `{0}` to `{1}`")]
    BindingError(String, String),

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// The payload cannot be serialized, no network attempt was made
    #[error("failure to encode payload")]
    UnencodableError,

    /// Error parsing a message payload
    #[error("failure to parse payload")]
    ParsePayloadError,

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error registering a consumer on the given queue
    #[error("failure to declare consumer on `{0}`")]
    ConsumerError(String),

    /// The supervisor exhausted its retry budget or hit a fatal declaration
    /// error and is permanently unavailable
    #[error("connection is permanently unavailable")]
    UnavailableError,
}

impl AmqpError {
    /// A declaration rejection is fatal to the reconnect cycle: retrying an
    /// inherently-invalid declaration would loop forever.
    pub(crate) fn is_fatal_declaration(&self) -> bool {
        matches!(
            self,
            AmqpError::DeclareExchangeError(_)
                | AmqpError::DeclareQueueError(_)
                | AmqpError::BindingError(_, _)
        )
    }
}

/// Fatal configuration errors raised at construction time, never retried.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The topology document is missing the `exchanges` or `queues` keys or
    /// is not valid JSON
    #[error("invalid topology document: {0}")]
    InvalidTopology(String),

    /// An exchange or queue name appears more than once in its sequence
    #[error("duplicated {0} name `{1}`")]
    DuplicatedName(&'static str, String),

    /// A connection parameter could not be parsed
    #[error("invalid value `{1}` for `{0}`")]
    InvalidValue(&'static str, String),
}
