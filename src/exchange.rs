// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! Declarative description of RabbitMQ exchanges, independent of any live
//! connection. Definitions are either deserialized from the topology
//! document (`exchange_name`, `type_name`, `binding_data`, ...) or built
//! programmatically with the builder methods. Immutable after construction.

use crate::topology::BindingData;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Represents the types of exchanges available in RabbitMQ.
///
/// Each exchange type has specific routing behavior:
/// - Direct: routes messages to queues on an exact routing-key match
/// - Fanout: broadcasts messages to all bound queues regardless of keys
/// - Topic: routes messages by wildcard pattern matching of routing keys
/// - Headers: routes on message header values instead of routing keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Direct,
    #[default]
    Fanout,
    Topic,
    Headers,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
        }
    }
}

/// Definition of a RabbitMQ exchange with its configuration parameters.
///
/// Field names and defaults follow the topology document: `type_name`
/// defaults to fanout and `durable` to true.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeDefinition {
    #[serde(rename = "exchange_name")]
    pub(crate) name: String,
    #[serde(rename = "type_name", default)]
    pub(crate) kind: ExchangeKind,
    #[serde(default = "crate::topology::default_true")]
    pub(crate) durable: bool,
    #[serde(default)]
    pub(crate) auto_delete: bool,
    #[serde(default)]
    pub(crate) passive: bool,
    #[serde(default)]
    pub(crate) no_wait: bool,
    #[serde(default)]
    pub(crate) arguments: HashMap<String, Value>,
    #[serde(rename = "binding_data", default)]
    pub(crate) bindings: Vec<BindingData>,
}

impl ExchangeDefinition {
    /// Creates a new exchange definition with the document defaults:
    /// a durable fanout exchange with no bindings.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: ExchangeKind::Fanout,
            durable: true,
            auto_delete: false,
            passive: false,
            no_wait: false,
            arguments: HashMap::default(),
            bindings: vec![],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the exchange type.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the exchange type to Direct.
    pub fn direct(mut self) -> Self {
        self.kind = ExchangeKind::Direct;
        self
    }

    /// Sets the exchange type to Fanout.
    pub fn fanout(mut self) -> Self {
        self.kind = ExchangeKind::Fanout;
        self
    }

    /// Sets the exchange type to Topic.
    pub fn topic(mut self) -> Self {
        self.kind = ExchangeKind::Topic;
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Sets the exchange to auto-delete when no longer used.
    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    /// Makes the declaration passive, checking for existence without
    /// creating the exchange.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Sets the no_wait flag, making the declaration non-confirmed.
    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Adds a single declaration argument.
    pub fn argument(mut self, key: &str, value: Value) -> Self {
        self.arguments.insert(key.to_owned(), value);
        self
    }

    /// Binds this exchange to a source exchange with the given routing key.
    pub fn bound_to(mut self, source: &str, routing_key: &str) -> Self {
        self.bindings.push(BindingData {
            source: source.to_owned(),
            routing_key: routing_key.to_owned(),
        });
        self
    }
}
