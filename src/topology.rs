// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology
//!
//! Declarative, immutable description of the full messaging topology:
//! ordered exchanges, ordered queues and the bindings each entity carries.
//! The topology is constructed once, validated, and re-installed by the
//! connection supervisor on every successful reconnect, in a fixed order:
//! all exchanges, then all queues, then all bindings.
//!
//! The topology document is JSON with two required top-level sequences,
//! `exchanges` and `queues`; a document missing either key is a fatal
//! configuration error, not a connection error.

use crate::{
    channel::Broker,
    errors::{AmqpError, ConfigError},
    exchange::ExchangeDefinition,
    queue::QueueDefinition,
};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::debug;

/// Default routing key for bindings.
pub const WILDCARD_ROUTING_KEY: &str = "*";

pub(crate) fn default_true() -> bool {
    true
}

fn default_routing_key() -> String {
    WILDCARD_ROUTING_KEY.to_owned()
}

/// Binding entry as it appears in the topology document: the destination is
/// implied by the declaring entity, only the source and key are given.
#[derive(Debug, Clone, Deserialize)]
pub struct BindingData {
    pub(crate) source: String,
    #[serde(default = "default_routing_key")]
    pub(crate) routing_key: String,
}

/// Binding kind, fixed by the declaring entity type and never mixed:
/// exchange entries produce exchange-to-exchange bindings, queue entries
/// produce exchange-to-queue bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    ExchangeToExchange,
    ExchangeToQueue,
}

/// A fully resolved binding: source, destination (the declaring entity's
/// own name), routing key and kind tag. The kind tag, not the destination
/// entity type, selects the bind primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub(crate) source: String,
    pub(crate) destination: String,
    pub(crate) routing_key: String,
    pub(crate) kind: BindingKind,
}

#[derive(Deserialize)]
struct TopologyDocument {
    exchanges: Vec<ExchangeDefinition>,
    queues: Vec<QueueDefinition>,
}

/// The full declarative topology, shared by reference across reconnects.
#[derive(Debug, Clone, Default)]
pub struct TopologySpec {
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queues: Vec<QueueDefinition>,
}

impl TopologySpec {
    /// Builds a validated topology from definition sequences.
    pub fn new(
        exchanges: Vec<ExchangeDefinition>,
        queues: Vec<QueueDefinition>,
    ) -> Result<TopologySpec, ConfigError> {
        let spec = TopologySpec { exchanges, queues };
        spec.validate()?;
        Ok(spec)
    }

    /// Parses and validates the JSON topology document.
    pub fn from_json(document: &str) -> Result<TopologySpec, ConfigError> {
        let doc: TopologyDocument = serde_json::from_str(document)
            .map_err(|err| ConfigError::InvalidTopology(err.to_string()))?;
        TopologySpec::new(doc.exchanges, doc.queues)
    }

    /// Reads the topology document from the `RMQ_TOPOLOGY` environment
    /// variable.
    pub fn from_env() -> Result<TopologySpec, ConfigError> {
        let document = std::env::var("RMQ_TOPOLOGY")
            .map_err(|_| ConfigError::InvalidTopology("RMQ_TOPOLOGY is not set".to_owned()))?;
        TopologySpec::from_json(&document)
    }

    /// Adds an exchange definition.
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    /// Adds a queue definition.
    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    /// Checks the construction invariants: exchange and queue names must be
    /// unique within their respective sequences.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for exch in &self.exchanges {
            if !seen.insert(exch.name.as_str()) {
                return Err(ConfigError::DuplicatedName("exchange", exch.name.clone()));
            }
        }

        let mut seen = HashSet::new();
        for queue in &self.queues {
            if !seen.insert(queue.name.as_str()) {
                return Err(ConfigError::DuplicatedName("queue", queue.name.clone()));
            }
        }

        Ok(())
    }

    /// Resolves every binding carried by the definitions, exchanges first,
    /// with the destination set to the declaring entity's own name.
    pub(crate) fn bindings(&self) -> Vec<Binding> {
        let exchange_bindings = self.exchanges.iter().flat_map(|exch| {
            exch.bindings.iter().map(|data| Binding {
                source: data.source.clone(),
                destination: exch.name.clone(),
                routing_key: data.routing_key.clone(),
                kind: BindingKind::ExchangeToExchange,
            })
        });

        let queue_bindings = self.queues.iter().flat_map(|queue| {
            queue.bindings.iter().map(|data| Binding {
                source: data.source.clone(),
                destination: queue.name.clone(),
                routing_key: data.routing_key.clone(),
                kind: BindingKind::ExchangeToQueue,
            })
        });

        exchange_bindings.chain(queue_bindings).collect()
    }

    /// Installs the topology through the given channel primitives.
    ///
    /// Declaration order is fixed: all exchanges, then all queues, then all
    /// bindings; declares must complete before any binding referencing them
    /// is issued. The broker treats redeclaration of an identical entity as
    /// a no-op, so re-installation after a reconnect is idempotent;
    /// redeclaring with different parameters is a broker-level rejection
    /// surfaced by the primitive.
    pub(crate) async fn install(&self, broker: &dyn Broker) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            debug!(name = exch.name, "declaring exchange");
            broker.declare_exchange(exch).await?;
        }

        for queue in &self.queues {
            debug!(name = queue.name, "declaring queue");
            broker.declare_queue(queue).await?;
        }

        for binding in self.bindings() {
            debug!(
                source = binding.source,
                destination = binding.destination,
                routing_key = binding.routing_key,
                "binding"
            );
            match binding.kind {
                BindingKind::ExchangeToExchange => broker.bind_exchange(&binding).await?,
                BindingKind::ExchangeToQueue => broker.bind_queue(&binding).await?,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "exchanges": [
            {"exchange_name": "events"},
            {
                "exchange_name": "audit",
                "type_name": "direct",
                "binding_data": [{"source": "events", "routing_key": "audit"}]
            }
        ],
        "queues": [
            {
                "queue_name": "orders",
                "binding_data": [{"source": "events"}]
            }
        ]
    }"#;

    #[test]
    fn parses_document() {
        let spec = TopologySpec::from_json(DOCUMENT).unwrap();
        assert_eq!(spec.exchanges.len(), 2);
        assert_eq!(spec.queues.len(), 1);
    }

    #[test]
    fn missing_top_level_keys_are_fatal() {
        let err = TopologySpec::from_json(r#"{"exchanges": []}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTopology(_)));

        let err = TopologySpec::from_json(r#"{"queues": []}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTopology(_)));
    }

    #[test]
    fn rejects_duplicated_names() {
        let err = TopologySpec::from_json(
            r#"{
                "exchanges": [
                    {"exchange_name": "events"},
                    {"exchange_name": "events"}
                ],
                "queues": []
            }"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::DuplicatedName("exchange", "events".to_owned())
        );
    }

    #[test]
    fn binding_kind_follows_declaring_entity() {
        let spec = TopologySpec::from_json(DOCUMENT).unwrap();
        let bindings = spec.bindings();
        assert_eq!(bindings.len(), 2);

        // exchange entry: destination is the exchange itself
        assert_eq!(bindings[0].kind, BindingKind::ExchangeToExchange);
        assert_eq!(bindings[0].source, "events");
        assert_eq!(bindings[0].destination, "audit");
        assert_eq!(bindings[0].routing_key, "audit");

        // queue entry: destination is the queue, wildcard key by default
        assert_eq!(bindings[1].kind, BindingKind::ExchangeToQueue);
        assert_eq!(bindings[1].source, "events");
        assert_eq!(bindings[1].destination, "orders");
        assert_eq!(bindings[1].routing_key, WILDCARD_ROUTING_KEY);
    }

    #[test]
    fn builder_chains_like_the_document() {
        use crate::exchange::ExchangeDefinition;
        use crate::queue::QueueDefinition;

        let spec = TopologySpec::default()
            .exchange(ExchangeDefinition::new("events"))
            .queue(QueueDefinition::new("orders").bound_to("events", "*"));
        spec.validate().unwrap();
        assert_eq!(spec.bindings().len(), 1);
    }
}
