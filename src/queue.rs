// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! Declarative description of RabbitMQ queues, mirroring the exchange
//! definitions in `exchange.rs` plus the queue-only `exclusive` flag.

use crate::topology::BindingData;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Definition of a RabbitMQ queue with its configuration parameters.
///
/// Field names and defaults follow the topology document: `durable`
/// defaults to true, everything else to false/empty.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueDefinition {
    #[serde(rename = "queue_name")]
    pub(crate) name: String,
    #[serde(default = "crate::topology::default_true")]
    pub(crate) durable: bool,
    #[serde(default)]
    pub(crate) exclusive: bool,
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

impl QueueDefinition {
    /// Creates a new queue definition with the document defaults:
    /// a durable, non-exclusive queue with no bindings.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            durable: true,
            exclusive: false,
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

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Makes the queue exclusive to the connection; exclusive queues are
    /// deleted when the connection closes.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Sets the queue to auto-delete when no longer used.
    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    /// Makes the declaration passive, checking for existence without
    /// creating the queue.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Sets the no_wait flag, making the declaration non-confirmed.
    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Adds a single declaration argument, e.g. `x-message-ttl`.
    pub fn argument(mut self, key: &str, value: Value) -> Self {
        self.arguments.insert(key.to_owned(), value);
        self
    }

    /// Binds this queue to a source exchange with the given routing key.
    pub fn bound_to(mut self, source: &str, routing_key: &str) -> Self {
        self.bindings.push(BindingData {
            source: source.to_owned(),
            routing_key: routing_key.to_owned(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_defaults_match_document_defaults() {
        let def = QueueDefinition::new("orders");
        assert_eq!(def.name, "orders");
        assert!(def.durable);
        assert!(!def.exclusive);
        assert!(!def.auto_delete);
        assert!(def.bindings.is_empty());
    }

    #[test]
    fn deserializes_with_defaults() {
        let def: QueueDefinition = serde_json::from_str(r#"{"queue_name": "orders"}"#).unwrap();
        assert_eq!(def.name, "orders");
        assert!(def.durable);
        assert!(!def.exclusive);
    }

    #[test]
    fn deserializes_arguments_and_bindings() {
        let def: QueueDefinition = serde_json::from_str(
            r#"{
                "queue_name": "orders",
                "exclusive": true,
                "arguments": {"x-message-ttl": 60000},
                "binding_data": [{"source": "events"}]
            }"#,
        )
        .unwrap();
        assert!(def.exclusive);
        assert_eq!(def.arguments.get("x-message-ttl"), Some(&json!(60000)));
        assert_eq!(def.bindings.len(), 1);
        // routing key falls back to the wildcard
        assert_eq!(def.bindings[0].routing_key, "*");
    }
}
