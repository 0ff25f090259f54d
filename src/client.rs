// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Client Facade
//!
//! Composition root tying configuration, topology and the connection
//! supervisor together behind the application-facing operations: `run`,
//! `send`, `consume` and `close`. Publisher and consumer facades share the
//! client's supervised connection; independently owned supervisors can be
//! built directly from [`ConnectionSupervisor`].

use crate::{
    channel::AmqpChannel,
    config::{ConnectionConfig, ReconnectPolicy},
    consumer::{ConsumeOptions, Consumer},
    errors::{AmqpError, ConfigError},
    message::MessageHandler,
    publisher::{Payload, Publisher},
    supervisor::{ConnectionState, ConnectionSupervisor},
    topology::TopologySpec,
};
use lapin::BasicProperties;
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle};

/// Resilient RabbitMQ client over one supervised connection.
pub struct RmqClient {
    supervisor: Arc<ConnectionSupervisor>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RmqClient {
    /// Builds a client from explicit configuration. The topology is
    /// validated here; validation failure is fatal, not retried. The role
    /// label prefixes the client's log events.
    pub fn new(
        config: ConnectionConfig,
        policy: ReconnectPolicy,
        topology: TopologySpec,
        role: &str,
    ) -> Result<RmqClient, ConfigError> {
        topology.validate()?;

        let supervisor = ConnectionSupervisor::new(
            Box::new(AmqpChannel::new()),
            config,
            policy,
            topology,
            role,
        );

        Ok(RmqClient {
            supervisor,
            handle: Mutex::new(None),
        })
    }

    /// Builds a client from the environment: credentials from `RMQ_*`
    /// variables, topology document from `RMQ_TOPOLOGY`.
    pub fn from_env() -> Result<RmqClient, ConfigError> {
        RmqClient::new(
            ConnectionConfig::from_env()?,
            ReconnectPolicy::default(),
            TopologySpec::from_env()?,
            "client",
        )
    }

    /// Starts the supervisor loop and suspends until the first Ready.
    ///
    /// Returns `UnavailableError` when the retry budget is exhausted or
    /// the broker rejected the topology before ever reaching Ready.
    pub async fn run(&self) -> Result<(), AmqpError> {
        {
            let mut handle = self.handle.lock().await;
            if handle.is_none() {
                *handle = Some(self.supervisor.spawn());
            }
        }
        self.supervisor.wait_ready().await
    }

    /// Current lifecycle state of the supervised connection.
    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Publisher facade sharing this client's connection.
    pub fn publisher(&self) -> Publisher {
        Publisher::new(Arc::clone(&self.supervisor))
    }

    /// Consumer facade sharing this client's connection.
    pub fn consumer(&self) -> Consumer {
        Consumer::new(Arc::clone(&self.supervisor))
    }

    /// Sends one message; see [`Publisher::send`].
    pub async fn send(
        &self,
        payload: impl Into<Payload>,
        exchange: &str,
        routing_key: &str,
        properties: Option<BasicProperties>,
    ) -> Result<(), AmqpError> {
        self.publisher()
            .send(payload, exchange, routing_key, properties)
            .await
    }

    /// Registers a handler on a queue; see [`Consumer::consume`].
    pub async fn consume(
        &self,
        handler: Arc<dyn MessageHandler>,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<JoinHandle<()>, AmqpError> {
        self.consumer().consume(handler, queue, options).await
    }

    /// Graceful shutdown: stops the reconnect loop and tears the
    /// connection down.
    pub async fn close(&self) {
        self.supervisor.shutdown();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeDefinition;

    #[test]
    fn rejects_invalid_topology_at_construction() {
        let topology = TopologySpec::default()
            .exchange(ExchangeDefinition::new("events"))
            .exchange(ExchangeDefinition::new("events"));

        // RmqClient carries no Debug impl, so take the error side directly
        let err = RmqClient::new(
            ConnectionConfig::default(),
            ReconnectPolicy::default(),
            topology,
            "client",
        )
        .err()
        .unwrap();

        assert_eq!(
            err,
            ConfigError::DuplicatedName("exchange", "events".to_owned())
        );
    }
}
