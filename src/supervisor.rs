// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Supervisor
//!
//! The reconnect state machine. It owns the channel primitives, drives
//! connect -> declare -> ready cycles under the configured retry policy and
//! publishes the current [`ConnectionState`] through a watch channel that
//! publishers and consumers await instead of polling.
//!
//! The supervisor republishes the full topology on every successful
//! reconnect: the broker does not persist client-side declare history, and
//! a fresh connection may hit a broker that lost non-persisted entities.

use crate::{
    channel::Broker,
    config::{ConnectionConfig, ReconnectPolicy, RetryBudget},
    errors::AmqpError,
    topology::TopologySpec,
};
use lapin::{options::BasicConsumeOptions, BasicProperties};
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    sync::{watch, Mutex, Notify},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, error, info, warn};

/// Interval between channel liveness probes while Ready. Loss reported by a
/// failed publish or an ended consumer stream is reacted to immediately;
/// the probe bounds the detection latency for silent closures.
const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle state of the supervised connection.
///
/// Owned exclusively by the supervisor; `Ready` is the only state in which
/// publish/consume operations proceed. `Failed` is terminal: the retry
/// budget was exhausted, the broker rejected the topology or the client was
/// shut down, and dependents waiting on readiness receive
/// `UnavailableError` instead of blocking forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Declaring,
    Ready,
    Failed,
}

/// Supervises one logical broker connection for the lifetime of the client.
pub struct ConnectionSupervisor {
    role: String,
    config: ConnectionConfig,
    policy: ReconnectPolicy,
    topology: TopologySpec,
    broker: Mutex<Box<dyn Broker>>,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
    lost: Notify,
}

impl ConnectionSupervisor {
    /// Creates a supervisor over the given channel primitives. The role
    /// label only prefixes log events.
    pub fn new(
        broker: Box<dyn Broker>,
        config: ConnectionConfig,
        policy: ReconnectPolicy,
        topology: TopologySpec,
        role: &str,
    ) -> Arc<ConnectionSupervisor> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);

        Arc::new(ConnectionSupervisor {
            role: role.to_owned(),
            config,
            policy,
            topology,
            broker: Mutex::new(broker),
            state,
            shutdown,
            lost: Notify::new(),
        })
    }

    /// Spawns the reconnect loop as an explicit task. The returned handle
    /// completes when the loop stops, either through [`shutdown`] or by
    /// reaching the terminal `Failed` state.
    ///
    /// [`shutdown`]: ConnectionSupervisor::shutdown
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move { supervisor.run_loop().await })
    }

    /// Signals the reconnect loop to stop and tear the connection down.
    /// Once the loop stops, the state is terminally `Failed` and blocked
    /// dependents receive `UnavailableError`.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribes to state transitions.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Suspends until the connection is Ready.
    ///
    /// Returns `UnavailableError` once the supervisor reaches the terminal
    /// `Failed` state, so dependents are not left blocking forever.
    pub async fn wait_ready(&self) -> Result<(), AmqpError> {
        let mut rx = self.state.subscribe();
        loop {
            match *rx.borrow_and_update() {
                ConnectionState::Ready => return Ok(()),
                ConnectionState::Failed => return Err(AmqpError::UnavailableError),
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(AmqpError::UnavailableError);
            }
        }
    }

    /// Publishes through the current channel, waiting for readiness first.
    ///
    /// A failure after readiness surfaces `ChannelClosedError` to the
    /// caller and wakes the reconnect loop; re-invoking re-waits for Ready.
    pub(crate) async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        self.wait_ready().await?;

        let broker = self.broker.lock().await;
        match broker.publish(exchange, routing_key, payload, properties).await {
            Err(AmqpError::ChannelClosedError) => {
                drop(broker);
                self.report_lost();
                Err(AmqpError::ChannelClosedError)
            }
            other => other,
        }
    }

    /// Registers a consumer on the current channel, waiting for readiness
    /// first.
    pub(crate) async fn subscribe(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<lapin::Consumer, AmqpError> {
        self.wait_ready().await?;

        let broker = self.broker.lock().await;
        match broker.subscribe(queue, consumer_tag, options).await {
            Err(AmqpError::ChannelClosedError) => {
                drop(broker);
                self.report_lost();
                Err(AmqpError::ChannelClosedError)
            }
            other => other,
        }
    }

    /// Wakes the reconnect loop ahead of the next liveness probe.
    pub(crate) fn report_lost(&self) {
        self.lost.notify_one();
    }

    async fn run_loop(&self) {
        let mut budget = RetryBudget::new(self.policy.clone());
        let mut shutdown = self.shutdown.subscribe();

        'reconnect: while !*shutdown.borrow() {
            loop {
                if *shutdown.borrow() {
                    break 'reconnect;
                }
                if !budget.allows() {
                    error!(
                        role = self.role,
                        attempts = budget.attempts(),
                        "reconnect budget exhausted, giving up"
                    );
                    self.set_state(ConnectionState::Failed);
                    return;
                }

                match self.connect_cycle().await {
                    Ok(()) => {
                        budget.reset();
                        self.set_state(ConnectionState::Ready);
                        info!(role = self.role, "client successfully connected");
                        break;
                    }
                    Err(err) if err.is_fatal_declaration() => {
                        error!(
                            role = self.role,
                            error = err.to_string(),
                            "topology rejected by the broker"
                        );
                        self.teardown().await;
                        self.set_state(ConnectionState::Failed);
                        return;
                    }
                    Err(err) => {
                        self.teardown().await;
                        self.set_state(ConnectionState::Disconnected);

                        if budget.record_failure() {
                            error!(
                                role = self.role,
                                attempts = budget.attempts(),
                                "maximum number of retries reached"
                            );
                        }
                        if !budget.allows() {
                            error!(
                                role = self.role,
                                attempts = budget.attempts(),
                                "reconnect budget exhausted, giving up"
                            );
                            self.set_state(ConnectionState::Failed);
                            return;
                        }

                        warn!(
                            role = self.role,
                            error = err.to_string(),
                            backoff_secs = budget.backoff().as_secs(),
                            "connect attempt failed, will retry"
                        );
                        tokio::select! {
                            _ = sleep(budget.backoff()) => {}
                            _ = shutdown.changed() => break 'reconnect,
                        }
                    }
                }
            }

            if self.monitor(&mut shutdown).await {
                break;
            }
            self.teardown().await;
            self.set_state(ConnectionState::Disconnected);
            warn!(role = self.role, "channel closed, reconnecting");
        }

        // terminal state so waiters blocked on readiness are released
        self.teardown().await;
        self.set_state(ConnectionState::Failed);
        debug!(role = self.role, "supervisor stopped");
    }

    /// One connect + declare cycle. Declarations run in a fixed order and
    /// must complete before Ready is signaled.
    async fn connect_cycle(&self) -> Result<(), AmqpError> {
        self.set_state(ConnectionState::Connecting);
        info!(role = self.role, "connecting to rabbitmq");

        let mut broker = self.broker.lock().await;
        broker.open(&self.config).await?;

        self.set_state(ConnectionState::Declaring);
        self.topology.install(broker.as_ref()).await
    }

    /// Watches channel liveness while Ready; returns true on shutdown,
    /// false when the channel was lost.
    async fn monitor(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            tokio::select! {
                _ = shutdown.changed() => return true,
                _ = self.lost.notified() => {}
                _ = sleep(LIVENESS_INTERVAL) => {}
            }

            if *shutdown.borrow() {
                return true;
            }
            if !self.broker.lock().await.is_open() {
                return false;
            }
        }
    }

    async fn teardown(&self) {
        self.broker.lock().await.close().await;
    }

    fn set_state(&self, next: ConnectionState) {
        debug!(role = self.role, state = ?next, "state transition");
        self.state.send_replace(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockBroker;
    use crate::exchange::ExchangeDefinition;
    use crate::queue::QueueDefinition;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::time::{timeout, Duration};

    fn policy(max_retries: Option<u32>) -> ReconnectPolicy {
        ReconnectPolicy {
            backoff: Duration::ZERO,
            max_retries,
            notify_after: None,
        }
    }

    #[tokio::test]
    async fn exhausted_budget_stops_retrying() {
        let mut broker = MockBroker::new();
        broker
            .expect_open()
            .times(3)
            .returning(|_| Err(AmqpError::ConnectionError));
        broker.expect_close().returning(|| ());

        let supervisor = ConnectionSupervisor::new(
            Box::new(broker),
            ConnectionConfig::default(),
            policy(Some(3)),
            TopologySpec::default(),
            "test",
        );

        let handle = supervisor.spawn();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

        assert_eq!(supervisor.state(), ConnectionState::Failed);

        // dependents are surfaced the terminal state instead of blocking
        let err = supervisor.wait_ready().await.unwrap_err();
        assert_eq!(err, AmqpError::UnavailableError);
        let err = supervisor
            .publish("events", "*", b"hello", BasicProperties::default())
            .await
            .unwrap_err();
        assert_eq!(err, AmqpError::UnavailableError);
    }

    #[tokio::test]
    async fn shutdown_releases_blocked_waiters() {
        let mut broker = MockBroker::new();
        broker
            .expect_open()
            .returning(|_| Err(AmqpError::ConnectionError));
        broker.expect_close().returning(|| ());

        let supervisor = ConnectionSupervisor::new(
            Box::new(broker),
            ConnectionConfig::default(),
            ReconnectPolicy {
                backoff: Duration::from_millis(5),
                max_retries: None,
                notify_after: None,
            },
            TopologySpec::default(),
            "test",
        );

        let handle = supervisor.spawn();

        let waiter = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.wait_ready().await })
        };
        tokio::task::yield_now().await;

        supervisor.shutdown();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

        // the waiter blocked before the shutdown is released with an error
        let err = timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert_eq!(err, AmqpError::UnavailableError);

        // late waiters observe the terminal state immediately
        assert_eq!(supervisor.state(), ConnectionState::Failed);
        let err = supervisor.wait_ready().await.unwrap_err();
        assert_eq!(err, AmqpError::UnavailableError);
    }

    #[tokio::test]
    async fn declares_exchanges_then_queues_then_bindings() {
        let log = Arc::new(StdMutex::new(Vec::<String>::new()));

        let mut broker = MockBroker::new();
        broker.expect_open().returning(|_| Ok(()));
        broker.expect_is_open().return_const(true);
        broker.expect_close().returning(|| ());

        let recorder = Arc::clone(&log);
        broker.expect_declare_exchange().returning(move |def| {
            recorder.lock().unwrap().push(format!("exchange:{}", def.name()));
            Ok(())
        });
        let recorder = Arc::clone(&log);
        broker.expect_declare_queue().returning(move |def| {
            recorder.lock().unwrap().push(format!("queue:{}", def.name()));
            Ok(())
        });
        let recorder = Arc::clone(&log);
        broker.expect_bind_exchange().returning(move |binding| {
            recorder
                .lock()
                .unwrap()
                .push(format!("ebind:{}->{}", binding.source, binding.destination));
            Ok(())
        });
        let recorder = Arc::clone(&log);
        broker.expect_bind_queue().returning(move |binding| {
            recorder
                .lock()
                .unwrap()
                .push(format!("qbind:{}->{}", binding.source, binding.destination));
            Ok(())
        });

        let topology = TopologySpec::default()
            .exchange(ExchangeDefinition::new("events"))
            .exchange(ExchangeDefinition::new("audit").bound_to("events", "audit"))
            .queue(QueueDefinition::new("orders").bound_to("events", "*"))
            .queue(QueueDefinition::new("invoices").bound_to("audit", "*"));

        let supervisor = ConnectionSupervisor::new(
            Box::new(broker),
            ConnectionConfig::default(),
            policy(None),
            topology,
            "test",
        );

        let handle = supervisor.spawn();
        timeout(Duration::from_secs(5), supervisor.wait_ready())
            .await
            .unwrap()
            .unwrap();

        supervisor.shutdown();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

        let order = log.lock().unwrap().clone();
        assert_eq!(
            order,
            vec![
                "exchange:events",
                "exchange:audit",
                "queue:orders",
                "queue:invoices",
                "ebind:events->audit",
                "qbind:events->orders",
                "qbind:audit->invoices",
            ]
        );
    }

    #[tokio::test]
    async fn publish_waits_for_readiness() {
        let attempts = Arc::new(AtomicU32::new(0));

        let mut broker = MockBroker::new();
        let counter = Arc::clone(&attempts);
        broker.expect_open().times(3).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AmqpError::ConnectionError)
            } else {
                Ok(())
            }
        });
        broker.expect_is_open().return_const(true);
        broker.expect_close().returning(|| ());
        broker
            .expect_publish()
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let supervisor = ConnectionSupervisor::new(
            Box::new(broker),
            ConnectionConfig::default(),
            policy(None),
            TopologySpec::default(),
            "test",
        );

        let handle = supervisor.spawn();

        // issued while Disconnected, must not return until Ready
        timeout(
            Duration::from_secs(5),
            supervisor.publish("events", "*", b"hello", BasicProperties::default()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(supervisor.state(), ConnectionState::Ready);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        supervisor.shutdown();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn broker_rejected_declaration_is_terminal() {
        let mut broker = MockBroker::new();
        broker.expect_open().times(1).returning(|_| Ok(()));
        broker.expect_close().returning(|| ());
        broker
            .expect_declare_exchange()
            .times(1)
            .returning(|def| Err(AmqpError::DeclareExchangeError(def.name().to_owned())));

        let topology = TopologySpec::default().exchange(ExchangeDefinition::new("events"));

        let supervisor = ConnectionSupervisor::new(
            Box::new(broker),
            ConnectionConfig::default(),
            policy(None),
            topology,
            "test",
        );

        let handle = supervisor.spawn();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

        assert_eq!(supervisor.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn transient_declare_failure_is_retried() {
        let attempts = Arc::new(AtomicU32::new(0));

        let mut broker = MockBroker::new();
        broker.expect_open().times(2).returning(|_| Ok(()));
        broker.expect_is_open().return_const(true);
        broker.expect_close().returning(|| ());

        let counter = Arc::clone(&attempts);
        broker.expect_declare_exchange().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AmqpError::ChannelClosedError)
            } else {
                Ok(())
            }
        });

        let topology = TopologySpec::default().exchange(ExchangeDefinition::new("events"));

        let supervisor = ConnectionSupervisor::new(
            Box::new(broker),
            ConnectionConfig::default(),
            policy(None),
            topology,
            "test",
        );

        let handle = supervisor.spawn();
        timeout(Duration::from_secs(5), supervisor.wait_ready())
            .await
            .unwrap()
            .unwrap();

        supervisor.shutdown();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
