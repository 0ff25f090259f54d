// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Consumer
//!
//! Thin facade over the connection supervisor that registers one handler
//! per `consume` call. Each delivery is wrapped into an `InboundMessage`
//! and dispatched on its own task, so a slow handler does not block
//! delivery of subsequent messages on the same queue. When the delivery
//! stream ends because the channel was lost, the consumer re-registers
//! through the supervisor after the next Ready.

use crate::{
    errors::AmqpError,
    message::{dispatch, InboundMessage, MessageHandler},
    supervisor::{ConnectionState, ConnectionSupervisor},
};
use futures_util::StreamExt;
use lapin::options::BasicConsumeOptions;
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, warn};
use uuid::Uuid;

/// Consumer registration options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumeOptions {
    /// Deliveries are considered settled as soon as they are sent; the
    /// handler outcome no longer drives acknowledgment.
    pub no_ack: bool,
    /// Request exclusive consumer access to the queue.
    pub exclusive: bool,
}

impl From<ConsumeOptions> for BasicConsumeOptions {
    fn from(options: ConsumeOptions) -> BasicConsumeOptions {
        BasicConsumeOptions {
            no_local: false,
            no_ack: options.no_ack,
            exclusive: options.exclusive,
            nowait: false,
        }
    }
}

/// Consumer facade sharing one supervised connection.
pub struct Consumer {
    supervisor: Arc<ConnectionSupervisor>,
}

impl Consumer {
    pub fn new(supervisor: Arc<ConnectionSupervisor>) -> Consumer {
        Consumer { supervisor }
    }

    /// Registers the handler on the given queue.
    ///
    /// Suspends until the connection is Ready, then registers a consumer
    /// with a unique tag and returns the handle of the delivery-loop task.
    /// Handler success acknowledges the delivery, handler failure rejects
    /// it without requeue. The task ends when the supervisor becomes
    /// permanently unavailable or the handle is aborted.
    pub async fn consume(
        &self,
        handler: Arc<dyn MessageHandler>,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<JoinHandle<()>, AmqpError> {
        let no_ack = options.no_ack;
        let consume_options = BasicConsumeOptions::from(options);
        let consumer_tag = format!("{}-{}", queue, Uuid::new_v4());

        let mut stream = self
            .supervisor
            .subscribe(queue, &consumer_tag, consume_options)
            .await?;

        let supervisor = Arc::clone(&self.supervisor);
        let queue = queue.to_owned();

        Ok(tokio::spawn(async move {
            let mut states = supervisor.watch();
            loop {
                while let Some(result) = stream.next().await {
                    match result {
                        Ok(delivery) => {
                            let message = InboundMessage::from_delivery(delivery);
                            tokio::spawn(dispatch(Arc::clone(&handler), message, no_ack));
                        }
                        Err(err) => {
                            error!(error = err.to_string(), queue, "error receiving delivery")
                        }
                    }
                }

                // channel lost; wake the supervisor and re-register once a
                // fresh channel is Ready
                warn!(queue, "delivery stream ended, waiting for reconnect");
                supervisor.report_lost();

                stream = loop {
                    match supervisor
                        .subscribe(&queue, &consumer_tag, consume_options)
                        .await
                    {
                        Ok(next) => break next,
                        Err(AmqpError::ChannelClosedError) => {
                            // raced a reconnect before the supervisor
                            // observed the loss
                            if !reconnect_signal(&mut states).await {
                                error!(queue, "consumer terminated");
                                return;
                            }
                        }
                        Err(err) => {
                            error!(error = err.to_string(), queue, "consumer terminated");
                            return;
                        }
                    }
                };
            }
        }))
    }
}

/// Suspends until the supervisor has left `Ready`, so a failed registration
/// is retried only after the state moved instead of spinning against a
/// channel the supervisor still believes is live. Returns false when the
/// supervisor is terminally unavailable.
async fn reconnect_signal(states: &mut watch::Receiver<ConnectionState>) -> bool {
    let state = *states.borrow_and_update();
    match state {
        ConnectionState::Failed => false,
        ConnectionState::Ready => states.changed().await.is_ok(),
        _ => true,
    }
}
