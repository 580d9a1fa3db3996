// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Order Event Dispatcher
//!
//! This module opens the manual-ack consumers and routes every delivery to
//! the consumer state machine: the main queue feeds the processing pipeline,
//! the permanent dead-letter queue feeds the observer.
//!
//! Each delivery is processed on its own task, so the configured prefetch
//! count is the concurrency bound; the broker stops pushing once that many
//! deliveries are unacknowledged, which is the backpressure mechanism.

use crate::{
    consumer::consume,
    dead_letter::{consume_dead_letter, DeadLetterObserver, LoggingDeadLetterObserver},
    errors::AmqpError,
    handler::OrderHandler,
    idempotency::IdempotencyStore,
    retry::RetryPolicy,
    topology::{ORDER_DLQ, ORDER_QUEUE},
};
use futures_util::{future::join_all, StreamExt};
use lapin::{
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Channel,
};
use opentelemetry::global;
use std::sync::Arc;
use tracing::error;

/// Collaborators that decide the disposition of one delivery.
#[derive(Clone)]
pub struct OrderDispatcherDefinition {
    pub(crate) handler: Arc<dyn OrderHandler>,
    pub(crate) store: Arc<dyn IdempotencyStore>,
    pub(crate) policy: RetryPolicy,
}

/// Consumer-side entry point for the order delivery core.
///
/// The dispatcher owns the channel-facing consumer loops; the disposition of
/// each delivery lives in the consumer state machine.
pub struct OrderDispatcher {
    channel: Arc<Channel>,
    prefetch_count: u16,
    definition: Option<OrderDispatcherDefinition>,
    observer: Arc<dyn DeadLetterObserver>,
}

impl OrderDispatcher {
    /// Creates a new dispatcher over `channel`.
    ///
    /// Until a handler is registered the dispatcher refuses to consume; the
    /// dead-letter observer defaults to the logging implementation.
    pub fn new(channel: Arc<Channel>, prefetch_count: u16) -> Self {
        OrderDispatcher {
            channel,
            prefetch_count,
            definition: None,
            observer: Arc::new(LoggingDeadLetterObserver),
        }
    }

    /// Registers the processing pipeline for the main queue.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn register_handler(
        mut self,
        handler: Arc<dyn OrderHandler>,
        store: Arc<dyn IdempotencyStore>,
        policy: RetryPolicy,
    ) -> Self {
        self.definition = Some(OrderDispatcherDefinition {
            handler,
            store,
            policy,
        });

        self
    }

    /// Replaces the default logging observer on the dead-letter queue.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn register_dead_letter_observer(mut self, observer: Arc<dyn DeadLetterObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Starts consuming from the main and dead-letter queues.
    ///
    /// This method sets the channel prefetch, opens one consumer per queue,
    /// and processes deliveries until the consumers close. It blocks until
    /// completed.
    ///
    /// # Returns
    /// Ok(()) on success or AmqpError on failure
    pub async fn consume_blocking(&self) -> Result<(), AmqpError> {
        let Some(def) = self.definition.clone() else {
            error!("no order handler registered");
            return Err(AmqpError::ConfigurationError(
                "no order handler registered".to_owned(),
            ));
        };

        match self
            .channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "failure to configure the qos");
                Err(AmqpError::QoSDeclarationError(err.to_string()))
            }
            _ => Ok(()),
        }?;

        let mut order_consumer = match self
            .channel
            .basic_consume(
                ORDER_QUEUE,
                "order-events-consumer",
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::ConsumerDeclarationError {})
            }
            Ok(c) => Ok(c),
        }?;

        let mut dlq_consumer = match self
            .channel
            .basic_consume(
                ORDER_DLQ,
                "order-events-dlq-observer",
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::ConsumerDeclarationError {})
            }
            Ok(c) => Ok(c),
        }?;

        let mut spawns = vec![];

        let channel = self.channel.clone();

        spawns.push(tokio::spawn({
            async move {
                while let Some(result) = order_consumer.next().await {
                    match result {
                        Ok(delivery) => {
                            let def = def.clone();
                            let channel = channel.clone();

                            tokio::spawn(async move {
                                if let Err(err) = consume(
                                    &global::tracer("amqp consumer"),
                                    &delivery,
                                    &def,
                                    channel,
                                )
                                .await
                                {
                                    error!(error = err.to_string(), "error consume msg");
                                }
                            });
                        }

                        Err(err) => error!(error = err.to_string(), "errors consume msg"),
                    }
                }
            }
        }));

        let observer = self.observer.clone();

        spawns.push(tokio::spawn({
            async move {
                while let Some(result) = dlq_consumer.next().await {
                    match result {
                        Ok(delivery) => {
                            if let Err(err) = consume_dead_letter(
                                &global::tracer("amqp consumer"),
                                &delivery,
                                &observer,
                            )
                            .await
                            {
                                error!(error = err.to_string(), "error consume msg");
                            }
                        }

                        Err(err) => error!(error = err.to_string(), "errors consume msg"),
                    }
                }
            }
        }));

        let spawned = join_all(spawns).await;
        for res in spawned {
            if res.is_err() {
                error!("tokio process error");
                return Err(AmqpError::InternalError);
            }
        }

        Ok(())
    }
}
