// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Topology
//!
//! This module declares the fixed exchange/queue/binding graph the delivery
//! core rides on, and installs it against a channel. The graph encodes the
//! retry ladder in broker configuration: the main queue dead-letters into
//! the dead-letter exchange, while the retry queue holds messages for a TTL
//! and then dead-letters them back into the main exchange under the
//! original routing key.
//!
//! Declaration is idempotent: re-declaring a resource with identical
//! arguments is a no-op, while conflicting arguments fail the install and
//! must abort startup.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
    retry::RetryPolicy,
};
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongInt, LongString, ShortString},
    Channel,
};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Exchange receiving every published order event.
pub const ORDER_EXCHANGE: &str = "order.exchange";
/// Exchange receiving permanently failed messages.
pub const ORDER_DLX: &str = "order.dlx";
/// Queue the consumer reads from.
pub const ORDER_QUEUE: &str = "order.queue";
/// Delay queue holding failed messages for one retry cycle.
pub const ORDER_RETRY_QUEUE: &str = "order.retry.queue";
/// Terminal queue for messages that exhausted the retry ladder.
pub const ORDER_DLQ: &str = "order.dlq";

/// Routing key under which order events are published and redelivered.
pub const ORDER_ROUTING_KEY: &str = "order.created";
/// Routing key feeding the retry queue.
pub const ORDER_RETRY_ROUTING_KEY: &str = "order.retry";
/// Routing key feeding the permanent dead-letter queue.
pub const ORDER_DLQ_ROUTING_KEY: &str = "order.dlq";

/// Constant for the queue argument naming a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the queue argument naming a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Constant for the queue argument specifying message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";

/// Collection of exchange, queue, and binding definitions forming one
/// broker topology.
///
/// The descriptor is a plain value with no channel attached, so the graph
/// can be inspected and asserted on without a broker; `install` applies it
/// to a channel.
#[derive(Default)]
pub struct AmqpTopology {
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) queues_binding: Vec<QueueBinding>,
}

impl AmqpTopology {
    pub fn new() -> AmqpTopology {
        AmqpTopology::default()
    }

    /// Adds an exchange definition to the topology.
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    /// Adds a queue definition to the topology.
    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    /// Adds a queue-to-exchange binding to the topology.
    pub fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    /// Installs the topology to the RabbitMQ server.
    ///
    /// Declares all exchanges, then all queues, then applies the bindings.
    /// Any declaration conflict is surfaced as an error and must be treated
    /// as fatal by the caller.
    pub async fn install(&self, channel: &Channel) -> Result<(), AmqpError> {
        self.install_exchanges(channel).await?;
        self.install_queues(channel).await?;
        self.binding_queues(channel).await
    }

    async fn install_exchanges(&self, channel: &Channel) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            debug!("creating exchange: {}", exch.name);

            match channel
                .exchange_declare(
                    &exch.name,
                    exch.kind.clone().into(),
                    ExchangeDeclareOptions {
                        passive: exch.passive,
                        durable: exch.durable,
                        auto_delete: exch.delete,
                        internal: exch.internal,
                        nowait: exch.no_wait,
                    },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = exch.name,
                        "error to declare the exchange"
                    );
                    Err(AmqpError::DeclareExchangeError(exch.name.clone()))
                }
                _ => Ok(()),
            }?;

            debug!("exchange: {} was created", exch.name);
        }

        Ok(())
    }

    async fn install_queues(&self, channel: &Channel) -> Result<(), AmqpError> {
        for def in &self.queues {
            debug!("creating queue: {}", def.name);

            match channel
                .queue_declare(
                    &def.name,
                    QueueDeclareOptions {
                        passive: def.passive,
                        durable: def.durable,
                        exclusive: def.exclusive,
                        auto_delete: def.delete,
                        nowait: def.no_wait,
                    },
                    FieldTable::from(queue_args(def)),
                )
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = def.name,
                        "error to declare the queue"
                    );
                    Err(AmqpError::DeclareQueueError(def.name.clone()))
                }
                _ => {
                    debug!("queue: {} was created", def.name);
                    Ok(())
                }
            }?;
        }

        Ok(())
    }

    async fn binding_queues(&self, channel: &Channel) -> Result<(), AmqpError> {
        for binding in &self.queues_binding {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );

            match channel
                .queue_bind(
                    &binding.queue_name,
                    &binding.exchange_name,
                    &binding.routing_key,
                    QueueBindOptions { nowait: false },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(error = err.to_string(), "error to bind queue to exchange");

                    Err(AmqpError::BindingExchangeToQueueError(
                        binding.exchange_name.clone(),
                        binding.queue_name.clone(),
                    ))
                }
                _ => Ok(()),
            }?;
        }

        debug!("queues were bound");

        Ok(())
    }
}

/// Builds the declaration arguments for a queue definition.
fn queue_args(def: &QueueDefinition) -> BTreeMap<ShortString, AMQPValue> {
    let mut args = BTreeMap::new();

    if let Some(exchange) = &def.dead_letter_exchange {
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from(exchange.clone())),
        );
    }

    if let Some(key) = &def.dead_letter_routing_key {
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            AMQPValue::LongString(LongString::from(key.clone())),
        );
    }

    if let Some(ttl) = def.ttl {
        args.insert(
            ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
            AMQPValue::LongInt(LongInt::from(ttl)),
        );
    }

    args
}

/// The order-event delivery graph.
///
/// Five resources and three bindings:
/// - `order.exchange` routes `order.created` to `order.queue` and
///   `order.retry` to `order.retry.queue`;
/// - `order.queue` dead-letters rejected messages to `order.dlx` under
///   `order.dlq`;
/// - `order.retry.queue` has no consumer; messages wait out the retry TTL
///   and dead-letter back into `order.exchange` under `order.created`;
/// - `order.dlx` routes `order.dlq` to the terminal `order.dlq` queue.
pub fn order_topology(policy: &RetryPolicy) -> AmqpTopology {
    AmqpTopology::new()
        .exchange(ExchangeDefinition::new(ORDER_EXCHANGE).direct().durable())
        .exchange(ExchangeDefinition::new(ORDER_DLX).direct().durable())
        .queue(
            QueueDefinition::new(ORDER_QUEUE)
                .durable()
                .dead_letters_to(ORDER_DLX, ORDER_DLQ_ROUTING_KEY),
        )
        .queue(
            QueueDefinition::new(ORDER_RETRY_QUEUE)
                .durable()
                .ttl(policy.queue_ttl_ms)
                .dead_letters_to(ORDER_EXCHANGE, ORDER_ROUTING_KEY),
        )
        .queue(QueueDefinition::new(ORDER_DLQ).durable())
        .queue_binding(
            QueueBinding::new(ORDER_QUEUE)
                .exchange(ORDER_EXCHANGE)
                .routing_key(ORDER_ROUTING_KEY),
        )
        .queue_binding(
            QueueBinding::new(ORDER_RETRY_QUEUE)
                .exchange(ORDER_EXCHANGE)
                .routing_key(ORDER_RETRY_ROUTING_KEY),
        )
        .queue_binding(
            QueueBinding::new(ORDER_DLQ)
                .exchange(ORDER_DLX)
                .routing_key(ORDER_DLQ_ROUTING_KEY),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeKind;

    fn find_queue<'a>(topology: &'a AmqpTopology, name: &str) -> &'a QueueDefinition {
        topology
            .queues
            .iter()
            .find(|def| def.name == name)
            .unwrap()
    }

    #[test]
    fn declares_the_five_contract_resources() {
        let topology = order_topology(&RetryPolicy::default());

        let exchanges: Vec<_> = topology.exchanges.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(exchanges, vec![ORDER_EXCHANGE, ORDER_DLX]);
        assert!(topology
            .exchanges
            .iter()
            .all(|e| e.kind == ExchangeKind::Direct && e.durable));

        let queues: Vec<_> = topology.queues.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(queues, vec![ORDER_QUEUE, ORDER_RETRY_QUEUE, ORDER_DLQ]);
        assert!(topology.queues.iter().all(|q| q.durable));
    }

    #[test]
    fn main_queue_dead_letters_into_the_dlx() {
        let topology = order_topology(&RetryPolicy::default());

        let args = queue_args(find_queue(&topology, ORDER_QUEUE));

        assert_eq!(
            args.get(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            Some(&AMQPValue::LongString(LongString::from(ORDER_DLX)))
        );
        assert_eq!(
            args.get(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            Some(&AMQPValue::LongString(LongString::from(
                ORDER_DLQ_ROUTING_KEY
            )))
        );
        assert!(args.get(AMQP_HEADERS_MESSAGE_TTL).is_none());
    }

    #[test]
    fn retry_queue_delays_then_feeds_back_into_the_main_exchange() {
        let policy = RetryPolicy {
            queue_ttl_ms: 1_500,
            ..RetryPolicy::default()
        };
        let topology = order_topology(&policy);

        let args = queue_args(find_queue(&topology, ORDER_RETRY_QUEUE));

        assert_eq!(
            args.get(AMQP_HEADERS_MESSAGE_TTL),
            Some(&AMQPValue::LongInt(1_500))
        );
        assert_eq!(
            args.get(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            Some(&AMQPValue::LongString(LongString::from(ORDER_EXCHANGE)))
        );
        assert_eq!(
            args.get(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            Some(&AMQPValue::LongString(LongString::from(ORDER_ROUTING_KEY)))
        );
    }

    #[test]
    fn dlq_is_a_terminal_sink() {
        let topology = order_topology(&RetryPolicy::default());

        assert!(queue_args(find_queue(&topology, ORDER_DLQ)).is_empty());
    }

    #[test]
    fn binds_the_three_routing_paths() {
        let topology = order_topology(&RetryPolicy::default());

        assert_eq!(
            topology.queues_binding,
            vec![
                QueueBinding::new(ORDER_QUEUE)
                    .exchange(ORDER_EXCHANGE)
                    .routing_key(ORDER_ROUTING_KEY),
                QueueBinding::new(ORDER_RETRY_QUEUE)
                    .exchange(ORDER_EXCHANGE)
                    .routing_key(ORDER_RETRY_ROUTING_KEY),
                QueueBinding::new(ORDER_DLQ)
                    .exchange(ORDER_DLX)
                    .routing_key(ORDER_DLQ_ROUTING_KEY),
            ]
        );
    }
}
