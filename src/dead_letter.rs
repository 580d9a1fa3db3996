// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Dead-Letter Observation
//!
//! This module watches the permanent dead-letter queue. Messages there have
//! exhausted the retry ladder or were unprocessable from the start and need
//! a human, so the observer is a notification hook only: it never republishes,
//! and every parked delivery is acknowledged to keep the queue consumable as a
//! terminal sink.

use crate::{
    consumer,
    envelope::Envelope,
    errors::AmqpError,
    event::OrderCreated,
    otel,
    topology::ORDER_DLQ_ROUTING_KEY,
};
use async_trait::async_trait;
use lapin::message::Delivery;
#[cfg(test)]
use mockall::automock;
use opentelemetry::{global::BoxedTracer, Context};
use std::sync::Arc;
use tracing::{debug, error};

/// Notification hook for messages parked on the permanent dead-letter queue.
///
/// Invoked once per parked delivery that still carries a readable envelope
/// and payload. The hook is read-only: the delivery is acknowledged by the
/// caller regardless of what the implementation does, so an observer can
/// alert or record but never reroute.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeadLetterObserver: Send + Sync {
    async fn on_dead_letter(&self, ctx: &Context, envelope: &Envelope, event: &OrderCreated);
}

/// Default observer that surfaces parked messages through the error log.
#[derive(Debug, Default)]
pub struct LoggingDeadLetterObserver;

#[async_trait]
impl DeadLetterObserver for LoggingDeadLetterObserver {
    async fn on_dead_letter(&self, _ctx: &Context, envelope: &Envelope, event: &OrderCreated) {
        error!(
            message_id = envelope.message_id.as_str(),
            order_id = event.order_id.as_str(),
            attempts = envelope.effective_retry_count(),
            "order event parked on the dead letter queue, manual intervention required"
        );
    }
}

/// Consumes one delivery from the permanent dead-letter queue.
///
/// The queue is terminal, so the delivery is always acknowledged. A parked
/// message without a message id or with an undecodable payload is logged
/// instead of notified; it usually arrived here for exactly that reason.
pub(crate) async fn consume_dead_letter(
    tracer: &BoxedTracer,
    delivery: &Delivery,
    observer: &Arc<dyn DeadLetterObserver>,
) -> Result<(), AmqpError> {
    let (ctx, mut span) = otel::new_span(&delivery.properties, tracer, ORDER_DLQ_ROUTING_KEY);

    debug!(
        "received delivery from exchange: {}",
        delivery.exchange.to_string(),
    );

    match Envelope::from_properties(&delivery.properties) {
        Ok(envelope) => match serde_json::from_slice::<OrderCreated>(&delivery.data) {
            Ok(event) => observer.on_dead_letter(&ctx, &envelope, &event).await,
            Err(err) => {
                error!(
                    error = err.to_string(),
                    message_id = envelope.message_id.as_str(),
                    "parked delivery with an undecodable payload"
                );
            }
        },
        Err(err) => {
            error!(
                error = err.to_string(),
                "parked delivery without a message id"
            );
        }
    }

    consumer::ack(delivery, &mut span).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{envelope::DeathRecord, topology::ORDER_DLX};
    use lapin::{acker::Acker, protocol::basic::AMQPProperties, types::ShortString};
    use opentelemetry::global;

    fn sample_event(order_id: &str) -> OrderCreated {
        OrderCreated {
            order_id: order_id.to_owned(),
            customer_id: "customer-9".to_owned(),
            items: vec![],
            total_amount: "10.00".parse().unwrap(),
            shipping_address: "221B Baker Street".to_owned(),
            created_at: "2024-01-15T10:30:00Z".parse().unwrap(),
        }
    }

    // A default acker settles as a successful no-op, so the terminal ack
    // in `consume_dead_letter` resolves without a broker.
    fn parked_delivery(properties: AMQPProperties, data: Vec<u8>) -> Delivery {
        Delivery {
            delivery_tag: 7,
            exchange: ShortString::from(ORDER_DLX),
            routing_key: ShortString::from(ORDER_DLQ_ROUTING_KEY),
            redelivered: false,
            properties,
            data,
            acker: Acker::default(),
        }
    }

    #[tokio::test]
    async fn a_readable_parked_event_reaches_the_observer() {
        let event = sample_event("order-1");
        let props = AMQPProperties::default()
            .with_message_id(ShortString::from("msg-1"))
            .with_correlation_id(ShortString::from("order-1"));
        let delivery = parked_delivery(props, serde_json::to_vec(&event).unwrap());

        let mut observer = MockDeadLetterObserver::new();
        observer
            .expect_on_dead_letter()
            .withf(|_, envelope, event| {
                envelope.message_id == "msg-1" && event.order_id == "order-1"
            })
            .times(1)
            .returning(|_, _, _| ());
        let observer: Arc<dyn DeadLetterObserver> = Arc::new(observer);

        consume_dead_letter(&global::tracer("test"), &delivery, &observer)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn an_undecodable_parked_payload_is_acked_without_notification() {
        let props = AMQPProperties::default().with_message_id(ShortString::from("msg-2"));
        let delivery = parked_delivery(props, b"not an order event".to_vec());

        // No expectations: any notification panics the mock.
        let observer: Arc<dyn DeadLetterObserver> = Arc::new(MockDeadLetterObserver::new());

        consume_dead_letter(&global::tracer("test"), &delivery, &observer)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn a_parked_delivery_without_a_message_id_is_acked_without_notification() {
        let delivery = parked_delivery(AMQPProperties::default(), b"{}".to_vec());

        let observer: Arc<dyn DeadLetterObserver> = Arc::new(MockDeadLetterObserver::new());

        consume_dead_letter(&global::tracer("test"), &delivery, &observer)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn logging_observer_accepts_a_parked_event() {
        let observer: Arc<dyn DeadLetterObserver> = Arc::new(LoggingDeadLetterObserver);

        let envelope = Envelope {
            message_id: "msg-1".to_owned(),
            correlation_id: Some("order-1".to_owned()),
            retry_count: 3,
            death_history: vec![DeathRecord { count: 3 }],
        };

        observer
            .on_dead_letter(&Context::new(), &envelope, &sample_event("order-1"))
            .await;
    }
}
