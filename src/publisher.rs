// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Confirmed Order Event Publisher
//!
//! This module publishes order events to the main exchange over a channel in
//! publisher-confirm mode. Publishing does not block on the broker: the call
//! returns a receipt as soon as the frame is on the wire, and a spawned
//! watcher resolves the receipt once the broker settles the message. A
//! negative acknowledgment or a returned (unroutable) message surfaces as a
//! delivery failure on the receipt; the publisher never retries on its own.

use crate::{
    errors::AmqpError,
    event::OrderCreated,
    otel,
    topology::{ORDER_EXCHANGE, ORDER_ROUTING_KEY},
};
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions},
    publisher_confirm::{Confirmation, PublisherConfirm},
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel,
};
use opentelemetry::Context;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::oneshot;
use tracing::{debug, error};
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Broker-side settlement of one published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The broker took responsibility for the message.
    Confirmed,
    /// The broker refused the message.
    Nacked,
    /// The message was unroutable and came back.
    Returned { reply_code: u16, reply_text: String },
    /// The confirmation could not be observed, so durability is unknown.
    ConfirmationFailed(String),
}

/// Receipt for one publish call.
///
/// Carries the message id assigned to the event and resolves to the broker
/// settlement. Dropping the receipt is allowed; the watcher still logs
/// failed settlements.
#[derive(Debug)]
pub struct PublishReceipt {
    message_id: String,
    receiver: oneshot::Receiver<PublishOutcome>,
}

impl PublishReceipt {
    /// The message id stamped on the published event.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Resolves once the broker settles the publish.
    pub async fn outcome(self) -> PublishOutcome {
        self.receiver.await.unwrap_or_else(|_| {
            PublishOutcome::ConfirmationFailed("confirmation watcher dropped".to_owned())
        })
    }
}

/// Publisher for order events with per-message broker confirmation.
pub struct OrderPublisher {
    channel: Arc<Channel>,
}

impl OrderPublisher {
    /// Creates a new publisher and switches its channel into confirm mode.
    pub async fn new(channel: Arc<Channel>) -> Result<Arc<OrderPublisher>, AmqpError> {
        match channel.confirm_select(ConfirmSelectOptions::default()).await {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    "failure to enable publisher confirms"
                );
                Err(AmqpError::ConfirmSelectError {})
            }
            _ => Ok(Arc::new(OrderPublisher { channel })),
        }
    }

    /// Publishes an order event to the main exchange.
    ///
    /// Assigns a fresh message id, sets the correlation id to the order id,
    /// and sends the event under the fixed routing key with the mandatory
    /// flag, so unroutable messages come back instead of being dropped.
    /// The returned receipt resolves to the broker settlement.
    pub async fn publish(
        &self,
        ctx: &Context,
        event: &OrderCreated,
    ) -> Result<PublishReceipt, AmqpError> {
        let payload = match serde_json::to_vec(event) {
            Ok(data) => Ok(data),
            Err(err) => {
                error!(error = err.to_string(), "failure to serialize the event");
                Err(AmqpError::SerializePayloadError {})
            }
        }?;

        let message_id = Uuid::new_v4().to_string();

        let mut btree = BTreeMap::<ShortString, AMQPValue>::default();
        otel::inject_context(ctx, &mut btree);

        let confirm = match self
            .channel
            .basic_publish(
                ORDER_EXCHANGE,
                ORDER_ROUTING_KEY,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: true,
                },
                &payload,
                BasicProperties::default()
                    .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
                    .with_message_id(ShortString::from(message_id.clone()))
                    .with_correlation_id(ShortString::from(event.order_id.clone()))
                    .with_delivery_mode(2)
                    .with_headers(FieldTable::from(btree)),
            )
            .await
        {
            Ok(confirm) => Ok(confirm),
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError {})
            }
        }?;

        let (tx, rx) = oneshot::channel();
        tokio::spawn(settle(message_id.clone(), confirm, tx));

        Ok(PublishReceipt {
            message_id,
            receiver: rx,
        })
    }
}

/// Awaits the broker settlement for one publish and reports it.
async fn settle(message_id: String, confirm: PublisherConfirm, tx: oneshot::Sender<PublishOutcome>) {
    let outcome = match confirm.await {
        Ok(confirmation) => classify(confirmation),
        Err(err) => PublishOutcome::ConfirmationFailed(err.to_string()),
    };

    match &outcome {
        PublishOutcome::Confirmed => {
            debug!(message_id = message_id.as_str(), "publish confirmed");
        }
        PublishOutcome::Nacked => {
            error!(
                message_id = message_id.as_str(),
                "broker rejected the published message"
            );
        }
        PublishOutcome::Returned {
            reply_code,
            reply_text,
        } => {
            error!(
                message_id = message_id.as_str(),
                reply_code = *reply_code,
                reply_text = reply_text.as_str(),
                "published message was returned as unroutable"
            );
        }
        PublishOutcome::ConfirmationFailed(reason) => {
            error!(
                message_id = message_id.as_str(),
                error = reason.as_str(),
                "failure to observe the publisher confirmation"
            );
        }
    }

    let _ = tx.send(outcome);
}

fn classify(confirmation: Confirmation) -> PublishOutcome {
    match confirmation {
        Confirmation::Ack(Some(returned)) => PublishOutcome::Returned {
            reply_code: returned.reply_code,
            reply_text: returned.reply_text.to_string(),
        },
        Confirmation::Ack(None) => PublishOutcome::Confirmed,
        Confirmation::Nack(_) => PublishOutcome::Nacked,
        Confirmation::NotRequested => {
            PublishOutcome::ConfirmationFailed("publisher confirms not enabled".to_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_without_a_return_is_confirmed() {
        assert_eq!(classify(Confirmation::Ack(None)), PublishOutcome::Confirmed);
    }

    #[test]
    fn nack_is_a_delivery_failure() {
        assert_eq!(classify(Confirmation::Nack(None)), PublishOutcome::Nacked);
    }

    #[test]
    fn missing_confirm_mode_never_passes_as_confirmed() {
        assert!(matches!(
            classify(Confirmation::NotRequested),
            PublishOutcome::ConfirmationFailed(_)
        ));
    }

    #[tokio::test]
    async fn receipt_resolves_to_the_watcher_outcome() {
        let (tx, rx) = oneshot::channel();
        let receipt = PublishReceipt {
            message_id: "msg-1".to_owned(),
            receiver: rx,
        };

        tx.send(PublishOutcome::Confirmed).unwrap();

        assert_eq!(receipt.message_id(), "msg-1");
        assert_eq!(receipt.outcome().await, PublishOutcome::Confirmed);
    }

    #[tokio::test]
    async fn dropped_watcher_reports_a_confirmation_failure() {
        let (tx, rx) = oneshot::channel::<PublishOutcome>();
        let receipt = PublishReceipt {
            message_id: "msg-1".to_owned(),
            receiver: rx,
        };

        drop(tx);

        assert!(matches!(
            receipt.outcome().await,
            PublishOutcome::ConfirmationFailed(_)
        ));
    }
}
