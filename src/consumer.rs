// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Order Event Consumer
//!
//! This module implements the per-delivery state machine: duplicate
//! absorption through the idempotency store, business processing, and on
//! failure a bounded retry ladder ending on the permanent dead-letter queue.
//!
//! The decision logic (`evaluate`) is separated from the broker calls that
//! execute it, so the ladder can be exercised in tests by fast-forwarding
//! the retry TTL instead of running a broker. Every delivery ends in
//! exactly one disposition; no failure escapes the delivery boundary with
//! the message left undecided.

use crate::{
    dispatcher::OrderDispatcherDefinition,
    envelope::Envelope,
    errors::AmqpError,
    event::OrderCreated,
    otel,
    retry::{Disposition, RetryPolicy},
    topology::{ORDER_EXCHANGE, ORDER_RETRY_ROUTING_KEY, ORDER_ROUTING_KEY},
};
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions, BasicPublishOptions},
    Channel,
};
use opentelemetry::{
    global::{BoxedSpan, BoxedTracer},
    trace::{Span, Status},
    Context,
};
use std::{borrow::Cow, sync::Arc};
use tracing::{debug, error, warn};

/// Consumes and processes one delivery from the main queue.
///
/// The flow is:
/// 1. Extract the envelope; a delivery that cannot be tracked or decoded is
///    rejected straight to the DLQ (the ladder cannot fix a poison message)
/// 2. Evaluate the delivery against the store, the handler, and the retry
///    policy, producing a disposition
/// 3. Execute the disposition: acknowledge, re-publish to the retry path
///    and acknowledge, or reject without requeue
///
/// Returns the disposition taken, or an error when a broker operation
/// itself failed.
pub(crate) async fn consume(
    tracer: &BoxedTracer,
    delivery: &Delivery,
    def: &OrderDispatcherDefinition,
    channel: Arc<Channel>,
) -> Result<Disposition, AmqpError> {
    let (ctx, mut span) = otel::new_span(&delivery.properties, tracer, ORDER_ROUTING_KEY);

    debug!(
        "received delivery from exchange: {}",
        delivery.exchange.to_string(),
    );

    let (envelope, event) = match decode(delivery) {
        Ok(decoded) => decoded,
        Err(err) => return park_unreadable(delivery, err, &mut span).await,
    };

    let disposition = evaluate(&ctx, &envelope, &event, def).await;

    match &disposition {
        Disposition::Completed | Disposition::Duplicate => {
            ack(delivery, &mut span).await?;
            span.set_status(Status::Ok);
        }
        Disposition::Retried { attempt } => {
            warn!(
                message_id = envelope.message_id.as_str(),
                attempt = *attempt,
                "error whiling handling msg, scheduling retry"
            );
            publish_retry(&channel, delivery, *attempt, &mut span).await?;
            ack(delivery, &mut span).await?;
        }
        Disposition::DeadLettered => {
            error!(
                message_id = envelope.message_id.as_str(),
                "too many attempts, sending to dlq"
            );
            reject(delivery, &mut span).await?;
        }
    }

    Ok(disposition)
}

/// Splits one delivery into its envelope and decoded event payload.
fn decode(delivery: &Delivery) -> Result<(Envelope, OrderCreated), AmqpError> {
    let envelope = Envelope::from_properties(&delivery.properties)?;

    let event = match serde_json::from_slice::<OrderCreated>(&delivery.data) {
        Ok(event) => event,
        Err(err) => {
            error!(
                error = err.to_string(),
                message_id = envelope.message_id.as_str(),
                "failure to parse payload"
            );
            return Err(AmqpError::ParsePayloadError {});
        }
    };

    Ok((envelope, event))
}

/// Rejects a delivery the ladder cannot fix so the broker dead-letters it.
///
/// Covers deliveries that are poison on arrival: no message id to track
/// them by, or a payload that does not decode as an order event.
async fn park_unreadable(
    delivery: &Delivery,
    err: AmqpError,
    span: &mut BoxedSpan,
) -> Result<Disposition, AmqpError> {
    error!(
        error = err.to_string(),
        "unreadable delivery, removing to the dlq"
    );
    span.record_error(&err);
    span.set_status(Status::Error {
        description: Cow::from("unreadable delivery"),
    });

    reject(delivery, span).await?;
    Ok(Disposition::DeadLettered)
}

/// Decides the disposition of one delivery without touching the broker.
///
/// Store failures are never fatal to the message: a failed probe or mark
/// routes the delivery through the retry ladder so it is retried rather
/// than silently dropped.
async fn evaluate(
    ctx: &Context,
    envelope: &Envelope,
    event: &OrderCreated,
    def: &OrderDispatcherDefinition,
) -> Disposition {
    match def.store.is_duplicate(&envelope.message_id).await {
        Ok(true) => {
            debug!(
                message_id = envelope.message_id.as_str(),
                "duplicate delivery absorbed"
            );
            return Disposition::Duplicate;
        }
        Ok(false) => {}
        Err(err) => {
            warn!(
                error = err.to_string(),
                message_id = envelope.message_id.as_str(),
                "failure to probe the idempotency store, routing through retry"
            );
            return retry_or_park(envelope, &def.policy);
        }
    }

    match def.handler.exec(ctx, event).await {
        Ok(()) => match def.store.mark_processed(&envelope.message_id).await {
            Ok(true) => {
                debug!("message successfully processed");
                Disposition::Completed
            }
            Ok(false) => {
                warn!(
                    message_id = envelope.message_id.as_str(),
                    "concurrent delivery already recorded this message"
                );
                Disposition::Duplicate
            }
            Err(err) => {
                warn!(
                    error = err.to_string(),
                    message_id = envelope.message_id.as_str(),
                    "failure to record the idempotency mark, routing through retry"
                );
                retry_or_park(envelope, &def.policy)
            }
        },
        Err(err) => {
            warn!(
                error = err.to_string(),
                message_id = envelope.message_id.as_str(),
                "failure to process the event"
            );
            retry_or_park(envelope, &def.policy)
        }
    }
}

fn retry_or_park(envelope: &Envelope, policy: &RetryPolicy) -> Disposition {
    let effective = envelope.effective_retry_count();

    if policy.allows(effective) {
        Disposition::Retried {
            attempt: effective + 1,
        }
    } else {
        Disposition::DeadLettered
    }
}

pub(crate) async fn ack(delivery: &Delivery, span: &mut BoxedSpan) -> Result<(), AmqpError> {
    match delivery.ack(BasicAckOptions { multiple: false }).await {
        Err(e) => {
            error!("error whiling ack msg");
            span.record_error(&e);
            span.set_status(Status::Error {
                description: Cow::from("error to ack msg"),
            });
            Err(AmqpError::AckMessageError {})
        }
        _ => Ok(()),
    }
}

async fn reject(delivery: &Delivery, span: &mut BoxedSpan) -> Result<(), AmqpError> {
    match delivery
        .nack(BasicNackOptions {
            multiple: false,
            requeue: false,
        })
        .await
    {
        Err(e) => {
            error!("error whiling nack msg");
            span.record_error(&e);
            span.set_status(Status::Error {
                description: Cow::from("error to nack msg"),
            });
            Err(AmqpError::NackMessageError {})
        }
        _ => Ok(()),
    }
}

/// Publishes a copy of the delivery to the retry path, stamped with the
/// attempt it represents.
///
/// When the publish fails, the original is nacked with requeue so the
/// broker redelivers it unchanged; the retry lineage stays intact either
/// way.
async fn publish_retry(
    channel: &Channel,
    delivery: &Delivery,
    attempt: i64,
    span: &mut BoxedSpan,
) -> Result<(), AmqpError> {
    let props = Envelope::stamp_retry(&delivery.properties, attempt);

    match channel
        .basic_publish(
            ORDER_EXCHANGE,
            ORDER_RETRY_ROUTING_KEY,
            BasicPublishOptions::default(),
            &delivery.data,
            props,
        )
        .await
    {
        Err(e) => {
            error!("error whiling sending to retry queue");
            span.record_error(&e);
            span.set_status(Status::Error {
                description: Cow::from("failure to publish to retry queue"),
            });

            if let Err(nack_err) = delivery
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: true,
                })
                .await
            {
                error!(
                    error = nack_err.to_string(),
                    "error whiling requeuing after a failed retry publish"
                );
            }

            Err(AmqpError::PublishingToRetryError {})
        }
        _ => Ok(()),
    }
}
