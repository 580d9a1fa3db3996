// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Envelope
//!
//! This module extracts the transport metadata attached to a delivery: the
//! message and correlation identifiers, the application-set retry counter,
//! and the broker-populated death history. These headers are a wire contract
//! with the broker and with peer consumers, so their names and shapes must
//! be preserved exactly.

use crate::errors::AmqpError;
use lapin::{
    protocol::basic::AMQPProperties,
    types::{AMQPValue, FieldTable, ShortString},
};
use std::collections::BTreeMap;

/// Constant for the x-death header used in RabbitMQ's dead-lettering mechanism
pub const AMQP_HEADERS_X_DEATH: &str = "x-death";
/// Constant for the count field in the x-death header
pub const AMQP_HEADERS_COUNT: &str = "count";
/// Constant for the application-set retry counter header
pub const AMQP_HEADERS_RETRY_COUNT: &str = "x-retry-count";

/// One record of the broker-populated death history.
///
/// The broker appends a record every time a message is dead-lettered out of
/// a queue; `count` is how many times that happened for the same queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeathRecord {
    pub count: i64,
}

/// Transport metadata attached to an event for one delivery attempt.
///
/// The envelope is read-only except for the retry counter, which is stamped
/// onto the re-published copy when a delivery is routed to the retry queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Globally unique message identifier, assigned at first publish and
    /// preserved across retries.
    pub message_id: String,
    /// Business correlation key, here the order id.
    pub correlation_id: Option<String>,
    /// Value of the retry counter header, zero when absent.
    pub retry_count: i64,
    /// Broker-populated death history, most recent first.
    pub death_history: Vec<DeathRecord>,
}

impl Envelope {
    /// Builds an envelope from the delivery properties.
    ///
    /// A delivery without a message id cannot be tracked by the idempotency
    /// store and is refused here; the caller decides its disposition.
    pub fn from_properties(props: &AMQPProperties) -> Result<Self, AmqpError> {
        let message_id = match props.message_id() {
            Some(id) if !id.as_str().is_empty() => id.to_string(),
            _ => return Err(AmqpError::MissingMessageIdError {}),
        };

        let correlation_id = props.correlation_id().as_ref().map(|id| id.to_string());

        let headers = match props.headers() {
            Some(val) => val.to_owned(),
            None => FieldTable::default(),
        };

        Ok(Self {
            message_id,
            correlation_id,
            retry_count: extract_retry_header(&headers),
            death_history: extract_death_history(&headers),
        })
    }

    /// Effective retry count for this delivery attempt.
    ///
    /// The broker-maintained death count takes precedence when present,
    /// falling back to the application-set header for the first rejection
    /// cycle, defaulting to zero.
    pub fn effective_retry_count(&self) -> i64 {
        let death_count = match self.death_history.first() {
            Some(record) => record.count,
            None => 0,
        };

        death_count.max(self.retry_count).max(0)
    }

    /// Returns a copy of `props` with the retry counter header set to `attempt`.
    ///
    /// All other properties and headers, the message id included, are carried
    /// over unchanged so the retried copy stays in the same retry lineage.
    pub fn stamp_retry(props: &AMQPProperties, attempt: i64) -> AMQPProperties {
        let mut headers: BTreeMap<ShortString, AMQPValue> = match props.headers() {
            Some(val) => val.inner().clone(),
            None => BTreeMap::new(),
        };

        headers.insert(
            ShortString::from(AMQP_HEADERS_RETRY_COUNT),
            AMQPValue::LongInt(attempt as i32),
        );

        props.clone().with_headers(FieldTable::from(headers))
    }
}

fn extract_retry_header(headers: &FieldTable) -> i64 {
    match headers.inner().get(AMQP_HEADERS_RETRY_COUNT) {
        Some(AMQPValue::LongInt(value)) => *value as i64,
        Some(AMQPValue::LongLongInt(value)) => *value,
        Some(AMQPValue::ShortInt(value)) => *value as i64,
        _ => 0,
    }
}

fn extract_death_history(headers: &FieldTable) -> Vec<DeathRecord> {
    let Some(value) = headers.inner().get(AMQP_HEADERS_X_DEATH) else {
        return vec![];
    };

    let Some(arr) = value.as_array() else {
        return vec![];
    };

    arr.as_slice()
        .iter()
        .filter_map(|record| match record.as_field_table() {
            Some(table) => match table.inner().get(AMQP_HEADERS_COUNT) {
                Some(value) => Some(DeathRecord {
                    count: value.as_long_long_int().unwrap_or_default(),
                }),
                _ => None,
            },
            _ => None,
        })
        .collect()
}
