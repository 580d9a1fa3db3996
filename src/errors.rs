// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Order Event Delivery Core
//!
//! This module provides the error types shared across the crate. The
//! `AmqpError` enum represents all failure scenarios that can occur during
//! connection, topology installation, publishing, and message handling.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// This enum covers all error scenarios for broker interactions, including
/// connection issues, channel creation, exchange and queue declarations,
/// message publishing, and consumer-related errors. Each variant provides
/// specific context about what operation failed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error reading or parsing the environment configuration
    #[error("invalid configuration `{0}`")]
    ConfigurationError(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error enabling publisher confirms on a channel
    #[error("failure to enable publisher confirms")]
    ConfirmSelectError,

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// Error serializing an event payload for publishing
    #[error("failure to serialize payload")]
    SerializePayloadError,

    /// Error parsing a message payload
    #[error("failure to parse payload")]
    ParsePayloadError,

    /// The delivery carries no message id, so it cannot be tracked
    #[error("message without a message id")]
    MissingMessageIdError,

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error re-publishing a message to the retry queue
    #[error("failure to publish to retry queue")]
    PublishingToRetryError,

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring a consumer
    #[error("consumer declaration error")]
    ConsumerDeclarationError,
}
