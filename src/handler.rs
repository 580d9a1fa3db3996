// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Business Processing Seam
//!
//! This module defines the boundary between the delivery core and the
//! business logic that applies an order event. The delivery core never
//! interprets the event; it only cares whether processing succeeded.

use crate::event::OrderCreated;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use opentelemetry::Context;
use thiserror::Error;

/// Failure raised by business processing.
///
/// Deliberately a flat message type: every handler failure is treated as
/// transient and routed through the retry ladder. Callers that need richer
/// failure data should record it themselves before returning.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("handler failure `{0}`")]
pub struct HandlerError(pub String);

/// Applies the business effect of an order event.
///
/// `exec` is invoked at most once per delivery, after the duplicate check,
/// and may run concurrently for different messages up to the prefetch limit.
/// It must be idempotent only across process restarts longer than the
/// idempotency retention window; within the window the store absorbs
/// redeliveries.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrderHandler: Send + Sync {
    async fn exec(&self, ctx: &Context, event: &OrderCreated) -> Result<(), HandlerError>;
}
