// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod consumer;
mod otel;

pub mod channel;
pub mod config;
pub mod dead_letter;
pub mod dispatcher;
pub mod envelope;
pub mod errors;
pub mod event;
pub mod exchange;
pub mod handler;
pub mod idempotency;
pub mod publisher;
pub mod queue;
pub mod retry;
pub mod topology;
