// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Environment Configuration
//!
//! This module loads the crate configuration from environment variables,
//! with sensible defaults for local development. Configuration is split into
//! the application identity, the broker endpoint, and the delivery tuning
//! knobs (retry limit, retry TTL, prefetch, idempotency retention).

use crate::errors::AmqpError;
use std::{env, str::FromStr};

/// Application-level configuration.
#[derive(Debug, Clone)]
pub struct AppConfigs {
    /// Application name, used to label the AMQP connection.
    pub name: String,
}

/// RabbitMQ endpoint configuration.
#[derive(Debug, Clone)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
}

/// Delivery tuning configuration.
#[derive(Debug, Clone)]
pub struct DeliveryConfigs {
    /// Maximum number of retries before a message is parked on the DLQ.
    pub retry_limit: i64,
    /// Time a message waits on the retry queue before re-delivery, in milliseconds.
    pub retry_queue_ttl_ms: i32,
    /// Unacknowledged-delivery window per consumer.
    pub prefetch_count: u16,
    /// How long processed-message records are retained before eviction.
    pub idempotency_retention_secs: u64,
}

/// Aggregated configuration for the order event delivery core.
#[derive(Debug, Clone)]
pub struct Configs {
    pub app: AppConfigs,
    pub rabbitmq: RabbitMQConfigs,
    pub delivery: DeliveryConfigs,
}

impl Default for AppConfigs {
    fn default() -> Self {
        Self {
            name: "order-events".to_owned(),
        }
    }
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "".to_owned(),
        }
    }
}

impl Default for DeliveryConfigs {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            retry_queue_ttl_ms: 30_000,
            prefetch_count: 10,
            idempotency_retention_secs: 600,
        }
    }
}

impl Default for Configs {
    fn default() -> Self {
        Self {
            app: AppConfigs::default(),
            rabbitmq: RabbitMQConfigs::default(),
            delivery: DeliveryConfigs::default(),
        }
    }
}

impl Configs {
    /// Loads the configuration from the environment.
    ///
    /// A `.env` file is honored when present. Every variable has a default,
    /// so an empty environment yields the same values as [`Configs::default`].
    pub fn from_env() -> Result<Self, AmqpError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            app: AppConfigs {
                name: env::var("APP_NAME").unwrap_or_else(|_| "order-events".to_owned()),
            },
            rabbitmq: RabbitMQConfigs {
                host: env::var("RABBITMQ_HOST").unwrap_or_else(|_| "localhost".to_owned()),
                port: env_parse("RABBITMQ_PORT", "5672")?,
                user: env::var("RABBITMQ_USER").unwrap_or_else(|_| "guest".to_owned()),
                password: env::var("RABBITMQ_PASSWORD").unwrap_or_else(|_| "guest".to_owned()),
                vhost: env::var("RABBITMQ_VHOST").unwrap_or_else(|_| "".to_owned()),
            },
            delivery: DeliveryConfigs {
                retry_limit: env_parse("RETRY_LIMIT", "3")?,
                retry_queue_ttl_ms: env_parse("RETRY_QUEUE_TTL_MS", "30000")?,
                prefetch_count: env_parse("PREFETCH_COUNT", "10")?,
                idempotency_retention_secs: env_parse("IDEMPOTENCY_RETENTION_SECS", "600")?,
            },
        })
    }
}

fn env_parse<T: FromStr>(key: &str, default: &str) -> Result<T, AmqpError> {
    env::var(key)
        .unwrap_or_else(|_| default.to_owned())
        .parse()
        .map_err(|_| AmqpError::ConfigurationError(key.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configs_match_documented_values() {
        let cfg = Configs::default();

        assert_eq!(cfg.app.name, "order-events");
        assert_eq!(cfg.rabbitmq.host, "localhost");
        assert_eq!(cfg.rabbitmq.port, 5672);
        assert_eq!(cfg.rabbitmq.user, "guest");
        assert_eq!(cfg.rabbitmq.password, "guest");
        assert_eq!(cfg.rabbitmq.vhost, "");
        assert_eq!(cfg.delivery.retry_limit, 3);
        assert_eq!(cfg.delivery.retry_queue_ttl_ms, 30_000);
        assert_eq!(cfg.delivery.prefetch_count, 10);
        assert_eq!(cfg.delivery.idempotency_retention_secs, 600);
    }

    #[test]
    fn env_parse_rejects_garbage() {
        std::env::set_var("ORDER_EVENTS_TEST_BAD_PORT", "not-a-number");

        let got: Result<u16, AmqpError> = env_parse("ORDER_EVENTS_TEST_BAD_PORT", "5672");

        assert_eq!(
            got,
            Err(AmqpError::ConfigurationError(
                "ORDER_EVENTS_TEST_BAD_PORT".to_owned()
            ))
        );

        std::env::remove_var("ORDER_EVENTS_TEST_BAD_PORT");
    }
}
