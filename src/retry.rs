// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Retry Ladder Policy
//!
//! Bounds and outcomes for the delivery retry ladder. The delay itself is
//! broker-side (a TTL queue that dead-letters back into the main exchange),
//! so no component here holds a timer; the policy only decides whether a
//! failed delivery gets another rung.

use crate::config::DeliveryConfigs;

/// Bounds for the retry ladder.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries before a message is parked on the DLQ.
    pub limit: i64,
    /// Time a message waits on the retry queue before re-delivery, in milliseconds.
    pub queue_ttl_ms: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 3,
            queue_ttl_ms: 30_000,
        }
    }
}

impl From<&DeliveryConfigs> for RetryPolicy {
    fn from(cfg: &DeliveryConfigs) -> Self {
        Self {
            limit: cfg.retry_limit,
            queue_ttl_ms: cfg.retry_queue_ttl_ms,
        }
    }
}

impl RetryPolicy {
    /// Whether a failed delivery with this effective retry count gets
    /// another attempt.
    pub fn allows(&self, effective_count: i64) -> bool {
        effective_count < self.limit
    }
}

/// Terminal disposition of one delivery attempt.
///
/// Every delivery ends in exactly one of these states, and the consumer
/// converts each into the matching broker acknowledgment. Keeping the
/// outcome explicit makes the ladder testable without a live broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Business effect applied and recorded; the delivery was acknowledged.
    Completed,
    /// A live idempotency record absorbed the delivery without reprocessing.
    Duplicate,
    /// Processing failed with ladder room left; a copy stamped with
    /// `attempt` was re-published to the retry path and the original
    /// acknowledged.
    Retried { attempt: i64 },
    /// Ladder exhausted or the delivery is unprocessable; rejected without
    /// requeue so the broker dead-letters it permanently.
    DeadLettered,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_below_the_limit_only() {
        let policy = RetryPolicy::default();

        assert!(policy.allows(0));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
        assert!(!policy.allows(7));
    }

    #[test]
    fn builds_from_delivery_configs() {
        let cfg = DeliveryConfigs {
            retry_limit: 5,
            retry_queue_ttl_ms: 1_000,
            ..DeliveryConfigs::default()
        };

        let policy = RetryPolicy::from(&cfg);

        assert_eq!(policy.limit, 5);
        assert_eq!(policy.queue_ttl_ms, 1_000);
        assert!(policy.allows(4));
        assert!(!policy.allows(5));
    }
}
