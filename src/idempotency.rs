// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Idempotency Store
//!
//! This module tracks which message identifiers have already been processed,
//! so redeliveries of the same message are absorbed instead of re-applying
//! their business effect. Records expire after a retention window sized to
//! exceed the longest plausible redelivery span (retry ladder depth times the
//! retry TTL, with margin).
//!
//! The store is the only mutable state shared between in-flight deliveries,
//! so implementations must be safe under concurrent access.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
#[cfg(test)]
use mockall::automock;
use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Failure while reaching or updating the backing store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("idempotency store failure `{0}`")]
pub struct StoreError(pub String);

/// Marker proving a message identifier's effect was already applied.
///
/// Created once per successfully processed message id and never updated;
/// it disappears only by expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub processed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Keyed record of message identifiers already processed.
///
/// Implementations must be safe under concurrent invocation from multiple
/// in-flight deliveries, and `mark_processed` must be atomic: when two
/// deliveries of the same id race, exactly one caller observes `true`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Read-only probe for a live record of `message_id`.
    async fn is_duplicate(&self, message_id: &str) -> Result<bool, StoreError>;

    /// Records `message_id` as processed, insert-if-absent.
    ///
    /// Returns `true` when this call created the record, `false` when a live
    /// record already existed (a concurrent delivery won the race).
    async fn mark_processed(&self, message_id: &str) -> Result<bool, StoreError>;
}

/// In-memory implementation backed by a read-write locked map.
///
/// Suitable for a single consumer process; swap in an external key-value
/// store implementation when deduplication must span processes.
pub struct InMemoryIdempotencyStore {
    records: RwLock<HashMap<String, IdempotencyRecord>>,
    retention: ChronoDuration,
}

impl InMemoryIdempotencyStore {
    pub fn new(retention_secs: u64) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            retention: ChronoDuration::seconds(retention_secs as i64),
        }
    }

    /// Removes expired records, returning how many were evicted.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.expires_at > now);
        before - records.len()
    }

    /// Spawns a background task that purges expired records every `interval`.
    ///
    /// The task runs until the returned handle is aborted or dropped with
    /// the runtime.
    pub fn start_eviction(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let evicted = store.purge_expired().await;
                if evicted > 0 {
                    debug!(evicted, "evicted expired idempotency records");
                }
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn is_duplicate(&self, message_id: &str) -> Result<bool, StoreError> {
        let records = self.records.read().await;

        Ok(match records.get(message_id) {
            Some(record) => record.expires_at > Utc::now(),
            None => false,
        })
    }

    async fn mark_processed(&self, message_id: &str) -> Result<bool, StoreError> {
        let now = Utc::now();
        let record = IdempotencyRecord {
            processed_at: now,
            expires_at: now + self.retention,
        };

        let mut records = self.records.write().await;
        match records.entry(message_id.to_owned()) {
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(true)
            }
            Entry::Occupied(mut entry) => {
                // An expired record that eviction has not reached yet counts
                // as absent.
                if entry.get().expires_at > now {
                    Ok(false)
                } else {
                    entry.insert(record);
                    Ok(true)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;

    #[tokio::test]
    async fn marks_once_and_absorbs_the_second_mark() {
        let store = InMemoryIdempotencyStore::new(600);

        assert!(!store.is_duplicate("msg-1").await.unwrap());
        assert!(store.mark_processed("msg-1").await.unwrap());
        assert!(store.is_duplicate("msg-1").await.unwrap());
        assert!(!store.mark_processed("msg-1").await.unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_marks_have_exactly_one_winner() {
        let store = Arc::new(InMemoryIdempotencyStore::new(600));

        let marks = (0..32).map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.mark_processed("msg-contended").await.unwrap() })
        });

        let winners = join_all(marks)
            .await
            .into_iter()
            .filter(|created| *created.as_ref().unwrap())
            .count();

        assert_eq!(winners, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn expired_records_stop_counting_as_duplicates() {
        let store = InMemoryIdempotencyStore::new(0);

        assert!(store.mark_processed("msg-1").await.unwrap());
        assert!(!store.is_duplicate("msg-1").await.unwrap());

        // The expired entry is replaceable before eviction runs.
        assert!(store.mark_processed("msg-1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_task_sweeps_expired_records() {
        let store = Arc::new(InMemoryIdempotencyStore::new(0));
        assert!(store.mark_processed("msg-old").await.unwrap());
        assert_eq!(store.len().await, 1);

        let sweeper = store.start_eviction(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(store.is_empty().await);
        sweeper.abort();
    }

    #[tokio::test]
    async fn purge_drops_only_expired_records() {
        let expiring = InMemoryIdempotencyStore::new(0);
        assert!(expiring.mark_processed("msg-old").await.unwrap());
        assert_eq!(expiring.purge_expired().await, 1);
        assert!(expiring.is_empty().await);

        let retained = InMemoryIdempotencyStore::new(600);
        assert!(retained.mark_processed("msg-live").await.unwrap());
        assert_eq!(retained.purge_expired().await, 0);
        assert_eq!(retained.len().await, 1);
    }
}
