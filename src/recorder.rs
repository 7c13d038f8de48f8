//! Dual-store request recorder
//!
//! Writes every request to store A and then store B, and reads both stores
//! back into one per-shard view. There is no atomicity across the stores:
//! a store-B failure leaves the store-A row in place, and the caller sees
//! exactly which store failed.

use crate::core::{CombinedView, RequestId, RequestRecord, ShardIndex};
use crate::pool::ShardPool;
use crate::stores::{RequestStore, Store, StoreError};
use futures_util::future::join_all;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on each individual store call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// A write that did not reach every store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to store request in {store}: {source}")]
pub struct WriteError {
    pub store: Store,
    #[source]
    pub source: StoreError,
}

/// One failed per-shard read
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{store} read failed for core {shard}: {source}")]
pub struct ReadError {
    pub store: Store,
    pub shard: ShardIndex,
    #[source]
    pub source: StoreError,
}

/// Every read failure collected during one `read_all`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateReadError {
    errors: Vec<ReadError>,
}

impl AggregateReadError {
    pub fn errors(&self) -> &[ReadError] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors that came from `store`
    pub fn for_store(&self, store: Store) -> impl Iterator<Item = &ReadError> {
        self.errors.iter().filter(move |e| e.store == store)
    }

    /// Shards on which `store` failed
    pub fn failed_shards(&self, store: Store) -> Vec<ShardIndex> {
        self.for_store(store).map(|e| e.shard).collect()
    }

    /// Summary for one store, or `None` if that store read cleanly
    pub fn describe(&self, store: Store) -> Option<String> {
        let parts: Vec<String> = self
            .for_store(store)
            .map(|e| format!("core {}: {}", e.shard, e.source))
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }
}

impl fmt::Display for AggregateReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} shard read(s) failed", self.errors.len())?;
        for e in &self.errors {
            write!(f, "; {}", e)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateReadError {}

/// Records requests into two sharded stores
///
/// Stateless across calls; all state lives in the two pools.
pub struct DualStoreRecorder<A: RequestStore, B: RequestStore> {
    store_a: Arc<ShardPool<A>>,
    store_b: Arc<ShardPool<B>>,
    timeout: Duration,
}

impl<A: RequestStore, B: RequestStore> Clone for DualStoreRecorder<A, B> {
    fn clone(&self) -> Self {
        Self {
            store_a: Arc::clone(&self.store_a),
            store_b: Arc::clone(&self.store_b),
            timeout: self.timeout,
        }
    }
}

impl<A: RequestStore, B: RequestStore> DualStoreRecorder<A, B> {
    pub fn new(store_a: Arc<ShardPool<A>>, store_b: Arc<ShardPool<B>>, timeout: Duration) -> Self {
        Self {
            store_a,
            store_b,
            timeout,
        }
    }

    pub fn store_a(&self) -> &Arc<ShardPool<A>> {
        &self.store_a
    }

    pub fn store_b(&self) -> &Arc<ShardPool<B>> {
        &self.store_b
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Write `request_id` under `shard` to store A, then store B
    ///
    /// A store-A failure returns immediately and store B is never touched.
    /// A store-B failure is reported as such; the store-A record stays.
    pub async fn write(&self, shard: ShardIndex, request_id: RequestId) -> Result<RequestRecord, WriteError> {
        let record = RequestRecord::new(shard, request_id);

        let handle_a = self.store_a.get(shard);
        bounded(self.timeout, handle_a.append(shard, request_id))
            .await
            .map_err(|source| write_failed(Store::A, handle_a.backend(), shard, source))?;

        let handle_b = self.store_b.get(shard);
        bounded(self.timeout, handle_b.append(shard, request_id))
            .await
            .map_err(|source| write_failed(Store::B, handle_b.backend(), shard, source))?;

        crate::log_store!(tracing::Level::DEBUG, "stored request {} on core {}", request_id, shard);
        Ok(record)
    }

    /// Read shards `0..shards` from both stores
    ///
    /// The two stores are queried independently; a failure on one shard or
    /// one store never hides data obtained elsewhere. Failures are gathered
    /// across all shards and returned next to the partial view.
    pub async fn read_all(&self, shards: usize) -> (CombinedView, Option<AggregateReadError>) {
        let (a_results, b_results) = tokio::join!(
            self.read_store(&self.store_a, shards),
            self.read_store(&self.store_b, shards),
        );

        let mut view = CombinedView::with_shards(shards);
        let mut errors = Vec::new();

        for (shard, result) in a_results {
            match result {
                Ok(ids) => view.entry_mut(shard).store_a_requests = Some(ids),
                Err(source) => errors.push(ReadError { store: Store::A, shard, source }),
            }
        }
        for (shard, result) in b_results {
            match result {
                Ok(ids) => view.entry_mut(shard).store_b_requests = Some(ids),
                Err(source) => errors.push(ReadError { store: Store::B, shard, source }),
            }
        }

        if errors.is_empty() {
            (view, None)
        } else {
            crate::log_store!(tracing::Level::WARN, "partial read: {} shard read(s) failed", errors.len());
            (view, Some(AggregateReadError { errors }))
        }
    }

    async fn read_store<S: RequestStore>(
        &self,
        pool: &ShardPool<S>,
        shards: usize,
    ) -> Vec<(ShardIndex, Result<Vec<RequestId>, StoreError>)> {
        let reads = (0..shards).map(ShardIndex).map(|shard| async move {
            let result = bounded(self.timeout, pool.get(shard).fetch(shard)).await;
            (shard, result)
        });
        join_all(reads).await
    }
}

fn write_failed(store: Store, backend: &str, shard: ShardIndex, source: StoreError) -> WriteError {
    crate::log_store!(tracing::Level::WARN, "{} ({}) write failed on core {}: {}", store, backend, shard, source);
    WriteError { store, source }
}

/// Run one store call under its own timeout
async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}
