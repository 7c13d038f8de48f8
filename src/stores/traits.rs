//! Request store abstraction
//!
//! Both backing stores (relational store A, key-value store B) expose the
//! same two operations: append a request id under a shard and list the
//! ids recorded for a shard.

use crate::core::{RequestId, ShardIndex};
use crate::pool::ShardResource;
use async_trait::async_trait;
use std::time::Duration;

/// Per-store operation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("handle released")]
    Closed,
}

/// A shard-bound store handle
///
/// One handle exists per shard inside a `ShardPool`. Implementations must
/// tolerate concurrent calls; the recorder never serializes access.
#[async_trait]
pub trait RequestStore: ShardResource + 'static {
    /// Backend name (for logging)
    fn backend(&self) -> &'static str;

    /// Append `request_id` to the records of `shard`
    async fn append(&self, shard: ShardIndex, request_id: RequestId) -> Result<(), StoreError>;

    /// All request ids recorded for `shard`, in the store's native order
    async fn fetch(&self, shard: ShardIndex) -> Result<Vec<RequestId>, StoreError>;
}
