//! Store B: per-shard request lists (Redis)
//!
//! Layout: one list per shard under `request:core:{shard}`; `RPUSH` on
//! write, `LRANGE 0 -1` on read, so ids come back in append order.

use crate::core::{RequestId, ShardIndex};
use crate::pool::ShardResource;
use crate::stores::traits::{RequestStore, StoreError};
use ::redis::aio::MultiplexedConnection;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;

/// Key of the request list for `shard`
pub fn list_key(shard: ShardIndex) -> String {
    format!("request:core:{}", shard)
}

/// Accept both `host:port` and full `redis://` URLs
pub fn normalize_addr(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("redis://{}", addr)
    }
}

async fn within<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = ::redis::RedisResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(|e| StoreError::Backend(e.to_string())),
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

/// Shard-bound Redis handle over a multiplexed connection
pub struct RedisStore {
    shard: ShardIndex,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisStore {
    /// Open the multiplexed connection for `shard`, giving up after `connect_timeout`
    pub async fn connect(shard: ShardIndex, addr: &str, connect_timeout: Duration) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(normalize_addr(addr))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let conn = within(connect_timeout, client.get_multiplexed_async_connection()).await?;

        tracing::debug!(target: "store", "redis client for core {} connected", shard);
        Ok(Self {
            shard,
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn shard(&self) -> ShardIndex {
        self.shard
    }

    // Cloning a multiplexed connection is cheap and shares the socket.
    fn conn(&self) -> Result<MultiplexedConnection, StoreError> {
        self.conn.lock().clone().ok_or(StoreError::Closed)
    }
}

impl ShardResource for RedisStore {
    fn release(&self) {
        // The driver task stops once the last clone is dropped.
        self.conn.lock().take();
    }
}

#[async_trait]
impl RequestStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn append(&self, shard: ShardIndex, request_id: RequestId) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let _len: i64 = conn
            .rpush(list_key(shard), request_id)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn fetch(&self, shard: ShardIndex) -> Result<Vec<RequestId>, StoreError> {
        let mut conn = self.conn()?;
        let raw: Vec<String> = conn
            .lrange(list_key(shard), 0, -1)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        raw.iter()
            .map(|s| {
                s.parse::<RequestId>()
                    .map_err(|_| StoreError::Decode(format!("invalid request id {:?}", s)))
            })
            .collect()
    }
}
