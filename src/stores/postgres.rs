//! Store A: relational request table (PostgreSQL)
//!
//! Layout: `request_tracking (core INTEGER, request_id BIGINT)`, one row
//! per stored request. Each shard gets its own client; a client pipelines
//! concurrent queries over its connection, so no extra locking is needed.

use crate::core::{RequestId, ShardIndex};
use crate::pool::ShardResource;
use crate::stores::traits::{RequestStore, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS request_tracking (
    core INTEGER NOT NULL,
    request_id BIGINT NOT NULL
)";
const INSERT_REQUEST: &str = "INSERT INTO request_tracking (core, request_id) VALUES ($1, $2)";
const SELECT_REQUESTS: &str = "SELECT request_id FROM request_tracking WHERE core = $1";

/// Connection settings shared by every shard's client
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    inner: tokio_postgres::Config,
}

impl PostgresConfig {
    /// Parse a `postgres://` URL or key=value connection string
    pub fn parse(url: &str, connect_timeout: Duration) -> Result<Self, StoreError> {
        let mut inner: tokio_postgres::Config = url
            .parse()
            .map_err(|e| StoreError::Backend(format!("failed to parse database config: {}", e)))?;
        inner.connect_timeout(connect_timeout);
        Ok(Self { inner })
    }
}

/// Shard-bound PostgreSQL handle
pub struct PostgresStore {
    shard: ShardIndex,
    client: Mutex<Option<Arc<Client>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl PostgresStore {
    /// Open the connection for `shard` and spawn its driver task
    pub async fn connect(shard: ShardIndex, config: &PostgresConfig) -> Result<Self, StoreError> {
        let (client, connection) = config
            .inner
            .connect(NoTls)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(target: "store", "postgres connection for core {} ended: {}", shard, e);
            }
        });

        tracing::debug!(target: "store", "postgres client for core {} connected", shard);
        Ok(Self {
            shard,
            client: Mutex::new(Some(Arc::new(client))),
            driver: Mutex::new(Some(driver)),
        })
    }

    /// Create the request table if it does not exist yet
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let client = self.client()?;
        client
            .batch_execute(CREATE_TABLE)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Shard this handle was created for
    pub fn shard(&self) -> ShardIndex {
        self.shard
    }

    // Lock only long enough to clone the Arc; queries run unlocked.
    fn client(&self) -> Result<Arc<Client>, StoreError> {
        self.client.lock().clone().ok_or(StoreError::Closed)
    }
}

impl ShardResource for PostgresStore {
    fn release(&self) {
        self.client.lock().take();
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
    }
}

#[async_trait]
impl RequestStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn append(&self, shard: ShardIndex, request_id: RequestId) -> Result<(), StoreError> {
        let client = self.client()?;
        let core = to_core(shard)?;
        let id = i64::try_from(request_id)
            .map_err(|_| StoreError::Backend(format!("request id {} exceeds BIGINT", request_id)))?;

        client
            .execute(INSERT_REQUEST, &[&core, &id])
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn fetch(&self, shard: ShardIndex) -> Result<Vec<RequestId>, StoreError> {
        let client = self.client()?;
        let core = to_core(shard)?;

        let rows = client
            .query(SELECT_REQUESTS, &[&core])
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let raw: i64 = row
                    .try_get(0)
                    .map_err(|e| StoreError::Decode(e.to_string()))?;
                RequestId::try_from(raw)
                    .map_err(|_| StoreError::Decode(format!("negative request id {}", raw)))
            })
            .collect()
    }
}

fn to_core(shard: ShardIndex) -> Result<i32, StoreError> {
    i32::try_from(shard.as_usize())
        .map_err(|_| StoreError::Backend(format!("core {} exceeds INTEGER", shard)))
}
