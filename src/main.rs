//! Sharded request recorder service
//!
//! # Architecture
//! - **core**: shard keys and request records
//! - **pool**: fixed-size per-shard handle pools
//! - **stores**: store A (PostgreSQL) and store B (Redis) handles
//! - **recorder**: dual-store write and merged read
//! - **rest**: object store and error reporter clients
//! - **infrastructure**: config, logging, metrics, HTTP API

use shardcore::core::{ShardIndex, ShardResolver};
use shardcore::infrastructure::{
    init_logging, router, shutdown_signal, start_server, AppState, Config, MetricsCollector, RequestIds,
};
use shardcore::pool::ShardPool;
use shardcore::recorder::DualStoreRecorder;
use shardcore::rest::{ErrorReporter, ObjectStore, SentryClient};
use shardcore::stores::{PostgresConfig, PostgresStore, RedisStore};
use shardcore::Result;
use std::sync::Arc;
use std::time::Duration;

/// Main application
pub struct ShardApp {
    config: Config,
}

impl ShardApp {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Connect every pool, serve until a shutdown signal, then tear down
    ///
    /// Any pool that fails to initialize aborts startup; pools built before
    /// it are released when their last reference drops.
    pub async fn run(&self) -> Result<()> {
        let shards = self.config.shard_count();
        tracing::info!("Starting shardcore with {} shards", shards);

        // 1. Store A
        let pg = PostgresConfig::parse(
            &self.config.store_a.url,
            Duration::from_secs(self.config.store_a.connect_timeout_secs),
        )?;
        let pg = &pg;
        let store_a = Arc::new(ShardPool::connect("postgres", shards, move |shard| PostgresStore::connect(shard, pg)).await?);
        if self.config.store_a.migrate {
            store_a.get(ShardIndex(0)).ensure_schema().await?;
        }

        // 2. Store B
        let redis_addr = &self.config.store_b.addr;
        let redis_timeout = Duration::from_secs(self.config.store_b.connect_timeout_secs);
        let store_b = Arc::new(
            ShardPool::connect("redis", shards, move |shard| RedisStore::connect(shard, redis_addr, redis_timeout)).await?,
        );

        // 3. Error reporter
        let reporter_config = &self.config.reporter;
        let dsn = reporter_config.dsn.as_deref();
        let send_timeout = Duration::from_secs(reporter_config.send_timeout_secs);
        let reporters = Arc::new(ShardPool::create("reporter", shards, |_| SentryClient::new(dsn, send_timeout))?);
        if !reporters.get(ShardIndex(0)).is_enabled() {
            tracing::info!("No SENTRY_DSN set, error reporting disabled");
        }
        let reporter = Arc::new(ErrorReporter::start(
            reporters,
            reporter_config.queue_capacity,
            reporter_config.max_in_flight,
        ));

        // 4. Object store (optional)
        let objects = match &self.config.object_store {
            Some(object_config) => Some(Arc::new(ObjectStore::new(object_config, shards)?)),
            None => {
                tracing::info!("Object store not configured, /objects answers 503");
                None
            }
        };

        // 5. API server
        let state = AppState {
            recorder: DualStoreRecorder::new(Arc::clone(&store_a), Arc::clone(&store_b), self.config.store_timeout()),
            resolver: Arc::new(ShardResolver::new(shards)),
            metrics: Arc::new(MetricsCollector::new()),
            reporter: Arc::clone(&reporter),
            objects: objects.clone(),
            ids: Arc::new(RequestIds::new()),
        };
        let served = start_server(router(state), self.config.server.port, shutdown_signal()).await;
        if let Err(e) = &served {
            tracing::error!("API server failed: {}", e);
        }

        // 6. Teardown: flush reports first, then release every pool
        let flush_timeout = Duration::from_secs(reporter_config.flush_timeout_secs);
        if !reporter.shutdown(flush_timeout).await {
            tracing::warn!("Some error reports were not delivered");
        }
        reporter.pool().close();
        if let Some(objects) = &objects {
            objects.close();
        }
        store_b.close();
        store_a.close();
        tracing::info!("Shutdown complete");

        served
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine; real environment variables still apply.
    let _ = dotenvy::dotenv();

    let config = Config::load()?;
    let _guards = init_logging(&config.logging)?;

    let app = ShardApp::new(config);
    app.run().await
}
