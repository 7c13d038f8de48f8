//! Background error reporting (Sentry-compatible store API)
//!
//! Reports never run on the request path: callers push events into a
//! bounded queue and return immediately. One worker drains the queue and
//! sends events with bounded concurrency. A full queue drops the event.
//! On shutdown the queue is closed and in-flight sends get a bounded
//! amount of time to finish.

use crate::core::ShardIndex;
use crate::pool::ShardResource;
use crate::pool::ShardPool;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use url::Url;

/// Reporter errors
#[derive(Debug, thiserror::Error)]
pub enum ReporterError {
    #[error("invalid DSN: {0}")]
    InvalidDsn(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("report endpoint returned {0}")]
    Status(u16),

    #[error("client released")]
    Closed,
}

/// Parsed DSN: `{scheme}://{public_key}@{host}[:port][/prefix]/{project}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dsn {
    public_key: String,
    store_url: Url,
}

impl Dsn {
    pub fn parse(dsn: &str) -> Result<Self, ReporterError> {
        let url = Url::parse(dsn).map_err(|e| ReporterError::InvalidDsn(e.to_string()))?;

        let public_key = url.username();
        if public_key.is_empty() {
            return Err(ReporterError::InvalidDsn("missing public key".into()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ReporterError::InvalidDsn("missing host".into()))?;

        let mut segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        let project = segments
            .pop()
            .ok_or_else(|| ReporterError::InvalidDsn("missing project id".into()))?;

        let mut base = format!("{}://{}", url.scheme(), host);
        if let Some(port) = url.port() {
            base.push_str(&format!(":{}", port));
        }
        for segment in segments {
            base.push('/');
            base.push_str(segment);
        }

        let store_url = Url::parse(&format!("{}/api/{}/store/", base, project))
            .map_err(|e| ReporterError::InvalidDsn(e.to_string()))?;

        Ok(Self {
            public_key: public_key.to_string(),
            store_url,
        })
    }

    pub fn store_url(&self) -> &Url {
        &self.store_url
    }

    fn auth_header(&self) -> String {
        format!(
            "Sentry sentry_version=7, sentry_client=shardcore/{}, sentry_key={}",
            env!("CARGO_PKG_VERSION"),
            self.public_key
        )
    }
}

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    Info,
}

/// Payload sent to the store endpoint
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_id: String,
    pub message: String,
    pub level: Level,
    pub timestamp: f64,
    pub platform: &'static str,
    pub logger: &'static str,
    pub tags: BTreeMap<String, String>,
}

impl Event {
    pub fn new(level: Level, message: String, shard: ShardIndex) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let mut tags = BTreeMap::new();
        tags.insert("core".to_string(), shard.to_string());

        Self {
            event_id: uuid::Uuid::new_v4().simple().to_string(),
            message,
            level,
            timestamp,
            platform: "other",
            logger: "shardcore",
            tags,
        }
    }
}

/// One shard's report client. Without a DSN it accepts and discards events.
pub struct SentryClient {
    target: Option<Dsn>,
    http: reqwest::Client,
    released: AtomicBool,
}

impl SentryClient {
    pub fn new(dsn: Option<&str>, send_timeout: Duration) -> Result<Self, ReporterError> {
        let target = match dsn.map(str::trim) {
            Some(dsn) if !dsn.is_empty() => Some(Dsn::parse(dsn)?),
            _ => None,
        };
        let http = reqwest::Client::builder()
            .timeout(send_timeout)
            .build()
            .map_err(|e| ReporterError::Http(e.to_string()))?;

        Ok(Self {
            target,
            http,
            released: AtomicBool::new(false),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    pub async fn send(&self, event: &Event) -> Result<(), ReporterError> {
        if self.released.load(Ordering::Acquire) {
            return Err(ReporterError::Closed);
        }
        let Some(target) = &self.target else {
            return Ok(());
        };

        let response = self
            .http
            .post(target.store_url.clone())
            .header("X-Sentry-Auth", target.auth_header())
            .json(event)
            .send()
            .await
            .map_err(|e| ReporterError::Http(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ReporterError::Status(response.status().as_u16()))
        }
    }
}

impl ShardResource for SentryClient {
    fn release(&self) {
        self.released.store(true, Ordering::Release);
    }
}

struct Job {
    shard: ShardIndex,
    event: Event,
}

/// Fire-and-forget error reporter over a pool of report clients
pub struct ErrorReporter {
    pool: Arc<ShardPool<SentryClient>>,
    queue: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl ErrorReporter {
    /// Spawn the dispatch worker. Must be called inside a tokio runtime.
    pub fn start(pool: Arc<ShardPool<SentryClient>>, queue_capacity: usize, max_in_flight: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let max_in_flight = max_in_flight.clamp(1, Semaphore::MAX_PERMITS);
        let worker = tokio::spawn(dispatch(Arc::clone(&pool), rx, max_in_flight));

        Self {
            pool,
            queue: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue an error event tagged with `shard`. Returns false if not queued.
    pub fn capture_error(&self, shard: ShardIndex, err: &dyn fmt::Display) -> bool {
        self.enqueue(shard, Event::new(Level::Error, err.to_string(), shard))
    }

    /// Queue an informational event tagged with `shard`
    pub fn capture_message(&self, shard: ShardIndex, message: &str) -> bool {
        self.enqueue(shard, Event::new(Level::Info, message.to_string(), shard))
    }

    fn enqueue(&self, shard: ShardIndex, event: Event) -> bool {
        let Some(tx) = self.queue.lock().clone() else {
            return false;
        };
        match tx.try_send(Job { shard, event }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(target: "reporter", "report queue full, dropping event for core {}", shard);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Events dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn pool(&self) -> &Arc<ShardPool<SentryClient>> {
        &self.pool
    }

    /// Stop accepting events and wait up to `timeout` for queued and
    /// in-flight sends. Returns true if everything was flushed.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.queue.lock().take();
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return true;
        };

        let abort = worker.abort_handle();
        match tokio::time::timeout(timeout, worker).await {
            Ok(_) => {
                tracing::info!(target: "reporter", "error reporter flushed");
                true
            }
            Err(_) => {
                abort.abort();
                tracing::warn!(target: "reporter", "error reporter flush timed out after {:?}", timeout);
                false
            }
        }
    }
}

/// Drain the queue, at most `max_in_flight` sends at a time
///
/// Sends live in a `JoinSet` owned by this future, so aborting the worker
/// cancels them too.
async fn dispatch(pool: Arc<ShardPool<SentryClient>>, mut rx: mpsc::Receiver<Job>, max_in_flight: usize) {
    let permits = Arc::new(Semaphore::new(max_in_flight));
    let mut sends = JoinSet::new();

    while let Some(job) = rx.recv().await {
        while sends.try_join_next().is_some() {}
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let pool = Arc::clone(&pool);
        sends.spawn(async move {
            let _permit = permit;
            if let Err(e) = pool.get(job.shard).send(&job.event).await {
                tracing::warn!(target: "reporter", "failed to send report for core {}: {}", job.shard, e);
            }
        });
    }

    // Queue closed: wait for in-flight sends.
    while sends.join_next().await.is_some() {}
}
