//! S3-compatible object store (MinIO) behind a shard pool
//!
//! Each shard owns its own HTTP client. Objects are addressed path-style:
//! `{endpoint}/{bucket}/{key}`, every request SigV4-signed.

use crate::core::ShardIndex;
use crate::infrastructure::config::ObjectStoreConfig;
use crate::pool::{PoolError, ShardPool, ShardResource};
use crate::rest::signing::{sha256_hex, uri_encode, RequestSigner, EMPTY_PAYLOAD_SHA256};
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use url::Url;

/// Object store errors
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),

    #[error("invalid object name {0:?}")]
    InvalidKey(String),

    #[error("object {0} not found")]
    NotFound(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("object store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("client released")]
    Closed,

    #[error("failed to {op} {object} on core {shard}: {source}")]
    Operation {
        op: &'static str,
        object: String,
        shard: ShardIndex,
        #[source]
        source: Box<ObjectStoreError>,
    },
}

impl ObjectStoreError {
    /// True if the root cause is a missing object
    pub fn is_not_found(&self) -> bool {
        match self {
            ObjectStoreError::NotFound(_) => true,
            ObjectStoreError::Operation { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// True if the object name was rejected before any request was sent
    pub fn is_invalid_key(&self) -> bool {
        match self {
            ObjectStoreError::InvalidKey(_) => true,
            ObjectStoreError::Operation { source, .. } => source.is_invalid_key(),
            _ => false,
        }
    }
}

/// Reject names that would leave the bucket once the URL path is normalized
fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    let escapes = key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|segment| segment == "." || segment == "..");
    if escapes {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// One shard's S3 client
pub struct S3Client {
    http: reqwest::Client,
    base: Url,
    signer: RequestSigner,
    released: AtomicBool,
}

impl S3Client {
    pub fn new(config: &ObjectStoreConfig) -> Result<Self, ObjectStoreError> {
        let endpoint = if config.endpoint.contains("://") {
            config.endpoint.clone()
        } else {
            let scheme = if config.use_ssl { "https" } else { "http" };
            format!("{}://{}", scheme, config.endpoint)
        };
        let base = Url::parse(&endpoint).map_err(|_| ObjectStoreError::InvalidEndpoint(config.endpoint.clone()))?;
        if base.host_str().is_none() {
            return Err(ObjectStoreError::InvalidEndpoint(config.endpoint.clone()));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("shardcore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ObjectStoreError::Http(e.to_string()))?;

        Ok(Self {
            http,
            base,
            signer: RequestSigner::s3(&config.access_key_id, &config.secret_access_key, &config.region),
            released: AtomicBool::new(false),
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> Result<Url, ObjectStoreError> {
        validate_key(key)?;
        let base = self.base.as_str().trim_end_matches('/');
        let raw = format!("{}/{}/{}", base, uri_encode(bucket, false), uri_encode(key, true));
        Url::parse(&raw).map_err(|_| ObjectStoreError::InvalidEndpoint(raw))
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<(Bytes, &str)>,
    ) -> Result<reqwest::Response, ObjectStoreError> {
        if self.released.load(Ordering::Acquire) {
            return Err(ObjectStoreError::Closed);
        }

        let payload_hash = match &body {
            Some((bytes, _)) => sha256_hex(bytes),
            None => EMPTY_PAYLOAD_SHA256.to_string(),
        };
        let signed = self.signer.sign(method.as_str(), &url, &payload_hash);
        let path = url.path().to_string();

        let mut request = self
            .http
            .request(method, url)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header(AUTHORIZATION, signed.authorization);
        if let Some((bytes, content_type)) = body {
            request = request.header(CONTENT_TYPE, content_type).body(bytes);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ObjectStoreError::Http(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(ObjectStoreError::NotFound(path)),
            status => Err(ObjectStoreError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        let url = self.object_url(bucket, key)?;
        self.send(Method::PUT, url, Some((body, content_type))).await?;
        Ok(())
    }

    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, ObjectStoreError> {
        let url = self.object_url(bucket, key)?;
        let response = self.send(Method::GET, url, None).await?;
        response
            .bytes()
            .await
            .map_err(|e| ObjectStoreError::Http(e.to_string()))
    }

    pub async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), ObjectStoreError> {
        let url = self.object_url(bucket, key)?;
        self.send(Method::DELETE, url, None).await?;
        Ok(())
    }
}

impl ShardResource for S3Client {
    fn release(&self) {
        self.released.store(true, Ordering::Release);
    }
}

/// Sharded object store over one bucket
pub struct ObjectStore {
    pool: ShardPool<S3Client>,
    bucket: String,
}

impl ObjectStore {
    /// Build one client per shard
    pub fn new(config: &ObjectStoreConfig, shards: usize) -> Result<Self, PoolError> {
        let pool = ShardPool::create("object-store", shards, |_| S3Client::new(config))?;
        Ok(Self {
            pool,
            bucket: config.bucket.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn shards(&self) -> usize {
        self.pool.len()
    }

    pub async fn upload_file(
        &self,
        shard: ShardIndex,
        name: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        self.pool
            .get(shard)
            .put_object(&self.bucket, name, body, content_type)
            .await
            .map_err(|e| on_shard("upload", name, shard, e))
    }

    pub async fn download_file(&self, shard: ShardIndex, name: &str) -> Result<Bytes, ObjectStoreError> {
        self.pool
            .get(shard)
            .get_object(&self.bucket, name)
            .await
            .map_err(|e| on_shard("download", name, shard, e))
    }

    pub async fn delete_file(&self, shard: ShardIndex, name: &str) -> Result<(), ObjectStoreError> {
        self.pool
            .get(shard)
            .remove_object(&self.bucket, name)
            .await
            .map_err(|e| on_shard("delete", name, shard, e))
    }

    pub fn close(&self) {
        self.pool.close();
    }
}

fn on_shard(op: &'static str, object: &str, shard: ShardIndex, source: ObjectStoreError) -> ObjectStoreError {
    ObjectStoreError::Operation {
        op,
        object: object.to_string(),
        shard,
        source: Box::new(source),
    }
}
