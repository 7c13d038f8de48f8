//! API Server
//!
//! Request recording endpoints over the dual-store recorder, plus health,
//! metrics and object-store routes. Handlers are generic over the two store
//! types so the same router runs against real backends or memory stores.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Level;

use crate::core::{CombinedView, RequestId, ShardIndex, ShardResolver};
use crate::infrastructure::metrics::MetricsCollector;
use crate::recorder::DualStoreRecorder;
use crate::rest::{ErrorReporter, ObjectStore, ObjectStoreError};
use crate::stores::{RequestStore, Store};
use crate::{log_api, AppError};

const STORED_MESSAGE: &str = "Request stored successfully";
const RETRIEVED_MESSAGE: &str = "Request information retrieved from both databases";

/// Process-wide request id source, seeded from the wall clock
#[derive(Debug)]
pub struct RequestIds {
    next: AtomicU64,
}

impl RequestIds {
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        Self::starting_at(seed)
    }

    pub fn starting_at(first: RequestId) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    #[inline]
    pub fn next(&self) -> RequestId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared application state
pub struct AppState<A: RequestStore, B: RequestStore> {
    pub recorder: DualStoreRecorder<A, B>,
    pub resolver: Arc<ShardResolver>,
    pub metrics: Arc<MetricsCollector>,
    pub reporter: Arc<ErrorReporter>,
    pub objects: Option<Arc<ObjectStore>>,
    pub ids: Arc<RequestIds>,
}

impl<A: RequestStore, B: RequestStore> Clone for AppState<A, B> {
    fn clone(&self) -> Self {
        Self {
            recorder: self.recorder.clone(),
            resolver: Arc::clone(&self.resolver),
            metrics: Arc::clone(&self.metrics),
            reporter: Arc::clone(&self.reporter),
            objects: self.objects.clone(),
            ids: Arc::clone(&self.ids),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StoredDto {
    pub request_id: RequestId,
    pub core: ShardIndex,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct RetrievedDto {
    pub message: &'static str,
    pub results: CombinedView,
}

/// Per-store read failure summary; `null` for a store that read cleanly
#[derive(Debug, Serialize)]
pub struct ReadErrorsDto {
    #[serde(rename = "storeA")]
    pub store_a: Option<String>,
    #[serde(rename = "storeB")]
    pub store_b: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PartialDto {
    pub results: CombinedView,
    pub errors: ReadErrorsDto,
}

#[derive(Debug, Serialize)]
pub struct HealthDto {
    pub status: &'static str,
    pub shards: usize,
}

#[derive(Debug, Serialize)]
pub struct UploadedDto {
    pub name: String,
    pub bucket: String,
    pub core: ShardIndex,
}

#[derive(Debug, Serialize)]
pub struct ErrorDto {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (status, Json(ErrorDto { error: error.to_string() })).into_response()
}

/// Build the router over `state`
pub fn router<A: RequestStore, B: RequestStore>(state: AppState<A, B>) -> Router {
    Router::new()
        .route("/store-request", get(store_request::<A, B>))
        .route("/retrieve-requests", get(retrieve_requests::<A, B>))
        .route("/health", get(health::<A, B>))
        .route("/metrics", get(metrics::<A, B>))
        .route(
            "/objects/*name",
            get(download_object::<A, B>)
                .put(upload_object::<A, B>)
                .delete(delete_object::<A, B>),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve `app` on `port` until `shutdown` resolves
pub async fn start_server<F>(app: Router, port: u16, shutdown: F) -> Result<(), AppError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log_api!(Level::INFO, "API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    log_api!(Level::INFO, "API server stopped");
    Ok(())
}

/// Handler for /store-request
async fn store_request<A: RequestStore, B: RequestStore>(State(state): State<AppState<A, B>>) -> Response {
    let shard = state.resolver.resolve();
    let request_id = state.ids.next();

    match state.recorder.write(shard, request_id).await {
        Ok(record) => {
            state.metrics.record_stored();
            Json(StoredDto {
                request_id: record.request_id,
                core: record.shard,
                message: STORED_MESSAGE,
            })
            .into_response()
        }
        Err(e) => {
            state.metrics.record_write_failure(e.store);
            log_api!(Level::WARN, "request {} on core {}: {}", request_id, shard, e);
            state.reporter.capture_error(shard, &e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

/// Handler for /retrieve-requests
///
/// 200 when both stores answered for every shard, 206 with whatever was
/// read plus per-store errors otherwise.
async fn retrieve_requests<A: RequestStore, B: RequestStore>(
    State(state): State<AppState<A, B>>,
) -> Response {
    let (results, errors) = state.recorder.read_all(state.resolver.shards()).await;

    match errors {
        None => {
            state.metrics.record_read(std::iter::empty());
            Json(RetrievedDto {
                message: RETRIEVED_MESSAGE,
                results,
            })
            .into_response()
        }
        Some(errors) => {
            state.metrics.record_read(errors.errors().iter().map(|e| e.store));
            log_api!(Level::WARN, "partial retrieve: {}", errors);
            let body = PartialDto {
                results,
                errors: ReadErrorsDto {
                    store_a: errors.describe(Store::A),
                    store_b: errors.describe(Store::B),
                },
            };
            (StatusCode::PARTIAL_CONTENT, Json(body)).into_response()
        }
    }
}

async fn health<A: RequestStore, B: RequestStore>(State(state): State<AppState<A, B>>) -> Json<HealthDto> {
    let closed = state.recorder.store_a().is_closed() || state.recorder.store_b().is_closed();
    Json(HealthDto {
        status: if closed { "closing" } else { "ok" },
        shards: state.resolver.shards(),
    })
}

async fn metrics<A: RequestStore, B: RequestStore>(State(state): State<AppState<A, B>>) -> Response {
    Json(state.metrics.snapshot(state.reporter.dropped())).into_response()
}

fn object_store<A: RequestStore, B: RequestStore>(state: &AppState<A, B>) -> Result<&ObjectStore, Response> {
    state
        .objects
        .as_deref()
        .ok_or_else(|| error_response(StatusCode::SERVICE_UNAVAILABLE, "object store not configured"))
}

fn object_error(name: &str, e: ObjectStoreError) -> Response {
    if e.is_not_found() {
        return error_response(StatusCode::NOT_FOUND, format!("object {} not found", name));
    }
    if e.is_invalid_key() {
        return error_response(StatusCode::BAD_REQUEST, e);
    }
    log_api!(Level::WARN, "object store: {}", e);
    error_response(StatusCode::BAD_GATEWAY, e)
}

async fn upload_object<A: RequestStore, B: RequestStore>(
    State(state): State<AppState<A, B>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let store = match object_store(&state) {
        Ok(store) => store,
        Err(response) => return response,
    };
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");
    let shard = state.resolver.resolve();

    match store.upload_file(shard, &name, body, content_type).await {
        Ok(()) => (
            StatusCode::CREATED,
            Json(UploadedDto {
                bucket: store.bucket().to_string(),
                name,
                core: shard,
            }),
        )
            .into_response(),
        Err(e) => {
            state.reporter.capture_error(shard, &e);
            object_error(&name, e)
        }
    }
}

async fn download_object<A: RequestStore, B: RequestStore>(
    State(state): State<AppState<A, B>>,
    Path(name): Path<String>,
) -> Response {
    let store = match object_store(&state) {
        Ok(store) => store,
        Err(response) => return response,
    };
    let shard = state.resolver.resolve();

    match store.download_file(shard, &name).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response(),
        Err(e) => object_error(&name, e),
    }
}

async fn delete_object<A: RequestStore, B: RequestStore>(
    State(state): State<AppState<A, B>>,
    Path(name): Path<String>,
) -> Response {
    let store = match object_store(&state) {
        Ok(store) => store,
        Err(response) => return response,
    };
    let shard = state.resolver.resolve();

    match store.delete_file(shard, &name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => object_error(&name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ShardPool;
    use crate::rest::SentryClient;
    use crate::stores::MemoryBackend;
    use crate::test_utils::{Fault, FaultyStore};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    const SHARDS: usize = 4;

    struct Harness {
        state: AppState<FaultyStore, FaultyStore>,
        a: Arc<MemoryBackend>,
        b: Arc<MemoryBackend>,
        fault_a: Arc<Fault>,
        fault_b: Arc<Fault>,
    }

    fn faulty_pool(backend: &Arc<MemoryBackend>, fault: &Arc<Fault>) -> Arc<ShardPool<FaultyStore>> {
        Arc::new(
            ShardPool::create("faulty", SHARDS, |_| {
                Ok::<_, String>(FaultyStore::new(backend.handle(), Arc::clone(fault)))
            })
            .unwrap(),
        )
    }

    fn harness() -> Harness {
        let (a, b) = (MemoryBackend::new(), MemoryBackend::new());
        let (fault_a, fault_b) = (Fault::new(), Fault::new());
        let reporters = Arc::new(
            ShardPool::create("reporter", SHARDS, |_| SentryClient::new(None, Duration::from_secs(1))).unwrap(),
        );

        let state = AppState {
            recorder: DualStoreRecorder::new(
                faulty_pool(&a, &fault_a),
                faulty_pool(&b, &fault_b),
                Duration::from_secs(5),
            ),
            resolver: Arc::new(ShardResolver::new(SHARDS)),
            metrics: Arc::new(MetricsCollector::new()),
            reporter: Arc::new(ErrorReporter::start(reporters, 16, 2)),
            objects: None,
            ids: Arc::new(RequestIds::starting_at(1000)),
        };

        Harness {
            state,
            a,
            b,
            fault_a,
            fault_b,
        }
    }

    async fn call(state: &AppState<FaultyStore, FaultyStore>, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[test]
    fn test_request_ids_increase() {
        let ids = RequestIds::starting_at(7);
        assert_eq!(ids.next(), 7);
        assert_eq!(ids.next(), 8);
        assert!(RequestIds::new().next() > 0);
    }

    #[tokio::test]
    async fn test_store_then_retrieve() {
        let h = harness();

        let (status, body) = call(&h.state, "GET", "/store-request").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["request_id"], 1000);
        assert_eq!(body["message"], STORED_MESSAGE);
        let core = body["core"].as_u64().unwrap() as usize;
        assert!(core < SHARDS);

        let (status, body) = call(&h.state, "GET", "/retrieve-requests").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], RETRIEVED_MESSAGE);
        let shard = &body["results"][core.to_string()];
        assert_eq!(shard["storeARequests"], serde_json::json!([1000]));
        assert_eq!(shard["storeBRequests"], serde_json::json!([1000]));
        assert_eq!(body["results"].as_object().unwrap().len(), SHARDS);

        assert_eq!(h.state.metrics.snapshot(0).requests_stored, 1);
    }

    #[tokio::test]
    async fn test_store_b_failure_returns_500() {
        let h = harness();
        h.fault_b.fail_writes(true);

        let (status, body) = call(&h.state, "GET", "/store-request").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("storeB"));
        assert_eq!(h.a.total(), 1);
        assert_eq!(h.b.total(), 0);

        let snapshot = h.state.metrics.snapshot(0);
        assert_eq!(snapshot.store_b.write_failures, 1);
        assert_eq!(snapshot.requests_stored, 0);
    }

    #[tokio::test]
    async fn test_store_a_failure_returns_500() {
        let h = harness();
        h.fault_a.fail_writes(true);

        let (status, body) = call(&h.state, "GET", "/store-request").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("storeA"));
        assert_eq!(h.b.total(), 0);
    }

    #[tokio::test]
    async fn test_partial_read_returns_206() {
        let h = harness();
        for shard in 0..SHARDS {
            h.state.recorder.write(ShardIndex(shard), shard as u64).await.unwrap();
        }
        h.fault_b.fail_reads_on(ShardIndex(2));

        let (status, body) = call(&h.state, "GET", "/retrieve-requests").await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert!(body.get("message").is_none());
        assert!(body["errors"]["storeA"].is_null());
        assert!(body["errors"]["storeB"].as_str().unwrap().contains("core 2"));

        assert_eq!(body["results"]["2"]["storeARequests"], serde_json::json!([2]));
        assert!(body["results"]["2"]["storeBRequests"].is_null());
        assert_eq!(body["results"]["3"]["storeBRequests"], serde_json::json!([3]));

        let snapshot = h.state.metrics.snapshot(0);
        assert_eq!(snapshot.partial_reads, 1);
        assert_eq!(snapshot.store_b.read_failures, 1);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let h = harness();

        let (status, body) = call(&h.state, "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["shards"], SHARDS);

        let (status, body) = call(&h.state, "GET", "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requestsStored"], 0);

        h.state.recorder.store_a().close();
        let (_, body) = call(&h.state, "GET", "/health").await;
        assert_eq!(body["status"], "closing");
    }

    #[tokio::test]
    async fn test_objects_unconfigured() {
        let h = harness();
        let (status, body) = call(&h.state, "GET", "/objects/a/b.txt").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "object store not configured");

        let (status, _) = call(&h.state, "DELETE", "/objects/a").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_object_name_escaping_bucket_is_rejected() {
        let mut h = harness();
        let config = crate::infrastructure::config::ObjectStoreConfig {
            endpoint: "127.0.0.1:1".to_string(),
            bucket: "uploads".to_string(),
            ..Default::default()
        };
        h.state.objects = Some(Arc::new(ObjectStore::new(&config, SHARDS).unwrap()));

        for method in ["GET", "PUT", "DELETE"] {
            let (status, body) = call(&h.state, method, "/objects/..%2Fprivate%2Fsecret.txt").await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", method);
            assert!(body["error"].as_str().unwrap().contains("invalid object name"));
        }
    }
}
