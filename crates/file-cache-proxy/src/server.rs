//! HTTP server for the file cache
//!
//! Provides /health, POST /purge, and /<document_root>/*path.

use crate::types::{DocumentQuery, HealthResponse};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use file_cache::{CacheError, Descriptor, FileCache};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Shared state for the HTTP server
pub struct ServerState {
    pub cache: FileCache,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(cache: FileCache) -> Self {
        Self {
            cache,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create the HTTP router. Documents are served under `/<root>/`.
pub fn create_router(state: SharedState) -> Router {
    let root = state.cache.config().rules.root.trim_matches('/').to_string();
    let documents = if root.is_empty() {
        "/{*path}".to_string()
    } else {
        format!("/{}/{{*path}}", root)
    };

    Router::new()
        .route("/health", get(health))
        .route("/purge", post(purge))
        .route(&documents, get(get_document))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: state.cache.stats(),
    })
}

/// Evict every cached file in the background
async fn purge(State(state): State<SharedState>) -> Response {
    state.cache.purge_async(None);
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "purging" })),
    )
        .into_response()
}

/// Serve a document, downloading it first if needed
async fn get_document(
    State(state): State<SharedState>,
    Query(query): Query<DocumentQuery>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    // Header values that are not valid strings cannot be forwarded anyway
    let args = headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)));

    // Backends encode keys themselves, so they must see the decoded path
    let path = match urlencoding::decode(uri.path()) {
        Ok(path) => path,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid URL path {:?}: {}", uri.path(), e),
            )
        }
    };

    let descriptor = match state.cache.descriptor(&path, args) {
        Ok(descriptor) => descriptor,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let was_cached = state.cache.contains(&descriptor);
    let fetched = match (query.reload, query.newer_than) {
        (true, _) => state.cache.try_reload(&descriptor).await,
        (false, Some(secs)) => {
            let Some(threshold) = DateTime::<Utc>::from_timestamp(secs, 0) else {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("invalid newer_than timestamp: {}", secs),
                );
            };
            if state.cache.fetch_newer_than(&descriptor, threshold).await {
                Ok(())
            } else {
                Err(CacheError::NotFetched {
                    key: descriptor.unique_key(),
                })
            }
        }
        (false, None) => state.cache.try_fetch(&descriptor).await,
    };

    if let Err(e) = fetched {
        warn!(path = %descriptor.path(), error = %e, "Failed to fetch document");
        return error_response(status_for(&e), e.to_string());
    }

    // A hit is only a hit if nothing had to be downloaded
    let hit = was_cached && !query.reload && query.newer_than.is_none();
    serve_file(&state.cache, &descriptor, hit).await
}

async fn serve_file(cache: &FileCache, descriptor: &Descriptor, hit: bool) -> Response {
    let storage_path = cache.storage_path(descriptor);
    let data = match tokio::fs::read(&storage_path).await {
        Ok(data) => data,
        Err(e) => {
            error!(path = ?storage_path, error = %e, "Failed to read cached file");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Unable to read cached file".to_string(),
            );
        }
    };

    (
        StatusCode::OK,
        [
            ("content-type", content_type_for(descriptor.path())),
            ("x-cache", if hit { "HIT" } else { "MISS" }),
        ],
        data,
    )
        .into_response()
}

fn status_for(err: &CacheError) -> StatusCode {
    match err {
        CacheError::Descriptor(_) => StatusCode::BAD_REQUEST,
        CacheError::Fetch(_) | CacheError::NoFetcher(_) | CacheError::NotFetched { .. } => {
            StatusCode::NOT_FOUND
        }
        CacheError::Config(_) | CacheError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

/// Guess a content type from the file extension
fn content_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request};
    use file_cache::{BackendTag, FetchError, Fetcher, FetcherRegistry, FileCacheConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use tower::ServiceExt;

    /// Writes the descriptor path and the authorization arg, if any
    #[derive(Default)]
    struct EchoFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for EchoFetcher {
        async fn fetch(
            &self,
            descriptor: &Descriptor,
            file: &mut tokio::fs::File,
            _timeout: Duration,
        ) -> Result<u64, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if descriptor.path().contains("missing") {
                return Err(FetchError::Status {
                    status: 404,
                    url: descriptor.path().to_string(),
                });
            }

            let mut body = descriptor.path().to_string();
            if let Some(auth) = descriptor.args().get("authorization") {
                body.push(':');
                body.push_str(auth);
            }
            file.write_all(body.as_bytes()).await?;
            Ok(body.len() as u64)
        }
    }

    fn test_state(dir: &TempDir, fetcher: Arc<EchoFetcher>) -> SharedState {
        let config = FileCacheConfig::new(4, dir.path()).with_hashable_args(["Authorization"]);
        let fetchers = FetcherRegistry::new()
            .register(BackendTag::OBJECT_STORE, fetcher.clone())
            .register(BackendTag::DROPBOX, fetcher);
        let cache = FileCache::new(config, fetchers).unwrap();
        Arc::new(ServerState::new(cache))
    }

    async fn get(router: Router, uri: &str) -> Response {
        router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = TempDir::new().unwrap();
        let router = create_router(test_state(&dir, Arc::default()));

        let response = get(router, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["cache"]["capacity"], 4);
        assert_eq!(json["cache"]["entries"], 0);
    }

    #[tokio::test]
    async fn test_document_miss_then_hit() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(EchoFetcher::default());
        let router = create_router(test_state(&dir, fetcher.clone()));

        let response = get(router.clone(), "/documents/bucket/report.pdf").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-cache"], "MISS");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(body_string(response).await, "bucket/report.pdf");

        let response = get(router, "/documents/bucket/report.pdf").await;
        assert_eq!(response.headers()["x-cache"], "HIT");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_allowed_header_reaches_fetcher() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(EchoFetcher::default());
        let router = create_router(test_state(&dir, fetcher.clone()));

        let request = Request::builder()
            .uri("/documents/bucket/private.txt")
            .header("Authorization", "Bearer frodo")
            .header("Cookie", "ignored")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "bucket/private.txt:Bearer frodo");

        // Same path without the header is a different entry
        let response = get(router, "/documents/bucket/private.txt").await;
        assert_eq!(response.headers()["x-cache"], "MISS");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_percent_encoded_path_is_decoded() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, Arc::default());
        let router = create_router(state.clone());

        let response = get(router.clone(), "/documents/bucket/Q1%202024%20%C3%A9t%C3%A9.pdf").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "bucket/Q1 2024 été.pdf");

        // The entry is keyed by the decoded path
        let response = get(router, "/documents/bucket/Q1%202024%20%C3%A9t%C3%A9.pdf").await;
        assert_eq!(response.headers()["x-cache"], "HIT");
        assert!(state
            .cache
            .contains(&Descriptor::for_path("bucket/Q1 2024 été.pdf")));
    }

    #[tokio::test]
    async fn test_path_that_is_not_utf8_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(EchoFetcher::default());
        let router = create_router(test_state(&dir, fetcher.clone()));

        let response = get(router, "/documents/bucket/%FF%FE.pdf").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reload_downloads_again() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(EchoFetcher::default());
        let router = create_router(test_state(&dir, fetcher.clone()));

        get(router.clone(), "/documents/bucket/a.pdf").await;
        let response = get(router, "/documents/bucket/a.pdf?reload=true").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-cache"], "MISS");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_newer_than_keeps_fresh_copy() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(EchoFetcher::default());
        let router = create_router(test_state(&dir, fetcher.clone()));

        get(router.clone(), "/documents/bucket/a.pdf").await;

        let long_ago = Utc::now().timestamp() - 600;
        let uri = format!("/documents/bucket/a.pdf?newer_than={}", long_ago);
        let response = get(router.clone(), &uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        let future = Utc::now().timestamp() + 600;
        let uri = format!("/documents/bucket/a.pdf?newer_than={}", future);
        let response = get(router, &uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_path_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let router = create_router(test_state(&dir, Arc::default()));

        let response = get(router, "/documents/lonely.pdf").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_found() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, Arc::default());
        let router = create_router(state.clone());

        let response = get(router, "/documents/bucket/missing.pdf").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert!(json["error"].as_str().unwrap().contains("404"));
        assert!(state.cache.is_empty());
    }

    #[tokio::test]
    async fn test_purge_endpoint() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, Arc::default());
        let router = create_router(state.clone());

        get(router.clone(), "/documents/bucket/a.pdf").await;
        assert_eq!(state.cache.len(), 1);

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/purge")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        for _ in 0..50 {
            if state.cache.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(state.cache.is_empty());
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("bucket/a.PDF"), "application/pdf");
        assert_eq!(content_type_for("bucket/photo.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("bucket/noext"), "application/octet-stream");
        assert_eq!(content_type_for("bucket.d/noext"), "application/octet-stream");
    }
}
