//! Collector Server
//!
//! HTTP endpoint that receives capture payloads, validates them and stores
//! them in a dataset directory.
//!
//! ```text
//! GET  /                  - banner
//! POST /ping              - echo {"message": ...}
//! POST /upload            - validate + save a CapturePayload, 400 {"detail"} on failure
//! GET  /latest            - paths of the most recent capture
//! GET  /latest/annotated  - most recent capture with its boxes drawn (PNG)
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::annotate::{annotate_capture, AnnotationConfig};
use crate::collector::DirectorySink;
use crate::error::{Error, Result};
use crate::payload::{CaptureDocument, CapturePayload, SavedCapture};

/// Default collector port
pub const DEFAULT_PORT: u16 = 7659;

/// Default dataset directory
pub const DEFAULT_DATASET_DIR: &str = "./dataset";

/// Collector server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub dataset: PathBuf,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_dataset(mut self, dataset: impl Into<PathBuf>) -> Self {
        self.dataset = dataset.into();
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            dataset: PathBuf::from(DEFAULT_DATASET_DIR),
        }
    }
}

/// Shared state behind the routes
#[derive(Debug)]
pub struct CollectorState {
    sink: DirectorySink,
    latest: RwLock<Option<SavedCapture>>,
}

impl CollectorState {
    pub fn new(dataset: impl Into<PathBuf>) -> Self {
        Self {
            sink: DirectorySink::new(dataset),
            latest: RwLock::new(None),
        }
    }

    /// Parse, validate and save a raw upload body
    pub async fn accept(&self, body: &[u8]) -> Result<SavedCapture> {
        let payload: CapturePayload = serde_json::from_slice(body)?;
        let sink = self.sink.clone();
        let saved = tokio::task::spawn_blocking(move || sink.store(&payload))
            .await
            .map_err(|e| Error::Collector(format!("store task failed: {}", e)))??;

        tracing::info!("Stored capture {}", saved.json_path.display());
        *self.latest.write().await = Some(saved.clone());
        Ok(saved)
    }

    pub async fn latest(&self) -> Option<SavedCapture> {
        self.latest.read().await.clone()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PingMessage {
    message: String,
}

/// Build the collector router
pub fn create_router(state: Arc<CollectorState>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/ping", post(ping))
        .route("/upload", post(upload))
        .route("/latest", get(latest))
        .route("/latest/annotated", get(latest_annotated))
        .layer(DefaultBodyLimit::disable())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on an already bound listener until Ctrl-C
pub async fn serve_on(listener: TcpListener, state: Arc<CollectorState>) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("Collector listening on http://{}", addr);
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Collector shutting down");
        })
        .await?;
    Ok(())
}

/// Bind `config.addr()` and serve
pub async fn serve(config: ServerConfig) -> Result<()> {
    let addr: SocketAddr = config
        .addr()
        .parse()
        .map_err(|e| Error::Collector(format!("invalid listen address {}: {}", config.addr(), e)))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Saving captures to {}", config.dataset.display());
    serve_on(listener, Arc::new(CollectorState::new(config.dataset))).await
}

fn detail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "detail": message.into() }))).into_response()
}

async fn home() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "webuicapture collector" }))
}

async fn ping(Json(msg): Json<PingMessage>) -> Json<PingMessage> {
    tracing::debug!("Ping: {}", msg.message);
    Json(msg)
}

async fn upload(State(state): State<Arc<CollectorState>>, body: Bytes) -> Response {
    match state.accept(&body).await {
        Ok(_) => Json(serde_json::json!({})).into_response(),
        Err(e) => {
            tracing::warn!("Rejected upload: {}", e);
            detail(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

async fn latest(State(state): State<Arc<CollectorState>>) -> Response {
    match state.latest().await {
        Some(saved) => Json(saved).into_response(),
        None => detail(StatusCode::NOT_FOUND, "no capture stored yet"),
    }
}

async fn latest_annotated(State(state): State<Arc<CollectorState>>) -> Response {
    let Some(saved) = state.latest().await else {
        return detail(StatusCode::NOT_FOUND, "no capture stored yet");
    };

    let rendered = tokio::task::spawn_blocking(move || -> std::result::Result<Vec<u8>, String> {
        let document = CaptureDocument::load(&saved.json_path).map_err(|e| e.to_string())?;
        let image = std::fs::read(&saved.image_path).map_err(|e| e.to_string())?;
        annotate_capture(&image, document.bbox_tree.as_ref(), &AnnotationConfig::default())
            .map_err(|e| e.to_string())
    })
    .await;

    match rendered {
        Ok(Ok(png)) => ([(header::CONTENT_TYPE, "image/png")], png).into_response(),
        Ok(Err(e)) => detail(StatusCode::INTERNAL_SERVER_ERROR, e),
        Err(e) => detail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BBox;
    use crate::layout::LayoutNode;
    use crate::payload::tests::png;
    use axum::{body::Body, http::Request};
    use chrono::Utc;
    use tower::ServiceExt;

    fn temp_dataset() -> PathBuf {
        std::env::temp_dir().join(format!("webuicapture-server-{}", uuid::Uuid::new_v4()))
    }

    fn payload(bbox: BBox) -> CapturePayload {
        CapturePayload {
            url: "https://example.com/".into(),
            timestamp: Utc::now(),
            bbox_tree: Some(LayoutNode::new("BODY", bbox)),
            image: png(64, 48),
        }
    }

    fn post_json(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.addr(), "127.0.0.1:7659");
        assert_eq!(config.dataset, PathBuf::from("./dataset"));

        let config = ServerConfig::new("0.0.0.0", 9000).with_dataset("/tmp/ds");
        assert_eq!(config.addr(), "0.0.0.0:9000");
        assert_eq!(config.dataset, PathBuf::from("/tmp/ds"));
    }

    #[tokio::test]
    async fn test_home_and_ping() {
        let app = create_router(Arc::new(CollectorState::new(temp_dataset())));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(post_json("/ping", r#"{"message": "hello"}"#.into()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["message"], "hello");
    }

    #[tokio::test]
    async fn test_upload_saves_and_updates_latest() {
        let dataset = temp_dataset();
        let state = Arc::new(CollectorState::new(&dataset));
        let app = create_router(state.clone());

        let body = serde_json::to_string(&payload(BBox(0, 0, 64, 48))).unwrap();
        let response = app.clone().oneshot(post_json("/upload", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({}));

        let saved = state.latest().await.unwrap();
        assert!(saved.json_path.starts_with(&dataset));
        assert!(saved.image_path.exists());

        let response = app
            .oneshot(Request::builder().uri("/latest").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let _ = std::fs::remove_dir_all(&dataset);
    }

    #[tokio::test]
    async fn test_upload_rejects_with_detail() {
        let dataset = temp_dataset();
        let app = create_router(Arc::new(CollectorState::new(&dataset)));

        let body = serde_json::to_string(&payload(BBox(0, 0, 65, 48))).unwrap();
        let response = app.clone().oneshot(post_json("/upload", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let detail = body_json(response).await;
        assert!(detail["detail"].as_str().unwrap().contains("image width"));

        let response = app
            .oneshot(post_json("/upload", "{not json".into()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!dataset.exists());
    }

    #[tokio::test]
    async fn test_latest_before_any_upload() {
        let app = create_router(Arc::new(CollectorState::new(temp_dataset())));
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/latest").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/latest/annotated")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
