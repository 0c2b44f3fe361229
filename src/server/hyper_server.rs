//! Hyper-based HTTP Server
//!
//! Thin transport around the embedding core: parses JSON, rejects empty
//! query lists, and maps core failures onto status codes.

use hyper::body::to_bytes;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpSocket;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::models::{EmbedInput, EmbeddingError, EmbeddingModel, ErrorKind};
use crate::protocol::http::{
    validate_input, HealthResponse, HttpEmbedRequest, HttpEmbedResponse, HttpErrorResponse,
};
use crate::server::config::ServerConfig;

/// Shared state for the Hyper server
#[derive(Clone)]
struct ServerState {
    model: Arc<dyn EmbeddingModel>,
    config: Arc<ServerConfig>,
}

/// Serve the embedding API until `shutdown` resolves, then drain open
/// connections.
pub async fn start_hyper_http_server<F>(
    config: Arc<ServerConfig>,
    model: Arc<dyn EmbeddingModel>,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind_address = config.network.bind_address.clone();
    info!("🚀 Starting Hyper HTTP Server");
    info!("📡 Binding to {}", bind_address);

    let state = ServerState { model, config };

    let make_svc = make_service_fn(move |_| {
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let state = state.clone();
                handle_request(req, state)
            }))
        }
    });

    let addr = bind_address.parse()?;
    let socket = match addr {
        std::net::SocketAddr::V4(_) => TcpSocket::new_v4()?,
        std::net::SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_nodelay(true)?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    let listener = socket.listen(1024)?;

    let server = Server::from_tcp(listener.into_std()?)?
        .http1_keepalive(true)
        .tcp_nodelay(true)
        .tcp_sleep_on_accept_errors(true)
        .serve(make_svc)
        .with_graceful_shutdown(shutdown);

    info!("✅ HTTP server listening on {}", bind_address);
    info!("📍 Endpoints:");
    info!("   POST /embed        - Embed a query or list of queries");
    info!("   POST /embed/batch  - Embed a list of queries");
    info!("   GET  /health       - Health check");
    info!("   GET  /             - Server info");

    server.await?;
    info!("🛑 HTTP server stopped");
    Ok(())
}

/// Route a request and attach CORS headers
async fn handle_request(req: Request<Body>, state: ServerState) -> Result<Response<Body>, Infallible> {
    let origin = req
        .headers()
        .get("origin")
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let request_id = Uuid::new_v4();

    let span = info_span!("request", %request_id, %method, %path);
    let mut response = async {
        match (&method, path.as_str()) {
            (&Method::POST, "/embed") => handle_embed(req, state).await,
            (&Method::POST, "/embed/batch") => handle_embed_batch(req, state).await,
            (&Method::GET, "/health") => handle_health(state),
            (&Method::GET, "/") => handle_root(state),
            (&Method::OPTIONS, _) => empty_response(StatusCode::NO_CONTENT),
            _ => json_response(StatusCode::NOT_FOUND, &HttpErrorResponse::new("Not Found")),
        }
    }
    .instrument(span)
    .await;

    let headers = response.headers_mut();
    headers.insert("access-control-allow-origin", origin);
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert("access-control-allow-headers", HeaderValue::from_static("content-type"));

    Ok(response)
}

/// Root endpoint - server info
fn handle_root(state: ServerState) -> Response<Body> {
    let info = serde_json::json!({
        "name": "Embedding API",
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.model.model_name(),
        "endpoints": {
            "embed": { "method": "POST", "path": "/embed" },
            "embed_batch": { "method": "POST", "path": "/embed/batch" },
            "health": { "method": "GET", "path": "/health" }
        }
    });
    json_response(StatusCode::OK, &info)
}

/// Health check endpoint
fn handle_health(state: ServerState) -> Response<Body> {
    debug!("🏥 Health check requested");
    if !state.model.is_ready() {
        return json_response(StatusCode::SERVICE_UNAVAILABLE, &HttpErrorResponse::model_not_ready());
    }

    match state.model.embedding_dimension() {
        Ok(dimension) => {
            let device = state
                .model
                .device()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let response = HealthResponse::healthy(state.model.model_name(), device, dimension);
            json_response(StatusCode::OK, &response)
        }
        Err(e) => embedding_error_response(&e),
    }
}

/// `POST /embed` with `{"query": ...}`
async fn handle_embed(req: Request<Body>, state: ServerState) -> Response<Body> {
    let body = match read_body(req, &state).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    let request: HttpEmbedRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return json_response(StatusCode::BAD_REQUEST, &HttpErrorResponse::invalid_body(e.to_string()))
        }
    };
    if let Err(error) = request.validate() {
        return json_response(StatusCode::BAD_REQUEST, &error);
    }
    embed(request.query, &state).await
}

/// `POST /embed/batch` with a bare list of strings
async fn handle_embed_batch(req: Request<Body>, state: ServerState) -> Response<Body> {
    let body = match read_body(req, &state).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    let queries: Vec<String> = match serde_json::from_slice(&body) {
        Ok(queries) => queries,
        Err(e) => {
            return json_response(StatusCode::BAD_REQUEST, &HttpErrorResponse::invalid_body(e.to_string()))
        }
    };
    let input = EmbedInput::Batch(queries);
    if let Err(error) = validate_input(&input) {
        return json_response(StatusCode::BAD_REQUEST, &error);
    }
    embed(input, &state).await
}

async fn embed(input: EmbedInput, state: &ServerState) -> Response<Body> {
    let start_time = Instant::now();
    match state.model.embed(input).await {
        Ok(embeddings) => {
            let response = HttpEmbedResponse::new(embeddings);
            info!(
                "⏱️  Embedded {} queries (dim {}) in {:?}",
                response.count,
                response.dimension,
                start_time.elapsed()
            );
            json_response(StatusCode::OK, &response)
        }
        Err(e) => {
            error!("❌ Embedding generation failed: {}", e);
            embedding_error_response(&e)
        }
    }
}

async fn read_body(req: Request<Body>, state: &ServerState) -> Result<hyper::body::Bytes, Response<Body>> {
    let limit = state.config.network.max_body_bytes;
    let too_large = || {
        json_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            &HttpErrorResponse::new(format!("Request body exceeds {} bytes", limit)).with_code("BODY_TOO_LARGE"),
        )
    };

    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(too_large());
    }

    let bytes = to_bytes(req.into_body()).await.map_err(|e| {
        json_response(
            StatusCode::BAD_REQUEST,
            &HttpErrorResponse::invalid_body(format!("Failed to read request body: {}", e)),
        )
    })?;
    if bytes.len() > limit {
        return Err(too_large());
    }
    Ok(bytes)
}

fn embedding_error_response(error: &EmbeddingError) -> Response<Body> {
    match (error.kind(), error) {
        (ErrorKind::Uninitialized, _) => {
            json_response(StatusCode::SERVICE_UNAVAILABLE, &HttpErrorResponse::model_not_ready())
        }
        (_, EmbeddingError::InvalidInput { message }) => json_response(
            StatusCode::BAD_REQUEST,
            &HttpErrorResponse::new(message.clone()).with_code("INVALID_INPUT"),
        ),
        _ => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &HttpErrorResponse::internal_error(error.to_string()),
        ),
    }
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let (status, body) = match serde_json::to_vec(value) {
        Ok(body) => (status, body),
        Err(e) => {
            error!("❌ Failed to serialize response: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"error":"Response serialization failed"}"#.to_vec(),
            )
        }
    };
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn empty_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::HashEncoder;
    use crate::models::{EmbeddingConfig, EmbeddingService};
    use serde_json::Value;

    async fn ready_state() -> (ServerState, Arc<EmbeddingService>) {
        let mut embedding = EmbeddingConfig::new("hash-encoder");
        embedding.batch_size = 2;
        embedding.worker_threads = Some(2);
        let service = Arc::new(EmbeddingService::new(embedding.clone()));
        service
            .initialize_with_encoder(Arc::new(HashEncoder::new(6)))
            .await
            .unwrap();

        let config = ServerConfig {
            embedding,
            ..ServerConfig::default()
        };
        let state = ServerState {
            model: service.clone(),
            config: Arc::new(config),
        };
        (state, service)
    }

    fn uninitialized_state() -> ServerState {
        ServerState {
            model: Arc::new(EmbeddingService::new(EmbeddingConfig::default())),
            config: Arc::new(ServerConfig::default()),
        }
    }

    fn post(path: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().method(Method::GET).uri(path).body(Body::empty()).unwrap()
    }

    async fn send(req: Request<Body>, state: ServerState) -> (StatusCode, Value) {
        let response = handle_request(req, state).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body()).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_embed_single_query() {
        let (state, service) = ready_state().await;
        let (status, json) = send(post("/embed", r#"{"query": "hello world"}"#), state).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 1);
        assert_eq!(json["dimension"], 6);
        assert_eq!(json["embeddings"].as_array().unwrap().len(), 6);
        assert!(json["embeddings"][0].is_number());
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_embed_query_list_spanning_chunks() {
        let (state, service) = ready_state().await;
        let (status, json) =
            send(post("/embed", r#"{"query": ["one", "two", "three", "four", "five"]}"#), state).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 5);
        assert_eq!(json["embeddings"].as_array().unwrap().len(), 5);
        assert_eq!(json["embeddings"][4].as_array().unwrap().len(), 6);
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_endpoint() {
        let (state, service) = ready_state().await;
        let (status, json) = send(post("/embed/batch", r#"["a", "b", "c"]"#), state.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 3);

        let (status, json) = send(post("/embed/batch", "[]"), state).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "EMPTY_QUERY");
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let (state, service) = ready_state().await;

        let (status, json) = send(post("/embed", r#"{"query": []}"#), state.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "EMPTY_QUERY");

        let (status, json) = send(post("/embed", "not json"), state.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "INVALID_REQUEST");

        let (status, _) = send(get("/missing"), state).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_body_limit() {
        let (state, service) = ready_state().await;
        let mut config = (*state.config).clone();
        config.network.max_body_bytes = 16;
        let state = ServerState {
            config: Arc::new(config),
            ..state
        };

        let (status, json) = send(post("/embed", r#"{"query": "far too long for the limit"}"#), state).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json["code"], "BODY_TOO_LARGE");
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_health() {
        let (state, service) = ready_state().await;
        let (status, json) = send(get("/health"), state).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["device"], "cpu");
        assert_eq!(json["embedding_dimension"], 6);
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_uninitialized_service() {
        let (status, json) = send(get("/health"), uninitialized_state()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["code"], "MODEL_NOT_READY");

        let (status, json) = send(post("/embed", r#"{"query": "hello"}"#), uninitialized_state()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["code"], "MODEL_NOT_READY");
    }

    #[tokio::test]
    async fn test_inference_failure_is_internal_error() {
        let mut embedding = EmbeddingConfig::new("hash-encoder");
        embedding.worker_threads = Some(1);
        let service = Arc::new(EmbeddingService::new(embedding));
        service
            .initialize_with_encoder(Arc::new(HashEncoder::new(4).failing_on("boom")))
            .await
            .unwrap();
        let state = ServerState {
            model: service.clone(),
            config: Arc::new(ServerConfig::default()),
        };

        let (status, json) = send(post("/embed", r#"{"query": ["ok", "boom"]}"#), state).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["code"], "INTERNAL_ERROR");
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cors_and_options() {
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/embed")
            .header("origin", "http://localhost:3000")
            .body(Body::empty())
            .unwrap();
        let response = handle_request(req, uninitialized_state()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "http://localhost:3000"
        );
    }

    #[tokio::test]
    async fn test_root_info() {
        let (status, json) = send(get("/"), uninitialized_state()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["model"], "sentence-transformers/all-MiniLM-L6-v2");
        assert_eq!(json["endpoints"]["embed"]["path"], "/embed");
    }
}
