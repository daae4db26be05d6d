//! HTTP server with the JSON API over the message store.

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{debug, info, instrument, warn};

use crate::{
    settings::{ServerConfig, Settings},
    store::{Message, MessageStore, StoreError},
};

/// Sender name attached to every automatic reply.
const AUTO_REPLY_SENDER: &str = "Server";

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MessageStore>,
    pub settings: Settings,
    started_at: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let store = Arc::new(MessageStore::new(settings.store.capacity));
        Self {
            store,
            settings,
            started_at: Instant::now(),
        }
    }
}

/// Request-level errors with fixed wire bodies.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing required fields: player_name and message")]
    MissingFields,
    #[error("Invalid timestamp format. Use ISO format (e.g., 2025-11-22T10:30:00)")]
    InvalidTimestamp,
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidTimestamp { .. } => ApiError::InvalidTimestamp,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            success: false,
            error: self.to_string(),
        });
        (StatusCode::BAD_REQUEST, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

/// Send request body
#[derive(Debug, Deserialize)]
struct SendRequest {
    player_name: Option<String>,
    message: Option<String>,
}

/// Send response: the stored message plus the generated auto-reply
#[derive(Serialize)]
struct SendResponse {
    success: bool,
    message: Message,
    auto_reply: Message,
}

/// Query parameters accepted by the listing endpoints
#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<i64>,
    since: Option<String>,
}

#[derive(Serialize)]
struct MessagesResponse {
    success: bool,
    count: usize,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct SenderMessagesResponse {
    success: bool,
    player_name: String,
    count: usize,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct ClearResponse {
    success: bool,
    message: &'static str,
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    message_count: usize,
}

/// Create the HTTP router with all endpoints and middleware layers
pub fn create_router(state: AppState) -> Router {
    let cors_layer = create_cors_layer(&state.settings.server);
    let body_limit = DefaultBodyLimit::max(state.settings.server.max_request_size_mb * 1024 * 1024);

    let mut app = Router::new()
        .route("/api", get(api_info))
        .route("/api/send", post(send_message))
        .route("/api/messages", get(list_messages))
        .route("/api/messages/:player_name", get(list_sender_messages))
        .route("/api/clear", post(clear_messages))
        .route("/health", get(health_check));

    // The bundled exercise page, when present.
    let static_dir = &state.settings.server.static_dir;
    if static_dir.is_dir() {
        app = app.fallback_service(ServeDir::new(static_dir));
    } else {
        debug!("static directory {:?} not found, no static fallback", static_dir);
    }

    app.with_state(state)
        .layer(middleware::from_fn(error_logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .layer(body_limit)
}

/// Service and endpoint descriptor
async fn api_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "online",
        "server": "Message Relay Server",
        "endpoints": {
            "POST /api/send": "Send a message",
            "GET /api/messages": "Get all messages",
            "GET /api/messages/<player_name>": "Get messages for a specific sender",
            "POST /api/clear": "Clear all messages",
        }
    }))
}

/// Append a message and the generated auto-reply
#[instrument(skip(state, body))]
async fn send_message(
    State(state): State<AppState>,
    body: Option<Json<SendRequest>>,
) -> Result<(StatusCode, Json<SendResponse>), ApiError> {
    let Some(Json(request)) = body else {
        return Err(ApiError::MissingFields);
    };
    let (Some(player_name), Some(text)) = (request.player_name, request.message) else {
        return Err(ApiError::MissingFields);
    };

    let message = state.store.append(&player_name, &text, false);
    let auto_reply = state
        .store
        .append(AUTO_REPLY_SENDER, &format!("Hello {player_name}!"), true);

    info!("relayed message {} from {:?}", message.id, message.sender);
    Ok((
        StatusCode::CREATED,
        Json(SendResponse {
            success: true,
            message,
            auto_reply,
        }),
    ))
}

/// List all messages, optionally time-filtered and truncated
#[instrument(skip(state))]
async fn list_messages(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let messages = state.store.list_all(params.since.as_deref(), params.limit)?;
    Ok(Json(MessagesResponse {
        success: true,
        count: messages.len(),
        messages,
    }))
}

/// List messages from one sender, matched case-insensitively
#[instrument(skip(state))]
async fn list_sender_messages(
    State(state): State<AppState>,
    Path(player_name): Path<String>,
    Query(params): Query<ListParams>,
) -> Json<SenderMessagesResponse> {
    let messages = state.store.list_by_sender(&player_name, params.limit);
    Json(SenderMessagesResponse {
        success: true,
        // Echo the name as queried, not normalized.
        player_name,
        count: messages.len(),
        messages,
    })
}

/// Drop all messages and reset ids
#[instrument(skip(state))]
async fn clear_messages(State(state): State<AppState>) -> Json<ClearResponse> {
    state.store.clear();
    Json(ClearResponse {
        success: true,
        message: "All messages cleared",
    })
}

/// Health check endpoint
#[instrument(skip(state))]
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        message_count: state.store.len(),
    })
}

/// Log error responses
async fn error_logging_middleware(
    request: axum::extract::Request,
    next: middleware::Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    if response.status().is_client_error() || response.status().is_server_error() {
        warn!("error response: {} {} - status {}", method, uri, response.status());
    }

    response
}

/// Create CORS layer from server configuration
fn create_cors_layer(config: &ServerConfig) -> CorsLayer {
    if !config.enable_cors {
        return CorsLayer::new();
    }

    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    if config.cors_origins.iter().any(|origin| origin == "*") {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        cors = cors.allow_origin(AllowOrigin::list(origins));
    }

    cors
}

/// Start the HTTP server and wait for a shutdown signal
pub async fn serve(settings: Settings) -> Result<()> {
    let host: IpAddr = settings
        .server
        .host
        .parse()
        .with_context(|| format!("invalid server host {:?}", settings.server.host))?;
    let addr = SocketAddr::new(host, settings.server.port);

    let state = AppState::new(settings);
    let app = create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("HTTP server error")?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down gracefully");
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down gracefully");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down gracefully");
        }
    }
}
