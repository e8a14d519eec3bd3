use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::logging::SharedLogger;
use crate::proxy;
use crate::translate::anthropic_types::{MessagesRequest, StreamEvent};
use crate::upstream::UpstreamClient;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub config: ProxyConfig,
    pub upstream: UpstreamClient,
    pub logger: SharedLogger,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: ProxyConfig, logger: SharedLogger) -> Result<Self> {
        let upstream = UpstreamClient::new(&config)?;
        Ok(Self {
            config,
            upstream,
            logger,
            started_at: Utc::now(),
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.config.max_request_bytes;

    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/health", get(handle_health))
        .route("/", get(handle_root))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(middleware::map_response_with_state(
            state.clone(),
            render_oversized_body,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            let err = ProxyError::validation(format!("Invalid request body: {e}"));
            state.logger.error(err.to_string());
            return err.into_response();
        }
    };

    if req.is_streaming() {
        handle_streaming(&state, &req).await
    } else {
        handle_non_streaming(&state, &req).await
    }
}

async fn handle_non_streaming(state: &AppState, req: &MessagesRequest) -> Response {
    match proxy::proxy_non_streaming(req, &state.config, &state.upstream, &state.logger).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_streaming(state: &AppState, req: &MessagesRequest) -> Response {
    let events =
        match proxy::proxy_streaming(req, &state.config, &state.upstream, &state.logger).await {
            Ok(s) => s,
            Err(e) => return e.into_response(),
        };

    let sse_stream = events.map(|event| Ok::<_, Infallible>(to_sse_event(&event)));

    Sse::new(sse_stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Replace the plain-text 413 produced by the body limit with an Anthropic error envelope.
async fn render_oversized_body(State(state): State<Arc<AppState>>, response: Response) -> Response {
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .is_some_and(|v| v.as_bytes().starts_with(b"application/json"));
    if response.status() != StatusCode::PAYLOAD_TOO_LARGE || is_json {
        return response;
    }

    let err = ProxyError::PayloadTooLarge {
        limit: state.config.max_request_bytes,
    };
    state.logger.error(err.to_string());
    err.into_response()
}

fn to_sse_event(event: &StreamEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().event(event.event_name()).data(json),
        Err(e) => Event::default().event("error").data(
            serde_json::json!({
                "type": "error",
                "error": { "type": "api_error", "message": e.to_string() },
            })
            .to_string(),
        ),
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn handle_root(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "provider": state.config.provider_name(),
        "model": state.config.provider.model,
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at.to_rfc3339(),
    }))
}

