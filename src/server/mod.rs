//! HTTP transport for the pipeline.

pub mod protocol;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{PipelineError, StatusClass};
use crate::models::ServerConfig;
use crate::server::protocol::{ErrorBody, HealthBody, INTERNAL_ERROR, INVALID_INPUT, TIMED_OUT};
use crate::services::Pipeline;

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    request_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, request_timeout: Option<Duration>) -> Self {
        Self {
            pipeline,
            request_timeout,
        }
    }
}

/// Build the router with permissive CORS.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves; in-flight answers are drained.
pub async fn serve(
    pipeline: Arc<Pipeline>,
    config: &ServerConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(&config.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let state = AppState::new(pipeline, config.request_timeout_secs.map(Duration::from_secs));
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health_handler() -> Json<HealthBody> {
    Json(HealthBody::ok())
}

/// Cancel `token` once `timeout` elapses, unless it is cancelled first.
fn arm_deadline(token: &CancellationToken, timeout: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "request deadline elapsed");
                token.cancel();
            }
        }
    });
}

async fn chat_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let cancel = CancellationToken::new();
    if let Some(timeout) = state.request_timeout {
        arm_deadline(&cancel, timeout);
    }
    // Fires when the handler or the response body is dropped.
    let guard = cancel.clone().drop_guard();

    let answer = match state.pipeline.run_json(&body, &cancel).await {
        Ok(answer) => answer,
        Err(e) => return error_response(&e),
    };

    let chunks = answer.map(move |item| {
        let _keep = &guard;
        item.map(|chunk| Bytes::from(chunk.text))
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(chunks),
    )
        .into_response()
}

fn error_response(error: &PipelineError) -> Response {
    let (status, message) = match error.status_class() {
        StatusClass::Client => (StatusCode::BAD_REQUEST, INVALID_INPUT),
        StatusClass::Server => (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR),
        StatusClass::Cancelled => (StatusCode::GATEWAY_TIMEOUT, TIMED_OUT),
    };
    (status, Json(ErrorBody::new(message))).into_response()
}
