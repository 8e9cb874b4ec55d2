//! HTTP surface: routes and the error-to-response boundary

use crate::error::{ErrorKind, GatewayError};
use crate::gateway::{ChatAnswer, GatewayHandler};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    kind: ErrorKind,
    message: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    detector: String,
    locale: String,
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Detection(_) | GatewayError::Anonymization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::UpstreamTransport { timed_out: true, .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamTransport { .. } | GatewayError::UpstreamApi { .. } => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind(),
                message: self.to_string(),
            },
        };
        (self.status_code(), Json(body)).into_response()
    }
}

pub fn router(handler: Arc<GatewayHandler>) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

async fn chat_handler(
    State(handler): State<Arc<GatewayHandler>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ChatAnswer>, GatewayError> {
    // the rejection text can quote the body, so it is not passed through
    let Json(body) = body.map_err(|rejection| {
        GatewayError::InvalidRequest(format!("body is not valid JSON ({})", rejection.status()))
    })?;
    let answer = handler.handle(body).await?;
    Ok(Json(answer))
}

async fn health_handler(State(handler): State<Arc<GatewayHandler>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        detector: handler.detector_name().to_string(),
        locale: handler.locale().to_string(),
    })
}

/// Binds `addr` and serves until the process stops.
pub async fn serve(addr: SocketAddr, handler: Arc<GatewayHandler>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(handler)).await?;
    Ok(())
}
