//! HTTP surface for the registry.
//!
//! A thin axum layer marshaling JSON and octet-stream bodies onto the
//! ingestion state machine. All behavior lives in [`crate::ingest`]; the
//! handlers here only translate between the wire and the core operations.

pub mod routes_images;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use imagevault_common::Error;

use crate::config::Config;
use crate::ingest::IngestService;
use crate::policy::Principal;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub service: Arc<IngestService>,
    pub config: Arc<Config>,
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health_check))
        .nest("/v1", routes_images::image_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Bind and serve until interrupted.
pub async fn start_server(ctx: AppContext) -> Result<()> {
    let addr = format!(
        "{}:{}",
        ctx.config.server.host, ctx.config.server.port
    );
    let app = create_router(ctx);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Identity headers set by the fronting proxy.
pub(crate) fn principal_from_headers(headers: &HeaderMap) -> Principal {
    let owner = headers
        .get("x-identity-owner")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let is_admin = headers
        .get("x-identity-admin")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    Principal { owner, is_admin }
}

/// Error wrapper mapping the common taxonomy onto HTTP statuses.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self.0 {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            Error::Duplicate(_) | Error::Conflict(_) => {
                (StatusCode::CONFLICT, self.0.to_string())
            }
            Error::Forbidden(_) => (StatusCode::FORBIDDEN, self.0.to_string()),
            Error::Invalid(_) | Error::UnknownScheme(_) => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            Error::SizeLimitExceeded | Error::StorageFull => {
                (StatusCode::PAYLOAD_TOO_LARGE, self.0.to_string())
            }
            Error::StorageWriteDenied => {
                (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string())
            }
            Error::Io(_) | Error::Database(_) | Error::Internal(_) => {
                tracing::error!("Internal error: {}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
