use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use linkd_core::SessionManager;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod config;
pub mod convert;

use convert::{ApiError, ConnectResponse, QrResponse, SendRequest, SendResponse, StatusResponse};

/// All routes of the control surface, backed by one session manager.
pub fn router(manager: SessionManager) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/qr", get(qr))
        .route("/connect", post(connect))
        .route("/send", post(send))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()) // allow browser calls
        .with_state(manager)
}

async fn status(State(manager): State<SessionManager>) -> Json<StatusResponse> {
    Json(manager.status().into())
}

async fn qr(State(manager): State<SessionManager>) -> Json<QrResponse> {
    Json(manager.status().into())
}

async fn connect(State(manager): State<SessionManager>) -> Json<ConnectResponse> {
    info!("Manual connect requested");
    Json(manager.request_connect().await.into())
}

async fn send(
    State(manager): State<SessionManager>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, ApiError> {
    let Json(req) = body?;
    let data = manager.send(&req.number, &req.message).await?;
    Ok(Json(SendResponse {
        success: true,
        data,
    }))
}
