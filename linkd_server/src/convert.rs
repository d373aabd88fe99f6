//! Conversion helpers between the session state of linkd_core
//! and the JSON bodies of the HTTP surface.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use linkd_core::{ConnectionSnapshot, ManualReconnect, Phase, SendError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, warn};

const NO_QR: &str = "No QR available (maybe connected or connecting)";

/// `GET /status`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: Phase,
    pub qr: Option<String>,
    pub retry_count: u32,
}

impl From<ConnectionSnapshot> for StatusResponse {
    fn from(s: ConnectionSnapshot) -> Self {
        Self {
            status: s.phase,
            qr: s.pending_challenge,
            retry_count: s.retry_count,
        }
    }
}

/// `GET /qr`
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum QrResponse {
    Ready {
        success: bool,
        qr: String,
    },
    Missing {
        success: bool,
        message: &'static str,
        status: Phase,
    },
}

impl From<ConnectionSnapshot> for QrResponse {
    fn from(s: ConnectionSnapshot) -> Self {
        match s.pending_challenge {
            Some(qr) => QrResponse::Ready { success: true, qr },
            None => QrResponse::Missing {
                success: false,
                message: NO_QR,
                status: s.phase,
            },
        }
    }
}

/// `POST /connect`
#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub success: bool,
    pub message: &'static str,
}

impl From<ManualReconnect> for ConnectResponse {
    fn from(outcome: ManualReconnect) -> Self {
        Self {
            success: true,
            message: outcome.message(),
        }
    }
}

/// `POST /send` body.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub number: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub success: bool,
    pub data: Value,
}

/// `/send` failures, rendered as `{success:false, ...}` with a matching status.
#[derive(Debug)]
pub enum ApiError {
    /// The body did not deserialize into a [`SendRequest`].
    BadRequest(JsonRejection),
    Send(SendError),
}

impl From<SendError> for ApiError {
    fn from(e: SendError) -> Self {
        Self::Send(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(rejection) => {
                warn!("Rejected /send body: {}", rejection.body_text());
                (
                    rejection.status(),
                    Json(json!({ "success": false, "message": rejection.body_text() })),
                )
                    .into_response()
            }
            ApiError::Send(SendError::NotConnected) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "success": false, "message": "Session not connected" })),
            )
                .into_response(),
            ApiError::Send(SendError::Client(e)) => {
                error!("Error sending message: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "success": false, "error": e.to_string() })),
                )
                    .into_response()
            }
        }
    }
}
