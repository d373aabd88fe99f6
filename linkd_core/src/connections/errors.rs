use thiserror::Error;

/// A central error enum for session client failures.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The remote side rejected the request.
    #[error("remote error: {0}")]
    Remote(String),
    #[error("transport error: {0}")]
    Transport(String),
}
