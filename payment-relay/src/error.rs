use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing signature")]
    MissingSignature,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid tx_ref: {0:?}")]
    InvalidTxRef(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("Verification request failed: {0}")]
    Transport(String),

    #[error("Verification returned HTTP {0}")]
    BadStatus(u16),

    #[error("Verification unsuccessful: {0}")]
    NotSuccessful(String),

    #[error("Verification tx_ref mismatch: expected {expected}, got {actual}")]
    RefMismatch { expected: String, actual: String },
}

impl VerifyError {
    /// Transport failures are worth a processor retry; everything else means
    /// the payment is not valid and retrying will not change that.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VerifyError::Transport(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Delivery request failed: {0}")]
    Transport(String),

    #[error("Consumer returned HTTP {0}")]
    BadStatus(u16),

    #[error("Consumer rejected delivery: {0}")]
    Rejected(String),

    #[error("Consumer answered with an HTML page")]
    Challenge,

    #[error("Failed to encode envelope: {0}")]
    Encode(String),
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Payment not found: {0}")]
    NotFound(String),

    #[error("Invalid queue key: {0:?}")]
    InvalidKey(String),

    #[error("Queue I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt queue record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{0} is required when {1}")]
    Required(&'static str, &'static str),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Request-boundary error: every failure a handler can surface.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Bad request: {0}")]
    BadRequest(&'static str),

    #[error("Not found: {0}")]
    NotFound(&'static str),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl RelayError {
    /// Status code and client-facing reason. Internals stay in the logs.
    pub fn status_and_reason(&self) -> (StatusCode, String) {
        match self {
            RelayError::Auth(AuthError::MissingSignature) => {
                (StatusCode::BAD_REQUEST, "Missing signature".into())
            }
            RelayError::Auth(AuthError::InvalidSignature) => {
                (StatusCode::FORBIDDEN, "Invalid signature".into())
            }
            RelayError::Auth(AuthError::MissingToken | AuthError::InvalidToken) => {
                (StatusCode::FORBIDDEN, "Unauthorized".into())
            }
            RelayError::Parse(ParseError::InvalidJson(_)) => {
                (StatusCode::BAD_REQUEST, "Invalid payload".into())
            }
            RelayError::Parse(ParseError::MissingField(field)) => {
                (StatusCode::BAD_REQUEST, format!("Missing {field}"))
            }
            RelayError::Parse(ParseError::InvalidTxRef(_)) => {
                (StatusCode::BAD_REQUEST, "Invalid tx_ref".into())
            }
            RelayError::Verify(e) if e.is_retryable() => {
                tracing::error!("{}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Verification failed".into())
            }
            RelayError::Verify(e) => {
                tracing::warn!("{}", e);
                (StatusCode::OK, "Verification unsuccessful".into())
            }
            RelayError::Delivery(e) => {
                tracing::error!("{}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Delivery failed".into())
            }
            RelayError::Queue(QueueError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "Payment not found".into())
            }
            RelayError::Queue(QueueError::InvalidKey(_)) => {
                (StatusCode::BAD_REQUEST, "Invalid tx_ref".into())
            }
            RelayError::Queue(e) => {
                tracing::error!("{}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
            RelayError::BadRequest(msg) => (StatusCode::BAD_REQUEST, (*msg).into()),
            RelayError::NotFound(msg) => (StatusCode::NOT_FOUND, (*msg).into()),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, error) = self.status_and_reason();
        (status, Json(ErrorResponse { error })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
