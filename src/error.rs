//! The wire-facing error taxonomy (§7). Every component boundary returns
//! `CoreError` instead of an ad-hoc string so the set of codes that can reach
//! a client is closed and checked at compile time.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("session not found")]
    SessionNotFound,

    #[error("message processing error: {0}")]
    MessageProcessingError(String),

    #[error("invalid operation for the session's current state")]
    InvalidOperation,

    #[error("control message failed: {0}")]
    ControlMessageFailed(String),

    #[error("reset size failed: {0}")]
    ResetSizeFailed(String),

    #[error("connection limit reached")]
    ConnectionLimit,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("invalid message type")]
    InvalidMessageType,

    #[error("malformed frame")]
    MalformedFrame,
}

impl CoreError {
    /// The stable string code that appears on the wire, matching §7 exactly.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::SessionNotFound => "SESSION_NOT_FOUND",
            CoreError::MessageProcessingError(_) => "MESSAGE_PROCESSING_ERROR",
            CoreError::InvalidOperation => "INVALID_OPERATION",
            CoreError::ControlMessageFailed(_) => "CONTROL_MESSAGE_FAILED",
            CoreError::ResetSizeFailed(_) => "RESET_SIZE_FAILED",
            CoreError::ConnectionLimit => "CONNECTION_LIMIT",
            CoreError::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            CoreError::InvalidMessageType => "INVALID_MESSAGE_TYPE",
            CoreError::MalformedFrame => "MALFORMED_FRAME",
        }
    }
}

impl From<CoreError> for axum::http::StatusCode {
    fn from(err: CoreError) -> Self {
        use axum::http::StatusCode;
        match err {
            CoreError::SessionNotFound => StatusCode::NOT_FOUND,
            CoreError::InvalidOperation => StatusCode::BAD_REQUEST,
            CoreError::ConnectionLimit => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            CoreError::InvalidMessageType | CoreError::MalformedFrame => StatusCode::BAD_REQUEST,
            CoreError::MessageProcessingError(_)
            | CoreError::ControlMessageFailed(_)
            | CoreError::ResetSizeFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
