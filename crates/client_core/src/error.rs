use shared::error::{ApiError, ErrorBody, ErrorCode};
use thiserror::Error;

pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong.";

/// Failure taxonomy surfaced to views and dialogs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Client-side check that blocks submission.
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },
    /// Non-2xx response other than 401/403/404.
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    /// The request never reached the server.
    #[error("network error: {0}")]
    Network(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Missing, rejected or expired bearer token.
    #[error("authentication required: {0}")]
    Unauthorized(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Maps a non-success status and its raw body onto the taxonomy.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = ErrorBody::parse(body)
            .and_then(|parsed| parsed.message())
            .unwrap_or_default();
        match ErrorCode::from_status(status) {
            ErrorCode::Unauthorized | ErrorCode::Forbidden => Self::Unauthorized(if message.is_empty() {
                "Could not validate credentials".to_string()
            } else {
                message
            }),
            ErrorCode::NotFound => Self::NotFound(message),
            _ => Self::Server { status, message },
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::Validation { .. } => ErrorCode::Validation,
            ClientError::Server { status, .. } => ErrorCode::from_status(*status),
            ClientError::Network(_) => ErrorCode::Unavailable,
            ClientError::NotFound(_) => ErrorCode::NotFound,
            ClientError::Unauthorized(_) => ErrorCode::Unauthorized,
            ClientError::Decode(_) => ErrorCode::Internal,
        }
    }

    /// Text shown in a notice: the server-provided message when there is
    /// one, a generic message otherwise.
    pub fn user_message(&self) -> String {
        let message = match self {
            ClientError::Validation { message, .. }
            | ClientError::Server { message, .. }
            | ClientError::NotFound(message)
            | ClientError::Unauthorized(message) => message.as_str(),
            ClientError::Network(_) | ClientError::Decode(_) => "",
        };
        if message.trim().is_empty() {
            GENERIC_ERROR_MESSAGE.to_string()
        } else {
            message.to_string()
        }
    }

    pub fn requires_reauth(&self) -> bool {
        matches!(self, ClientError::Unauthorized(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ClientError::from_response(status.as_u16(), "")
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

impl From<ClientError> for ApiError {
    fn from(value: ClientError) -> Self {
        ApiError::new(value.code(), value.user_message())
    }
}
