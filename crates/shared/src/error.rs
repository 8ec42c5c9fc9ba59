use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    Unavailable,
    Internal,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorCode::Unauthorized,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            400 | 409 | 413 | 415 | 422 => ErrorCode::Validation,
            502..=504 => ErrorCode::Unavailable,
            _ => ErrorCode::Internal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error payload returned by the backend on non-2xx responses.
///
/// `detail` is a plain message for handled errors and a list of field
/// issues for request validation failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Message(String),
    Issues(Vec<ValidationIssue>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    #[serde(default)]
    pub loc: Vec<serde_json::Value>,
    pub msg: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ErrorBody {
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    /// First human-readable message carried by the body, if any.
    pub fn message(&self) -> Option<String> {
        match &self.detail {
            ErrorDetail::Message(message) if !message.trim().is_empty() => {
                Some(message.trim().to_string())
            }
            ErrorDetail::Message(_) => None,
            ErrorDetail::Issues(issues) => issues.first().map(|issue| issue.msg.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_codes() {
        assert_eq!(ErrorCode::from_status(401), ErrorCode::Unauthorized);
        assert_eq!(ErrorCode::from_status(403), ErrorCode::Forbidden);
        assert_eq!(ErrorCode::from_status(404), ErrorCode::NotFound);
        assert_eq!(ErrorCode::from_status(422), ErrorCode::Validation);
        assert_eq!(ErrorCode::from_status(503), ErrorCode::Unavailable);
        assert_eq!(ErrorCode::from_status(500), ErrorCode::Internal);
    }

    #[test]
    fn detail_message_and_issue_list_both_parse() {
        let plain = ErrorBody::parse(r#"{"detail":"Collection not found"}"#).expect("parse");
        assert_eq!(plain.message().as_deref(), Some("Collection not found"));

        let issues = ErrorBody::parse(
            r#"{"detail":[{"loc":["body","name"],"msg":"Field required","type":"missing"}]}"#,
        )
        .expect("parse");
        assert_eq!(issues.message().as_deref(), Some("Field required"));

        assert!(ErrorBody::parse("<html>Bad Gateway</html>").is_none());
        let blank = ErrorBody::parse(r#"{"detail":"  "}"#).expect("parse");
        assert_eq!(blank.message(), None);
    }
}
