use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    TransportFailure,
    RemoteError,
    Closed,
    IoError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error_code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{}: {} ({})", self.error_code, self.message, details),
            None => write!(f, "{}: {}", self.error_code, self.message),
        }
    }
}

#[derive(Debug, Error)]
pub enum BindError {
    #[error("{0}")]
    Api(ApiError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Timeout")]
    Timeout,
}

impl From<ApiError> for BindError {
    fn from(value: ApiError) -> Self {
        Self::Api(value)
    }
}

impl BindError {
    /// Error code used when reporting this error to the host or over the wire.
    pub fn code(&self) -> ErrorCode {
        match self {
            BindError::Api(api) => api.error_code.clone(),
            BindError::Io(_) => ErrorCode::IoError,
            BindError::Json(_) => ErrorCode::InvalidArgument,
            BindError::Timeout => ErrorCode::TransportFailure,
        }
    }
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::TransportFailure => "TRANSPORT_FAILURE",
            ErrorCode::RemoteError => "REMOTE_ERROR",
            ErrorCode::Closed => "CLOSED",
            ErrorCode::IoError => "IO_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type BindResult<T> = Result<T, BindError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_serializes_screaming_snake_case() {
        let value = serde_json::to_string(&ErrorCode::TransportFailure).expect("serialize");
        assert_eq!(value, "\"TRANSPORT_FAILURE\"");
        let parsed: ErrorCode = serde_json::from_str("\"NOT_FOUND\"").expect("parse");
        assert_eq!(parsed, ErrorCode::NotFound);
    }

    #[test]
    fn timeout_reports_transport_failure() {
        assert_eq!(BindError::Timeout.code(), ErrorCode::TransportFailure);
    }

    #[test]
    fn api_error_display_includes_details() {
        let err = ApiError::new(ErrorCode::Closed, "Backend closed").with_details("eof");
        assert_eq!(err.to_string(), "CLOSED: Backend closed (eof)");
    }
}
