//! Error taxonomy shared by every connector.
//!
//! [`ConnectorError`] is the only error type the runtime surfaces. The
//! classification helpers in this module are the single authority for
//! deciding whether a failure is retryable.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::http_client::{HttpError, HttpErrorKind};

/// Closed set of error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NetworkError,
    Timeout,
    AuthFailed,
    RateLimit,
    InvalidRequest,
    ServerError,
    ParsingError,
    ValidationError,
    Cancelled,
    Unsupported,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::AuthFailed => "AUTH_FAILED",
            Self::RateLimit => "RATE_LIMIT",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::ServerError => "SERVER_ERROR",
            Self::ParsingError => "PARSING_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Unsupported => "UNSUPPORTED",
        }
    }

    /// Retry eligibility is a property of the kind, never of the connector.
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::Timeout | Self::ServerError | Self::RateLimit
        )
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a failure originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorSource {
    Transport,
    Auth,
    RateLimit,
    Deserialize,
    UserHook,
    Application,
    Unknown,
}

impl ErrorSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Auth => "auth",
            Self::RateLimit => "rateLimit",
            Self::Deserialize => "deserialize",
            Self::UserHook => "userHook",
            Self::Application => "application",
            Self::Unknown => "unknown",
        }
    }
}

impl Display for ErrorSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error raised by every runtime operation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} ({code})")]
pub struct ConnectorError {
    message: String,
    code: ErrorCode,
    status_code: Option<u16>,
    retryable: bool,
    details: Option<Value>,
    request_id: Option<String>,
    origin: ErrorSource,
    retry_after: Option<Duration>,
}

impl ConnectorError {
    pub fn new(code: ErrorCode, source: ErrorSource, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            status_code: None,
            retryable: code.is_retryable(),
            details: None,
            request_id: None,
            origin: source,
            retry_after: None,
        }
    }

    /// Raised when a request method is used before `initialize`.
    pub fn not_initialized() -> Self {
        Self::new(
            ErrorCode::ValidationError,
            ErrorSource::Application,
            "connector is not initialized; call initialize() before sending requests",
        )
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, ErrorSource::Application, message)
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::Cancelled,
            ErrorSource::UserHook,
            format!("request aborted by hook: {}", reason.into()),
        )
    }

    pub fn parsing(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParsingError, ErrorSource::Deserialize, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthFailed, ErrorSource::Auth, message)
    }

    /// Classifies a non-2xx HTTP status into exactly one kind.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let (code, source) = match status {
            401 | 403 => (ErrorCode::AuthFailed, ErrorSource::Auth),
            408 => (ErrorCode::Timeout, ErrorSource::Transport),
            429 => (ErrorCode::RateLimit, ErrorSource::RateLimit),
            400..=499 => (ErrorCode::InvalidRequest, ErrorSource::Transport),
            500..=599 => (ErrorCode::ServerError, ErrorSource::Transport),
            _ => (ErrorCode::Unsupported, ErrorSource::Transport),
        };
        let mut error = Self::new(code, source, message);
        error.status_code = Some(status);
        error
    }

    /// Classifies a raw transport failure.
    pub fn from_http_error(error: &HttpError) -> Self {
        let code = match error.kind() {
            HttpErrorKind::Timeout => ErrorCode::Timeout,
            HttpErrorKind::Connect | HttpErrorKind::Other => ErrorCode::NetworkError,
        };
        Self::new(code, ErrorSource::Transport, error.message())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    pub const fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Named `origin` to stay clear of `std::error::Error::source`.
    pub const fn origin(&self) -> ErrorSource {
        self.origin
    }

    /// Server-provided `Retry-After` hint, if any.
    pub const fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(error: serde_json::Error) -> Self {
        Self::parsing(format!("failed to decode payload: {error}"))
    }
}

/// Failure reported by a user hook.
///
/// The pipeline converts it into a `userHook`-sourced [`ConnectorError`]
/// that is never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HookError {
    message: String,
    code: ErrorCode,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: ErrorCode::ValidationError,
        }
    }

    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = code;
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn into_connector_error(self, hook_name: &str) -> ConnectorError {
        let mut error = ConnectorError::new(
            self.code,
            ErrorSource::UserHook,
            format!("hook '{hook_name}' failed: {}", self.message),
        );
        error.retryable = false;
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_sets_kind_source_and_retryability() {
        let cases = [
            (401, ErrorCode::AuthFailed, ErrorSource::Auth, false),
            (403, ErrorCode::AuthFailed, ErrorSource::Auth, false),
            (404, ErrorCode::InvalidRequest, ErrorSource::Transport, false),
            (408, ErrorCode::Timeout, ErrorSource::Transport, true),
            (422, ErrorCode::InvalidRequest, ErrorSource::Transport, false),
            (429, ErrorCode::RateLimit, ErrorSource::RateLimit, true),
            (500, ErrorCode::ServerError, ErrorSource::Transport, true),
            (503, ErrorCode::ServerError, ErrorSource::Transport, true),
            (304, ErrorCode::Unsupported, ErrorSource::Transport, false),
        ];

        for (status, code, source, retryable) in cases {
            let error = ConnectorError::from_status(status, "upstream failure");
            assert_eq!(error.code(), code, "status {status}");
            assert_eq!(error.origin(), source, "status {status}");
            assert_eq!(error.retryable(), retryable, "status {status}");
            assert_eq!(error.status_code(), Some(status));
        }
    }

    #[test]
    fn transport_failures_are_retryable() {
        let timeout = ConnectorError::from_http_error(&HttpError::timeout("deadline elapsed"));
        assert_eq!(timeout.code(), ErrorCode::Timeout);
        assert!(timeout.retryable());

        let connect = ConnectorError::from_http_error(&HttpError::connect("refused"));
        assert_eq!(connect.code(), ErrorCode::NetworkError);
        assert!(connect.retryable());
        assert_eq!(connect.origin(), ErrorSource::Transport);
    }

    #[test]
    fn not_initialized_is_application_sourced_and_final() {
        let error = ConnectorError::not_initialized();
        assert_eq!(error.origin(), ErrorSource::Application);
        assert!(!error.retryable());
    }

    #[test]
    fn hook_errors_are_never_retryable() {
        let error = HookError::new("boom")
            .with_code(ErrorCode::ServerError)
            .into_connector_error("audit");

        assert_eq!(error.code(), ErrorCode::ServerError);
        assert_eq!(error.origin(), ErrorSource::UserHook);
        assert!(!error.retryable());
        assert!(error.message().contains("audit"));
    }

    #[test]
    fn codes_serialize_in_screaming_case() {
        let encoded = serde_json::to_string(&ErrorCode::RateLimit).expect("serialize");
        assert_eq!(encoded, "\"RATE_LIMIT\"");
        let source = serde_json::to_string(&ErrorSource::UserHook).expect("serialize");
        assert_eq!(source, "\"userHook\"");
    }
}
