//! Typed error taxonomy shared by every component.
//!
//! Every failure that crosses a public API boundary is normalized into a
//! [`GateError`] carrying `{message, code, status_code?, details?}`, mirroring
//! the façade's single error-mapping function (spec.md §7).

use serde::Serialize;
use std::fmt;

/// The kind of failure, used for programmatic dispatch and for the `code`
/// field surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateErrorKind {
    ApiError,
    NetworkError,
    Timeout,
    Canceled,
    ValidationError,
    ConfigError,
    AuthenticationError,
    AuthorizationError,
    AccessDenied,
    RateLimitError,
    DangerousArgs,
    SecurityError,
    ToolError,
    JwtSignError,
    JwtValidationError,
    InternalError,
}

impl fmt::Display for GateErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The crate's single error type. Never constructed directly outside this
/// module's helper constructors — use [`GateError::new`] or a `From` impl.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct GateError {
    pub kind: GateErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
    pub details: Option<serde_json::Value>,
}

impl GateError {
    pub fn new(kind: GateErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            details: None,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn code(&self) -> String {
        self.kind.to_string()
    }

    pub fn tool_error(message: impl Into<String>) -> Self {
        Self::new(GateErrorKind::ToolError, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(GateErrorKind::ValidationError, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(GateErrorKind::ConfigError, message)
    }

    pub fn canceled() -> Self {
        Self::new(GateErrorKind::Canceled, "operation was canceled")
    }

    pub fn rate_limited(limit: u64, window_ms: u64, time_left_ms: u64) -> Self {
        Self::new(GateErrorKind::RateLimitError, "rate limit exceeded").with_details(
            serde_json::json!({
                "limit": limit,
                "window": window_ms,
                "timeLeftMs": time_left_ms,
                "retryAfterSeconds": (time_left_ms + 999) / 1000,
            }),
        )
    }
}

impl From<reqwest::Error> for GateError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            GateErrorKind::Timeout
        } else if err.is_connect() || err.is_request() {
            GateErrorKind::NetworkError
        } else {
            GateErrorKind::ApiError
        };
        let status = err.status().map(|s| s.as_u16());
        let mut e = GateError::new(kind, err.to_string());
        if let Some(status) = status {
            e = e.with_status(status);
        }
        e
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        GateError::new(GateErrorKind::ValidationError, format!("JSON error: {err}"))
    }
}

impl From<jsonwebtoken::errors::Error> for GateError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        GateError::new(GateErrorKind::JwtValidationError, err.to_string())
    }
}

pub type GateResult<T> = Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_matches_kind() {
        let err = GateError::new(GateErrorKind::AccessDenied, "nope");
        assert_eq!(err.code(), "ACCESS_DENIED");
    }

    #[test]
    fn rate_limited_details() {
        let err = GateError::rate_limited(10, 60_000, 5_000);
        let details = err.details.unwrap();
        assert_eq!(details["limit"], 10);
        assert_eq!(details["retryAfterSeconds"], 5);
    }
}
