//! Typed errors for fragment sources
//!
//! Lets the turn driver and the CLI tell common failure modes apart
//! (bad key, rate limiting, dropped connection) without string matching.

use thiserror::Error;

/// Fragment source errors
///
/// - `Unauthorized` (401) - API key invalid or expired
/// - `RateLimited` (429) - quota exceeded
/// - `BadRequest` (400) - malformed request
/// - `ServiceError` (5xx) - server-side issue
/// - `Network` - connection failure, timeout, broken stream
/// - `Other` - anything else
#[derive(Debug, Error)]
pub enum LlmError {
    /// API key is missing, expired or invalid (HTTP 401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Rate limit exceeded (HTTP 429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Malformed request (HTTP 400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Server-side error (HTTP 5xx)
    #[error("Service error: {0}")]
    ServiceError(String),

    /// Network connectivity issue or stream interruption
    #[error("Network error: {0}")]
    Network(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl LlmError {
    /// Convert HTTP status code and error text into typed LlmError
    pub fn from_http_status(status: reqwest::StatusCode, error_text: String) -> Self {
        match status.as_u16() {
            401 | 403 => LlmError::Unauthorized(error_text),
            429 => LlmError::RateLimited(error_text),
            400 => LlmError::BadRequest(error_text),
            500..=599 => LlmError::ServiceError(error_text),
            _ => LlmError::Other(anyhow::anyhow!("HTTP {}: {}", status, error_text)),
        }
    }

    /// Convert network/connection errors into typed LlmError
    pub fn from_network_error(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Network(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            LlmError::Network(format!("Connection failed: {}", e))
        } else if let Some(status) = e.status() {
            let error_text = e.to_string();
            Self::from_http_status(status, error_text)
        } else {
            LlmError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_http_status() {
        let err = LlmError::from_http_status(
            reqwest::StatusCode::UNAUTHORIZED,
            "API key not valid".to_string(),
        );
        assert!(matches!(err, LlmError::Unauthorized(_)));

        let err = LlmError::from_http_status(reqwest::StatusCode::FORBIDDEN, "denied".to_string());
        assert!(matches!(err, LlmError::Unauthorized(_)));

        let err = LlmError::from_http_status(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "Resource exhausted".to_string(),
        );
        assert!(matches!(err, LlmError::RateLimited(_)));

        let err =
            LlmError::from_http_status(reqwest::StatusCode::BAD_REQUEST, "Bad request".to_string());
        assert!(matches!(err, LlmError::BadRequest(_)));

        let err = LlmError::from_http_status(
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
            "overloaded".to_string(),
        );
        assert!(matches!(err, LlmError::ServiceError(_)));

        let err = LlmError::from_http_status(reqwest::StatusCode::IM_A_TEAPOT, "tea".to_string());
        assert!(matches!(err, LlmError::Other(_)));
    }

    #[test]
    fn test_error_display() {
        let err = LlmError::Unauthorized("API key not valid".to_string());
        assert_eq!(err.to_string(), "Unauthorized: API key not valid");

        let err = LlmError::Network("stream closed".to_string());
        assert_eq!(err.to_string(), "Network error: stream closed");
    }

    #[test]
    fn test_convert_to_anyhow() {
        let llm_err = LlmError::RateLimited("slow down".to_string());
        let anyhow_err: anyhow::Error = llm_err.into();
        assert!(anyhow_err.to_string().contains("Rate limited"));
    }
}
