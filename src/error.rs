//! Error taxonomy shared by every layer of the router.
//!
//! Every failure a caller can observe is an [`AIError`]; its [`ErrorCode`] is the
//! stable, serializable classification used in events and by callers deciding
//! whether to retry.

use crate::llm::types::ProviderType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes reported to callers and observability sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ProviderError,
    RateLimitExceeded,
    ContextLengthExceeded,
    Timeout,
    CircuitOpen,
    NoAvailableProviders,
    SafetyViolation,
    AuthenticationError,
    InvalidRequest,
    StorageError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ProviderError => "PROVIDER_ERROR",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::ContextLengthExceeded => "CONTEXT_LENGTH_EXCEEDED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::NoAvailableProviders => "NO_AVAILABLE_PROVIDERS",
            ErrorCode::SafetyViolation => "SAFETY_VIOLATION",
            ErrorCode::AuthenticationError => "AUTHENTICATION_ERROR",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::StorageError => "STORAGE_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AIError {
    #[error("Provider {provider} failed: {message}")]
    Provider {
        provider: ProviderType,
        message: String,
        status: Option<u16>,
    },
    #[error("Rate limit exceeded for {provider}: {message}")]
    RateLimitExceeded {
        provider: ProviderType,
        message: String,
        reset_time: Option<DateTime<Utc>>,
    },
    #[error("Context too large: {current} > {max}")]
    ContextLengthExceeded { current: u64, max: u64 },
    #[error("Timed out after {timeout_ms}ms")]
    Timeout {
        provider: Option<ProviderType>,
        timeout_ms: u64,
    },
    #[error("Circuit breaker is open for {0}")]
    CircuitOpen(ProviderType),
    #[error("No available providers: {0}")]
    NoAvailableProviders(String),
    #[error("Stream from {provider} interrupted after {delivered_chars} chars: {message}")]
    StreamInterrupted {
        provider: ProviderType,
        delivered_chars: usize,
        message: String,
    },
    #[error("Safety violation ({category}): {reason}")]
    SafetyViolation { category: String, reason: String },
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Memory store error: {0}")]
    Storage(String),
}

impl AIError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AIError::Provider { .. } | AIError::StreamInterrupted { .. } => ErrorCode::ProviderError,
            AIError::RateLimitExceeded { .. } => ErrorCode::RateLimitExceeded,
            AIError::ContextLengthExceeded { .. } => ErrorCode::ContextLengthExceeded,
            AIError::Timeout { .. } => ErrorCode::Timeout,
            AIError::CircuitOpen(_) => ErrorCode::CircuitOpen,
            AIError::NoAvailableProviders(_) => ErrorCode::NoAvailableProviders,
            AIError::SafetyViolation { .. } => ErrorCode::SafetyViolation,
            AIError::Authentication(_) => ErrorCode::AuthenticationError,
            AIError::InvalidRequest(_) | AIError::Configuration(_) => ErrorCode::InvalidRequest,
            AIError::Storage(_) => ErrorCode::StorageError,
        }
    }

    /// Whether the same provider may be tried again after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AIError::Provider { .. } | AIError::Timeout { .. })
    }

    /// Whether the orchestrator may move on to a different provider/model.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            AIError::Provider { .. }
                | AIError::RateLimitExceeded { .. }
                | AIError::ContextLengthExceeded { .. }
                | AIError::Timeout { .. }
                | AIError::CircuitOpen(_)
        )
    }

    /// Whether the other models of the same provider are unlikely to do better.
    ///
    /// Context overflows depend on the model and leave the provider's other
    /// models in play.
    pub fn rules_out_provider(&self) -> bool {
        matches!(
            self,
            AIError::Provider { .. }
                | AIError::RateLimitExceeded { .. }
                | AIError::Timeout { .. }
                | AIError::CircuitOpen(_)
        )
    }

    /// Whether the failure says something about the backend's health.
    ///
    /// Context overflows and local guards are request-scoped and must not trip the
    /// circuit breaker.
    pub fn counts_against_provider(&self) -> bool {
        matches!(
            self,
            AIError::Provider { .. } | AIError::Timeout { .. } | AIError::StreamInterrupted { .. }
        )
    }
}

/// Serializable projection of an error, carried by events and execution results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&AIError> for ErrorInfo {
    fn from(error: &AIError) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AIError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_taxonomy() {
        let err = AIError::CircuitOpen(ProviderType::OpenAI);
        assert_eq!(err.code(), ErrorCode::CircuitOpen);
        assert_eq!(err.code().as_str(), "CIRCUIT_OPEN");
        assert_eq!(
            AIError::Configuration("bad".into()).code(),
            ErrorCode::InvalidRequest
        );
    }

    #[test]
    fn test_fatal_errors_do_not_fall_back() {
        assert!(!AIError::Authentication("nope".into()).allows_fallback());
        assert!(!AIError::InvalidRequest("nope".into()).allows_fallback());
        assert!(
            !AIError::SafetyViolation {
                category: "prompt_injection".into(),
                reason: "x".into()
            }
            .allows_fallback()
        );
    }

    #[test]
    fn test_context_overflow_falls_back_without_retry() {
        let err = AIError::ContextLengthExceeded {
            current: 10,
            max: 5,
        };
        assert!(err.allows_fallback());
        assert!(!err.is_retryable());
        assert!(!err.counts_against_provider());
    }

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::NoAvailableProviders).unwrap();
        assert_eq!(json, "\"NO_AVAILABLE_PROVIDERS\"");
    }
}
