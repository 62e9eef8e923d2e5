//! Error types and HTTP status mapping

use serde::Serialize;
use thiserror::Error;

/// Result type alias for login operations
pub type Result<T> = std::result::Result<T, ApiError>;

/// Login error with HTTP status code mapping
///
/// Verification kinds carry a reason that is safe to show to the caller.
/// Upstream and internal kinds carry detail that is only logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("malformed request body: {message}")]
    MalformedRequestBody { message: String },

    #[error("malformed token: {message}")]
    MalformedToken { message: String },

    #[error("unsupported signing algorithm '{algorithm}'")]
    UnsupportedAlgorithm { algorithm: String },

    #[error("unknown signing key: {message}")]
    UnknownKey { message: String },

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token has expired: {message}")]
    TokenExpired { message: String },

    #[error("token is not yet valid: {message}")]
    TokenNotYetValid { message: String },

    #[error("audience mismatch: {message}")]
    AudienceMismatch { message: String },

    #[error("issuer mismatch: {message}")]
    IssuerMismatch { message: String },

    #[error("upstream error: {message}")]
    UpstreamError { message: String },

    #[error("upstream timeout: {message}")]
    UpstreamTimeout { message: String },

    #[error("key set fetch failed: {message}")]
    KeySetFetchFailed { message: String },

    #[error("credential exchange backend unavailable: {message}")]
    ExchangeBackendUnavailable { message: String },

    #[error("credential exchange rejected: {message}")]
    ExchangeRejected { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn malformed_request_body(message: impl Into<String>) -> Self {
        Self::MalformedRequestBody {
            message: message.into(),
        }
    }

    pub fn malformed_token(message: impl Into<String>) -> Self {
        Self::MalformedToken {
            message: message.into(),
        }
    }

    pub fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }

    pub fn unknown_key(message: impl Into<String>) -> Self {
        Self::UnknownKey {
            message: message.into(),
        }
    }

    pub fn token_expired(message: impl Into<String>) -> Self {
        Self::TokenExpired {
            message: message.into(),
        }
    }

    pub fn token_not_yet_valid(message: impl Into<String>) -> Self {
        Self::TokenNotYetValid {
            message: message.into(),
        }
    }

    pub fn audience_mismatch(message: impl Into<String>) -> Self {
        Self::AudienceMismatch {
            message: message.into(),
        }
    }

    pub fn issuer_mismatch(message: impl Into<String>) -> Self {
        Self::IssuerMismatch {
            message: message.into(),
        }
    }

    pub fn upstream_error(message: impl Into<String>) -> Self {
        Self::UpstreamError {
            message: message.into(),
        }
    }

    pub fn upstream_timeout(message: impl Into<String>) -> Self {
        Self::UpstreamTimeout {
            message: message.into(),
        }
    }

    pub fn key_set_fetch_failed(message: impl Into<String>) -> Self {
        Self::KeySetFetchFailed {
            message: message.into(),
        }
    }

    pub fn exchange_unavailable(message: impl Into<String>) -> Self {
        Self::ExchangeBackendUnavailable {
            message: message.into(),
        }
    }

    pub fn exchange_rejected(message: impl Into<String>) -> Self {
        Self::ExchangeRejected {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for failures that mean "the token does not prove this identity"
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedAlgorithm { .. }
                | Self::UnknownKey { .. }
                | Self::InvalidSignature
                | Self::TokenExpired { .. }
                | Self::TokenNotYetValid { .. }
                | Self::AudienceMismatch { .. }
                | Self::IssuerMismatch { .. }
        )
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MalformedRequestBody { .. } => 400,
            Self::MalformedToken { .. } => 400,
            Self::UnsupportedAlgorithm { .. } => 401,
            Self::UnknownKey { .. } => 401,
            Self::InvalidSignature => 401,
            Self::TokenExpired { .. } => 401,
            Self::TokenNotYetValid { .. } => 401,
            Self::AudienceMismatch { .. } => 401,
            Self::IssuerMismatch { .. } => 401,
            Self::ExchangeRejected { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Internal { .. } => 500,
            Self::UpstreamError { .. } => 502,
            Self::KeySetFetchFailed { .. } => 502,
            Self::ExchangeBackendUnavailable { .. } => 502,
            Self::UpstreamTimeout { .. } => 504,
        }
    }

    /// Get the error key for this error
    pub fn error_key(&self) -> &'static str {
        match self {
            Self::MalformedRequestBody { .. } => "malformed_request_body",
            Self::MalformedToken { .. } => "malformed_token",
            Self::UnsupportedAlgorithm { .. } => "unsupported_algorithm",
            Self::UnknownKey { .. } => "unknown_key",
            Self::InvalidSignature => "invalid_signature",
            Self::TokenExpired { .. } => "token_expired",
            Self::TokenNotYetValid { .. } => "token_not_yet_valid",
            Self::AudienceMismatch { .. } => "audience_mismatch",
            Self::IssuerMismatch { .. } => "issuer_mismatch",
            Self::UpstreamError { .. } => "upstream_error",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::KeySetFetchFailed { .. } => "key_set_fetch_failed",
            Self::ExchangeBackendUnavailable { .. } => "exchange_backend_unavailable",
            Self::ExchangeRejected { .. } => "exchange_rejected",
            Self::NotFound { .. } => "not_found",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Reason shown to the caller. Upstream and internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::UpstreamError { .. } => "an upstream service failed".to_string(),
            Self::UpstreamTimeout { .. } => "an upstream service timed out".to_string(),
            Self::KeySetFetchFailed { .. } => {
                "identity provider signing keys are unavailable".to_string()
            }
            Self::ExchangeBackendUnavailable { .. } => {
                "credential exchange backend is unavailable".to_string()
            }
            Self::ExchangeRejected { .. } => {
                "credential exchange backend rejected the identity".to_string()
            }
            Self::Internal { .. } => "internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl From<&ApiError> for ErrorResponse {
    fn from(err: &ApiError) -> Self {
        Self {
            error: err.public_message(),
            code: err.error_key().to_string(),
        }
    }
}
