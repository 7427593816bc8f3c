// Error types for the auth core
// Decision: One taxonomy for codec, handshake and authorizer failures
// Decision: Authorizer failures are always surfaced as 401; handshake failures keep their own status

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for auth operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur while issuing, verifying or authorizing
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token signature does not verify against the resolved secret
    #[error("token signature is invalid")]
    SignatureInvalid,

    /// Token is structurally broken, not yet valid, or carries bad claims
    #[error("malformed token: {0}")]
    Malformed(String),

    /// No token in cookie, header or query
    #[error("token not found in request")]
    TokenMissing,

    /// Anti-forgery header does not match anti-forgery cookie
    #[error("xsrf header does not match xsrf cookie")]
    XsrfMismatch,

    /// Audience is not in the allowed list
    #[error("audience {0:?} is not allowed")]
    AudienceRejected(String),

    /// Handshake tokens are never session credentials
    #[error("handshake token can't be used as a session credential")]
    HandshakeTokenRejected,

    /// Claims carry no user
    #[error("no user info presented in the claim")]
    NoUserInClaim,

    /// External validator rejected the user
    #[error("user {0} blocked by validator")]
    ValidatorRejected(String),

    /// User id prefix names a provider that is not registered
    #[error("provider of user {0} is not allowed")]
    ProviderNotAllowed(String),

    /// Provider lookup failed
    #[error("provider {0} not found")]
    ProviderNotFound(String),

    /// Provider name registered twice
    #[error("provider {0} is already registered")]
    DuplicateProvider(String),

    /// OAuth state missing, expired or different from the stored one
    #[error("oauth state mismatch: {0}")]
    NonceMismatch(String),

    /// Code exchange, user info fetch or revocation failed
    #[error("exchange failed: {0}")]
    ExchangeFailed(String),

    /// Soft-expired token could not be re-issued
    #[error("can't refresh token: {0}")]
    RefreshFailed(String),

    /// Basic auth or direct provider rejected the credentials
    #[error("credential check failed: {0}")]
    CredentialCheckFailed(String),

    /// Authenticated user lacks admin flag or an accepted role
    #[error("access denied for user {0}")]
    AccessDenied(String),

    /// Request is missing a required parameter
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Secret reader could not provide a signing key
    #[error("secret not available: {0}")]
    Secret(String),

    /// Configuration value is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Create a malformed token error
    pub fn malformed(msg: impl Into<String>) -> Self {
        AuthError::Malformed(msg.into())
    }

    /// Create an exchange error
    pub fn exchange(msg: impl Into<String>) -> Self {
        AuthError::ExchangeFailed(msg.into())
    }

    /// Create a bad request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        AuthError::BadRequest(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        AuthError::Config(msg.into())
    }

    /// HTTP status used when the error is returned outside the authorizer
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::SignatureInvalid
            | AuthError::Malformed(_)
            | AuthError::TokenMissing
            | AuthError::XsrfMismatch
            | AuthError::AudienceRejected(_)
            | AuthError::HandshakeTokenRejected
            | AuthError::NoUserInClaim
            | AuthError::ProviderNotAllowed(_)
            | AuthError::RefreshFailed(_)
            | AuthError::AccessDenied(_) => StatusCode::UNAUTHORIZED,
            AuthError::ValidatorRejected(_)
            | AuthError::NonceMismatch(_)
            | AuthError::CredentialCheckFailed(_) => StatusCode::FORBIDDEN,
            AuthError::ProviderNotFound(_) | AuthError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::ExchangeFailed(_) => StatusCode::BAD_GATEWAY,
            AuthError::DuplicateProvider(_)
            | AuthError::Secret(_)
            | AuthError::Config(_)
            | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the failure means the presented credential is stale or compromised
    /// and the session cookies should be dropped
    pub fn clears_session(&self) -> bool {
        matches!(
            self,
            AuthError::ValidatorRejected(_)
                | AuthError::ProviderNotAllowed(_)
                | AuthError::RefreshFailed(_)
        )
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "auth internal error");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
