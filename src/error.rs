use axum::http::StatusCode;
use thiserror::Error;

/// Error taxonomy for the integration gateway.
///
/// Every variant maps to exactly one HTTP status so handlers never pick
/// status codes ad hoc. The sync endpoint is the one exception: orchestrator
/// failures are always surfaced as 500 regardless of the underlying variant,
/// since a failed sync run must be visible as a server-side failure.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing, invalid, revoked, or expired bearer token.
    #[error("{0}")]
    Auth(String),

    /// Valid token but the client is suspended or holds no matching grant.
    #[error("{0}")]
    Permission(String),

    /// Principal is inside a blocked rate-limit window.
    #[error("{0}")]
    RateLimited(String),

    /// Missing, inactive, or expired integration credential.
    #[error("{0}")]
    Credential(String),

    /// The external identity endpoint rejected a client-credentials exchange.
    #[error("token acquisition failed: {0}")]
    TokenAcquisition(String),

    /// Non-2xx or malformed response from the external POS platform.
    #[error("POS API error: {0}")]
    ExternalApi(String),

    /// Malformed request body or schedule configuration.
    #[error("{0}")]
    Validation(String),

    /// Resource absent downstream.
    #[error("{0}")]
    NotFound(String),

    /// Persistent store failure.
    #[error("store error: {0}")]
    Store(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Permission(_) => StatusCode::FORBIDDEN,
            GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Credential(_) => StatusCode::BAD_REQUEST,
            GatewayError::TokenAcquisition(_) => StatusCode::BAD_GATEWAY,
            GatewayError::ExternalApi(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
