use crate::auth::token::TokenError;
use axum::{
    http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Bearer token could not be split and decoded into header, claims and signature
    #[error("Bearer token is malformed")]
    TokenMalformed,

    /// Bearer token signature does not match the configured key or algorithm
    #[error("Bearer token signature is invalid")]
    TokenBadSignature,

    /// Bearer token expiry is in the past
    #[error("Bearer token has expired")]
    TokenExpired,

    /// Token verified but its subject is unknown to the identity store
    #[error("Principal {subject} not found")]
    PrincipalNotFound { subject: String },

    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated,

    /// Principal present but none of its roles satisfy the matched rule
    #[error("Principal {subject} lacks the role required for {method} {path}")]
    Forbidden { subject: String, method: String, path: String },

    /// Authorization rules cannot be compiled into a safe policy. Fatal at startup.
    #[error("Policy misconfigured: {reason}")]
    PolicyMisconfigured { reason: String },

    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::TokenMalformed
            | Error::TokenBadSignature
            | Error::TokenExpired
            | Error::PrincipalNotFound { .. }
            | Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::PolicyMisconfigured { .. } | Error::Internal { .. } | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable reason code. This is the only error detail sent to clients.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::TokenMalformed => "token_malformed",
            Error::TokenBadSignature => "token_bad_signature",
            Error::TokenExpired => "token_expired",
            Error::PrincipalNotFound { .. } => "principal_not_found",
            Error::Unauthenticated => "unauthenticated",
            Error::Forbidden { .. } => "forbidden",
            Error::PolicyMisconfigured { .. } => "policy_misconfigured",
            Error::BadRequest { .. } => "bad_request",
            Error::Internal { .. } | Error::Other(_) => "internal_error",
        }
    }

    fn is_token_error(&self) -> bool {
        matches!(self, Error::TokenMalformed | Error::TokenBadSignature | Error::TokenExpired)
    }

    /// `WWW-Authenticate` challenge for 401 responses (RFC 6750)
    fn challenge(&self) -> Option<HeaderValue> {
        if self.status_code() != StatusCode::UNAUTHORIZED {
            return None;
        }
        let value = if self.is_token_error() {
            HeaderValue::from_static(r#"Bearer error="invalid_token""#)
        } else {
            HeaderValue::from_static("Bearer")
        };
        Some(value)
    }
}

impl From<TokenError> for Error {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Malformed => Error::TokenMalformed,
            TokenError::BadSignature => Error::TokenBadSignature,
            TokenError::Expired => Error::TokenExpired,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::PolicyMisconfigured { .. } | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::BadRequest { .. } => {
                tracing::debug!("Client error: {}", self);
            }
            _ => {
                tracing::info!("Authorization error: {}", self);
            }
        }

        let status = self.status_code();
        let body = axum::response::Json(json!({ "error": self.reason() }));
        match self.challenge() {
            Some(challenge) => (status, [(WWW_AUTHENTICATE, challenge)], body).into_response(),
            None => (status, body).into_response(),
        }
    }
}

/// Type alias for gate operation results
pub type Result<T> = std::result::Result<T, Error>;
