//! JWT bearer token verification.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error as ThisError;

use crate::{
    config::{Config, TokenAlgorithm},
    errors::Error,
};

/// Claims carried by a bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user identifier)
    #[serde(default)]
    pub iat: i64, // Issued at
    pub exp: i64, // Expiration time
}

#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    BadSignature,
    #[error("token has expired")]
    Expired,
}

impl From<TokenAlgorithm> for Algorithm {
    fn from(alg: TokenAlgorithm) -> Self {
        match alg {
            TokenAlgorithm::HS256 => Algorithm::HS256,
            TokenAlgorithm::HS384 => Algorithm::HS384,
            TokenAlgorithm::HS512 => Algorithm::HS512,
        }
    }
}

/// Verifies HMAC-signed JWTs against a single signing key.
///
/// Holds no mutable state; a verifier is shared by every request for the lifetime of the
/// process.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
    leeway: Duration,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("algorithms", &self.validation.algorithms)
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    pub fn new(secret: &[u8], algorithm: Algorithm, leeway: Duration) -> Self {
        let mut validation = Validation::new(algorithm);
        // Expiry is checked in verify_at against an explicit instant
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["sub", "exp"]);

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
            leeway,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let secret_key = config.secret_key.as_ref().ok_or_else(|| Error::Internal {
            operation: "build token verifier: secret_key is required".to_string(),
        })?;
        let token = &config.auth.token;

        Ok(Self::new(secret_key.as_bytes(), token.algorithm.into(), token.expiry_leeway))
    }

    /// Verify a token against the current wall clock.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify a token's structure, then its signature, then its expiry relative to `now`.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        self.check_header(token)?;

        let token_data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::Crypto(_) => TokenError::BadSignature,

            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_)
            | ErrorKind::MissingRequiredClaim(_)
            | ErrorKind::MissingAlgorithm => TokenError::Malformed,

            // Claim validations other than expiry are disabled, anything else is unparseable
            _ => TokenError::Malformed,
        })?;

        let claims = token_data.claims;
        let leeway = i64::try_from(self.leeway.as_secs()).unwrap_or(i64::MAX);
        if now.timestamp() > claims.exp.saturating_add(leeway) {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    /// Check the JOSE header ahead of decoding.
    ///
    /// A well-formed token whose `alg` is not the configured algorithm (including `none`, which
    /// jsonwebtoken cannot represent) was not signed with our key, so it is a bad signature
    /// rather than a malformed token.
    fn check_header(&self, token: &str) -> Result<(), TokenError> {
        let mut parts = token.split('.');
        let (Some(header), Some(_), Some(_), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
            return Err(TokenError::Malformed);
        };

        let header = URL_SAFE_NO_PAD.decode(header).map_err(|_| TokenError::Malformed)?;
        let header: serde_json::Value = serde_json::from_slice(&header).map_err(|_| TokenError::Malformed)?;
        let alg = header.get("alg").and_then(serde_json::Value::as_str).ok_or(TokenError::Malformed)?;

        match alg.parse::<Algorithm>() {
            Ok(alg) if self.validation.algorithms.contains(&alg) => Ok(()),
            _ => Err(TokenError::BadSignature),
        }
    }
}
