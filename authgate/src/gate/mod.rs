//! The per-request authentication and authorization gate.
//!
//! Every request passes through [`AuthGate::evaluate`] exactly once, before any handler runs:
//!
//! 0. Paths that are not in canonical form (dot segments, empty segments, encoded separators)
//!    are rejected with 400, so the path matched here is the path the upstream serves.
//! 1. Paths on the bypass list are admitted immediately. No token is read.
//! 2. The bearer token, if any, is taken from the `Authorization` header. A missing token is
//!    not an error by itself.
//! 3. A present token is verified. Any verification failure rejects the request with 401.
//! 4. The token subject is resolved to a [`Principal`] through the [`PrincipalLoader`]. An
//!    unknown subject rejects the request with 401.
//! 5. The [`Policy`] decides with the principal, or without one if no token was sent.
//!
//! The gate holds no per-request state and no session: each request is authenticated from its
//! own token. It is shared across tasks as `Arc<AuthGate>`.
//!
//! Two HTTP surfaces are built on it: [`middleware::auth_gate`] for routers served by this
//! process, and [`forward_auth::verify`] for reverse proxies that delegate the decision.

pub mod forward_auth;
pub mod middleware;

use axum::http::{HeaderValue, Method};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{Level, debug, event, instrument};

use crate::{
    auth::{
        principal::{Principal, PrincipalLoader},
        token::TokenVerifier,
    },
    config::Config,
    errors::{Error, Result},
    metrics::record_decision,
    policy::{BypassList, Decision, DenyReason, Policy},
};

const BEARER: &str = "bearer";

/// Percent-encodings of characters that change how a path splits into segments.
const ENCODED_SEPARATORS: [&str; 4] = ["%2f", "%2e", "%5c", "%25"];

/// Borrowed view of the parts of a request the gate looks at.
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    pub path: &'a str,
    pub method: &'a Method,
    /// Raw `Authorization` header value
    pub authorization: Option<&'a HeaderValue>,
}

/// An admitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Path is on the bypass list
    Bypassed,
    /// Allowed by a public rule without a token
    Anonymous,
    /// Allowed with a verified principal
    Authenticated(Principal),
}

impl Admission {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Admission::Authenticated(principal) => Some(principal),
            Admission::Bypassed | Admission::Anonymous => None,
        }
    }

    pub fn into_principal(self) -> Option<Principal> {
        match self {
            Admission::Authenticated(principal) => Some(principal),
            Admission::Bypassed | Admission::Anonymous => None,
        }
    }
}

pub struct AuthGate {
    bypass: BypassList,
    verifier: TokenVerifier,
    loader: Arc<dyn PrincipalLoader>,
    policy: Policy,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("bypass", &self.bypass)
            .field("verifier", &self.verifier)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl AuthGate {
    pub fn new(bypass: BypassList, verifier: TokenVerifier, loader: Arc<dyn PrincipalLoader>, policy: Policy) -> Self {
        Self {
            bypass,
            verifier,
            loader,
            policy,
        }
    }

    /// Build a gate from configuration, compiling the bypass list and policy.
    ///
    /// Fails with [`Error::PolicyMisconfigured`] if the rules or bypass patterns are invalid.
    pub fn from_config(config: &Config, loader: Arc<dyn PrincipalLoader>) -> Result<Self> {
        let bypass = BypassList::new(&config.bypass)?;
        let verifier = TokenVerifier::from_config(config)?;
        let policy = Policy::compile(&config.authorization.rules)?;
        Ok(Self::new(bypass, verifier, loader, policy))
    }

    /// Admit or reject a request against the current wall clock.
    pub fn evaluate(&self, request: &GateRequest<'_>) -> Result<Admission> {
        self.evaluate_at(request, Utc::now())
    }

    /// Admit or reject a request, checking token expiry against `now`.
    #[instrument(skip_all, fields(path = request.path, method = %request.method, subject = tracing::field::Empty))]
    pub fn evaluate_at(&self, request: &GateRequest<'_>, now: DateTime<Utc>) -> Result<Admission> {
        let result = self.decide(request, now);

        match &result {
            Ok(Admission::Bypassed) => {
                debug!("Bypassed");
                record_decision("bypassed");
            }
            Ok(admission) => {
                let subject = admission.principal().map(Principal::subject);
                event!(Level::DEBUG, subject, outcome = "allowed", "Request admitted");
                record_decision("allowed");
            }
            Err(e) => {
                event!(Level::INFO, outcome = e.reason(), "Request rejected: {e}");
                record_decision(e.reason());
            }
        }
        result
    }

    fn decide(&self, request: &GateRequest<'_>, now: DateTime<Utc>) -> Result<Admission> {
        ensure_canonical_path(request.path)?;

        if self.bypass.is_bypassed(request.path) {
            return Ok(Admission::Bypassed);
        }

        let principal = match bearer_token(request.authorization)? {
            Some(token) => {
                let claims = self.verifier.verify_at(token, now)?;
                tracing::Span::current().record("subject", claims.sub.as_str());
                Some(self.loader.load(&claims.sub)?)
            }
            None => None,
        };

        match self.policy.decide(request.path, request.method, principal.as_ref()) {
            Decision::Allow => Ok(principal.map_or(Admission::Anonymous, Admission::Authenticated)),
            Decision::Deny(DenyReason::Unauthenticated) => Err(Error::Unauthenticated),
            Decision::Deny(DenyReason::Forbidden) => Err(Error::Forbidden {
                subject: principal.map(|p| p.subject().to_string()).unwrap_or_default(),
                method: request.method.to_string(),
                path: request.path.to_string(),
            }),
        }
    }
}

/// Reject paths a proxy or server would rewrite before routing.
///
/// Rules match the literal path, so `/clientes/../produtos/5`, `//produtos/5` or
/// `/produtos%2F5` would otherwise be decided against a different rule than the one covering
/// the resource that is finally served. A single trailing slash is allowed.
fn ensure_canonical_path(path: &str) -> Result<()> {
    let reject = |why: &str| {
        Err(Error::BadRequest {
            message: format!("Rejected non-canonical path: {why}"),
        })
    };

    let Some(rest) = path.strip_prefix('/') else {
        return reject("must start with '/'");
    };
    if path.bytes().any(|b| b.is_ascii_control() || b == b'\\' || b == b';') {
        return reject("control character, backslash or path parameter");
    }
    let lower = path.to_ascii_lowercase();
    if ENCODED_SEPARATORS.iter().any(|encoded| lower.contains(encoded)) {
        return reject("encoded separator");
    }

    let segments: Vec<&str> = rest.split('/').collect();
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        match *segment {
            "." | ".." => return reject("dot segment"),
            // "/" itself and a trailing slash leave one empty final segment
            "" if i != last => return reject("empty segment"),
            _ => {}
        }
    }
    Ok(())
}

/// Extract the token from an `Authorization: Bearer <token>` header.
///
/// Other schemes count as no token. An empty bearer token or a header that is not visible
/// ASCII is malformed.
fn bearer_token(header: Option<&HeaderValue>) -> Result<Option<&str>> {
    let Some(header) = header else {
        return Ok(None);
    };
    let value = header.to_str().map_err(|_| Error::TokenMalformed)?;

    let value = value.trim();
    let (scheme, token) = value
        .split_once(|c: char| c.is_ascii_whitespace())
        .unwrap_or((value, ""));
    if !scheme.eq_ignore_ascii_case(BEARER) {
        return Ok(None);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(Error::TokenMalformed);
    }
    Ok(Some(token))
}
