use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::request::Parts,
};
use std::convert::Infallible;
use tracing::{instrument, trace};

use crate::{
    auth::principal::Principal,
    errors::{Error, Result},
};

/// The principal the gate attached to this request.
///
/// Only available behind [`auth_gate`](crate::gate::middleware::auth_gate). Requests admitted
/// without a principal (bypassed paths, public rules) are rejected with 401 by this extractor;
/// use `Option<CurrentPrincipal>` in handlers that serve both.
#[derive(Debug, Clone)]
pub struct CurrentPrincipal(pub Principal);

impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        match parts.extensions.get::<Principal>() {
            Some(principal) => {
                trace!("Found principal {}", principal.subject());
                Ok(CurrentPrincipal(principal.clone()))
            }
            None => Err(Error::Unauthenticated),
        }
    }
}

impl<S> OptionalFromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<Principal>().cloned().map(CurrentPrincipal))
    }
}
