use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::trace;

use crate::{
    errors::Error,
    gate::{AuthGate, GateRequest},
};

/// Run the gate for a request. On admission the principal, if any, is inserted into the
/// request extensions for [`CurrentPrincipal`](crate::auth::current_principal::CurrentPrincipal).
pub(crate) fn admit(gate: &AuthGate, mut request: Request) -> Result<Request, Error> {
    let admission = gate.evaluate(&GateRequest {
        path: request.uri().path(),
        method: request.method(),
        authorization: request.headers().get(AUTHORIZATION),
    })?;

    if let Some(principal) = admission.into_principal() {
        trace!("Attaching principal {}", principal.subject());
        request.extensions_mut().insert(principal);
    }
    Ok(request)
}

/// Middleware that authenticates and authorizes every request before it reaches a handler.
///
/// To run it before path matching, so unrouted paths are gated too, wrap the whole router:
///
/// ```ignore
/// let service = from_fn_with_state(gate, auth_gate).layer(router);
/// axum::serve(listener, service.into_make_service()).await?;
/// ```
pub async fn auth_gate(State(gate): State<Arc<AuthGate>>, request: Request, next: Next) -> Result<Response, Error> {
    let request = admit(&gate, request)?;
    Ok(next.run(request).await)
}
