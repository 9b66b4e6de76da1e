//! Forward-auth endpoint for reverse proxies.
//!
//! nginx (`auth_request`) and Traefik (`ForwardAuth`) call `/verify` with the client's
//! `Authorization` header and describe the original request in `X-Forwarded-Uri` and
//! `X-Forwarded-Method`. A 2xx response admits the request; the proxy copies the subject and
//! roles headers upstream. Any other status is returned to the client as-is.

use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use tracing::{debug, instrument};

use crate::{
    AppState,
    auth::principal::Role,
    config::ForwardAuthConfig,
    errors::{Error, Result},
    gate::GateRequest,
};

/// Decide the request described by the forwarded headers.
#[instrument(skip_all)]
pub async fn verify(State(state): State<AppState>, method: Method, headers: HeaderMap) -> Result<Response> {
    let forward = &state.config.auth.forward_auth;

    let uri = forwarded_uri(&headers, forward)?;
    let method = match headers.get(forward.method_header.as_str()) {
        Some(value) => Method::from_bytes(value.as_bytes()).map_err(|_| Error::BadRequest {
            message: format!("Invalid {} header", forward.method_header),
        })?,
        None => method,
    };
    debug!("Verifying {} {}", method, uri.path());

    let admission = state.gate.evaluate(&GateRequest {
        path: uri.path(),
        method: &method,
        authorization: headers.get(AUTHORIZATION),
    })?;

    let mut response = StatusCode::OK.into_response();
    if let Some(principal) = admission.principal() {
        let roles = principal.roles().iter().map(Role::as_str).collect::<Vec<_>>().join(",");
        let response_headers = response.headers_mut();
        response_headers.insert(header_name(&forward.subject_header)?, header_value(principal.subject())?);
        response_headers.insert(header_name(&forward.roles_header)?, header_value(&roles)?);
    }
    Ok(response)
}

/// The original request URI. Only the path is used; the query string is ignored.
fn forwarded_uri(headers: &HeaderMap, forward: &ForwardAuthConfig) -> Result<Uri> {
    let value = headers.get(forward.uri_header.as_str()).ok_or_else(|| Error::BadRequest {
        message: format!("Missing {} header", forward.uri_header),
    })?;

    value
        .to_str()
        .ok()
        .and_then(|v| v.parse::<Uri>().ok())
        .filter(|uri| uri.path().starts_with('/'))
        .ok_or_else(|| Error::BadRequest {
            message: format!("Invalid {} header", forward.uri_header),
        })
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::try_from(name).map_err(|e| Error::Internal {
        operation: format!("build header name '{name}': {e}"),
    })
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| Error::Internal {
        operation: format!("build forward-auth response header: {e}"),
    })
}
