//! # authgate: Stateless JWT Authentication and Role-Based Authorization
//!
//! `authgate` decides, for every inbound HTTP request, whether it may proceed. It verifies an
//! HMAC-signed bearer token, resolves the token's subject to a principal with its current roles,
//! and evaluates an ordered list of path rules. Nothing is kept between requests: there is no
//! session store, and every request is authenticated from its own token.
//!
//! ## Request Flow
//!
//! A request first meets the bypass list (API docs and other paths that are always open). If
//! not bypassed, the `Authorization: Bearer` token is verified for structure, signature and
//! expiry, in that order. The subject is looked up through a [`PrincipalLoader`], so role changes
//! take effect on the next request rather than when the token is reissued. Finally the
//! [`Policy`](policy::Policy) picks the first rule matching the path and method:
//!
//! - `public` rules admit anyone,
//! - `{ roles: [..] }` rules admit principals holding any of the listed roles,
//! - the mandatory catch-all `/**` rule admits any authenticated principal.
//!
//! Rejections are 401 (no, invalid or expired token, unknown subject) or 403 (missing role), with
//! a JSON body carrying only a reason code.
//!
//! ## Deployment
//!
//! The gate can sit in front of services in two ways:
//!
//! - **Embedded**: wrap an axum router with [`gate::middleware::auth_gate`]. Handlers read the
//!   principal with [`CurrentPrincipal`](auth::current_principal::CurrentPrincipal).
//! - **Standalone**: run the `authgate` binary behind nginx `auth_request` or Traefik
//!   `ForwardAuth`, pointing the proxy at `/verify`.
//!
//! ## Configuration
//!
//! See [`config`] for the YAML layout and `AUTHGATE_` environment overrides. The policy is
//! compiled at startup; a policy that could leave paths uncovered refuses to start.

use axum::{Router, routing::any, routing::get};
use bon::Builder;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info};

pub mod auth;
pub mod config;
pub mod errors;
pub mod gate;
pub mod identity;
pub mod metrics;
pub mod policy;
pub mod telemetry;
#[cfg(test)]
mod test_utils;

pub use auth::principal::{Principal, PrincipalLoader, Role};
pub use config::Config;
pub use gate::{Admission, AuthGate, GateRequest};
pub use identity::IdentityDirectory;

/// Shared state for the standalone server's handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .gate(gate)
///     .maybe_metrics_handle(handle)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub gate: Arc<AuthGate>,
    pub metrics_handle: Option<PrometheusHandle>,
}

/// Build the gate and the identity directory backing it from configuration.
///
/// Fails if the secret is missing or the authorization rules or bypass patterns do not compile.
pub fn build_gate(config: &Config) -> errors::Result<(Arc<AuthGate>, Arc<IdentityDirectory>)> {
    let directory = Arc::new(IdentityDirectory::from_config(config));
    let gate = AuthGate::from_config(config, directory.clone())?;
    Ok((Arc::new(gate), directory))
}

/// Routes of the standalone server.
///
/// - `GET /healthz` liveness probe
/// - `/verify` forward-auth decision endpoint, any method
/// - `GET /internal/metrics` Prometheus text, when a metrics handle is present
///
/// These routes are not themselves behind the gate.
pub fn build_router(state: &AppState) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/verify", any(gate::forward_auth::verify))
        .with_state(state.clone());

    if let Some(handle) = state.metrics_handle.clone() {
        router = router.route("/internal/metrics", get(move || std::future::ready(handle.render())));
    }

    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Compile the policy, load identities and build the router.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting authgate with configuration: {:#?}", config);

        let (gate, directory) = build_gate(&config)?;
        info!("Gate ready: {} identities", directory.len());

        let metrics_handle = config.enable_metrics.then(metrics::get_or_install_prometheus_handle);
        let state = AppState::builder()
            .config(config.clone())
            .gate(gate)
            .maybe_metrics_handle(metrics_handle)
            .build();
        let router = build_router(&state);

        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("authgate listening on http://{}", bind_addr);

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();
        Ok(())
    }
}
