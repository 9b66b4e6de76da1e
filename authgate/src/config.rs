//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `AUTHGATE_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `AUTHGATE_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `AUTHGATE_AUTH__TOKEN__EXPIRY_LEEWAY=30s` sets the `auth.token.expiry_leeway` field.
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port`
//! - **Signing key**: `secret_key` - HMAC secret shared with the token issuer
//! - **Authentication**: `auth.token`, `auth.password`, `auth.principal_cache`, `auth.forward_auth`
//! - **Bypass list**: `bypass` - paths exempted from the gate entirely
//! - **Authorization**: `authorization.rules` - ordered, first match wins
//! - **Identities**: `identities` - subjects, Argon2 password digests and roles
//! - **Observability**: `log_format`, `enable_metrics`, `enable_otel_export`
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! AUTHGATE_PORT=8080
//! AUTHGATE_SECRET_KEY="$(cat /run/secrets/jwt-signing-key)"
//! AUTHGATE_AUTH__PRINCIPAL_CACHE__ENABLED=false
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, time::Duration};

use crate::auth::password::{Argon2Params, CredentialHasher};
use crate::auth::principal::Role;
use crate::errors::Error;
use crate::policy::Access;

/// Minimum HMAC secret length in bytes (HS256 key size)
const MIN_SECRET_KEY_BYTES: usize = 32;

/// CLI args
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "AUTHGATE_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and authorization policy, then exit without starting the server.
    #[arg(long)]
    pub validate: bool,

    /// Read a password from stdin, print its Argon2 digest for the `identities` section, and exit.
    #[arg(long, conflicts_with = "validate")]
    pub hash_password: bool,
}

/// Main application configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// HMAC secret the token issuer signs with (required)
    pub secret_key: Option<String>,
    /// Console log format
    pub log_format: LogFormat,
    /// Expose Prometheus metrics at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    /// Authentication settings
    pub auth: AuthConfig,
    /// Ant-style path patterns exempted from the gate. Checked before any token handling.
    pub bypass: Vec<String>,
    /// Ordered authorization rules
    pub authorization: AuthorizationConfig,
    /// Identities served by the bundled identity directory
    pub identities: Vec<IdentityConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub token: TokenConfig,
    pub password: PasswordConfig,
    pub principal_cache: PrincipalCacheConfig,
    pub forward_auth: ForwardAuthConfig,
}

/// HMAC algorithms accepted for bearer tokens.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum TokenAlgorithm {
    #[default]
    HS256,
    HS384,
    HS512,
}

/// Bearer token verification settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokenConfig {
    /// Signature algorithm tokens must use
    pub algorithm: TokenAlgorithm,
    /// Tolerance added to a token's expiry before it is rejected
    #[serde(with = "humantime_serde")]
    pub expiry_leeway: Duration,
}

/// Password hashing parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PasswordConfig {
    /// Argon2 memory cost in KiB (default: 19456 KiB = 19 MB, secure for production)
    pub argon2_memory_kib: u32,
    /// Argon2 iterations (default: 2, secure for production)
    pub argon2_iterations: u32,
    /// Argon2 parallelism (default: 1)
    pub argon2_parallelism: u32,
}

impl PasswordConfig {
    pub fn argon2_params(&self) -> Argon2Params {
        Argon2Params {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }
}

/// Read-through cache in front of the identity directory.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrincipalCacheConfig {
    pub enabled: bool,
    /// How long a cached principal is served before it is reloaded
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Maximum number of cached principals
    pub max_capacity: u64,
}

/// Header names used by the `/verify` forward-auth endpoint.
///
/// Reverse proxies (nginx `auth_request`, Traefik ForwardAuth) send the original request's
/// URI and method in headers, and copy the subject/roles response headers upstream on success.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForwardAuthConfig {
    /// Request header carrying the original URI (path and optional query)
    pub uri_header: String,
    /// Request header carrying the original HTTP method
    pub method_header: String,
    /// Response header set to the authenticated subject
    pub subject_header: String,
    /// Response header set to the subject's roles, comma-separated
    pub roles_header: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthorizationConfig {
    /// Evaluated in order, the first matching rule decides. Must end with the catch-all
    /// `{ pattern: "/**", access: authenticated }`.
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// Ant-style path pattern (`/clientes/**`, `/files/*.txt`)
    pub pattern: String,
    /// Only match requests with this method. Matches every method if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub access: Access,
}

impl RuleConfig {
    pub fn new(pattern: &str, method: Option<&str>, access: Access) -> Self {
        Self {
            pattern: pattern.to_string(),
            method: method.map(str::to_string),
            access,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    pub subject: String,
    /// Argon2 PHC digest, e.g. produced by `authgate --hash-password`
    pub password_hash: String,
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            secret_key: None,
            log_format: LogFormat::default(),
            enable_metrics: true,
            enable_otel_export: false,
            auth: AuthConfig::default(),
            bypass: default_bypass(),
            authorization: AuthorizationConfig::default(),
            identities: vec![],
        }
    }
}

/// API documentation endpoints served without authentication
fn default_bypass() -> Vec<String> {
    [
        "/v2/api-docs",
        "/configuration/ui",
        "/swagger-resources/**",
        "/configuration/security",
        "/swagger-ui.html",
        "/webjars/**",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            algorithm: TokenAlgorithm::HS256,
            expiry_leeway: Duration::ZERO,
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        let params = Argon2Params::default();
        Self {
            argon2_memory_kib: params.memory_kib,
            argon2_iterations: params.iterations,
            argon2_parallelism: params.parallelism,
        }
    }
}

impl Default for PrincipalCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(30),
            max_capacity: 10_000,
        }
    }
}

impl Default for ForwardAuthConfig {
    fn default() -> Self {
        Self {
            uri_header: "x-forwarded-uri".to_string(),
            method_header: "x-forwarded-method".to_string(),
            subject_header: "x-auth-subject".to_string(),
            roles_header: "x-auth-roles".to_string(),
        }
    }
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            rules: vec![RuleConfig::new("/**", None, Access::Authenticated)],
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("log_format", &self.log_format)
            .field("enable_metrics", &self.enable_metrics)
            .field("enable_otel_export", &self.enable_otel_export)
            .field("auth", &self.auth)
            .field("bypass", &self.bypass)
            .field("authorization", &self.authorization)
            .field("identities", &self.identities.len())
            .finish()
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields.
    ///
    /// Authorization rules are checked separately when the policy is compiled.
    pub fn validate(&self) -> Result<(), Error> {
        match self.secret_key.as_deref() {
            None => {
                return Err(Error::Internal {
                    operation: "Config validation: secret_key is not configured. \
                     Please set AUTHGATE_SECRET_KEY environment variable or add secret_key to config file."
                        .to_string(),
                });
            }
            Some(key) if key.len() < MIN_SECRET_KEY_BYTES => {
                return Err(Error::Internal {
                    operation: format!("Config validation: secret_key must be at least {MIN_SECRET_KEY_BYTES} bytes"),
                });
            }
            Some(_) => {}
        }

        let password = &self.auth.password;
        if password.argon2_memory_kib == 0 || password.argon2_iterations == 0 || password.argon2_parallelism == 0 {
            return Err(Error::Internal {
                operation: "Config validation: Argon2 memory, iterations and parallelism must all be positive".to_string(),
            });
        }

        let cache = &self.auth.principal_cache;
        if cache.enabled && cache.max_capacity == 0 {
            return Err(Error::Internal {
                operation: "Config validation: principal_cache.max_capacity cannot be 0 when the cache is enabled".to_string(),
            });
        }

        let forward_auth = &self.auth.forward_auth;
        for header in [
            &forward_auth.uri_header,
            &forward_auth.method_header,
            &forward_auth.subject_header,
            &forward_auth.roles_header,
        ] {
            if axum::http::HeaderName::from_bytes(header.as_bytes()).is_err() {
                return Err(Error::Internal {
                    operation: format!("Config validation: '{header}' is not a valid HTTP header name"),
                });
            }
        }

        let mut seen = HashSet::new();
        for identity in &self.identities {
            if identity.subject.is_empty() {
                return Err(Error::Internal {
                    operation: "Config validation: identity subject cannot be empty".to_string(),
                });
            }
            if !seen.insert(identity.subject.as_str()) {
                return Err(Error::Internal {
                    operation: format!("Config validation: identity '{}' is defined more than once", identity.subject),
                });
            }
            if !CredentialHasher::is_valid_digest(&identity.password_hash) {
                return Err(Error::Internal {
                    operation: format!(
                        "Config validation: identity '{}' has an invalid password_hash. \
                         Generate one with `authgate --hash-password`.",
                        identity.subject
                    ),
                });
            }
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values. AUTHGATE_CONFIG names
            // the file itself and is not a config key.
            .merge(Env::prefixed("AUTHGATE_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
