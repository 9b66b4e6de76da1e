//! Shared fixtures for unit tests.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use std::sync::Arc;

use crate::{
    AppState,
    auth::{
        password::{Argon2Params, CredentialHasher},
        principal::Role,
        token::Claims,
    },
    config::{Config, IdentityConfig, PasswordConfig, RuleConfig},
    gate::AuthGate,
    identity::IdentityDirectory,
    policy::Access,
};

pub const TEST_SECRET: &str = "test-secret-key-that-is-at-least-32-bytes";

/// Cheap Argon2 parameters so tests don't spend seconds hashing.
pub fn test_hasher() -> CredentialHasher {
    CredentialHasher::new(Argon2Params {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    })
}

fn roles(names: &[&str]) -> Access {
    Access::Roles(names.iter().map(|n| Role::new(n).unwrap()).collect())
}

fn identity(subject: &str, password: &str, role: &str) -> IdentityConfig {
    IdentityConfig {
        subject: subject.to_string(),
        password_hash: test_hasher().hash(password).unwrap(),
        roles: vec![Role::new(role).unwrap()],
    }
}

/// Sales API policy: customers and orders for USER or ADMIN, products for ADMIN only, open
/// user registration, everything else authenticated. Identities `admin` (ADMIN) and `user`
/// (USER) with passwords `admin-password` and `user-password`.
pub fn create_test_config() -> Config {
    let test_params = test_hasher().params();

    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        secret_key: Some(TEST_SECRET.to_string()),
        identities: vec![
            identity("admin", "admin-password", "ADMIN"),
            identity("user", "user-password", "USER"),
        ],
        ..Default::default()
    };
    config.auth.password = PasswordConfig {
        argon2_memory_kib: test_params.memory_kib,
        argon2_iterations: test_params.iterations,
        argon2_parallelism: test_params.parallelism,
    };
    config.authorization.rules = vec![
        RuleConfig::new("/clientes/**", None, roles(&["USER", "ADMIN"])),
        RuleConfig::new("/pedidos/**", None, roles(&["USER", "ADMIN"])),
        RuleConfig::new("/produtos/**", None, roles(&["ADMIN"])),
        RuleConfig::new("/usuarios/**", Some("POST"), Access::Public),
        RuleConfig::new("/**", None, Access::Authenticated),
    ];
    config
}

pub fn create_test_gate_with_directory() -> (AuthGate, Arc<IdentityDirectory>) {
    let config = create_test_config();
    let directory = Arc::new(IdentityDirectory::from_config(&config));
    let gate = AuthGate::from_config(&config, directory.clone()).unwrap();
    (gate, directory)
}

pub fn create_test_gate() -> AuthGate {
    create_test_gate_with_directory().0
}

pub fn create_test_app_state_with_directory() -> (AppState, Arc<IdentityDirectory>) {
    let (gate, directory) = create_test_gate_with_directory();
    let state = AppState::builder().config(create_test_config()).gate(Arc::new(gate)).build();
    (state, directory)
}

pub fn create_test_app_state() -> AppState {
    create_test_app_state_with_directory().0
}

/// Claims for `subject` expiring `expires_in` from now (negative for already expired).
pub fn test_claims(subject: &str, expires_in: Duration) -> Claims {
    let now = Utc::now();
    Claims {
        sub: subject.to_string(),
        iat: now.timestamp(),
        exp: (now + expires_in).timestamp(),
    }
}

/// Sign claims the way the token issuer does.
pub fn mint_token(secret: &str, algorithm: Algorithm, claims: &Claims) -> String {
    encode(&Header::new(algorithm), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}
