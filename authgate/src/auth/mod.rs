//! Authentication building blocks.
//!
//! - [`token`]: verifies bearer tokens and yields their claims
//! - [`password`]: Argon2id credential hashing
//! - [`principal`]: principals, roles, and the [`PrincipalLoader`](principal::PrincipalLoader) seam
//! - [`current_principal`]: axum extractor for handlers behind the gate middleware

pub mod current_principal;
pub mod password;
pub mod principal;
pub mod token;
