//! Password hashing and verification.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::errors::Error;

/// Argon2 hashing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Argon2Params {
    fn to_argon2(self) -> Result<Argon2<'static>, Error> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None).map_err(|e| Error::Internal {
            operation: format!("create argon2 params: {e}"),
        })?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for Argon2Params {
    /// Secure defaults for production (Argon2id RFC recommendations)
    fn default() -> Self {
        Self {
            memory_kib: 19456, // 19 MB
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// One-way salted password hashing with Argon2id.
///
/// Digests are PHC strings (`$argon2id$v=19$m=...`) carrying their own salt and cost
/// parameters, so changing [`Argon2Params`] never invalidates existing digests.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialHasher {
    params: Argon2Params,
}

impl CredentialHasher {
    pub fn new(params: Argon2Params) -> Self {
        Self { params }
    }

    pub fn params(&self) -> Argon2Params {
        self.params
    }

    /// Hash a plaintext with a fresh random salt.
    pub fn hash(&self, plaintext: &str) -> Result<String, Error> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = self.params.to_argon2()?;

        let hash = argon2.hash_password(plaintext.as_bytes(), &salt).map_err(|e| Error::Internal {
            operation: format!("hash password: {e}"),
        })?;

        Ok(hash.to_string())
    }

    /// Verify a plaintext against a stored digest.
    ///
    /// A digest that does not parse is treated as a mismatch. Verification uses the
    /// parameters embedded in the digest and compares outputs in constant time.
    pub fn verify(&self, plaintext: &str, digest: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(digest) else {
            return false;
        };
        Argon2::default().verify_password(plaintext.as_bytes(), &parsed).is_ok()
    }

    /// Whether `digest` is a well-formed PHC string this hasher can verify against.
    pub fn is_valid_digest(digest: &str) -> bool {
        PasswordHash::new(digest).is_ok_and(|parsed| parsed.algorithm.as_str().starts_with("argon2"))
    }
}
