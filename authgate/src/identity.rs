//! In-memory identity store backing the principal loader.
//!
//! The directory owns one [`CredentialRecord`] per subject and answers two questions:
//! "what roles does this subject hold right now?" ([`PrincipalLoader::load`]) and "does this
//! password belong to this subject?" ([`IdentityDirectory::authenticate`]). Password digests
//! never leave this module.
//!
//! Records live in a sharded concurrent map, so lookups for different subjects never contend
//! and role updates replace a subject's record atomically. An optional read-through cache
//! sits in front of the map; every mutation invalidates the affected subject before it
//! returns.

use dashmap::DashMap;
use moka::sync::Cache;
use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};

use crate::{
    auth::{
        password::CredentialHasher,
        principal::{Principal, PrincipalLoader, Role},
    },
    config::{Config, PrincipalCacheConfig},
    errors::{Error, Result},
};

/// A subject's stored credentials and roles.
#[derive(Clone)]
pub struct CredentialRecord {
    subject: String,
    password_hash: String,
    roles: BTreeSet<Role>,
}

impl CredentialRecord {
    pub fn new(subject: impl Into<String>, password_hash: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            subject: subject.into(),
            password_hash: password_hash.into(),
            roles: roles.into_iter().collect(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    fn principal(&self) -> Principal {
        Principal::new(self.subject.clone(), self.roles.iter().cloned())
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("subject", &self.subject)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

pub struct IdentityDirectory {
    records: DashMap<String, CredentialRecord>,
    cache: Option<Cache<String, Principal>>,
    hasher: CredentialHasher,
    /// Verified against when the subject does not exist, hashed with the configured costs
    dummy_digest: String,
}

impl IdentityDirectory {
    pub fn new(hasher: CredentialHasher, cache_config: &PrincipalCacheConfig) -> Self {
        let cache = cache_config.enabled.then(|| {
            Cache::builder()
                .max_capacity(cache_config.max_capacity)
                .time_to_live(cache_config.ttl)
                .build()
        });
        let dummy_digest = hasher.hash(DUMMY_PASSWORD).unwrap_or_else(|e| {
            warn!("Could not hash dummy password, unknown subjects will fail fast: {e}");
            String::new()
        });

        Self {
            records: DashMap::new(),
            cache,
            hasher,
            dummy_digest,
        }
    }

    /// Build a directory seeded with the configured identities.
    pub fn from_config(config: &Config) -> Self {
        let hasher = CredentialHasher::new(config.auth.password.argon2_params());
        let directory = Self::new(hasher, &config.auth.principal_cache);
        for identity in &config.identities {
            directory.upsert(CredentialRecord::new(
                identity.subject.clone(),
                identity.password_hash.clone(),
                identity.roles.iter().cloned(),
            ));
        }
        info!("Identity directory loaded with {} subjects", directory.len());
        directory
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert or replace a subject's record.
    #[instrument(skip_all, fields(subject = %record.subject))]
    pub fn upsert(&self, record: CredentialRecord) {
        let subject = record.subject.clone();
        self.records.insert(subject.clone(), record);
        self.invalidate(&subject);
    }

    /// Replace a subject's role-set.
    #[instrument(skip(self, roles))]
    pub fn set_roles(&self, subject: &str, roles: impl IntoIterator<Item = Role>) -> Result<()> {
        let mut record = self.records.get_mut(subject).ok_or_else(|| Error::PrincipalNotFound {
            subject: subject.to_string(),
        })?;
        record.roles = roles.into_iter().collect();
        // Invalidate while the shard write lock is held, see load()
        self.invalidate(subject);
        debug!("Roles updated: {:?}", record.roles);
        Ok(())
    }

    /// Remove a subject. Returns false if it did not exist.
    #[instrument(skip(self))]
    pub fn remove(&self, subject: &str) -> bool {
        let removed = self.records.remove(subject).is_some();
        self.invalidate(subject);
        removed
    }

    /// Check a subject's password and return its principal.
    ///
    /// Unknown subjects and wrong passwords both yield [`Error::Unauthenticated`].
    #[instrument(skip(self, plaintext))]
    pub fn authenticate(&self, subject: &str, plaintext: &str) -> Result<Principal> {
        let record = self.records.get(subject).map(|r| r.clone());
        match record {
            Some(record) if self.hasher.verify(plaintext, &record.password_hash) => Ok(record.principal()),
            Some(_) => {
                debug!("Password mismatch");
                Err(Error::Unauthenticated)
            }
            None => {
                // Burn comparable time so unknown subjects are not distinguishable by latency
                let _ = self.hasher.verify(plaintext, &self.dummy_digest);
                debug!("Unknown subject");
                Err(Error::Unauthenticated)
            }
        }
    }

    fn invalidate(&self, subject: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(subject);
        }
    }
}

const DUMMY_PASSWORD: &str = "authgate-unknown-subject";

impl PrincipalLoader for IdentityDirectory {
    fn load(&self, subject: &str) -> Result<Principal> {
        if let Some(cache) = &self.cache
            && let Some(principal) = cache.get(subject)
        {
            return Ok(principal);
        }

        let record = self.records.get(subject).ok_or_else(|| Error::PrincipalNotFound {
            subject: subject.to_string(),
        })?;
        let principal = record.principal();
        // The shard read guard is still held here, so a concurrent set_roles cannot slip its
        // update and invalidation in before this insert and leave a stale entry behind.
        if let Some(cache) = &self.cache {
            cache.insert(subject.to_string(), principal.clone());
        }
        drop(record);
        Ok(principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_config, test_hasher};
    use std::{sync::Arc, time::Duration};

    fn role(name: &str) -> Role {
        Role::new(name).unwrap()
    }

    fn cached() -> PrincipalCacheConfig {
        PrincipalCacheConfig {
            enabled: true,
            ttl: Duration::from_secs(300),
            max_capacity: 100,
        }
    }

    fn directory_with(cache: PrincipalCacheConfig) -> IdentityDirectory {
        let hasher = test_hasher();
        let directory = IdentityDirectory::new(hasher, &cache);
        directory.upsert(CredentialRecord::new("alice", hasher.hash("alice-password").unwrap(), [role("ADMIN")]));
        directory.upsert(CredentialRecord::new("bob", hasher.hash("bob-password").unwrap(), [role("USER")]));
        directory
    }

    #[test]
    fn test_load_returns_current_roles() {
        let directory = directory_with(cached());

        let alice = directory.load("alice").unwrap();
        assert_eq!(alice.subject(), "alice");
        assert!(alice.roles().contains(&role("ADMIN")));
    }

    #[test]
    fn test_load_unknown_subject() {
        let directory = directory_with(cached());
        assert!(matches!(
            directory.load("mallory"),
            Err(Error::PrincipalNotFound { subject }) if subject == "mallory"
        ));
    }

    #[test]
    fn test_role_change_invalidates_cache() {
        let directory = directory_with(cached());

        // Warm the cache
        assert!(directory.load("bob").unwrap().roles().contains(&role("USER")));

        directory.set_roles("bob", [role("ADMIN")]).unwrap();

        let bob = directory.load("bob").unwrap();
        assert!(bob.roles().contains(&role("ADMIN")));
        assert!(!bob.roles().contains(&role("USER")));
    }

    #[test]
    fn test_removed_subject_is_not_served_from_cache() {
        let directory = directory_with(cached());
        directory.load("bob").unwrap();

        assert!(directory.remove("bob"));
        assert!(matches!(directory.load("bob"), Err(Error::PrincipalNotFound { .. })));
        assert!(!directory.remove("bob"));
    }

    #[test]
    fn test_set_roles_unknown_subject() {
        let directory = directory_with(cached());
        assert!(matches!(
            directory.set_roles("mallory", [role("ADMIN")]),
            Err(Error::PrincipalNotFound { .. })
        ));
    }

    #[test]
    fn test_uncached_directory_reads_through() {
        let directory = directory_with(PrincipalCacheConfig {
            enabled: false,
            ..cached()
        });
        directory.load("bob").unwrap();
        directory.set_roles("bob", [role("AUDITOR")]).unwrap();
        assert!(directory.load("bob").unwrap().roles().contains(&role("AUDITOR")));
    }

    #[test]
    fn test_authenticate() {
        let directory = directory_with(cached());

        let alice = directory.authenticate("alice", "alice-password").unwrap();
        assert_eq!(alice.subject(), "alice");

        assert!(matches!(directory.authenticate("alice", "bob-password"), Err(Error::Unauthenticated)));
        assert!(matches!(directory.authenticate("mallory", "alice-password"), Err(Error::Unauthenticated)));
    }

    #[test]
    fn test_unknown_subject_digest_uses_configured_costs() {
        let directory = directory_with(cached());
        let params = test_hasher().params();

        let expected = format!("m={},t={},p={}", params.memory_kib, params.iterations, params.parallelism);
        assert!(directory.dummy_digest.contains(&expected), "{}", directory.dummy_digest);
        assert!(!directory.hasher.verify("anything", &directory.dummy_digest));
    }

    #[test]
    fn test_debug_output_hides_password_hash() {
        let record = CredentialRecord::new("alice", "$argon2id$secret-digest", [role("ADMIN")]);
        let debug = format!("{record:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("secret-digest"));
    }

    #[test]
    fn test_from_config_seeds_identities() {
        let config = create_test_config();
        let directory = IdentityDirectory::from_config(&config);

        assert_eq!(directory.len(), config.identities.len());
        assert!(directory.load("admin").unwrap().roles().contains(&role("ADMIN")));
        assert!(directory.authenticate("user", "user-password").is_ok());
    }

    #[test]
    fn test_concurrent_reads_and_role_updates() {
        let directory = Arc::new(directory_with(cached()));

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let directory = directory.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let bob = directory.load("bob").unwrap();
                        assert_eq!(bob.roles().len(), 1);
                    }
                })
            })
            .collect();

        for i in 0..200 {
            let next = if i % 2 == 0 { "ADMIN" } else { "USER" };
            directory.set_roles("bob", [role(next)]).unwrap();
        }
        directory.set_roles("bob", [role("FINAL")]).unwrap();

        for reader in readers {
            reader.join().unwrap();
        }
        assert!(directory.load("bob").unwrap().roles().contains(&role("FINAL")));
    }
}
