//! Principals, roles, and the loader trait that resolves a token subject to a principal.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, str::FromStr};
use thiserror::Error as ThisError;

use crate::errors::Result;

const ROLE_PREFIX: &str = "ROLE_";

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
#[error("role name must not be empty")]
pub struct EmptyRoleName;

/// A role name such as `ADMIN`.
///
/// A leading `ROLE_` is stripped, so `ROLE_ADMIN` and `ADMIN` are the same role.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Role(String);

impl Role {
    pub fn new(name: &str) -> std::result::Result<Self, EmptyRoleName> {
        let name = name.trim();
        let name = name.strip_prefix(ROLE_PREFIX).unwrap_or(name);
        if name.is_empty() {
            return Err(EmptyRoleName);
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Role {
    type Err = EmptyRoleName;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Role {
    type Error = EmptyRoleName;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The verified identity attached to a request: a subject and its role-set at lookup time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    subject: String,
    roles: BTreeSet<Role>,
}

impl Principal {
    pub fn new(subject: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            subject: subject.into(),
            roles: roles.into_iter().collect(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn roles(&self) -> &BTreeSet<Role> {
        &self.roles
    }

    /// True if this principal holds at least one of `required`.
    pub fn has_any_role(&self, required: &BTreeSet<Role>) -> bool {
        required.iter().any(|role| self.roles.contains(role))
    }
}

/// Resolves a verified token subject to its current principal.
///
/// Implementations must be safe for concurrent reads and return promptly: this runs on
/// every authenticated request.
pub trait PrincipalLoader: Send + Sync {
    /// Fails with [`Error::PrincipalNotFound`](crate::errors::Error::PrincipalNotFound) if the
    /// subject does not exist.
    fn load(&self, subject: &str) -> Result<Principal>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(names: &[&str]) -> BTreeSet<Role> {
        names.iter().map(|n| Role::new(n).unwrap()).collect()
    }

    #[test]
    fn test_role_prefix_is_stripped() {
        assert_eq!(Role::new("ROLE_ADMIN").unwrap(), Role::new("ADMIN").unwrap());
        assert_eq!(Role::new("ROLE_ADMIN").unwrap().as_str(), "ADMIN");
    }

    #[test]
    fn test_roles_are_case_sensitive() {
        assert_ne!(Role::new("admin").unwrap(), Role::new("ADMIN").unwrap());
    }

    #[test]
    fn test_empty_role_rejected() {
        assert_eq!(Role::new(""), Err(EmptyRoleName));
        assert_eq!(Role::new("  "), Err(EmptyRoleName));
        assert_eq!(Role::new("ROLE_"), Err(EmptyRoleName));
    }

    #[test]
    fn test_role_deserializes_from_string() {
        let parsed: Vec<Role> = serde_json::from_str(r#"["USER", "ROLE_ADMIN"]"#).unwrap();
        assert_eq!(parsed, vec![Role::new("USER").unwrap(), Role::new("ADMIN").unwrap()]);

        assert!(serde_json::from_str::<Role>(r#""""#).is_err());
    }

    #[test]
    fn test_has_any_role_is_any_of() {
        let principal = Principal::new("alice", roles(&["USER"]));

        assert!(principal.has_any_role(&roles(&["USER", "ADMIN"])));
        assert!(!principal.has_any_role(&roles(&["ADMIN"])));
        assert!(!principal.has_any_role(&BTreeSet::new()));
    }

    #[test]
    fn test_principal_roles_are_deduplicated() {
        let principal = Principal::new("alice", vec![Role::new("USER").unwrap(), Role::new("ROLE_USER").unwrap()]);
        assert_eq!(principal.roles().len(), 1);
        assert_eq!(principal.subject(), "alice");
    }
}
