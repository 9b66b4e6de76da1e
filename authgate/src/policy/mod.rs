//! Path and method based authorization.
//!
//! A [`Policy`] is an ordered list of rules compiled from `authorization.rules`. Each rule pairs
//! an Ant-style path pattern and an optional HTTP method with an [`Access`] requirement. The
//! first rule whose pattern and method both match decides the request; later rules are never
//! consulted.
//!
//! Compilation enforces that the policy ends with the catch-all
//! `{ pattern: "/**", access: authenticated }` rule, so every request is covered by some
//! rule and nothing falls through to an implicit allow.
//!
//! The [`BypassList`] is separate: bypassed paths skip token handling and the policy entirely.

pub mod pattern;

use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::{
    auth::principal::{Principal, Role},
    config::RuleConfig,
    errors::{Error, Result},
};
use pattern::PathPattern;

/// What a rule requires of the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Allowed with or without a principal
    Public,
    /// Any principal
    Authenticated,
    /// A principal holding at least one of these roles
    Roles(BTreeSet<Role>),
}

/// Outcome of evaluating the policy against one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No principal was presented
    Unauthenticated,
    /// A principal was presented but lacks the required role
    Forbidden,
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: PathPattern,
    method: Option<Method>,
    access: Access,
}

impl Rule {
    fn compile(config: &RuleConfig) -> Result<Self> {
        let pattern = PathPattern::new(&config.pattern)?;

        let method = config
            .method
            .as_deref()
            .map(|m| {
                Method::from_bytes(m.as_bytes()).map_err(|_| Error::PolicyMisconfigured {
                    reason: format!("rule '{}' has invalid method '{m}'", config.pattern),
                })
            })
            .transpose()?;

        if let Access::Roles(roles) = &config.access
            && roles.is_empty()
        {
            return Err(Error::PolicyMisconfigured {
                reason: format!("rule '{}' requires roles but lists none", config.pattern),
            });
        }

        Ok(Self {
            pattern,
            method,
            access: config.access.clone(),
        })
    }

    fn matches(&self, path: &str, method: &Method) -> bool {
        self.method.as_ref().is_none_or(|m| m == method) && self.pattern.is_match(path)
    }

    fn is_default(&self) -> bool {
        self.pattern.is_catch_all() && self.method.is_none() && self.access == Access::Authenticated
    }
}

/// Ordered, first-match-wins authorization rules.
#[derive(Debug, Clone)]
pub struct Policy {
    rules: Vec<Rule>,
}

impl Policy {
    /// Compile configured rules, preserving their order.
    ///
    /// Fails with [`Error::PolicyMisconfigured`] if a pattern or method is invalid, a role rule
    /// lists no roles, the catch-all `authenticated` rule is missing, or rules follow it.
    pub fn compile(rules: &[RuleConfig]) -> Result<Self> {
        let rules = rules.iter().map(Rule::compile).collect::<Result<Vec<_>>>()?;

        let Some(default_at) = rules.iter().position(Rule::is_default) else {
            return Err(Error::PolicyMisconfigured {
                reason: "authorization rules must end with { pattern: \"/**\", access: authenticated }".to_string(),
            });
        };
        if default_at + 1 != rules.len() {
            let unreachable: Vec<_> = rules[default_at + 1..].iter().map(|r| r.pattern.as_str()).collect();
            return Err(Error::PolicyMisconfigured {
                reason: format!("rules after the catch-all can never match: {unreachable:?}"),
            });
        }

        for rule in &rules {
            match &rule.access {
                Access::Public => info!(pattern = rule.pattern.as_str(), method = ?rule.method, "Public rule"),
                Access::Authenticated => info!(pattern = rule.pattern.as_str(), method = ?rule.method, "Authenticated rule"),
                Access::Roles(roles) => info!(pattern = rule.pattern.as_str(), method = ?rule.method, ?roles, "Role rule"),
            }
        }
        warn!("Paths not matched by a more specific rule only require authentication, not any role");

        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Decide a request. The first rule matching both path and method wins.
    pub fn decide(&self, path: &str, method: &Method, principal: Option<&Principal>) -> Decision {
        // Compilation guarantees the last rule matches everything
        let access = self
            .rules
            .iter()
            .find(|rule| rule.matches(path, method))
            .map_or(&Access::Authenticated, |rule| &rule.access);

        match (access, principal) {
            (Access::Public, _) => Decision::Allow,
            (_, None) => Decision::Deny(DenyReason::Unauthenticated),
            (Access::Authenticated, Some(_)) => Decision::Allow,
            (Access::Roles(required), Some(principal)) if principal.has_any_role(required) => Decision::Allow,
            (Access::Roles(_), Some(_)) => Decision::Deny(DenyReason::Forbidden),
        }
    }
}

/// Paths exempt from the gate: no token is read and no rule is evaluated.
#[derive(Debug, Clone, Default)]
pub struct BypassList {
    patterns: Vec<PathPattern>,
}

impl BypassList {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns.iter().map(|p| PathPattern::new(p)).collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_bypassed(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_config;

    fn roles(names: &[&str]) -> BTreeSet<Role> {
        names.iter().map(|n| Role::new(n).unwrap()).collect()
    }

    fn principal(names: &[&str]) -> Principal {
        Principal::new("someone", roles(names))
    }

    fn test_policy() -> Policy {
        Policy::compile(&create_test_config().authorization.rules).unwrap()
    }

    fn catch_all() -> RuleConfig {
        RuleConfig::new("/**", None, Access::Authenticated)
    }

    #[test]
    fn test_role_rule_is_any_of() {
        let policy = test_policy();

        assert_eq!(policy.decide("/clientes/10", &Method::GET, Some(&principal(&["ADMIN"]))), Decision::Allow);
        assert_eq!(policy.decide("/clientes/10", &Method::GET, Some(&principal(&["USER"]))), Decision::Allow);
        assert_eq!(
            policy.decide("/clientes/10", &Method::GET, Some(&principal(&["AUDITOR"]))),
            Decision::Deny(DenyReason::Forbidden)
        );
    }

    #[test]
    fn test_admin_only_rule_forbids_user() {
        let policy = test_policy();

        assert_eq!(
            policy.decide("/produtos/5", &Method::GET, Some(&principal(&["USER"]))),
            Decision::Deny(DenyReason::Forbidden)
        );
        assert_eq!(policy.decide("/produtos/5", &Method::GET, Some(&principal(&["ADMIN"]))), Decision::Allow);
    }

    #[test]
    fn test_role_rule_without_principal_is_unauthenticated() {
        let policy = test_policy();
        assert_eq!(
            policy.decide("/produtos/5", &Method::GET, None),
            Decision::Deny(DenyReason::Unauthenticated)
        );
    }

    #[test]
    fn test_public_rule_is_method_specific() {
        let policy = test_policy();

        assert_eq!(policy.decide("/usuarios", &Method::POST, None), Decision::Allow);
        assert_eq!(policy.decide("/usuarios/novo", &Method::POST, None), Decision::Allow);
        // GET falls through to the catch-all
        assert_eq!(
            policy.decide("/usuarios", &Method::GET, None),
            Decision::Deny(DenyReason::Unauthenticated)
        );
        assert_eq!(policy.decide("/usuarios", &Method::GET, Some(&principal(&[]))), Decision::Allow);
    }

    #[test]
    fn test_unmatched_path_requires_any_principal() {
        let policy = test_policy();

        assert_eq!(
            policy.decide("/relatorios", &Method::GET, None),
            Decision::Deny(DenyReason::Unauthenticated)
        );
        assert_eq!(policy.decide("/relatorios", &Method::GET, Some(&principal(&[]))), Decision::Allow);
    }

    #[test]
    fn test_first_match_wins() {
        let policy = Policy::compile(&[
            RuleConfig::new("/produtos/catalogo", None, Access::Public),
            RuleConfig::new("/produtos/**", None, Access::Roles(roles(&["ADMIN"]))),
            catch_all(),
        ])
        .unwrap();
        assert_eq!(policy.decide("/produtos/catalogo", &Method::GET, None), Decision::Allow);

        let reversed = Policy::compile(&[
            RuleConfig::new("/produtos/**", None, Access::Roles(roles(&["ADMIN"]))),
            RuleConfig::new("/produtos/catalogo", None, Access::Public),
            catch_all(),
        ])
        .unwrap();
        assert_eq!(
            reversed.decide("/produtos/catalogo", &Method::GET, None),
            Decision::Deny(DenyReason::Unauthenticated)
        );
    }

    #[test]
    fn test_missing_catch_all_is_rejected() {
        let result = Policy::compile(&[RuleConfig::new("/clientes/**", None, Access::Roles(roles(&["USER"])))]);
        assert!(matches!(result, Err(Error::PolicyMisconfigured { .. })));

        assert!(matches!(Policy::compile(&[]), Err(Error::PolicyMisconfigured { .. })));
    }

    #[test]
    fn test_permissive_catch_all_is_not_a_default() {
        for rule in [
            RuleConfig::new("/**", None, Access::Public),
            RuleConfig::new("/**", Some("GET"), Access::Authenticated),
        ] {
            assert!(
                matches!(Policy::compile(&[rule.clone()]), Err(Error::PolicyMisconfigured { .. })),
                "{rule:?} should not count as the default rule"
            );
        }
    }

    #[test]
    fn test_rules_after_catch_all_are_rejected() {
        let result = Policy::compile(&[catch_all(), RuleConfig::new("/usuarios/**", Some("POST"), Access::Public)]);
        let err = result.unwrap_err();
        assert!(matches!(err, Error::PolicyMisconfigured { .. }));
        assert!(err.to_string().contains("/usuarios/**"));
    }

    #[test]
    fn test_empty_role_list_is_rejected() {
        let result = Policy::compile(&[RuleConfig::new("/admin/**", None, Access::Roles(BTreeSet::new())), catch_all()]);
        assert!(matches!(result, Err(Error::PolicyMisconfigured { .. })));
    }

    #[test]
    fn test_invalid_method_is_rejected() {
        let result = Policy::compile(&[RuleConfig::new("/usuarios/**", Some("PO ST"), Access::Public), catch_all()]);
        assert!(matches!(result, Err(Error::PolicyMisconfigured { .. })));
    }

    #[test]
    fn test_rule_order_is_preserved() {
        let policy = test_policy();
        assert_eq!(policy.len(), create_test_config().authorization.rules.len());
        assert!(policy.rules.last().unwrap().is_default());
    }

    #[test]
    fn test_bypass_list() {
        let bypass = BypassList::new(&create_test_config().bypass).unwrap();

        assert!(bypass.is_bypassed("/v2/api-docs"));
        assert!(bypass.is_bypassed("/swagger-ui.html"));
        assert!(bypass.is_bypassed("/webjars/springfox-swagger-ui/springfox.js"));
        assert!(bypass.is_bypassed("/swagger-resources"));
        assert!(!bypass.is_bypassed("/clientes/10"));
        assert!(!bypass.is_bypassed("/v2/api-docs-private"));

        assert!(!BypassList::default().is_bypassed("/v2/api-docs"));
    }

    #[test]
    fn test_invalid_bypass_pattern() {
        assert!(matches!(
            BypassList::new(&["webjars/**".to_string()]),
            Err(Error::PolicyMisconfigured { .. })
        ));
    }
}
