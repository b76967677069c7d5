//! Evaluates a command's rule expressions against the invocation
//! context; allow/deny with reasons (§4.3).

mod eval;
mod rule;

pub use eval::{Context, Value};
pub use rule::{Rule, RuleError};

use std::collections::HashSet;

use crate::error::GortError;

/// A command is authorized iff at least one rule's condition evaluates
/// true and every such rule's required permissions are a subset of the
/// user's permission set. An empty rule list denies with `NoRules`. Any
/// rule parse error denies with `RuleError` — never an implicit allow.
pub fn authorize(
    rules: &[String],
    context: &Context,
    user_permissions: &HashSet<String>,
) -> Result<(), GortError> {
    if rules.is_empty() {
        return Err(GortError::NoRules);
    }

    let mut missing_permissions: Vec<String> = Vec::new();
    for raw in rules {
        let rule = rule::Rule::parse(raw).map_err(|e| GortError::RuleError(e.to_string()))?;
        let condition_true = eval::eval(&rule.condition, context)
            .map_err(|e| GortError::RuleError(e.to_string()))?
            .truthy();
        if !condition_true {
            continue;
        }
        let unmet: Vec<String> = rule
            .required_permissions
            .iter()
            .filter(|p| !user_permissions.contains(p.as_str()))
            .cloned()
            .collect();
        if unmet.is_empty() {
            return Ok(());
        }
        missing_permissions.extend(unmet);
    }

    missing_permissions.sort();
    missing_permissions.dedup();
    Err(GortError::Unauthorized {
        missing_permissions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(command: &str, bundle: &str) -> Context {
        Context {
            command: command.to_string(),
            bundle: bundle.to_string(),
            args: vec!["a".into(), "b".into()],
            options: Default::default(),
            user_name: "alice".to_string(),
            user_groups: vec!["ops".to_string()],
            user_roles: vec!["admins".to_string()],
            user_permissions: Default::default(),
        }
    }

    #[test]
    fn allow_with_no_condition_always_passes() {
        let perms = HashSet::new();
        assert!(authorize(&["allow".to_string()], &ctx("echo", "gort"), &perms).is_ok());
    }

    #[test]
    fn empty_rules_denies_with_no_rules() {
        let perms = HashSet::new();
        let err = authorize(&[], &ctx("echo", "gort"), &perms).unwrap_err();
        assert!(matches!(err, GortError::NoRules));
    }

    #[test]
    fn must_have_permission_enforced() {
        let rules = vec!["allow must have gort:admin".to_string()];
        let no_perms = HashSet::new();
        let err = authorize(&rules, &ctx("echo", "gort"), &no_perms).unwrap_err();
        assert!(matches!(err, GortError::Unauthorized { .. }));

        let mut perms = HashSet::new();
        perms.insert("gort:admin".to_string());
        assert!(authorize(&rules, &ctx("echo", "gort"), &perms).is_ok());
    }

    #[test]
    fn condition_gating_must_have() {
        let rules = vec![r#"allow command == "dangerous" must have gort:admin"#.to_string()];
        let perms = HashSet::new();
        // condition false for "echo" -> rule doesn't apply -> falls through to NoRules-equivalent deny
        let err = authorize(&rules, &ctx("echo", "gort"), &perms).unwrap_err();
        assert!(matches!(err, GortError::Unauthorized { .. }));
    }

    #[test]
    fn rule_parse_error_denies_never_implicit_allow() {
        let rules = vec!["allow (((".to_string()];
        let perms = HashSet::new();
        let err = authorize(&rules, &ctx("echo", "gort"), &perms).unwrap_err();
        assert!(matches!(err, GortError::RuleError(_)));
    }
}
