use std::collections::HashMap;

use super::rule::{CmpOp, Expr, RuleError};

/// The invocation context a rule condition is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub command: String,
    pub bundle: String,
    pub args: Vec<String>,
    pub options: HashMap<String, String>,
    pub user_name: String,
    pub user_groups: Vec<String>,
    pub user_roles: Vec<String>,
    /// The bundle-qualified permission set derived by
    /// `model::user::effective_permissions`, exposed to rules as
    /// `user.permissions`.
    pub user_permissions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<String>),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
            Value::Int(n) => *n != 0,
            Value::List(l) => !l.is_empty(),
        }
    }

    fn as_str(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::List(l) => l.join(","),
        }
    }

    fn as_int(&self) -> i64 {
        match self {
            Value::Int(n) => *n,
            Value::Str(s) => s.parse().unwrap_or(0),
            Value::Bool(b) => *b as i64,
            Value::List(l) => l.len() as i64,
        }
    }
}

pub fn eval(expr: &Expr, ctx: &Context) -> Result<Value, RuleError> {
    match expr {
        Expr::True => Ok(Value::Bool(true)),
        Expr::BoolLit(b) => Ok(Value::Bool(*b)),
        Expr::StrLit(s) => Ok(Value::Str(s.clone())),
        Expr::IntLit(n) => Ok(Value::Int(*n)),
        Expr::Command => Ok(Value::Str(ctx.command.clone())),
        Expr::Bundle => Ok(Value::Str(ctx.bundle.clone())),
        // Out-of-bounds arg indices evaluate to the empty string /
        // zero depending on the comparison context (§8 boundary
        // behavior); callers coerce via as_str/as_int as needed.
        Expr::ArgIndex(i) => Ok(Value::Str(ctx.args.get(*i).cloned().unwrap_or_default())),
        Expr::OptionName(name) => Ok(Value::Str(ctx.options.get(name).cloned().unwrap_or_default())),
        Expr::AnyArg => Ok(Value::List(ctx.args.clone())),
        Expr::AnyOption => Ok(Value::List(ctx.options.values().cloned().collect())),
        Expr::UserName => Ok(Value::Str(ctx.user_name.clone())),
        Expr::UserGroups => Ok(Value::List(ctx.user_groups.clone())),
        Expr::UserRoles => Ok(Value::List(ctx.user_roles.clone())),
        Expr::UserPermissions => Ok(Value::List(ctx.user_permissions.clone())),
        Expr::And(a, b) => Ok(Value::Bool(eval(a, ctx)?.truthy() && eval(b, ctx)?.truthy())),
        Expr::Or(a, b) => Ok(Value::Bool(eval(a, ctx)?.truthy() || eval(b, ctx)?.truthy())),
        Expr::Not(a) => Ok(Value::Bool(!eval(a, ctx)?.truthy())),
        Expr::Cmp(a, op, b) => {
            let left = eval(a, ctx)?;
            let right = eval(b, ctx)?;
            Ok(Value::Bool(compare(&left, *op, &right)))
        }
        Expr::In(needle, haystack) => {
            let needle = eval(needle, ctx)?.as_str();
            let haystack = eval(haystack, ctx)?;
            Ok(Value::Bool(membership(&needle, &haystack)))
        }
        Expr::NotIn(needle, haystack) => {
            let needle = eval(needle, ctx)?.as_str();
            let haystack = eval(haystack, ctx)?;
            Ok(Value::Bool(!membership(&needle, &haystack)))
        }
    }
}

fn membership(needle: &str, haystack: &Value) -> bool {
    match haystack {
        Value::List(items) => items.iter().any(|v| v == needle),
        other => other.as_str() == needle,
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> bool {
    // Prefer numeric comparison when either side is already an Int;
    // otherwise compare as strings. This keeps `arg[0] == "x"` exact
    // and `arg[0] > 3` numeric without requiring explicit casts in
    // rule text.
    let numeric = matches!(left, Value::Int(_)) || matches!(right, Value::Int(_));
    if numeric {
        let l = left.as_int();
        let r = right.as_int();
        return match op {
            CmpOp::Eq => l == r,
            CmpOp::Ne => l != r,
            CmpOp::Lt => l < r,
            CmpOp::Le => l <= r,
            CmpOp::Gt => l > r,
            CmpOp::Ge => l >= r,
        };
    }
    let l = left.as_str();
    let r = right.as_str();
    match op {
        CmpOp::Eq => l == r,
        CmpOp::Ne => l != r,
        CmpOp::Lt => l < r,
        CmpOp::Le => l <= r,
        CmpOp::Gt => l > r,
        CmpOp::Ge => l >= r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorizer::rule::Rule;

    fn ctx() -> Context {
        Context {
            command: "echo".into(),
            bundle: "gort".into(),
            args: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            options: HashMap::new(),
            user_name: "alice".into(),
            user_groups: vec!["ops".into()],
            user_roles: vec!["admins".into()],
            user_permissions: vec!["gort:admin".into()],
        }
    }

    #[test]
    fn oob_arg_index_is_empty_string() {
        let rule = Rule::parse(r#"allow arg[7] == """#).unwrap();
        assert!(eval(&rule.condition, &ctx()).unwrap().truthy());
    }

    #[test]
    fn oob_arg_index_is_zero_in_integer_context() {
        let rule = Rule::parse("allow arg[7] == 0").unwrap();
        assert!(eval(&rule.condition, &ctx()).unwrap().truthy());
    }

    #[test]
    fn not_in_of_absent_element_is_true() {
        let rule = Rule::parse(r#"allow "z" not in any(arg)"#).unwrap();
        assert!(eval(&rule.condition, &ctx()).unwrap().truthy());
    }

    #[test]
    fn present_element_in_any_arg() {
        let rule = Rule::parse(r#"allow "a" in any(arg)"#).unwrap();
        assert!(eval(&rule.condition, &ctx()).unwrap().truthy());
    }

    #[test]
    fn user_name_equality() {
        let rule = Rule::parse(r#"allow user.name == "alice""#).unwrap();
        assert!(eval(&rule.condition, &ctx()).unwrap().truthy());
    }

    #[test]
    fn user_permissions_membership() {
        let rule = Rule::parse(r#"allow "gort:admin" in user.permissions"#).unwrap();
        assert!(eval(&rule.condition, &ctx()).unwrap().truthy());
    }
}
