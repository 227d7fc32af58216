use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::trace;

use super::Lookup;
use crate::comparers::{Comparer, Registry};
use crate::comparison::{as_text, cmp_values, values_eq};
use crate::errors::{CompileError, EvalError};

/// Boolean condition over context properties.
#[derive(Debug)]
pub enum Matcher {
    All(Vec<Matcher>),
    Any(Vec<Matcher>),
    Not(Box<Matcher>),
    Property { name: String, cond: Condition },
}

/// Test applied to a single property value.
#[derive(Debug)]
pub enum Condition {
    Cmp {
        op: CmpOp,
        literal: Value,
        using: Option<Using>,
    },
    In {
        literals: Vec<Value>,
        using: Option<Using>,
    },
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CmpOp {
    fn from_operator(op: &str) -> Option<Self> {
        Some(match op {
            "$eq" => CmpOp::Eq,
            "$ne" => CmpOp::Ne,
            "$gt" => CmpOp::Gt,
            "$ge" => CmpOp::Ge,
            "$lt" => CmpOp::Lt,
            "$le" => CmpOp::Le,
            _ => return None,
        })
    }

    fn holds(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord.is_eq(),
            CmpOp::Ne => ord.is_ne(),
            CmpOp::Gt => ord.is_gt(),
            CmpOp::Ge => ord.is_ge(),
            CmpOp::Lt => ord.is_lt(),
            CmpOp::Le => ord.is_le(),
        }
    }
}

/// A registered comparer selected with `$compare`.
#[derive(Clone)]
pub struct Using {
    name: String,
    comparer: Arc<dyn Comparer>,
}

impl fmt::Debug for Using {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Using({})", self.name)
    }
}

impl Using {
    fn compare(&self, a: &str, b: &str) -> Result<Ordering, EvalError> {
        self.comparer.compare(a, b)
    }
}

pub fn compile(matcher: &Map<String, Value>, comparers: &Registry) -> Result<Matcher, CompileError> {
    let parts = matcher
        .iter()
        .map(|(key, value)| compile_entry(key, value, comparers))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(one_or_all(parts))
}

fn compile_entry(key: &str, value: &Value, comparers: &Registry) -> Result<Matcher, CompileError> {
    match key {
        "$or" | "$and" => {
            let Value::Array(items) = value else {
                return Err(matcher_err(key, "expected an array of matchers"));
            };
            let parts = items
                .iter()
                .map(|item| match item {
                    Value::Object(map) => compile(map, comparers),
                    _ => Err(matcher_err(key, "expected a matcher object")),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(if key == "$or" { Matcher::Any(parts) } else { Matcher::All(parts) })
        }
        "$not" => match value {
            Value::Object(map) => Ok(Matcher::Not(Box::new(compile(map, comparers)?))),
            _ => Err(matcher_err(key, "expected a matcher object")),
        },
        _ if key.starts_with('$') => Err(CompileError::UnknownOperator(key.to_string())),
        _ => Ok(Matcher::Property {
            name: key.to_string(),
            cond: compile_condition(key, value, None, comparers)?,
        }),
    }
}

fn compile_condition(
    property: &str,
    value: &Value,
    using: Option<&Using>,
    comparers: &Registry,
) -> Result<Condition, CompileError> {
    match value {
        Value::Object(ops) => {
            let own = match ops.get("$compare") {
                Some(Value::String(name)) => Some(resolve_comparer(name, comparers)?),
                Some(_) => return Err(matcher_err(property, "`$compare` expects a comparer name")),
                None => None,
            };
            let using = own.as_ref().or(using);
            let mut conds = ops
                .iter()
                .filter(|(op, _)| op.as_str() != "$compare")
                .map(|(op, arg)| compile_operator(property, op, arg, using, comparers))
                .collect::<Result<Vec<_>, _>>()?;
            if conds.is_empty() {
                return Err(matcher_err(property, "expected at least one operator"));
            }
            Ok(if conds.len() == 1 { conds.remove(0) } else { Condition::All(conds) })
        }
        Value::Array(_) => compile_operator(property, "$in", value, using, comparers),
        scalar => compile_operator(property, "$eq", scalar, using, comparers),
    }
}

fn compile_operator(
    property: &str,
    op: &str,
    arg: &Value,
    using: Option<&Using>,
    comparers: &Registry,
) -> Result<Condition, CompileError> {
    if let Some(cmp) = CmpOp::from_operator(op) {
        let literal = scalar(property, arg)?;
        validate_literal(&literal, using)?;
        return Ok(Condition::Cmp { op: cmp, literal, using: using.cloned() });
    }
    match op {
        "$in" => {
            let Value::Array(items) = arg else {
                return Err(matcher_err(property, "`$in` expects an array"));
            };
            let literals = items
                .iter()
                .map(|item| -> Result<Value, CompileError> {
                    let literal = scalar(property, item)?;
                    validate_literal(&literal, using)?;
                    Ok(literal)
                })
                .collect::<Result<Vec<_>, CompileError>>()?;
            Ok(Condition::In { literals, using: using.cloned() })
        }
        "$contains" | "$startswith" | "$endswith" => {
            let text = as_text(arg).ok_or_else(|| matcher_err(property, &format!("`{op}` expects a string")))?;
            Ok(match op {
                "$contains" => Condition::Contains(text.to_lowercase()),
                "$startswith" => Condition::StartsWith(text.to_lowercase()),
                _ => Condition::EndsWith(text.to_lowercase()),
            })
        }
        "$not" => Ok(Condition::Not(Box::new(compile_condition(property, arg, using, comparers)?))),
        "$or" | "$and" => {
            let conds = match arg {
                Value::Array(items) => items
                    .iter()
                    .map(|item| compile_condition(property, item, using, comparers))
                    .collect::<Result<Vec<_>, _>>()?,
                Value::Object(ops) => ops
                    .iter()
                    .map(|(inner, inner_arg)| compile_operator(property, inner, inner_arg, using, comparers))
                    .collect::<Result<Vec<_>, _>>()?,
                _ => return Err(matcher_err(property, &format!("`{op}` expects an array or object"))),
            };
            Ok(if op == "$or" { Condition::Any(conds) } else { Condition::All(conds) })
        }
        _ if op.starts_with('$') => Err(CompileError::UnknownOperator(op.to_string())),
        _ => Err(matcher_err(property, &format!("unexpected key `{op}`"))),
    }
}

fn resolve_comparer(name: &str, comparers: &Registry) -> Result<Using, CompileError> {
    let comparer = comparers
        .get(name)
        .ok_or_else(|| CompileError::UnknownComparer(name.to_string()))?;
    Ok(Using { name: name.to_string(), comparer })
}

// Comparer literals must be understood by their comparer up front.
fn validate_literal(literal: &Value, using: Option<&Using>) -> Result<(), CompileError> {
    let Some(using) = using else { return Ok(()) };
    let text = as_text(literal).ok_or_else(|| CompileError::Matcher {
        property: using.name.clone(),
        reason: format!("comparer operand {literal} is not a scalar"),
    })?;
    using.compare(&text, &text)?;
    Ok(())
}

fn scalar(property: &str, v: &Value) -> Result<Value, CompileError> {
    match v {
        Value::Array(_) | Value::Object(_) => Err(matcher_err(property, &format!("expected a scalar, got {v}"))),
        _ => Ok(v.clone()),
    }
}

fn matcher_err(property: &str, reason: &str) -> CompileError {
    CompileError::Matcher {
        property: property.to_string(),
        reason: reason.to_string(),
    }
}

fn one_or_all(mut parts: Vec<Matcher>) -> Matcher {
    if parts.len() == 1 { parts.remove(0) } else { Matcher::All(parts) }
}

impl Matcher {
    pub fn eval(&self, lookup: &Lookup) -> Result<bool, EvalError> {
        match self {
            Matcher::All(parts) => {
                for m in parts {
                    if !m.eval(lookup)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Matcher::Any(parts) => {
                for m in parts {
                    if m.eval(lookup)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Matcher::Not(inner) => Ok(!inner.eval(lookup)?),
            Matcher::Property { name, cond } => {
                let value = lookup(name).unwrap_or(Value::Null);
                let hit = cond.eval(&value)?;
                trace!(property = %name, %value, hit, "matcher");
                Ok(hit)
            }
        }
    }
}

impl Condition {
    /// `value` is `Null` when the property is absent from the context.
    pub fn eval(&self, value: &Value) -> Result<bool, EvalError> {
        match self {
            Condition::Cmp { op, literal, using: None } => Ok(match op {
                CmpOp::Ne => !values_eq(value, literal),
                _ => cmp_values(value, literal).is_some_and(|o| op.holds(o)),
            }),
            Condition::Cmp { op, literal, using: Some(using) } => {
                let (Some(lhs), Some(rhs)) = (as_text(value), as_text(literal)) else {
                    return Ok(*op == CmpOp::Ne);
                };
                Ok(op.holds(using.compare(&lhs, &rhs)?))
            }
            Condition::In { literals, using } => {
                for literal in literals {
                    let hit = match (using, as_text(value), as_text(literal)) {
                        (Some(using), Some(lhs), Some(rhs)) => using.compare(&lhs, &rhs)?.is_eq(),
                        (Some(_), _, _) => false,
                        (None, _, _) => values_eq(value, literal),
                    };
                    if hit {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Contains(needle) => Ok(match value {
                Value::Array(items) => items
                    .iter()
                    .any(|item| as_text(item).is_some_and(|s| s.to_lowercase() == *needle)),
                _ => as_text(value).is_some_and(|s| s.to_lowercase().contains(needle.as_str())),
            }),
            Condition::StartsWith(prefix) => {
                Ok(as_text(value).is_some_and(|s| s.to_lowercase().starts_with(prefix.as_str())))
            }
            Condition::EndsWith(suffix) => {
                Ok(as_text(value).is_some_and(|s| s.to_lowercase().ends_with(suffix.as_str())))
            }
            Condition::All(conds) => {
                for c in conds {
                    if !c.eval(value)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Any(conds) => {
                for c in conds {
                    if c.eval(value)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not(inner) => Ok(!inner.eval(value)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matcher(doc: Value) -> Matcher {
        let Value::Object(map) = doc else { panic!("not an object") };
        compile(&map, &Registry::with_builtins()).unwrap()
    }

    fn compile_err(doc: Value) -> CompileError {
        let Value::Object(map) = doc else { panic!("not an object") };
        compile(&map, &Registry::with_builtins()).unwrap_err()
    }

    fn eval(m: &Matcher, ctx: Value) -> bool {
        let lookup = move |key: &str| ctx.get(key).cloned();
        m.eval(&lookup).unwrap()
    }

    #[test]
    fn empty_matcher_always_matches() {
        assert!(eval(&matcher(json!({})), json!({})));
    }

    #[test]
    fn scalar_means_equality() {
        let m = matcher(json!({ "country": "IL" }));
        assert!(eval(&m, json!({ "country": "il" })));
        assert!(!eval(&m, json!({ "country": "US" })));
        assert!(!eval(&m, json!({})));
    }

    #[test]
    fn entries_are_conjunctive() {
        let m = matcher(json!({ "country": "IL", "age": { "$ge": 18, "$lt": 65 } }));
        assert!(eval(&m, json!({ "country": "IL", "age": "30" })));
        assert!(!eval(&m, json!({ "country": "IL", "age": "70" })));
        assert!(!eval(&m, json!({ "country": "US", "age": "30" })));
    }

    #[test]
    fn logical_operators() {
        let m = matcher(json!({
            "$or": [{ "country": "IL" }, { "country": "US" }],
            "$not": { "plan": "free" }
        }));
        assert!(eval(&m, json!({ "country": "US", "plan": "pro" })));
        assert!(!eval(&m, json!({ "country": "US", "plan": "free" })));
        assert!(!eval(&m, json!({ "country": "FR" })));

        let m = matcher(json!({ "$and": [{ "country": "IL" }, { "plan": "pro" }] }));
        assert!(eval(&m, json!({ "country": "il", "plan": "PRO" })));
        assert!(!eval(&m, json!({ "country": "IL", "plan": "free" })));
        assert!(!eval(&m, json!({ "plan": "pro" })));
    }

    #[test]
    fn property_level_or_and_not() {
        let m = matcher(json!({ "tier": { "$or": { "$eq": "gold", "$in": ["silver", "bronze"] } } }));
        assert!(eval(&m, json!({ "tier": "bronze" })));
        assert!(!eval(&m, json!({ "tier": "iron" })));

        let m = matcher(json!({ "tier": { "$not": "gold" } }));
        assert!(eval(&m, json!({ "tier": "iron" })));
        assert!(!eval(&m, json!({ "tier": "GOLD" })));

        for doc in [
            json!({ "age": { "$and": [{ "$ge": 18 }, { "$lt": 65 }] } }),
            json!({ "age": { "$and": { "$ge": 18, "$lt": 65 } } }),
        ] {
            let m = matcher(doc);
            assert!(eval(&m, json!({ "age": "18" })));
            assert!(!eval(&m, json!({ "age": "65" })));
            assert!(!eval(&m, json!({ "age": "17" })));
            assert!(!eval(&m, json!({})));
        }
    }

    #[test]
    fn array_is_membership() {
        let m = matcher(json!({ "country": ["IL", "US"] }));
        assert!(eval(&m, json!({ "country": "us" })));
        assert!(!eval(&m, json!({ "country": "FR" })));
    }

    #[test]
    fn string_operators() {
        let m = matcher(json!({ "email": { "$endswith": "@Example.com", "$startswith": "a" } }));
        assert!(eval(&m, json!({ "email": "alice@example.com" })));
        assert!(!eval(&m, json!({ "email": "bob@example.com" })));

        let m = matcher(json!({ "agent": { "$contains": "mobile" } }));
        assert!(eval(&m, json!({ "agent": "Chrome Mobile" })));
        assert!(!eval(&m, json!({})));
    }

    #[test]
    fn null_literal_tests_absence() {
        let m = matcher(json!({ "country": null }));
        assert!(eval(&m, json!({})));
        assert!(!eval(&m, json!({ "country": "IL" })));

        let m = matcher(json!({ "country": { "$ne": null } }));
        assert!(eval(&m, json!({ "country": "IL" })));
    }

    #[test]
    fn version_comparer() {
        let m = matcher(json!({ "appVersion": { "$compare": "version", "$ge": "2.0.0" } }));
        assert!(eval(&m, json!({ "appVersion": "2.5.0" })));
        assert!(eval(&m, json!({ "appVersion": "2.0" })));
        assert!(!eval(&m, json!({ "appVersion": "1.10.0" })));
        assert!(!eval(&m, json!({})));
    }

    #[test]
    fn comparer_error_surfaces_at_eval() {
        let m = matcher(json!({ "appVersion": { "$compare": "version", "$gt": "1.0" } }));
        let ctx = json!({ "appVersion": "latest" });
        let lookup = move |key: &str| ctx.get(key).cloned();
        assert!(matches!(m.eval(&lookup), Err(EvalError::Comparison { .. })));
    }

    #[test]
    fn rejects_bad_matchers() {
        assert!(matches!(
            compile_err(json!({ "v": { "$compare": "semver", "$gt": "1.0" } })),
            CompileError::UnknownComparer(_)
        ));
        assert!(matches!(
            compile_err(json!({ "v": { "$between": [1, 2] } })),
            CompileError::UnknownOperator(_)
        ));
        assert!(matches!(compile_err(json!({ "$xor": [] })), CompileError::UnknownOperator(_)));
        assert!(matches!(compile_err(json!({ "country": {} })), CompileError::Matcher { .. }));
        assert!(matches!(
            compile_err(json!({ "v": { "$compare": "version" } })),
            CompileError::Matcher { .. }
        ));
        assert!(matches!(
            compile_err(json!({ "v": { "$compare": "version", "$gt": "one" } })),
            CompileError::Eval(_)
        ));
        assert!(matches!(compile_err(json!({ "v": { "$in": "IL" } })), CompileError::Matcher { .. }));
        assert!(matches!(compile_err(json!({ "$or": {} })), CompileError::Matcher { .. }));
    }
}
