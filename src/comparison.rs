use std::cmp::Ordering;

use serde_json::Value;

/// Order a context value against a matcher literal, coercing the context
/// side to the literal's type. `None` means the two cannot be compared.
pub fn cmp_values(ctx: &Value, literal: &Value) -> Option<Ordering> {
    match literal {
        Value::String(lit) => as_text(ctx).map(|s| s.to_lowercase().cmp(&lit.to_lowercase())),
        Value::Number(lit) => {
            let lit = lit.as_f64()?;
            let ctx = match ctx {
                Value::Number(n) => n.as_f64()?,
                Value::String(s) => s.trim().parse::<f64>().ok()?,
                _ => return None,
            };
            ctx.partial_cmp(&lit)
        }
        Value::Bool(lit) => {
            let ctx = match ctx {
                Value::Bool(b) => *b,
                Value::String(s) if s.eq_ignore_ascii_case("true") => true,
                Value::String(s) if s.eq_ignore_ascii_case("false") => false,
                _ => return None,
            };
            Some(ctx.cmp(lit))
        }
        Value::Null => ctx.is_null().then_some(Ordering::Equal),
        _ => (ctx == literal).then_some(Ordering::Equal),
    }
}

/// Equality with the same coercions as [`cmp_values`].
pub fn values_eq(ctx: &Value, literal: &Value) -> bool {
    cmp_values(ctx, literal) == Some(Ordering::Equal)
}

/// String form of a scalar value, as fed to comparers and string operators.
pub fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
