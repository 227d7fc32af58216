use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::trace;

use super::matcher::{self, Matcher};
use super::Lookup;
use crate::comparers::Registry;
use crate::comparison::as_text;
use crate::errors::{CompileError, EvalError};
use crate::hashing::{bucket_of, HashProvider};

/// Scale used to turn a bernoulli probability into integer weights.
const BERNOULLI_SCALE: f64 = 1000.0;

/// Declared type of every value a document can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ValueType {
    pub fn check(self, value: &Value) -> Result<(), CompileError> {
        let ok = match self {
            ValueType::String => value.is_string(),
            ValueType::Number => value.is_number(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Object => value.is_object(),
            ValueType::Array => value.is_array(),
        };
        if ok {
            Ok(())
        } else {
            Err(CompileError::ValueType {
                value: value.to_string(),
                expected: format!("{self:?}").to_lowercase(),
            })
        }
    }

    /// Read a weighted-distribution key as a value of this type.
    fn coerce_key(self, raw: &str) -> Result<Value, CompileError> {
        let value = match self {
            ValueType::String => Value::String(raw.to_string()),
            _ => serde_json::from_str(raw).map_err(|_| CompileError::ValueType {
                value: raw.to_string(),
                expected: format!("{self:?}").to_lowercase(),
            })?,
        };
        self.check(&value)?;
        Ok(value)
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) enum RuleKind {
    #[default]
    SingleVariant,
    MultiVariant,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawRule {
    #[serde(rename = "Id", default)]
    id: Option<String>,
    #[serde(rename = "Matcher", default)]
    matcher: Map<String, Value>,
    #[serde(rename = "Type", default)]
    kind: RuleKind,
    #[serde(rename = "Value", default, deserialize_with = "present")]
    value: Option<Value>,
    #[serde(rename = "OwnerType", default)]
    owner_type: Option<String>,
    #[serde(rename = "Salt", default)]
    salt: Option<String>,
    #[serde(rename = "ValueDistribution", default)]
    distribution: Option<RawDistribution>,
}

#[derive(Debug, Deserialize)]
struct RawDistribution {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    args: Value,
}

/// Keeps an explicit `null` distinct from a missing field.
pub(crate) fn present<'de, D>(de: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(de).map(Some)
}

/// One entry of a rule list: a matcher and what to return when it holds.
#[derive(Debug)]
pub struct Rule {
    id: Option<String>,
    matcher: Matcher,
    value: RuleValue,
}

#[derive(Debug)]
enum RuleValue {
    Single(Value),
    Multi {
        owner_type: String,
        salt: String,
        distribution: Distribution,
    },
}

/// Weighted buckets picked by hashing the owner id.
#[derive(Debug)]
pub struct Distribution {
    buckets: Vec<(Value, u64)>,
    total: u64,
}

impl Rule {
    pub(crate) fn compile(
        raw: RawRule,
        comparers: &Registry,
        value_type: Option<ValueType>,
    ) -> Result<Self, CompileError> {
        let check = |v: &Value| value_type.map_or(Ok(()), |t| t.check(v));
        let matcher = matcher::compile(&raw.matcher, comparers)?;
        let value = match raw.kind {
            RuleKind::SingleVariant => {
                let value = raw
                    .value
                    .ok_or_else(|| CompileError::Rule("single variant rule without `Value`".into()))?;
                check(&value)?;
                RuleValue::Single(value)
            }
            RuleKind::MultiVariant => {
                let owner_type = raw
                    .owner_type
                    .ok_or_else(|| CompileError::Rule("multi variant rule without `OwnerType`".into()))?;
                let salt = raw
                    .salt
                    .or_else(|| raw.id.clone())
                    .ok_or_else(|| CompileError::Rule("multi variant rule needs `Salt` or `Id`".into()))?;
                let raw_dist = raw
                    .distribution
                    .ok_or_else(|| CompileError::Rule("multi variant rule without `ValueDistribution`".into()))?;
                let distribution = Distribution::compile(raw_dist, value_type)?;
                for (v, _) in &distribution.buckets {
                    check(v)?;
                }
                RuleValue::Multi { owner_type, salt, distribution }
            }
        };
        Ok(Self { id: raw.id, matcher, value })
    }

    /// `Ok(None)` when the matcher fails or a multi variant has no owner id.
    pub fn evaluate(&self, lookup: &Lookup, hash: &HashProvider) -> Result<Option<Value>, EvalError> {
        if !self.matcher.eval(lookup)? {
            return Ok(None);
        }
        trace!(rule = ?self.id, "rule matched");
        match &self.value {
            RuleValue::Single(v) => Ok(Some(v.clone())),
            RuleValue::Multi { owner_type, salt, distribution } => {
                let Some(owner) = lookup(&format!("{owner_type}.@@id")).as_ref().and_then(as_text) else {
                    trace!(rule = ?self.id, %owner_type, "no owner id, skipping");
                    return Ok(None);
                };
                let digest = hash(format!("{owner}.{salt}").as_bytes());
                Ok(distribution.pick(bucket_of(&digest)).cloned())
            }
        }
    }
}

impl Distribution {
    fn compile(raw: RawDistribution, value_type: Option<ValueType>) -> Result<Self, CompileError> {
        let buckets: Vec<(Value, u64)> = match raw.kind.as_str() {
            "uniform" => match raw.args {
                Value::Array(values) => values.into_iter().map(|v| (v, 1)).collect(),
                _ => return Err(dist_err("`uniform` expects an array of values")),
            },
            "weighted" => match raw.args {
                Value::Object(weights) => weights
                    .into_iter()
                    .map(|(key, w)| -> Result<(Value, u64), CompileError> {
                        let value = match value_type {
                            Some(t) => t.coerce_key(&key)?,
                            None => Value::String(key),
                        };
                        Ok((value, weight(&w)?))
                    })
                    .collect::<Result<Vec<_>, CompileError>>()?,
                Value::Array(entries) => entries
                    .into_iter()
                    .map(|entry| -> Result<(Value, u64), CompileError> {
                        let Value::Object(mut e) = entry else {
                            return Err(dist_err("weighted entries must be objects"));
                        };
                        let w = weight(e.get("weight").unwrap_or(&Value::Null))?;
                        let v = e.remove("value").ok_or_else(|| dist_err("weighted entry without `value`"))?;
                        Ok((v, w))
                    })
                    .collect::<Result<Vec<_>, CompileError>>()?,
                _ => return Err(dist_err("`weighted` expects an object or an array")),
            },
            "bernoulli" => {
                let p = raw
                    .args
                    .as_f64()
                    .filter(|p| (0.0..=1.0).contains(p))
                    .ok_or_else(|| dist_err("`bernoulli` expects a probability between 0 and 1"))?;
                let yes = (p * BERNOULLI_SCALE).round() as u64;
                vec![(Value::Bool(true), yes), (Value::Bool(false), BERNOULLI_SCALE as u64 - yes)]
            }
            other => return Err(dist_err(&format!("unknown distribution type `{other}`"))),
        };
        let total = buckets
            .iter()
            .try_fold(0u64, |acc, (_, w)| acc.checked_add(*w))
            .ok_or_else(|| dist_err("total weight overflows"))?;
        if total == 0 {
            return Err(dist_err("total weight must be positive"));
        }
        Ok(Self { buckets, total })
    }

    fn pick(&self, bucket: u64) -> Option<&Value> {
        let mut n = bucket % self.total;
        self.buckets.iter().find_map(|(value, w)| {
            if n < *w {
                Some(value)
            } else {
                n -= w;
                None
            }
        })
    }
}

fn weight(w: &Value) -> Result<u64, CompileError> {
    w.as_u64()
        .ok_or_else(|| dist_err(&format!("weight {w} is not a non-negative integer")))
}

fn dist_err(reason: &str) -> CompileError {
    CompileError::Distribution(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::sha1_provider;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn rule(doc: Value, value_type: Option<ValueType>) -> Result<Rule, CompileError> {
        let raw: RawRule = serde_json::from_value(doc)?;
        Rule::compile(raw, &Registry::with_builtins(), value_type)
    }

    fn eval_with(r: &Rule, ctx: Value, hash: &HashProvider) -> Option<Value> {
        let lookup = move |key: &str| ctx.get(key).cloned();
        r.evaluate(&lookup, hash).unwrap()
    }

    #[test]
    fn single_variant_returns_value() {
        let r = rule(json!({ "Matcher": { "country": "IL" }, "Value": "IL" }), None).unwrap();
        assert_eq!(eval_with(&r, json!({ "country": "IL" }), &sha1_provider()), Some(json!("IL")));
        assert_eq!(eval_with(&r, json!({}), &sha1_provider()), None);
    }

    #[test]
    fn explicit_null_value_is_kept() {
        let r = rule(json!({ "Value": null }), None).unwrap();
        assert_eq!(eval_with(&r, json!({}), &sha1_provider()), Some(Value::Null));
        assert!(rule(json!({ "Matcher": {} }), None).is_err());
    }

    #[test]
    fn value_type_is_enforced() {
        assert!(matches!(
            rule(json!({ "Value": "yes" }), Some(ValueType::Boolean)),
            Err(CompileError::ValueType { .. })
        ));
        assert!(rule(json!({ "Value": 3 }), Some(ValueType::Number)).is_ok());
    }

    #[test]
    fn structured_value_types() {
        assert!(ValueType::Object.check(&json!({ "color": "red" })).is_ok());
        assert!(ValueType::Object.check(&json!(["red"])).is_err());
        assert!(ValueType::Array.check(&json!([1, 2])).is_ok());
        assert!(ValueType::Array.check(&json!("1,2")).is_err());
        assert!(rule(json!({ "Value": { "a": 1 } }), Some(ValueType::Object)).is_ok());
        assert!(rule(json!({ "Value": 1 }), Some(ValueType::Array)).is_err());
    }

    #[test]
    fn value_type_names() {
        let parse = |name: &str| serde_json::from_value::<ValueType>(json!(name));
        assert_eq!(parse("boolean").unwrap(), ValueType::Boolean);
        assert_eq!(parse("object").unwrap(), ValueType::Object);
        assert!(parse("version").is_err());
        assert!(parse("String").is_err());
    }

    #[test]
    fn multi_variant_buckets_by_owner() {
        let r = rule(
            json!({
                "Id": "r1",
                "Type": "MultiVariant",
                "OwnerType": "user",
                "ValueDistribution": { "type": "weighted", "args": { "a": 1, "b": 0 } }
            }),
            None,
        )
        .unwrap();
        let ctx = json!({ "user.@@id": "42" });
        assert_eq!(eval_with(&r, ctx, &sha1_provider()), Some(json!("a")));
        assert_eq!(eval_with(&r, json!({}), &sha1_provider()), None);
    }

    #[test]
    fn multi_variant_is_deterministic() {
        let r = rule(
            json!({
                "Type": "MultiVariant",
                "OwnerType": "user",
                "Salt": "exp",
                "ValueDistribution": { "type": "uniform", "args": ["x", "y", "z"] }
            }),
            None,
        )
        .unwrap();
        let hash = sha1_provider();
        for id in ["1", "2", "alice", "bob"] {
            let first = eval_with(&r, json!({ "user.@@id": id }), &hash);
            let second = eval_with(&r, json!({ "user.@@id": id }), &hash);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn stub_hash_selects_bucket() {
        let r = rule(
            json!({
                "Type": "MultiVariant",
                "OwnerType": "user",
                "Salt": "s",
                "ValueDistribution": { "type": "weighted", "args": [
                    { "value": 10, "weight": 2 },
                    { "value": 20, "weight": 3 }
                ] }
            }),
            Some(ValueType::Number),
        )
        .unwrap();
        let stub = |n: u8| -> HashProvider {
            Arc::new(move |_: &[u8]| {
                let mut d = [0u8; 20];
                d[0] = n;
                d
            })
        };
        let ctx = json!({ "user.@@id": "u" });
        assert_eq!(eval_with(&r, ctx.clone(), &stub(1)), Some(json!(10)));
        assert_eq!(eval_with(&r, ctx.clone(), &stub(2)), Some(json!(20)));
        assert_eq!(eval_with(&r, ctx, &stub(5)), Some(json!(10)));
    }

    #[test]
    fn bernoulli_extremes() {
        let always = rule(
            json!({
                "Type": "MultiVariant",
                "OwnerType": "user",
                "Salt": "s",
                "ValueDistribution": { "type": "bernoulli", "args": 1.0 }
            }),
            Some(ValueType::Boolean),
        )
        .unwrap();
        for id in ["a", "b", "c"] {
            assert_eq!(eval_with(&always, json!({ "user.@@id": id }), &sha1_provider()), Some(json!(true)));
        }
    }

    #[test]
    fn weighted_keys_follow_value_type() {
        let r = rule(
            json!({
                "Type": "MultiVariant",
                "OwnerType": "user",
                "Salt": "s",
                "ValueDistribution": { "type": "weighted", "args": { "7": 1 } }
            }),
            Some(ValueType::Number),
        )
        .unwrap();
        assert_eq!(eval_with(&r, json!({ "user.@@id": "u" }), &sha1_provider()), Some(json!(7)));
    }

    #[test]
    fn rejects_bad_distributions() {
        let multi = |dist: Value| {
            rule(
                json!({ "Type": "MultiVariant", "OwnerType": "user", "Salt": "s", "ValueDistribution": dist }),
                None,
            )
        };
        assert!(multi(json!({ "type": "uniform", "args": [] })).is_err());
        assert!(multi(json!({ "type": "weighted", "args": { "a": -1 } })).is_err());
        assert!(multi(json!({ "type": "bernoulli", "args": 1.5 })).is_err());
        assert!(multi(json!({ "type": "zipf", "args": [] })).is_err());
        assert!(matches!(
            multi(json!({ "type": "weighted", "args": { "a": u64::MAX, "b": 2 } })),
            Err(CompileError::Distribution(_))
        ));
        assert!(rule(
            json!({ "Type": "MultiVariant", "OwnerType": "user", "ValueDistribution": { "type": "uniform", "args": [1] } }),
            None
        )
        .is_err());
    }
}
