//! The JPad rule compiler.
//!
//! A document is either a bare array of rules, or an object with
//! `partitions`, `rules`, `defaultValue` and `valueType`. With partitions,
//! `rules` nests one object level per partition, keyed by the partition's
//! value or `"*"`, and holds rule arrays at the leaves.

pub mod matcher;
pub mod rule;

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::comparers::Registry;
use crate::comparison::as_text;
use crate::errors::{CompileError, EvalError};
use crate::hashing::{sha1_provider, HashProvider};
use rule::{present, RawRule, Rule, ValueType};

/// Context lookup handed to a compiled document: property name → value.
pub type Lookup<'a> = dyn Fn(&str) -> Option<Value> + 'a;

const WILDCARD: &str = "*";

/// Extension points every compilation shares.
#[derive(Clone)]
pub struct ParserSettings {
    hash: HashProvider,
    comparers: Registry,
}

impl ParserSettings {
    pub fn new(hash: HashProvider, comparers: Registry) -> Self {
        Self { hash, comparers }
    }

    pub fn comparers(&self) -> &Registry {
        &self.comparers
    }

    pub fn hash_provider(&self) -> &HashProvider {
        &self.hash
    }
}

/// SHA-1 hashing and the built-in comparers.
impl Default for ParserSettings {
    fn default() -> Self {
        Self::new(sha1_provider(), Registry::with_builtins())
    }
}

impl fmt::Debug for ParserSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserSettings")
            .field("comparers", &self.comparers)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, Default)]
pub struct JPadParser {
    settings: ParserSettings,
}

impl JPadParser {
    pub fn new(settings: ParserSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ParserSettings {
        &self.settings
    }

    pub fn parse(&self, text: &str) -> Result<CompiledRules, CompileError> {
        let doc: Value = serde_json::from_str(text)?;
        let raw = if doc.is_array() {
            RawDocument {
                partitions: Vec::new(),
                rules: doc,
                default_value: None,
                value_type: None,
            }
        } else {
            RawDocument::deserialize(doc)?
        };
        if let (Some(t), Some(v)) = (raw.value_type, &raw.default_value) {
            t.check(v)?;
        }
        let tree = RuleTree::build(raw.partitions.len(), raw.rules, self, raw.value_type)?;
        debug!(partitions = ?raw.partitions, rules = tree.count(), "compiled jpad");
        Ok(CompiledRules {
            partitions: raw.partitions,
            tree,
            default_value: raw.default_value,
            hash: self.settings.hash.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    #[serde(default)]
    partitions: Vec<String>,
    rules: Value,
    #[serde(default, deserialize_with = "present")]
    default_value: Option<Value>,
    #[serde(default)]
    value_type: Option<ValueType>,
}

/// A compiled document, ready to evaluate against any context.
pub struct CompiledRules {
    partitions: Vec<String>,
    tree: RuleTree,
    default_value: Option<Value>,
    hash: HashProvider,
}

impl fmt::Debug for CompiledRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRules")
            .field("partitions", &self.partitions)
            .field("tree", &self.tree)
            .field("default_value", &self.default_value)
            .finish_non_exhaustive()
    }
}

impl CompiledRules {
    /// First matching rule's value, else the document default, else `None`.
    pub fn evaluate(&self, lookup: &Lookup) -> Result<Option<Value>, EvalError> {
        let hit = self.tree.evaluate(&self.partitions, lookup, &self.hash)?;
        Ok(hit.or_else(|| self.default_value.clone()))
    }

    pub fn partitions(&self) -> &[String] {
        &self.partitions
    }
}

#[derive(Debug)]
enum RuleTree {
    Leaf(Vec<Rule>),
    Branch {
        exact: HashMap<String, RuleTree>,
        fallback: Option<Box<RuleTree>>,
    },
}

impl RuleTree {
    fn build(
        depth: usize,
        node: Value,
        parser: &JPadParser,
        value_type: Option<ValueType>,
    ) -> Result<Self, CompileError> {
        if depth == 0 {
            let raw = Vec::<RawRule>::deserialize(node)?;
            let rules = raw
                .into_iter()
                .map(|r| Rule::compile(r, parser.settings.comparers(), value_type))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(RuleTree::Leaf(rules));
        }
        let children = match node {
            Value::Object(children) => children,
            other => return Err(CompileError::Rule(format!("expected a partition object, got {other}"))),
        };
        let mut exact = HashMap::new();
        let mut fallback = None;
        for (key, child) in children {
            let subtree = RuleTree::build(depth - 1, child, parser, value_type)?;
            if key == WILDCARD {
                fallback = Some(Box::new(subtree));
            } else {
                exact.insert(key.to_lowercase(), subtree);
            }
        }
        Ok(RuleTree::Branch { exact, fallback })
    }

    fn evaluate(
        &self,
        partitions: &[String],
        lookup: &Lookup,
        hash: &HashProvider,
    ) -> Result<Option<Value>, EvalError> {
        match self {
            RuleTree::Leaf(rules) => {
                for rule in rules {
                    if let Some(v) = rule.evaluate(lookup, hash)? {
                        return Ok(Some(v));
                    }
                }
                Ok(None)
            }
            RuleTree::Branch { exact, fallback } => {
                let Some((head, rest)) = partitions.split_first() else {
                    return Ok(None);
                };
                let key = lookup(head).as_ref().and_then(as_text).map(|k| k.to_lowercase());
                if let Some(subtree) = key.and_then(|k| exact.get(&k)) {
                    if let Some(v) = subtree.evaluate(rest, lookup, hash)? {
                        return Ok(Some(v));
                    }
                }
                match fallback {
                    Some(subtree) => subtree.evaluate(rest, lookup, hash),
                    None => Ok(None),
                }
            }
        }
    }

    fn count(&self) -> usize {
        match self {
            RuleTree::Leaf(rules) => rules.len(),
            RuleTree::Branch { exact, fallback } => {
                exact.values().map(RuleTree::count).sum::<usize>()
                    + fallback.as_ref().map_or(0, |f| f.count())
            }
        }
    }
}
