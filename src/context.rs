//! Evaluation context built from `key=value` command-line tokens.

use std::collections::HashMap;

use serde_json::Value;

use crate::errors::ContextError;

/// Case-insensitive property map handed to a compiled rule.
///
/// Keys are lower-cased on insert, so two keys differing only by case
/// collapse into one entry and the later write wins.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContextMap {
    entries: HashMap<String, Value>,
}

impl ContextMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse every token as `key=value`, splitting on the first `=` only.
    /// Fails on the first token that has no `=` or an empty key.
    pub fn parse<I, S>(tokens: I) -> Result<Self, ContextError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ctx = Self::new();
        for token in tokens {
            let token = token.as_ref();
            let (key, value) = split_token(token)?;
            ctx.insert(key, Value::String(value.to_string()));
        }
        Ok(ctx)
    }

    pub fn insert(&mut self, key: &str, value: Value) -> Option<Value> {
        self.entries.insert(key.to_lowercase(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(&key.to_lowercase())
    }

    /// Owned lookup, the shape a compiled rule asks for.
    pub fn lookup(&self, key: &str) -> Option<Value> {
        self.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn split_token(token: &str) -> Result<(&str, &str), ContextError> {
    match token.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => Err(ContextError::Malformed(token.to_string())),
    }
}
