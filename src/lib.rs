pub mod errors;
pub mod context;
pub mod engine;
pub mod comparers;  // plugin model for `$compare`
pub mod hashing;
pub mod jpad;
mod comparison;

use serde_json::Value;
use errors::Result;

pub use context::ContextMap;
pub use engine::{render, Engine};
pub use jpad::{CompiledRules, JPadParser, ParserSettings};

/// Convenience: check that `text` compiles with the default settings.
pub fn compile(text: &str) -> Result<CompiledRules> {
    Engine::new().compile(text)
}

/// Convenience: compile `text` and evaluate it against `key=value` tokens.
pub fn calc<I, S>(text: &str, tokens: I) -> Result<Option<Value>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let engine = Engine::new();
    let rules = engine.compile(text)?;
    let ctx = ContextMap::parse(tokens)?;
    engine.calculate(&rules, &ctx)
}
