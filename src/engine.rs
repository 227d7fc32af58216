use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::context::ContextMap;
use crate::errors::{Error, Result};
use crate::jpad::{CompiledRules, JPadParser, ParserSettings};

// =========================
// Command pipeline
// =========================

/// Compiles rule files and evaluates them. Built once per process and
/// borrowed by every command handler.
#[derive(Clone, Debug, Default)]
pub struct Engine {
    parser: JPadParser,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: ParserSettings) -> Self {
        Self { parser: JPadParser::new(settings) }
    }

    /// Compile rule text. The compiler's reason is logged, not returned.
    pub fn compile(&self, text: &str) -> Result<CompiledRules> {
        self.parser.parse(text).map_err(|e| {
            debug!(error = %e, "jpad compilation failed");
            Error::InvalidRule
        })
    }

    pub fn compile_file(&self, path: &Path) -> Result<CompiledRules> {
        let text = read_rule(path)?;
        debug!(path = %path.display(), bytes = text.len(), "read jpad");
        self.compile(&text)
    }

    /// Evaluate once against `ctx`; `None` when nothing matched.
    pub fn calculate(&self, rules: &CompiledRules, ctx: &ContextMap) -> Result<Option<Value>> {
        let lookup = |key: &str| ctx.lookup(key);
        let result = rules.evaluate(&lookup)?;
        debug!(context = ctx.len(), found = result.is_some(), "evaluated jpad");
        Ok(result)
    }

    /// `compile` command: `Ok` means the file holds a valid document.
    pub fn validate_file(&self, path: &Path) -> Result<()> {
        self.compile_file(path).map(|_| ())
    }

    /// `calc` command: compile the file, parse the context tokens, evaluate,
    /// and render the result.
    pub fn calc_file<I, S>(&self, path: &Path, tokens: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = self.compile_file(path)?;
        let ctx = ContextMap::parse(tokens)?;
        let result = self.calculate(&rules, &ctx)?;
        Ok(render(result.as_ref()))
    }
}

pub fn read_rule(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Compact JSON text for a result; absent renders as `null`.
pub fn render(result: Option<&Value>) -> String {
    result.unwrap_or(&Value::Null).to_string()
}
