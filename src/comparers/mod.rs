use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::EvalError;

/// A named total order over string operands, used by `$compare` matchers.
pub trait Comparer: Send + Sync {
    fn name(&self) -> &'static str;
    fn compare(&self, a: &str, b: &str) -> Result<Ordering, EvalError>;
}

/// Read-only comparer table shared by every compilation.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<HashMap<&'static str, Arc<dyn Comparer>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut map: HashMap<&'static str, Arc<dyn Comparer>> = HashMap::new();
        map.insert("version", Arc::new(builtins::Version));
        Self { inner: Arc::new(map) }
    }

    pub fn register<C: Comparer + 'static>(&mut self, c: C) {
        let map = Arc::make_mut(&mut self.inner);
        map.insert(c.name(), Arc::new(c));
    }

    /// Register a plain function under `name`.
    pub fn register_fn<F>(&mut self, name: &'static str, f: F)
    where
        F: Fn(&str, &str) -> Result<Ordering, EvalError> + Send + Sync + 'static,
    {
        self.register(FnComparer { name, f });
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Comparer>> {
        self.inner.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.inner.keys().copied()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("Registry").field("comparers", &names).finish()
    }
}

struct FnComparer<F> {
    name: &'static str,
    f: F,
}

impl<F> Comparer for FnComparer<F>
where
    F: Fn(&str, &str) -> Result<Ordering, EvalError> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn compare(&self, a: &str, b: &str) -> Result<Ordering, EvalError> {
        (self.f)(a, b)
    }
}

pub mod builtins {
    use super::*;
    use itertools::{EitherOrBoth, Itertools};

    /// Dotted numeric versions, `major[.minor[.build[.revision]]]`.
    /// Missing trailing components compare as zero.
    pub struct Version;

    impl Comparer for Version {
        fn name(&self) -> &'static str { "version" }

        fn compare(&self, a: &str, b: &str) -> Result<Ordering, EvalError> {
            let a = parse_version(a)?;
            let b = parse_version(b)?;
            let ord = a
                .iter()
                .zip_longest(b.iter())
                .map(|pair| match pair {
                    EitherOrBoth::Both(x, y) => x.cmp(y),
                    EitherOrBoth::Left(x) => x.cmp(&0),
                    EitherOrBoth::Right(y) => 0.cmp(y),
                })
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal);
            Ok(ord)
        }
    }

    fn parse_version(raw: &str) -> Result<Vec<u32>, EvalError> {
        let fail = |reason: &str| EvalError::Comparison {
            comparer: "version".into(),
            operand: raw.to_string(),
            reason: reason.to_string(),
        };
        let parts = raw
            .trim()
            .split('.')
            .map(|p| {
                if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(fail("components must be decimal digits"));
                }
                p.parse::<u32>().map_err(|e| fail(&e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if parts.len() > 4 {
            return Err(fail("more than four components"));
        }
        Ok(parts)
    }
}
