//! Evaluation context — the bundle threaded through every schema node.
//!
//! A context is derived per recursion step by structural copy-with-override.
//! The store is shared by reference; every other field belongs to the
//! derived copy, so a child never changes what its parent sees.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::operator::OperatorRegistry;
use crate::path::PathResolver;
use crate::schema::EvalOptions;
use crate::store::Store;

/// Reserved first path segment addressing the siblings map.
pub const SIBLINGS_ROOT: &str = "siblings";

#[derive(Clone)]
pub struct Context {
    store: Store,
    /// Value currently being transformed.
    pub target: Value,
    /// Already-computed peer properties.
    pub siblings: Map<String, Value>,
    /// Named auxiliary values injected by an enclosing operation.
    pub sources: Map<String, Value>,
    functions: Arc<OperatorRegistry>,
    fetcher: Option<Arc<dyn Fetcher>>,
    resolver: PathResolver,
    options: Arc<EvalOptions>,
    cancel: CancellationToken,
    depth: usize,
}

impl Context {
    /// A root context; the target starts as a snapshot of the store.
    pub fn new(store: Store) -> Self {
        let target = store.snapshot();
        Self {
            store,
            target,
            siblings: Map::new(),
            sources: Map::new(),
            functions: Arc::new(OperatorRegistry::new()),
            fetcher: None,
            resolver: PathResolver::default(),
            options: Arc::new(EvalOptions::default()),
            cancel: CancellationToken::new(),
            depth: 0,
        }
    }

    // ── Overrides ───────────────────────────────────────────────────

    pub fn with_target(mut self, target: Value) -> Self {
        self.target = target;
        self
    }

    pub fn with_siblings(mut self, siblings: Map<String, Value>) -> Self {
        self.siblings = siblings;
        self
    }

    pub fn with_sources(mut self, sources: Map<String, Value>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_source(mut self, name: impl Into<String>, value: Value) -> Self {
        self.sources.insert(name.into(), value);
        self
    }

    pub fn with_functions(mut self, functions: Arc<OperatorRegistry>) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_resolver(mut self, resolver: PathResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_options(mut self, options: EvalOptions) -> Self {
        self.options = Arc::new(options);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn functions(&self) -> &OperatorRegistry {
        &self.functions
    }

    pub fn fetcher(&self) -> Option<&Arc<dyn Fetcher>> {
        self.fetcher.as_ref()
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn options(&self) -> &EvalOptions {
        &self.options
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    // ── Derivation ──────────────────────────────────────────────────

    /// Context for a nested evaluation whose target is `target`.
    ///
    /// Fails once nesting exceeds `max_depth`, which is how self-referencing
    /// `schemaFrom` chains terminate.
    pub fn child(&self, target: Value) -> Result<Context> {
        let depth = self.depth + 1;
        if depth > self.options.max_depth {
            return Err(Error::validation(format!(
                "schema nesting exceeds max depth {}",
                self.options.max_depth
            )));
        }
        let mut child = self.clone();
        child.target = target;
        child.depth = depth;
        Ok(child)
    }

    /// `Err(Cancelled)` once the evaluation's token has fired.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    // ── Lookups ─────────────────────────────────────────────────────

    /// Scoped lookup used by the `path` key.
    ///
    /// The first segment is matched against the sources, then the reserved
    /// `siblings` root, and finally the path is read from `base`.
    pub fn lookup(&self, base: &Value, path: &str) -> Option<Value> {
        let segments = self.resolver.split(path);
        let Some((first, rest)) = segments.split_first() else {
            return Some(base.clone());
        };
        if let Some(source) = self.sources.get(first) {
            return self.resolver.get(source, rest).cloned();
        }
        if first == SIBLINGS_ROOT {
            return self.read_map(&self.siblings, rest);
        }
        self.resolver.get(base, &segments).cloned()
    }

    /// Read from the siblings map.
    pub fn sibling(&self, path: &str) -> Option<Value> {
        self.read_map(&self.siblings, &self.resolver.split(path))
    }

    /// Read from the sources map.
    pub fn source(&self, path: &str) -> Option<Value> {
        self.read_map(&self.sources, &self.resolver.split(path))
    }

    fn read_map(&self, map: &Map<String, Value>, segments: &[String]) -> Option<Value> {
        let Some((first, rest)) = segments.split_first() else {
            return Some(Value::Object(map.clone()));
        };
        self.resolver.get(map.get(first)?, rest).cloned()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("target", &self.target)
            .field("siblings", &self.siblings)
            .field("sources", &self.sources)
            .field("functions", &self.functions.names())
            .field("fetcher", &self.fetcher.as_ref().map(|f| f.name().to_string()))
            .field("separator", &self.resolver.separator())
            .field("depth", &self.depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn target_defaults_to_store() {
        let ctx = Context::new(Store::new(json!({"a": 1})));
        assert_eq!(ctx.target, json!({"a": 1}));
    }

    #[test]
    fn child_does_not_touch_parent() {
        let parent = Context::new(Store::new(json!({}))).with_source("x", json!(1));
        let child = parent.child(json!("t")).unwrap().with_source("x", json!(2));
        assert_eq!(parent.sources["x"], json!(1));
        assert_eq!(child.sources["x"], json!(2));
        assert_eq!(child.depth(), 1);
        assert!(child.store().same_as(parent.store()));
    }

    #[test]
    fn child_respects_max_depth() {
        let ctx = Context::new(Store::default()).with_options(EvalOptions {
            max_depth: 1,
            ..EvalOptions::default()
        });
        let child = ctx.child(Value::Null).unwrap();
        assert!(child.child(Value::Null).is_err());
    }

    #[test]
    fn lookup_prefers_sources_then_siblings_then_base() {
        let mut siblings = Map::new();
        siblings.insert("total".into(), json!(7));
        let ctx = Context::new(Store::default())
            .with_source("current", json!({"id": 3}))
            .with_siblings(siblings);
        let base = json!({"current": "shadowed", "name": "n"});

        assert_eq!(ctx.lookup(&base, "current.id"), Some(json!(3)));
        assert_eq!(ctx.lookup(&base, "siblings.total"), Some(json!(7)));
        assert_eq!(ctx.lookup(&base, "name"), Some(json!("n")));
        assert_eq!(ctx.lookup(&base, "missing"), None);
        assert_eq!(ctx.lookup(&base, ""), Some(base.clone()));
    }

    #[test]
    fn cancellation_is_observable() {
        let token = CancellationToken::new();
        let ctx = Context::new(Store::default()).with_cancellation(token.clone());
        assert!(ctx.check_cancelled().is_ok());
        token.cancel();
        assert!(matches!(ctx.check_cancelled(), Err(Error::Cancelled)));
    }
}
