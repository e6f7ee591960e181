//! Operator trait — pluggable value transforms.
//!
//! Operators are looked up by name from the context's function table by the
//! `use`, `function` and `call` keys. Each receives the current value, the
//! previous value and a handle back into the evaluator, which is the
//! sanctioned way for an operator to evaluate sub-schemas or write to the
//! store.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::context::Context;
use crate::error::{Error, Result};

/// Callback surface handed to operators.
pub trait EvaluatorHandle {
    /// The context the operator runs in.
    fn context(&self) -> &Context;

    /// Evaluate a schema against the operator's context.
    fn evaluate(&self, schema: &Value) -> Result<Value>;

    /// Read a store path.
    fn get(&self, path: &str) -> Option<Value> {
        let ctx = self.context();
        ctx.store().get(ctx.resolver(), path)
    }

    /// Write a store path.
    fn set(&self, path: &str, value: Value) -> Result<()> {
        let ctx = self.context();
        ctx.store().set(ctx.resolver(), path, value)
    }
}

/// The core Operator trait.
pub trait Operator: Send + Sync {
    /// The unique name of this operator (e.g., "upper", "sumar").
    fn name(&self) -> &str;

    /// A one-line description, shown by `moldeo keys`.
    fn description(&self) -> &str {
        ""
    }

    /// Transform `current`. `previous` is the value the schema node started from.
    fn apply(&self, current: Value, previous: Value, handle: &dyn EvaluatorHandle)
    -> Result<Value>;
}

/// Adapter turning a closure into an [`Operator`].
pub struct FnOperator<F> {
    name: String,
    f: F,
}

impl<F> FnOperator<F>
where
    F: Fn(Value, Value, &dyn EvaluatorHandle) -> Result<Value> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Operator for FnOperator<F>
where
    F: Fn(Value, Value, &dyn EvaluatorHandle) -> Result<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(
        &self,
        current: Value,
        previous: Value,
        handle: &dyn EvaluatorHandle,
    ) -> Result<Value> {
        (self.f)(current, previous, handle)
    }
}

/// A registry of available operators.
#[derive(Clone, Default)]
pub struct OperatorRegistry {
    operators: HashMap<String, Arc<dyn Operator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operator. Replaces any existing operator with the same name.
    pub fn register(&mut self, operator: Arc<dyn Operator>) -> Option<Arc<dyn Operator>> {
        let name = operator.name().to_string();
        self.operators.insert(name, operator)
    }

    /// Register a closure under `name`.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F) -> Option<Arc<dyn Operator>>
    where
        F: Fn(Value, Value, &dyn EvaluatorHandle) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnOperator::new(name, f)))
    }

    /// Get an operator by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Operator>> {
        self.operators.get(name).cloned()
    }

    /// Apply the named operator.
    pub fn apply(
        &self,
        name: &str,
        current: Value,
        previous: Value,
        handle: &dyn EvaluatorHandle,
    ) -> Result<Value> {
        let operator = self
            .operators
            .get(name)
            .ok_or_else(|| Error::UnknownOperator(name.to_string()))?;
        operator.apply(current, previous, handle)
    }

    /// List all registered operator names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

impl std::fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("operators", &self.names())
            .finish()
    }
}
