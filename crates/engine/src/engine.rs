//! The engine facade: configuration, collaborators and the error policy.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};

use moldeo_config::{EngineConfig, ErrorPolicy};
use moldeo_core::operator::{EvaluatorHandle, Operator, OperatorRegistry};
use moldeo_core::{Context, Fetcher, PathResolver, Result, Store};
use moldeo_tools::{HttpFetcher, default_operators};

use crate::async_eval::evaluate_async;
use crate::evaluation::{Evaluation, EvaluationState};
use crate::evaluator::evaluate;

/// Entry point for evaluating schemas.
///
/// Holds the configuration, the operator table and the fetch collaborator
/// every context it builds will carry.
#[derive(Clone)]
pub struct Engine {
    config: EngineConfig,
    functions: Arc<OperatorRegistry>,
    fetcher: Option<Arc<dyn Fetcher>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Default configuration and the built-in operators, without a fetcher.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            functions: Arc::new(default_operators()),
            fetcher: None,
        }
    }

    /// Build from configuration, wiring the HTTP fetcher from `[fetch]`.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = HttpFetcher::new(&config.fetch)?;
        Ok(Self {
            config,
            functions: Arc::new(default_operators()),
            fetcher: Some(Arc::new(fetcher)),
        })
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.config.error_policy = policy;
        self
    }

    /// Register an operator, replacing any operator with the same name.
    pub fn register(&mut self, operator: Arc<dyn Operator>) -> &mut Self {
        Arc::make_mut(&mut self.functions).register(operator);
        self
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Value, Value, &dyn EvaluatorHandle) -> Result<Value> + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.functions).register_fn(name, f);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn operators(&self) -> &OperatorRegistry {
        &self.functions
    }

    /// A root context over `store` carrying this engine's collaborators.
    pub fn context(&self, store: Store) -> Context {
        let ctx = Context::new(store)
            .with_functions(self.functions.clone())
            .with_resolver(PathResolver::new(self.config.separator.clone()))
            .with_options(self.config.eval_options());
        match &self.fetcher {
            Some(fetcher) => ctx.with_fetcher(fetcher.clone()),
            None => ctx,
        }
    }

    /// Evaluate synchronously; async-only keys are skipped.
    pub fn evaluate(&self, schema: &Value, ctx: &Context) -> Result<Value> {
        info!(mode = "sync", "Evaluating schema");
        let result = evaluate(schema, ctx);
        apply_policy(self.config.error_policy, result)
    }

    pub async fn evaluate_async(&self, schema: &Value, ctx: &Context) -> Result<Value> {
        info!(mode = "async", "Evaluating schema");
        let result = evaluate_async(schema, ctx).await;
        apply_policy(self.config.error_policy, result)
    }

    /// Spawn an asynchronous evaluation on the current tokio runtime.
    ///
    /// The evaluation gets its own token, a child of the context's, so
    /// cancelling the caller's token also cancels it.
    pub fn start(&self, schema: Value, ctx: Context) -> Evaluation {
        let token = ctx.cancellation().child_token();
        let ctx = ctx.with_cancellation(token.clone());
        let (state_tx, state_rx) = watch::channel(EvaluationState::Pending);
        let policy = self.config.error_policy;

        let task = tokio::spawn(async move {
            state_tx.send_replace(EvaluationState::Running);
            let result = apply_policy(policy, evaluate_async(&schema, &ctx).await);
            let state = EvaluationState::settled(&result);
            info!(%state, "Evaluation settled");
            state_tx.send_replace(state);
            result
        });

        Evaluation::new(token, state_rx, task)
    }
}

/// Apply the top-level error policy. Cancellation always reaches the caller.
fn apply_policy(policy: ErrorPolicy, result: Result<Value>) -> Result<Value> {
    match result {
        Err(err) if !err.is_cancelled() && policy == ErrorPolicy::Swallow => {
            warn!(error = %err, kind = err.kind().as_str(), "Swallowing evaluation error");
            Ok(Value::Null)
        }
        other => other,
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("operators", &self.functions.names())
            .field("fetcher", &self.fetcher.as_ref().map(|f| f.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moldeo_core::Error;
    use serde_json::json;

    #[test]
    fn context_uses_configured_separator() {
        let mut config = EngineConfig::default();
        config.separator = "/".into();
        let engine = Engine::from_config(config).unwrap();
        let ctx = engine.context(Store::new(json!({"a": {"b": 1}})));
        assert_eq!(engine.evaluate(&json!({"path": "a/b"}), &ctx).unwrap(), json!(1));
    }

    #[test]
    fn propagate_policy_returns_errors() {
        let engine = Engine::new();
        let ctx = engine.context(Store::default());
        let err = engine.evaluate(&json!({"const": 1, "map": {}}), &ctx).unwrap_err();
        assert!(matches!(err, Error::NotAnArray { .. }));
    }

    #[test]
    fn swallow_policy_yields_null() {
        let engine = Engine::new().with_error_policy(ErrorPolicy::Swallow);
        let ctx = engine.context(Store::default());
        assert_eq!(engine.evaluate(&json!({"const": 1, "map": {}}), &ctx).unwrap(), Value::Null);
    }

    #[test]
    fn swallow_policy_still_returns_cancellation() {
        let result = apply_policy(ErrorPolicy::Swallow, Err(Error::Cancelled));
        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn registered_operators_are_available() {
        let mut engine = Engine::new();
        engine.register_fn("shout", |current, _, _| {
            Ok(json!(format!("{}!", current.as_str().unwrap_or_default())))
        });
        let ctx = engine.context(Store::default());
        let schema = json!({"const": "hola", "use": ["upper", "shout"]});
        assert_eq!(engine.evaluate(&schema, &ctx).unwrap(), json!("HOLA!"));
        assert!(engine.operators().get("sumar").is_some());
    }

    #[test]
    fn operator_handle_can_write_the_store() {
        let mut engine = Engine::new();
        engine.register_fn("remember", |current, _, handle| {
            handle.set("remembered", current.clone())?;
            handle.evaluate(&json!({"const": "ok"}))
        });
        let store = Store::new(json!({}));
        let ctx = engine.context(store.clone());
        let result = engine.evaluate(&json!({"const": 4, "call": "remember"}), &ctx).unwrap();
        assert_eq!(result, json!("ok"));
        assert_eq!(store.snapshot(), json!({"remembered": 4}));
    }
}
