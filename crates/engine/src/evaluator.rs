//! Synchronous schema evaluator.
//!
//! Primitives are constants, sequences evaluate element-wise, and mappings
//! are planned into a [`Pipeline`](crate::pipeline::Pipeline) folded over
//! the incoming target. Async-only keys are skipped.

use serde_json::Value;

use moldeo_core::operator::EvaluatorHandle;
use moldeo_core::{Context, Result};

use crate::directive::plan;

/// Evaluate `schema` against `ctx`.
pub fn evaluate(schema: &Value, ctx: &Context) -> Result<Value> {
    ctx.check_cancelled()?;
    match schema {
        Value::Object(node) => plan(node, ctx.options())?.build(ctx, ctx.target.clone()),
        Value::Array(items) => items
            .iter()
            .map(|item| evaluate(item, ctx))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        constant => Ok(constant.clone()),
    }
}

/// The [`EvaluatorHandle`] operators receive.
///
/// Its context targets the operator's current value. Evaluation through
/// the handle is synchronous even inside an async evaluation.
pub struct Handle {
    ctx: Context,
}

impl Handle {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

impl EvaluatorHandle for Handle {
    fn context(&self) -> &Context {
        &self.ctx
    }

    fn evaluate(&self, schema: &Value) -> Result<Value> {
        evaluate(schema, &self.ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moldeo_core::{Error, EvalOptions, Store, UnknownKeyPolicy};
    use serde_json::json;

    fn ctx(store: Value) -> Context {
        Context::new(Store::new(store))
    }

    #[test]
    fn primitives_are_constants() {
        assert_eq!(evaluate(&json!(5), &ctx(json!({}))).unwrap(), json!(5));
        assert_eq!(evaluate(&json!("x"), &ctx(json!({}))).unwrap(), json!("x"));
    }

    #[test]
    fn empty_schema_is_identity() {
        let ctx = ctx(json!({"a": [1, 2]}));
        assert_eq!(evaluate(&json!({}), &ctx).unwrap(), json!({"a": [1, 2]}));
    }

    #[test]
    fn sequences_evaluate_positionally() {
        let ctx = ctx(json!({"a": 1, "b": 2}));
        let schema = json!([{"path": "b"}, 7, {"path": "a"}]);
        assert_eq!(evaluate(&schema, &ctx).unwrap(), json!([2, 7, 1]));
    }

    #[test]
    fn lookups_read_their_roots() {
        let ctx = ctx(json!({"user": {"name": "Ana"}}))
            .with_target(json!({"local": true}))
            .with_source("env", json!({"region": "eu"}));
        assert_eq!(evaluate(&json!({"store": "user.name"}), &ctx).unwrap(), json!("Ana"));
        assert_eq!(evaluate(&json!({"target": "local"}), &ctx).unwrap(), json!(true));
        assert_eq!(evaluate(&json!({"source": "env.region"}), &ctx).unwrap(), json!("eu"));
        assert_eq!(evaluate(&json!({"path": "missing"}), &ctx).unwrap(), Value::Null);
    }

    #[test]
    fn not_negates() {
        let ctx = ctx(json!({"flag": true}));
        assert_eq!(evaluate(&json!({"path": "flag", "not": true}), &ctx).unwrap(), json!(false));
        assert_eq!(evaluate(&json!({"not": {"const": 0}}), &ctx).unwrap(), json!(true));
    }

    #[test]
    fn if_reads_store_path_or_schema() {
        let ctx = ctx(json!({"admin": true}));
        let by_path = json!({"if": "admin", "then": {"const": "yes"}, "else": {"const": "no"}});
        assert_eq!(evaluate(&by_path, &ctx).unwrap(), json!("yes"));
        let by_schema = json!({"const": 3, "if": {"equals": 4}, "then": {"const": "four"}});
        assert_eq!(evaluate(&by_schema, &ctx).unwrap(), json!(3));
    }

    #[test]
    fn set_and_increment_write_the_store() {
        let store = Store::new(json!({}));
        let ctx = Context::new(store.clone());
        let result = evaluate(&json!({"const": "v", "set": "saved.value"}), &ctx).unwrap();
        assert_eq!(result, json!("v"));
        evaluate(&json!({"increment": "hits"}), &ctx).unwrap();
        let hits = evaluate(&json!({"increment": {"path": "hits", "by": 4}}), &ctx).unwrap();
        assert_eq!(hits, json!(5));
        assert_eq!(store.snapshot(), json!({"saved": {"value": "v"}, "hits": 5}));
    }

    #[test]
    fn store_writes_through_a_scalar_are_unavailable() {
        let store = Store::new(json!({"count": 3}));
        let ctx = Context::new(store.clone());
        for schema in [
            json!({"const": 1, "set": "count.total"}),
            json!({"increment": "count.total"}),
            json!({"selectSet": {"path": "count.picked", "value": "a"}}),
        ] {
            let err = evaluate(&schema, &ctx).unwrap_err();
            assert!(
                matches!(err, Error::TargetUnavailable { ref path } if path.starts_with("count.")),
                "schema {schema}"
            );
        }
        assert_eq!(store.snapshot(), json!({"count": 3}));

        let recovered = json!({
            "const": 1,
            "set": "count.total",
            "onError": {"source": "error.kind"}
        });
        assert_eq!(evaluate(&recovered, &ctx).unwrap(), json!("target_unavailable"));
    }

    #[test]
    fn select_set_toggles_store_sequence() {
        let store = Store::new(json!({}));
        let ctx = Context::new(store.clone());
        let schema = json!({"selectSet": {"path": "picked", "value": "a", "multiple": true}});
        assert_eq!(evaluate(&schema, &ctx).unwrap(), json!(["a"]));
        assert_eq!(evaluate(&schema, &ctx).unwrap(), json!([]));
    }

    #[test]
    fn schema_from_evaluates_twice() {
        let ctx = ctx(json!({"rule": {"const": 42}}));
        assert_eq!(evaluate(&json!({"schemaFrom": {"store": "rule"}}), &ctx).unwrap(), json!(42));
    }

    #[test]
    fn self_reference_hits_depth_limit() {
        let ctx = ctx(json!({"loop": {"schemaFrom": {"store": "loop"}}})).with_options(EvalOptions {
            max_depth: 16,
            ..EvalOptions::default()
        });
        let err = evaluate(&json!({"schemaFrom": {"store": "loop"}}), &ctx).unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(ref m) if m.contains("depth")));
    }

    #[test]
    fn self_reference_stops_at_default_depth() {
        let ctx = ctx(json!({"loop": {"schemaFrom": {"store": "loop"}}}));
        assert_eq!(ctx.options().max_depth, moldeo_core::DEFAULT_MAX_DEPTH);
        let err = evaluate(&json!({"schemaFrom": {"store": "loop"}}), &ctx).unwrap_err();
        let expected = format!("max depth {}", moldeo_core::DEFAULT_MAX_DEPTH);
        assert!(matches!(err, Error::ValidationFailed(ref m) if m.contains(&expected)));
    }

    #[test]
    fn reduce_many_chains_targets() {
        let ctx = ctx(json!({}));
        let schema = json!({"const": [1, 2, 3], "reduceMany": [{"calc": "sumar"}, {"equals": 6}]});
        assert_eq!(evaluate(&schema, &ctx).unwrap(), json!(true));
    }

    #[test]
    fn delay_is_skipped_synchronously() {
        let ctx = ctx(json!({}));
        assert_eq!(evaluate(&json!({"const": 1, "delay": 50}), &ctx).unwrap(), json!(1));
    }

    #[test]
    fn unknown_keys_follow_policy() {
        let permissive = ctx(json!({}));
        assert_eq!(
            evaluate(&json!({"const": 1, "colour": "red"}), &permissive).unwrap(),
            json!(1)
        );
        let strict = permissive.with_options(EvalOptions {
            unknown_keys: UnknownKeyPolicy::Reject,
            ..EvalOptions::default()
        });
        assert!(evaluate(&json!({"const": 1, "colour": "red"}), &strict).is_err());
    }

    #[test]
    fn on_error_recovers_with_descriptor() {
        let ctx = ctx(json!({}));
        let schema = json!({
            "const": 1,
            "filter": {"const": true},
            "onError": {"path": "kind"}
        });
        assert_eq!(evaluate(&schema, &ctx).unwrap(), json!("not_an_array"));
    }

    #[test]
    fn finally_sees_outcome() {
        let store = Store::new(json!({}));
        let ctx = Context::new(store.clone());
        let schema = json!({"const": 9, "finally": {"set": "last"}});
        assert_eq!(evaluate(&schema, &ctx).unwrap(), json!(9));
        assert_eq!(store.snapshot(), json!({"last": 9}));
    }

    #[test]
    fn operators_receive_current_and_previous() {
        let mut functions = moldeo_core::OperatorRegistry::new();
        functions.register_fn("pair", |current, previous, _| Ok(json!([previous, current])));
        let ctx = ctx(json!({})).with_target(json!("before")).with_functions(functions.into());
        let schema = json!({"const": "after", "use": "pair"});
        assert_eq!(evaluate(&schema, &ctx).unwrap(), json!(["before", "after"]));

        let bound = json!({"const": "acc", "function": "pair", "bindArg": {"const": "bound"}});
        assert_eq!(evaluate(&bound, &ctx).unwrap(), json!(["acc", "bound"]));
    }

    #[test]
    fn unknown_operator_fails() {
        let ctx = ctx(json!({}));
        let err = evaluate(&json!({"call": {"name": "ghost"}}), &ctx).unwrap_err();
        assert!(matches!(err, Error::UnknownOperator(_)));
    }
}
