//! Cancellation-aware asynchronous evaluator.
//!
//! Mirrors [`evaluate`](crate::evaluator::evaluate) but awaits every step,
//! so `delay` and `consulta` suspend instead of being skipped. The
//! context's cancellation token is checked before every node and every
//! step, and raced against every suspension point.

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde_json::Value;

use moldeo_core::{Context, Error, Result};

use crate::directive::plan;

/// Evaluate `schema` against `ctx`, suspending where the schema asks to.
pub fn evaluate_async<'a>(schema: &'a Value, ctx: &'a Context) -> BoxFuture<'a, Result<Value>> {
    async move {
        ctx.check_cancelled()?;
        match schema {
            Value::Object(node) => {
                let pipeline = plan(node, ctx.options())?;
                pipeline.build_async(ctx, ctx.target.clone()).await
            }
            Value::Array(items) => {
                let branches = items.iter().map(|item| evaluate_async(item, ctx));
                settle_all(join_all(branches).await).map(Value::Array)
            }
            constant => Ok(constant.clone()),
        }
    }
    .boxed()
}

/// Join the results of settled fan-out branches, all or nothing.
///
/// `Cancelled` wins over any other failure; otherwise the first failure in
/// input order is returned.
pub fn settle_all(results: Vec<Result<Value>>) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(results.len());
    let mut failure = None;
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => {
                failure.get_or_insert(err);
            }
        }
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(values),
    }
}
