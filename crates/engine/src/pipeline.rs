//! Task pipeline — the ordered steps planned from one schema node.
//!
//! A pipeline holds three lists: primary steps folded over the accumulated
//! value, recovery steps that run once when a primary step fails, and
//! cleanup steps that always run last. Exactly one of the normal and error
//! paths completes per build.

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use moldeo_core::{CancellationToken, Context, Error, Result};

/// Outcome of running a step synchronously.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    Ready(Value),
    /// The step needs a suspension point; a synchronous build keeps the
    /// prior value.
    Deferred,
}

/// One evaluation step.
pub trait Step: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    fn run(&self, ctx: &Context, acc: Value) -> Result<Settled>;

    /// Async counterpart. The default runs the synchronous body, so only
    /// steps that suspend or recurse need to override it.
    fn run_async<'a>(&'a self, ctx: &'a Context, acc: Value) -> BoxFuture<'a, Result<Value>> {
        async move {
            match self.run(ctx, acc.clone())? {
                Settled::Ready(value) => Ok(value),
                Settled::Deferred => Ok(acc),
            }
        }
        .boxed()
    }
}

#[derive(Default)]
pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
    recover: Vec<Box<dyn Step>>,
    cleanup: Vec<Box<dyn Step>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, step: impl Step + 'static) -> &mut Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn recover(&mut self, step: impl Step + 'static) -> &mut Self {
        self.recover.push(Box::new(step));
        self
    }

    pub fn cleanup(&mut self, step: impl Step + 'static) -> &mut Self {
        self.cleanup.push(Box::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names of the primary steps in run order.
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    // ── Synchronous build ───────────────────────────────────────────

    pub fn build(&self, ctx: &Context, initial: Value) -> Result<Value> {
        let outcome = match Self::fold(&self.steps, ctx, initial) {
            Err(err) if self.recoverable(&err) => self.recover_from(ctx, err),
            other => other,
        };
        self.run_cleanup(ctx, &outcome);
        outcome
    }

    fn fold(steps: &[Box<dyn Step>], ctx: &Context, initial: Value) -> Result<Value> {
        let mut acc = initial;
        for step in steps {
            debug!(step = step.name(), depth = ctx.depth(), "Running step");
            if let Settled::Ready(value) = step.run(ctx, acc.clone())? {
                acc = value;
            } else {
                debug!(step = step.name(), "Deferred in synchronous build");
            }
        }
        Ok(acc)
    }

    fn recover_from(&self, ctx: &Context, err: Error) -> Result<Value> {
        let descriptor = err.to_value();
        debug!(error = %err, "Running recovery steps");
        let ctx = ctx.clone().with_source("error", descriptor.clone());
        Self::fold(&self.recover, &ctx, descriptor)
    }

    fn run_cleanup(&self, ctx: &Context, outcome: &Result<Value>) {
        if self.cleanup.is_empty() {
            return;
        }
        let value = outcome.as_ref().ok().cloned().unwrap_or(Value::Null);
        if let Err(err) = Self::fold(&self.cleanup, ctx, value) {
            warn!(error = %err, "Cleanup step failed");
        }
    }

    // ── Asynchronous build ──────────────────────────────────────────

    pub async fn build_async(&self, ctx: &Context, initial: Value) -> Result<Value> {
        let outcome = match Self::fold_async(&self.steps, ctx, initial).await {
            Err(err) if self.recoverable(&err) => {
                let descriptor = err.to_value();
                debug!(error = %err, "Running recovery steps");
                let ctx = ctx.clone().with_source("error", descriptor.clone());
                Self::fold_async(&self.recover, &ctx, descriptor).await
            }
            other => other,
        };

        if !self.cleanup.is_empty() {
            let value = outcome.as_ref().ok().cloned().unwrap_or(Value::Null);
            // Cleanup runs to completion even after cancellation.
            let detached = ctx.clone().with_cancellation(CancellationToken::new());
            if let Err(err) = Self::fold_async(&self.cleanup, &detached, value).await {
                warn!(error = %err, "Cleanup step failed");
            }
        }
        outcome
    }

    async fn fold_async(
        steps: &[Box<dyn Step>],
        ctx: &Context,
        initial: Value,
    ) -> Result<Value> {
        let mut acc = initial;
        for step in steps {
            ctx.check_cancelled()?;
            debug!(step = step.name(), depth = ctx.depth(), "Running step");
            acc = step.run_async(ctx, acc).await?;
        }
        Ok(acc)
    }

    fn recoverable(&self, err: &Error) -> bool {
        !err.is_cancelled() && !self.recover.is_empty()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.step_names())
            .field("recover", &self.recover.len())
            .field("cleanup", &self.cleanup.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moldeo_core::Store;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AddOne;

    impl Step for AddOne {
        fn name(&self) -> &'static str {
            "add_one"
        }

        fn run(&self, _: &Context, acc: Value) -> Result<Settled> {
            Ok(Settled::Ready(json!(acc.as_i64().unwrap_or(0) + 1)))
        }
    }

    struct Fail;

    impl Step for Fail {
        fn name(&self) -> &'static str {
            "fail"
        }

        fn run(&self, _: &Context, _: Value) -> Result<Settled> {
            Err(Error::validation("boom"))
        }
    }

    struct Later;

    impl Step for Later {
        fn name(&self) -> &'static str {
            "later"
        }

        fn run(&self, _: &Context, _: Value) -> Result<Settled> {
            Ok(Settled::Deferred)
        }
    }

    struct Count(Arc<AtomicUsize>, Arc<std::sync::Mutex<Value>>);

    impl Step for Count {
        fn name(&self) -> &'static str {
            "count"
        }

        fn run(&self, _: &Context, acc: Value) -> Result<Settled> {
            self.0.fetch_add(1, Ordering::SeqCst);
            *self.1.lock().unwrap() = acc.clone();
            Ok(Settled::Ready(acc))
        }
    }

    fn ctx() -> Context {
        Context::new(Store::default())
    }

    #[test]
    fn folds_left_to_right() {
        let mut pipeline = Pipeline::new();
        pipeline.add(AddOne).add(AddOne);
        assert_eq!(pipeline.build(&ctx(), json!(1)).unwrap(), json!(3));
        assert_eq!(pipeline.step_names(), vec!["add_one", "add_one"]);
    }

    #[test]
    fn deferred_keeps_prior_value() {
        let mut pipeline = Pipeline::new();
        pipeline.add(AddOne).add(Later).add(AddOne);
        assert_eq!(pipeline.build(&ctx(), json!(0)).unwrap(), json!(2));
    }

    #[test]
    fn error_propagates_without_recovery() {
        let mut pipeline = Pipeline::new();
        pipeline.add(Fail).add(AddOne);
        assert!(pipeline.build(&ctx(), json!(0)).is_err());
    }

    #[test]
    fn recovery_starts_from_descriptor() {
        let mut pipeline = Pipeline::new();
        pipeline.add(Fail);
        let seen = Arc::new(std::sync::Mutex::new(Value::Null));
        pipeline.recover(Count(Arc::new(AtomicUsize::new(0)), seen.clone()));
        let result = pipeline.build(&ctx(), json!(0)).unwrap();
        assert_eq!(result["kind"], "validation_failed");
        assert_eq!(*seen.lock().unwrap(), result);
    }

    #[test]
    fn cleanup_always_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(std::sync::Mutex::new(Value::Null));

        let mut ok = Pipeline::new();
        ok.add(AddOne).cleanup(Count(calls.clone(), seen.clone()));
        assert_eq!(ok.build(&ctx(), json!(1)).unwrap(), json!(2));
        assert_eq!(*seen.lock().unwrap(), json!(2));

        let mut failing = Pipeline::new();
        failing.add(Fail).cleanup(Count(calls.clone(), seen.clone()));
        assert!(failing.build(&ctx(), json!(1)).is_err());
        assert_eq!(*seen.lock().unwrap(), Value::Null);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cleanup_failure_does_not_change_outcome() {
        let mut pipeline = Pipeline::new();
        pipeline.add(AddOne).cleanup(Fail);
        assert_eq!(pipeline.build(&ctx(), json!(1)).unwrap(), json!(2));
    }

    #[tokio::test]
    async fn async_build_matches_sync() {
        let mut pipeline = Pipeline::new();
        pipeline.add(AddOne).add(AddOne);
        let sync = pipeline.build(&ctx(), json!(5)).unwrap();
        let asynchronous = pipeline.build_async(&ctx(), json!(5)).await.unwrap();
        assert_eq!(sync, asynchronous);
    }

    #[tokio::test]
    async fn cancellation_is_never_recovered() {
        let token = moldeo_core::CancellationToken::new();
        token.cancel();
        let ctx = ctx().with_cancellation(token);
        let mut pipeline = Pipeline::new();
        pipeline
            .add(AddOne)
            .recover(Count(Arc::new(AtomicUsize::new(0)), Arc::default()));
        let err = pipeline.build_async(&ctx, json!(0)).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
