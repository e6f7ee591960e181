//! Directives — one pipeline step per recognized schema key.
//!
//! [`plan`] walks [`PRECEDENCE`] and turns every key present on a mapping
//! node into a [`Directive`]. Declaration order in the document never
//! matters. Sub-schemas run in a child context whose target is the value
//! accumulated so far.

use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde_json::{Map, Value};
use tracing::debug;

use moldeo_core::fetch::FetchRequest;
use moldeo_core::schema::{EvalOptions, Keyword, PRECEDENCE, check_keys};
use moldeo_core::value::{as_f64, deep_equal, number, truthy, type_name};
use moldeo_core::{Context, Error, Result};
use moldeo_tools::Arithmetic;

use crate::arrays;
use crate::async_eval::{evaluate_async, settle_all};
use crate::composer::PropertyComposer;
use crate::evaluator::{Handle, evaluate};
use crate::pipeline::{Pipeline, Settled, Step};

#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Delay(Value),
    Const(Value),
    Path(Value),
    Store(Value),
    Target(Value),
    Sibling(Value),
    Source(Value),
    Request(Value),
    SchemaFrom(Value),
    Not(Value),
    SelectSet(Value),
    Increment(Value),
    If {
        condition: Value,
        then: Option<Value>,
        otherwise: Option<Value>,
    },
    Definitions(Value),
    Properties(Value),
    Spread(Value),
    Patch(Value),
    Filter(Value),
    Find(Value),
    Contains(Value),
    Map(Value),
    GroupJoin(Value),
    Select(Value),
    Equals(Value),
    Set(Value),
    Reduce(Value),
    ReduceMany(Value),
    Calc(Value),
    Use(Value),
    Function {
        name: Value,
        bind: Option<Value>,
    },
    Call(Value),
}

/// Plan the pipeline for one mapping node.
pub fn plan(node: &Map<String, Value>, options: &EvalOptions) -> Result<Pipeline> {
    check_keys(node, options.unknown_keys)?;

    let mut pipeline = Pipeline::new();
    for keyword in PRECEDENCE {
        if let Some(arg) = keyword.lookup(node) {
            pipeline.add(Directive::new(*keyword, arg, node)?);
        }
    }
    if let Some(schema) = Keyword::OnError.lookup(node) {
        pipeline.recover(SubSchema::new("onError", schema.clone()));
    }
    if let Some(schema) = Keyword::Finally.lookup(node) {
        pipeline.cleanup(SubSchema::new("finally", schema.clone()));
    }
    Ok(pipeline)
}

impl Directive {
    /// Build the directive for `keyword`, reading its modifiers from `node`.
    pub fn new(keyword: Keyword, arg: &Value, node: &Map<String, Value>) -> Result<Self> {
        let arg = arg.clone();
        let modifier = |k: Keyword| k.lookup(node).cloned();
        let directive = match keyword {
            Keyword::Delay => Directive::Delay(arg),
            Keyword::Const => Directive::Const(arg),
            Keyword::Path => Directive::Path(arg),
            Keyword::Store => Directive::Store(arg),
            Keyword::Target => Directive::Target(arg),
            Keyword::Sibling => Directive::Sibling(arg),
            Keyword::Source => Directive::Source(arg),
            Keyword::Request => Directive::Request(arg),
            Keyword::SchemaFrom => Directive::SchemaFrom(arg),
            Keyword::Not => Directive::Not(arg),
            Keyword::SelectSet => Directive::SelectSet(arg),
            Keyword::Increment => Directive::Increment(arg),
            Keyword::If => Directive::If {
                condition: arg,
                then: modifier(Keyword::Then),
                otherwise: modifier(Keyword::Else),
            },
            Keyword::Definitions => Directive::Definitions(arg),
            Keyword::Properties => Directive::Properties(arg),
            Keyword::Spread => Directive::Spread(arg),
            Keyword::Patch => Directive::Patch(arg),
            Keyword::Filter => Directive::Filter(arg),
            Keyword::Find => Directive::Find(arg),
            Keyword::Contains => Directive::Contains(arg),
            Keyword::Map => Directive::Map(arg),
            Keyword::GroupJoin => Directive::GroupJoin(arg),
            Keyword::Select => Directive::Select(arg),
            Keyword::Equals => Directive::Equals(arg),
            Keyword::Set => Directive::Set(arg),
            Keyword::Reduce => Directive::Reduce(arg),
            Keyword::ReduceMany => Directive::ReduceMany(arg),
            Keyword::Calc => Directive::Calc(arg),
            Keyword::Use => Directive::Use(arg),
            Keyword::Function => Directive::Function {
                name: arg,
                bind: modifier(Keyword::BindArg),
            },
            Keyword::Call => Directive::Call(arg),
            modifier_only => {
                return Err(Error::Internal(format!(
                    "'{modifier_only}' does not plan a step"
                )));
            }
        };
        Ok(directive)
    }

    pub fn keyword(&self) -> Keyword {
        match self {
            Directive::Delay(_) => Keyword::Delay,
            Directive::Const(_) => Keyword::Const,
            Directive::Path(_) => Keyword::Path,
            Directive::Store(_) => Keyword::Store,
            Directive::Target(_) => Keyword::Target,
            Directive::Sibling(_) => Keyword::Sibling,
            Directive::Source(_) => Keyword::Source,
            Directive::Request(_) => Keyword::Request,
            Directive::SchemaFrom(_) => Keyword::SchemaFrom,
            Directive::Not(_) => Keyword::Not,
            Directive::SelectSet(_) => Keyword::SelectSet,
            Directive::Increment(_) => Keyword::Increment,
            Directive::If { .. } => Keyword::If,
            Directive::Definitions(_) => Keyword::Definitions,
            Directive::Properties(_) => Keyword::Properties,
            Directive::Spread(_) => Keyword::Spread,
            Directive::Patch(_) => Keyword::Patch,
            Directive::Filter(_) => Keyword::Filter,
            Directive::Find(_) => Keyword::Find,
            Directive::Contains(_) => Keyword::Contains,
            Directive::Map(_) => Keyword::Map,
            Directive::GroupJoin(_) => Keyword::GroupJoin,
            Directive::Select(_) => Keyword::Select,
            Directive::Equals(_) => Keyword::Equals,
            Directive::Set(_) => Keyword::Set,
            Directive::Reduce(_) => Keyword::Reduce,
            Directive::ReduceMany(_) => Keyword::ReduceMany,
            Directive::Calc(_) => Keyword::Calc,
            Directive::Use(_) => Keyword::Use,
            Directive::Function { .. } => Keyword::Function,
            Directive::Call(_) => Keyword::Call,
        }
    }

    fn run_leaf(&self, ctx: &Context, acc: Value) -> Result<Value> {
        match self {
            Directive::Const(value) => Ok(value.clone()),
            Directive::Path(arg) => {
                let path = text_arg("path", arg)?;
                Ok(ctx.lookup(&acc, path).unwrap_or(Value::Null))
            }
            Directive::Store(arg) => match arg {
                Value::Bool(true) => Ok(ctx.store().snapshot()),
                other => {
                    let path = text_arg("store", other)?;
                    Ok(ctx.store().get(ctx.resolver(), path).unwrap_or(Value::Null))
                }
            },
            Directive::Target(arg) => match arg {
                Value::Bool(true) => Ok(ctx.target.clone()),
                other => {
                    let path = text_arg("target", other)?;
                    Ok(ctx.resolver().get(&ctx.target, path).cloned().unwrap_or(Value::Null))
                }
            },
            Directive::Sibling(arg) => {
                Ok(ctx.sibling(text_arg("sibling", arg)?).unwrap_or(Value::Null))
            }
            Directive::Source(arg) => {
                Ok(ctx.source(text_arg("source", arg)?).unwrap_or(Value::Null))
            }
            Directive::Calc(arg) => text_arg("calc", arg)?
                .parse::<Arithmetic>()?
                .calculate_value(&acc),
            Directive::Use(arg) => {
                let previous = ctx.target.clone();
                let mut acc = acc;
                for name in operator_names(arg)? {
                    acc = apply_operator(ctx, name, acc, previous.clone())?;
                }
                Ok(acc)
            }
            other => Err(Error::Internal(format!(
                "'{}' is not a leaf directive",
                other.keyword()
            ))),
        }
    }
}

// Each recursive key runs in its own function, so a nesting level only
// carries the stack frame of the key it is evaluating.
impl Step for Directive {
    fn name(&self) -> &'static str {
        self.keyword().as_str()
    }

    fn run(&self, ctx: &Context, acc: Value) -> Result<Settled> {
        let value = match self {
            Directive::Delay(_) | Directive::Request(_) => return Ok(Settled::Deferred),
            Directive::SchemaFrom(schema) => schema_from(ctx, schema, acc),
            Directive::Not(arg) => negate(ctx, arg, acc),
            Directive::SelectSet(config) => select_set(ctx, config, acc),
            Directive::Increment(config) => increment(ctx, config, acc),
            Directive::If {
                condition,
                then,
                otherwise,
            } => branch(ctx, condition, then.as_ref(), otherwise.as_ref(), acc),
            Directive::Definitions(schemas) => definitions(ctx, schemas, acc),
            Directive::Properties(props) => properties(ctx, props, acc),
            Directive::Spread(schema) => spread_from(ctx, schema, acc),
            Directive::Patch(config) => patch(ctx, config, acc),
            Directive::Filter(config) => arrays::filter(config, ctx, &acc),
            Directive::Find(config) => arrays::find(config, ctx, &acc),
            Directive::Contains(config) => arrays::contains(config, ctx, &acc),
            Directive::Map(schema) => arrays::map(schema, ctx, &acc),
            Directive::GroupJoin(config) => arrays::group_join(config, ctx, &acc),
            Directive::Select(config) => arrays::select(config, ctx, &acc),
            Directive::Equals(schema) => equals(ctx, schema, acc),
            Directive::Set(config) => set(ctx, config, acc),
            Directive::Reduce(schema) => nested(ctx, schema, acc),
            Directive::ReduceMany(schemas) => reduce_many(ctx, schemas, acc),
            Directive::Function { name, bind } => {
                invoke(ctx, text_arg("function", name)?, bind.as_ref(), acc)
            }
            Directive::Call(config) => {
                let (name, arg) = call_spec(config)?;
                invoke(ctx, name, arg, acc)
            }
            leaf => leaf.run_leaf(ctx, acc),
        };
        value.map(Settled::Ready)
    }

    fn run_async<'a>(&'a self, ctx: &'a Context, acc: Value) -> BoxFuture<'a, Result<Value>> {
        match self {
            Directive::Delay(ms) => delay(ctx, ms, acc).boxed(),
            Directive::Request(description) => request(ctx, description, acc).boxed(),
            Directive::SchemaFrom(schema) => schema_from_async(ctx, schema, acc).boxed(),
            Directive::Not(arg) => negate_async(ctx, arg, acc).boxed(),
            Directive::SelectSet(config) => select_set_async(ctx, config, acc).boxed(),
            Directive::Increment(config) => increment_async(ctx, config, acc).boxed(),
            Directive::If {
                condition,
                then,
                otherwise,
            } => branch_async(ctx, condition, then.as_ref(), otherwise.as_ref(), acc).boxed(),
            Directive::Definitions(schemas) => definitions_async(ctx, schemas, acc).boxed(),
            Directive::Properties(props) => properties_async(ctx, props, acc).boxed(),
            Directive::Spread(schema) => spread_from_async(ctx, schema, acc).boxed(),
            Directive::Patch(config) => patch_async(ctx, config, acc).boxed(),
            Directive::Filter(config) => {
                async move { arrays::filter_async(config, ctx, &acc).await }.boxed()
            }
            Directive::Find(config) => {
                async move { arrays::find_async(config, ctx, &acc).await }.boxed()
            }
            Directive::Contains(config) => {
                async move { arrays::contains_async(config, ctx, &acc).await }.boxed()
            }
            Directive::Map(schema) => {
                async move { arrays::map_async(schema, ctx, &acc).await }.boxed()
            }
            Directive::GroupJoin(config) => {
                async move { arrays::group_join_async(config, ctx, &acc).await }.boxed()
            }
            Directive::Select(config) => {
                async move { arrays::select_async(config, ctx, &acc).await }.boxed()
            }
            Directive::Equals(schema) => equals_async(ctx, schema, acc).boxed(),
            Directive::Set(config) => set_async(ctx, config, acc).boxed(),
            Directive::Reduce(schema) => nested_async(ctx, schema, acc).boxed(),
            Directive::ReduceMany(schemas) => reduce_many_async(ctx, schemas, acc).boxed(),
            Directive::Function { name, bind } => async move {
                invoke_async(ctx, text_arg("function", name)?, bind.as_ref(), acc).await
            }
            .boxed(),
            Directive::Call(config) => async move {
                let (name, arg) = call_spec(config)?;
                invoke_async(ctx, name, arg, acc).await
            }
            .boxed(),
            leaf => futures::future::ready(leaf.run_leaf(ctx, acc)).boxed(),
        }
    }
}

// ── Synchronous bodies ──────────────────────────────────────────────

fn nested(ctx: &Context, schema: &Value, acc: Value) -> Result<Value> {
    evaluate(schema, &ctx.child(acc)?)
}

fn schema_from(ctx: &Context, schema: &Value, acc: Value) -> Result<Value> {
    let child = ctx.child(acc)?;
    let resolved = evaluate(schema, &child)?;
    evaluate(&resolved, &child)
}

fn negate(ctx: &Context, arg: &Value, acc: Value) -> Result<Value> {
    match arg {
        Value::Bool(true) => Ok(Value::Bool(!truthy(&acc))),
        Value::Bool(false) => Ok(acc),
        schema => Ok(Value::Bool(!truthy(&nested(ctx, schema, acc)?))),
    }
}

fn select_set(ctx: &Context, config: &Value, acc: Value) -> Result<Value> {
    let spec = arrays::SelectSpec::parse(config)?;
    let path = config_path("selectSet", config)?;
    let value = nested(ctx, spec.value, acc)?;
    toggle_in_store(ctx, path, value, spec)
}

fn increment(ctx: &Context, config: &Value, acc: Value) -> Result<Value> {
    let (path, by) = increment_spec(config)?;
    let by = match by {
        Some(schema) => nested(ctx, schema, acc)?,
        None => Value::from(1),
    };
    add_in_store(ctx, path, &by)
}

fn branch(
    ctx: &Context,
    condition: &Value,
    then: Option<&Value>,
    otherwise: Option<&Value>,
    acc: Value,
) -> Result<Value> {
    let holds = match condition {
        Value::String(path) => store_flag(ctx, path),
        schema => truthy(&nested(ctx, schema, acc.clone())?),
    };
    match if holds { then } else { otherwise } {
        Some(arm) => nested(ctx, arm, acc),
        None => Ok(acc),
    }
}

fn definitions(ctx: &Context, schemas: &Value, acc: Value) -> Result<Value> {
    let child = ctx.child(acc)?;
    definition_list(schemas)?
        .iter()
        .map(|schema| evaluate(schema, &child))
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

fn properties(ctx: &Context, props: &Value, acc: Value) -> Result<Value> {
    PropertyComposer::compose(props, &ctx.child(acc)?)?.force()
}

fn spread_from(ctx: &Context, schema: &Value, acc: Value) -> Result<Value> {
    let src = nested(ctx, schema, acc.clone())?;
    spread(acc, src)
}

fn patch(ctx: &Context, config: &Value, acc: Value) -> Result<Value> {
    arrays::sequence("patch", &acc)?;
    let spec = arrays::PatchSpec::parse(config)?;
    let patches = nested(ctx, spec.with, acc.clone())?;
    arrays::apply_patches(&acc, spec.key, patches)
}

fn equals(ctx: &Context, schema: &Value, acc: Value) -> Result<Value> {
    let other = nested(ctx, schema, acc.clone())?;
    Ok(Value::Bool(deep_equal(&acc, &other)))
}

fn set(ctx: &Context, config: &Value, acc: Value) -> Result<Value> {
    let (path, value) = set_spec(config)?;
    let value = match value {
        Some(schema) => nested(ctx, schema, acc.clone())?,
        None => acc.clone(),
    };
    ctx.store().set(ctx.resolver(), path, value)?;
    Ok(acc)
}

fn reduce_many(ctx: &Context, schemas: &Value, acc: Value) -> Result<Value> {
    let mut acc = acc;
    for schema in definition_list(schemas)? {
        acc = nested(ctx, schema, acc)?;
    }
    Ok(acc)
}

/// `function` and `call`: `op(bound argument or acc, acc)`.
fn invoke(ctx: &Context, name: &str, bind: Option<&Value>, acc: Value) -> Result<Value> {
    let current = match bind {
        Some(schema) => nested(ctx, schema, acc.clone())?,
        None => acc.clone(),
    };
    apply_operator(ctx, name, current, acc)
}

// ── Asynchronous bodies ─────────────────────────────────────────────

async fn nested_async(ctx: &Context, schema: &Value, acc: Value) -> Result<Value> {
    evaluate_async(schema, &ctx.child(acc)?).await
}

async fn schema_from_async(ctx: &Context, schema: &Value, acc: Value) -> Result<Value> {
    let child = ctx.child(acc)?;
    let resolved = evaluate_async(schema, &child).await?;
    evaluate_async(&resolved, &child).await
}

async fn negate_async(ctx: &Context, arg: &Value, acc: Value) -> Result<Value> {
    match arg {
        Value::Bool(true) => Ok(Value::Bool(!truthy(&acc))),
        Value::Bool(false) => Ok(acc),
        schema => Ok(Value::Bool(!truthy(&nested_async(ctx, schema, acc).await?))),
    }
}

async fn select_set_async(ctx: &Context, config: &Value, acc: Value) -> Result<Value> {
    let spec = arrays::SelectSpec::parse(config)?;
    let path = config_path("selectSet", config)?;
    let value = nested_async(ctx, spec.value, acc).await?;
    toggle_in_store(ctx, path, value, spec)
}

async fn increment_async(ctx: &Context, config: &Value, acc: Value) -> Result<Value> {
    let (path, by) = increment_spec(config)?;
    let by = match by {
        Some(schema) => nested_async(ctx, schema, acc).await?,
        None => Value::from(1),
    };
    add_in_store(ctx, path, &by)
}

async fn branch_async(
    ctx: &Context,
    condition: &Value,
    then: Option<&Value>,
    otherwise: Option<&Value>,
    acc: Value,
) -> Result<Value> {
    let holds = match condition {
        Value::String(path) => store_flag(ctx, path),
        schema => truthy(&nested_async(ctx, schema, acc.clone()).await?),
    };
    match if holds { then } else { otherwise } {
        Some(arm) => nested_async(ctx, arm, acc).await,
        None => Ok(acc),
    }
}

async fn definitions_async(ctx: &Context, schemas: &Value, acc: Value) -> Result<Value> {
    let child = ctx.child(acc)?;
    let branches = definition_list(schemas)?
        .iter()
        .map(|schema| evaluate_async(schema, &child));
    settle_all(join_all(branches).await).map(Value::Array)
}

async fn properties_async(ctx: &Context, props: &Value, acc: Value) -> Result<Value> {
    let child = ctx.child(acc)?;
    PropertyComposer::compose_async(props, &child)
        .await?
        .force_async()
        .await
}

async fn spread_from_async(ctx: &Context, schema: &Value, acc: Value) -> Result<Value> {
    let src = nested_async(ctx, schema, acc.clone()).await?;
    spread(acc, src)
}

async fn patch_async(ctx: &Context, config: &Value, acc: Value) -> Result<Value> {
    arrays::sequence("patch", &acc)?;
    let spec = arrays::PatchSpec::parse(config)?;
    let patches = nested_async(ctx, spec.with, acc.clone()).await?;
    arrays::apply_patches(&acc, spec.key, patches)
}

async fn equals_async(ctx: &Context, schema: &Value, acc: Value) -> Result<Value> {
    let other = nested_async(ctx, schema, acc.clone()).await?;
    Ok(Value::Bool(deep_equal(&acc, &other)))
}

async fn set_async(ctx: &Context, config: &Value, acc: Value) -> Result<Value> {
    let (path, value) = set_spec(config)?;
    let value = match value {
        Some(schema) => nested_async(ctx, schema, acc.clone()).await?,
        None => acc.clone(),
    };
    ctx.store().set(ctx.resolver(), path, value)?;
    Ok(acc)
}

async fn reduce_many_async(ctx: &Context, schemas: &Value, acc: Value) -> Result<Value> {
    let mut acc = acc;
    for schema in definition_list(schemas)? {
        acc = nested_async(ctx, schema, acc).await?;
    }
    Ok(acc)
}

async fn invoke_async(
    ctx: &Context,
    name: &str,
    bind: Option<&Value>,
    acc: Value,
) -> Result<Value> {
    let current = match bind {
        Some(schema) => nested_async(ctx, schema, acc.clone()).await?,
        None => acc.clone(),
    };
    apply_operator(ctx, name, current, acc)
}

/// A whole schema run as one step; used for `onError` and `finally`.
pub struct SubSchema {
    name: &'static str,
    schema: Value,
}

impl SubSchema {
    pub fn new(name: &'static str, schema: Value) -> Self {
        Self { name, schema }
    }
}

impl Step for SubSchema {
    fn name(&self) -> &'static str {
        self.name
    }

    fn run(&self, ctx: &Context, acc: Value) -> Result<Settled> {
        evaluate(&self.schema, &ctx.child(acc)?).map(Settled::Ready)
    }

    fn run_async<'a>(&'a self, ctx: &'a Context, acc: Value) -> BoxFuture<'a, Result<Value>> {
        async move { evaluate_async(&self.schema, &ctx.child(acc)?).await }.boxed()
    }
}

// ── Argument shapes ─────────────────────────────────────────────────

fn text_arg<'v>(key: &str, arg: &'v Value) -> Result<&'v str> {
    arg.as_str().ok_or_else(|| {
        Error::validation(format!(
            "'{key}' expects a path string, found {}",
            type_name(arg)
        ))
    })
}

fn config_path<'v>(key: &str, config: &'v Value) -> Result<&'v str> {
    config
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::validation(format!("'{key}' requires a 'path'")))
}

fn definition_list(schemas: &Value) -> Result<&Vec<Value>> {
    schemas
        .as_array()
        .ok_or_else(|| Error::validation("expected a list of schemas"))
}

/// `path` or `{path, by?}`.
fn increment_spec(config: &Value) -> Result<(&str, Option<&Value>)> {
    match config {
        Value::String(path) => Ok((path.as_str(), None)),
        other => Ok((config_path("increment", other)?, other.get("by"))),
    }
}

/// `path` or `{path, value?}`.
fn set_spec(config: &Value) -> Result<(&str, Option<&Value>)> {
    match config {
        Value::String(path) => Ok((path.as_str(), None)),
        other => Ok((config_path("set", other)?, other.get("value"))),
    }
}

/// `name` or `{name, arg?}`.
fn call_spec(config: &Value) -> Result<(&str, Option<&Value>)> {
    match config {
        Value::String(name) => Ok((name.as_str(), None)),
        other => {
            let name = other
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::validation("'call' requires a 'name'"))?;
            Ok((name, other.get("arg")))
        }
    }
}

fn operator_names(arg: &Value) -> Result<Vec<&str>> {
    match arg {
        Value::String(name) => Ok(vec![name.as_str()]),
        Value::Array(names) => names
            .iter()
            .map(|name| text_arg("use", name))
            .collect(),
        other => Err(Error::validation(format!(
            "'use' expects a name or list of names, found {}",
            type_name(other)
        ))),
    }
}

// ── Shared bodies ───────────────────────────────────────────────────

/// `if` with a path condition reads the store.
fn store_flag(ctx: &Context, path: &str) -> bool {
    ctx.store()
        .get(ctx.resolver(), path)
        .is_some_and(|v| truthy(&v))
}

fn apply_operator(ctx: &Context, name: &str, current: Value, previous: Value) -> Result<Value> {
    debug!(operator = name, "Applying operator");
    let handle = Handle::new(ctx.child(current.clone())?);
    ctx.functions().apply(name, current, previous, &handle)
}

fn toggle_in_store(
    ctx: &Context,
    path: &str,
    value: Value,
    spec: arrays::SelectSpec<'_>,
) -> Result<Value> {
    ctx.store().update(ctx.resolver(), path, |current| {
        let items = match current {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => return Err(Error::not_an_array("selectSet", other)),
        };
        Ok(Value::Array(arrays::toggle(items, value, spec.multiple, spec.max)))
    })
}

fn add_in_store(ctx: &Context, path: &str, by: &Value) -> Result<Value> {
    let by = as_f64(by).ok_or_else(|| {
        Error::validation(format!("'increment' step must be a number, found {}", type_name(by)))
    })?;
    ctx.store().update(ctx.resolver(), path, |current| {
        let base = match current {
            None | Some(Value::Null) => 0.0,
            Some(value) => as_f64(value).ok_or_else(|| {
                Error::validation(format!(
                    "cannot increment {} at '{path}'",
                    type_name(value)
                ))
            })?,
        };
        Ok(number(base + by))
    })
}

/// Merge `src` into `acc`.
pub fn spread(acc: Value, src: Value) -> Result<Value> {
    match (acc, src) {
        (Value::Array(mut items), Value::Array(more)) => {
            items.extend(more);
            Ok(Value::Array(items))
        }
        (Value::Array(mut items), single) => {
            items.push(single);
            Ok(Value::Array(items))
        }
        (Value::Object(mut fields), Value::Object(patch)) => {
            fields.extend(patch);
            Ok(Value::Object(fields))
        }
        (Value::Object(mut fields), Value::Array(patches)) => {
            for patch in patches {
                match patch {
                    Value::Object(patch) => fields.extend(patch),
                    Value::Null => {}
                    other => {
                        return Err(Error::validation(format!(
                            "cannot spread {} into an object",
                            type_name(&other)
                        )));
                    }
                }
            }
            Ok(Value::Object(fields))
        }
        (Value::Object(fields), Value::Null) => Ok(Value::Object(fields)),
        (Value::Null, src) => Ok(src),
        (acc, src) => Err(Error::validation(format!(
            "cannot spread {} into {}",
            type_name(&src),
            type_name(&acc)
        ))),
    }
}

async fn delay(ctx: &Context, ms: &Value, acc: Value) -> Result<Value> {
    let ms = ms
        .as_u64()
        .ok_or_else(|| Error::validation("'delay' expects milliseconds"))?;
    debug!(ms, "Delaying");
    tokio::select! {
        biased;
        _ = ctx.cancellation().cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(acc),
    }
}

async fn request(ctx: &Context, description: &Value, acc: Value) -> Result<Value> {
    let fetcher = ctx.fetcher().cloned().ok_or_else(|| Error::Config {
        message: "no fetcher configured for 'consulta'".into(),
    })?;
    let description = evaluate_async(description, &ctx.child(acc)?).await?;
    let request = FetchRequest::from_value(description)?;
    let label = format!("{} {}", request.method, request.url);
    debug!(fetcher = fetcher.name(), request = %label, "Fetching");

    let cancel = ctx.cancellation();
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        response = fetcher.fetch(request, cancel) => response,
    }?;

    if !response.ok {
        return Err(Error::UpstreamFailed {
            status: Some(response.status),
            message: format!("{label} returned {}", response.status),
        });
    }
    Ok(response.to_value())
}
