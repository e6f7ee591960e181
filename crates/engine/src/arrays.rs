//! Array subsystem: `filter`, `find`, `contains`, `map`, `groupJoin`,
//! `select` and `patch`.
//!
//! Match-style keys accept either `{match, source?, min?, max?}` or a bare
//! match schema. Every item is evaluated with itself as the target and
//! bound as source `current`, its position as source `index`.

use futures::future::join_all;
use serde_json::{Map, Value, json};

use moldeo_core::value::{deep_equal, truthy, type_name};
use moldeo_core::{Context, Error, Result};

use crate::async_eval::{evaluate_async, settle_all};
use crate::evaluator::evaluate;

/// The sequence under `acc`, or `NotAnArray` naming `key`.
pub fn sequence<'v>(key: &str, acc: &'v Value) -> Result<&'v Vec<Value>> {
    acc.as_array().ok_or_else(|| Error::not_an_array(key, acc))
}

fn is_match(value: &Value) -> bool {
    *value == Value::Bool(true)
}

fn item_context(base: &Context, item: &Value, index: usize) -> Result<Context> {
    Ok(base
        .child(item.clone())?
        .with_source("current", item.clone())
        .with_source("index", json!(index)))
}

fn bound(config: &Map<String, Value>, name: &str) -> Result<Option<usize>> {
    match config.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| Error::validation(format!("'{name}' must be a non-negative integer"))),
    }
}

// ── Match configuration ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct MatchSpec<'s> {
    pub matcher: &'s Value,
    pub source: Option<&'s Value>,
    pub min: Option<usize>,
    pub max: Option<usize>,
}

impl<'s> MatchSpec<'s> {
    pub fn parse(config: &'s Value) -> Result<Self> {
        match config.as_object() {
            Some(map) if map.contains_key("match") => Ok(Self {
                matcher: &map["match"],
                source: map.get("source"),
                min: bound(map, "min")?,
                max: bound(map, "max")?,
            }),
            _ => Ok(Self {
                matcher: config,
                source: None,
                min: None,
                max: None,
            }),
        }
    }

    fn limited(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }

    fn bind_source(&self, ctx: &Context, acc: &Value) -> Result<Context> {
        match self.source {
            None => Ok(ctx.clone()),
            Some(schema) => {
                let value = evaluate(schema, &ctx.child(acc.clone())?)?;
                Ok(ctx.clone().with_source("source", value))
            }
        }
    }

    async fn bind_source_async(&self, ctx: &Context, acc: &Value) -> Result<Context> {
        match self.source {
            None => Ok(ctx.clone()),
            Some(schema) => {
                let value = evaluate_async(schema, &ctx.child(acc.clone())?).await?;
                Ok(ctx.clone().with_source("source", value))
            }
        }
    }

    fn contains_verdict(&self, count: usize, len: usize) -> Value {
        let min = self.min.unwrap_or(1);
        let max = self.max.unwrap_or(len);
        Value::Bool(count >= min && count <= max)
    }
}

// ── Filter / Find / Contains ────────────────────────────────────────

fn collect_matches(
    matcher: &Value,
    base: &Context,
    items: &[Value],
    max: Option<usize>,
) -> Result<Vec<Value>> {
    let mut matches = Vec::new();
    for (index, item) in items.iter().enumerate() {
        if max.is_some_and(|max| matches.len() >= max) {
            break;
        }
        if is_match(&evaluate(matcher, &item_context(base, item, index)?)?) {
            matches.push(item.clone());
        }
    }
    Ok(matches)
}

async fn collect_matches_async(
    matcher: &Value,
    base: &Context,
    items: &[Value],
    max: Option<usize>,
) -> Result<Vec<Value>> {
    let mut matches = Vec::new();
    for (index, item) in items.iter().enumerate() {
        if max.is_some_and(|max| matches.len() >= max) {
            break;
        }
        let item_ctx = item_context(base, item, index)?;
        if is_match(&evaluate_async(matcher, &item_ctx).await?) {
            matches.push(item.clone());
        }
    }
    Ok(matches)
}

pub fn filter(config: &Value, ctx: &Context, acc: &Value) -> Result<Value> {
    let items = sequence("filter", acc)?;
    let spec = MatchSpec::parse(config)?;
    let base = spec.bind_source(ctx, acc)?;
    Ok(Value::Array(collect_matches(spec.matcher, &base, items, spec.max)?))
}

pub async fn filter_async(config: &Value, ctx: &Context, acc: &Value) -> Result<Value> {
    let items = sequence("filter", acc)?;
    let spec = MatchSpec::parse(config)?;
    let base = spec.bind_source_async(ctx, acc).await?;
    let matches = collect_matches_async(spec.matcher, &base, items, spec.max).await?;
    Ok(Value::Array(matches))
}

pub fn find(config: &Value, ctx: &Context, acc: &Value) -> Result<Value> {
    let items = sequence("find", acc)?;
    let spec = MatchSpec::parse(config)?.limited(1);
    let base = spec.bind_source(ctx, acc)?;
    let matches = collect_matches(spec.matcher, &base, items, spec.max)?;
    Ok(matches.into_iter().next().unwrap_or(Value::Null))
}

pub async fn find_async(config: &Value, ctx: &Context, acc: &Value) -> Result<Value> {
    let items = sequence("find", acc)?;
    let spec = MatchSpec::parse(config)?.limited(1);
    let base = spec.bind_source_async(ctx, acc).await?;
    let matches = collect_matches_async(spec.matcher, &base, items, spec.max).await?;
    Ok(matches.into_iter().next().unwrap_or(Value::Null))
}

pub fn contains(config: &Value, ctx: &Context, acc: &Value) -> Result<Value> {
    let items = sequence("contains", acc)?;
    let spec = MatchSpec::parse(config)?;
    let base = spec.bind_source(ctx, acc)?;
    let count = collect_matches(spec.matcher, &base, items, None)?.len();
    Ok(spec.contains_verdict(count, items.len()))
}

pub async fn contains_async(config: &Value, ctx: &Context, acc: &Value) -> Result<Value> {
    let items = sequence("contains", acc)?;
    let spec = MatchSpec::parse(config)?;
    let base = spec.bind_source_async(ctx, acc).await?;
    let count = collect_matches_async(spec.matcher, &base, items, None)
        .await?
        .len();
    Ok(spec.contains_verdict(count, items.len()))
}

// ── Map ─────────────────────────────────────────────────────────────

pub fn map(schema: &Value, ctx: &Context, acc: &Value) -> Result<Value> {
    let items = sequence("map", acc)?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| evaluate(schema, &item_context(ctx, item, index)?))
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

/// Items are evaluated concurrently; output order follows input order.
pub async fn map_async(schema: &Value, ctx: &Context, acc: &Value) -> Result<Value> {
    let items = sequence("map", acc)?;
    let branches = items.iter().enumerate().map(|(index, item)| async move {
        let item_ctx = item_context(ctx, item, index)?;
        evaluate_async(schema, &item_ctx).await
    });
    settle_all(join_all(branches).await).map(Value::Array)
}

// ── GroupJoin ───────────────────────────────────────────────────────

struct JoinSpec<'s> {
    items: &'s Value,
    matcher: &'s Value,
}

impl<'s> JoinSpec<'s> {
    fn parse(config: &'s Value) -> Result<Self> {
        let map = config
            .as_object()
            .ok_or_else(|| Error::validation("groupJoin expects {items, match}"))?;
        match (map.get("items"), map.get("match")) {
            (Some(items), Some(matcher)) => Ok(Self { items, matcher }),
            _ => Err(Error::validation("groupJoin requires 'items' and 'match'")),
        }
    }
}

fn joined(outer: &Value, group: Option<Value>) -> Value {
    json!({"item": outer, "group": group.unwrap_or(Value::Null)})
}

pub fn group_join(config: &Value, ctx: &Context, acc: &Value) -> Result<Value> {
    let left = sequence("groupJoin", acc)?;
    let spec = JoinSpec::parse(config)?;
    let right_value = evaluate(spec.items, &ctx.child(acc.clone())?)?;
    let right = sequence("groupJoin", &right_value)?;

    left.iter()
        .map(|outer| {
            let base = ctx.clone().with_source("outer", outer.clone());
            let group = collect_matches(spec.matcher, &base, right, Some(1))?;
            Ok(joined(outer, group.into_iter().next()))
        })
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

pub async fn group_join_async(config: &Value, ctx: &Context, acc: &Value) -> Result<Value> {
    let left = sequence("groupJoin", acc)?;
    let spec = JoinSpec::parse(config)?;
    let right_value = evaluate_async(spec.items, &ctx.child(acc.clone())?).await?;
    let right = sequence("groupJoin", &right_value)?;

    let mut pairs = Vec::with_capacity(left.len());
    for outer in left {
        let base = ctx.clone().with_source("outer", outer.clone());
        let group = collect_matches_async(spec.matcher, &base, right, Some(1)).await?;
        pairs.push(joined(outer, group.into_iter().next()));
    }
    Ok(Value::Array(pairs))
}

// ── Select ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct SelectSpec<'s> {
    pub value: &'s Value,
    pub multiple: bool,
    pub max: Option<usize>,
}

impl<'s> SelectSpec<'s> {
    pub fn parse(config: &'s Value) -> Result<Self> {
        match config.as_object() {
            Some(map) if map.contains_key("value") => Ok(Self {
                value: &map["value"],
                multiple: map.get("multiple").is_some_and(truthy),
                max: bound(map, "max")?,
            }),
            _ => Ok(Self {
                value: config,
                multiple: false,
                max: None,
            }),
        }
    }
}

/// Selection toggle over `items`.
///
/// Without `multiple` the result is `[value]`. With it, an equal item is
/// removed or else `value` is appended, and the result is cut to `max`.
pub fn toggle(mut items: Vec<Value>, value: Value, multiple: bool, max: Option<usize>) -> Vec<Value> {
    if !multiple {
        return vec![value];
    }
    match items.iter().position(|item| deep_equal(item, &value)) {
        Some(pos) => {
            items.remove(pos);
        }
        None => items.push(value),
    }
    if let Some(max) = max {
        items.truncate(max);
    }
    items
}

pub fn select(config: &Value, ctx: &Context, acc: &Value) -> Result<Value> {
    let items = sequence("select", acc)?;
    let spec = SelectSpec::parse(config)?;
    let value = evaluate(spec.value, &ctx.child(acc.clone())?)?;
    Ok(Value::Array(toggle(items.clone(), value, spec.multiple, spec.max)))
}

pub async fn select_async(config: &Value, ctx: &Context, acc: &Value) -> Result<Value> {
    let items = sequence("select", acc)?;
    let spec = SelectSpec::parse(config)?;
    let value = evaluate_async(spec.value, &ctx.child(acc.clone())?).await?;
    Ok(Value::Array(toggle(items.clone(), value, spec.multiple, spec.max)))
}

// ── Patch ───────────────────────────────────────────────────────────

pub struct PatchSpec<'s> {
    pub key: &'s str,
    pub with: &'s Value,
}

impl<'s> PatchSpec<'s> {
    pub fn parse(config: &'s Value) -> Result<Self> {
        let key = config.get("key").and_then(Value::as_str);
        match (key, config.get("with")) {
            (Some(key), Some(with)) => Ok(Self { key, with }),
            _ => Err(Error::validation("patch expects {key, with}")),
        }
    }
}

/// Merge each patch object into the item sharing its `key` value.
pub fn apply_patches(acc: &Value, key: &str, patches: Value) -> Result<Value> {
    let mut items = sequence("patch", acc)?.clone();
    let patches = match patches {
        Value::Array(patches) => patches,
        single @ Value::Object(_) => vec![single],
        Value::Null => Vec::new(),
        other => {
            return Err(Error::validation(format!(
                "patch expects objects, found {}",
                type_name(&other)
            )));
        }
    };

    for patch in patches {
        let Value::Object(fields) = patch else {
            return Err(Error::validation("each patch must be an object"));
        };
        let id = fields
            .get(key)
            .ok_or_else(|| Error::validation(format!("patch is missing key '{key}'")))?;
        let target = items
            .iter_mut()
            .find(|item| item.get(key).is_some_and(|v| deep_equal(v, id)))
            .ok_or_else(|| Error::validation(format!("no item with {key} = {id} to patch")))?;
        if let Value::Object(existing) = target {
            for (field, value) in fields {
                existing.insert(field, value);
            }
        }
    }
    Ok(Value::Array(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use moldeo_core::Store;

    fn ctx() -> Context {
        Context::new(Store::default())
    }

    fn people() -> Value {
        json!([
            {"id": 1, "name": "Ana", "team": "a"},
            {"id": 2, "name": "Luis", "team": "b"},
            {"id": 3, "name": "Eva", "team": "a"}
        ])
    }

    fn on_team(team: &str) -> Value {
        json!({"path": "current.team", "equals": {"const": team}})
    }

    #[test]
    fn filter_keeps_true_matches() {
        let result = filter(&on_team("a"), &ctx(), &people()).unwrap();
        assert_eq!(result.as_array().unwrap().len(), 2);
    }

    #[test]
    fn filter_stops_at_max() {
        let config = json!({"match": on_team("a"), "max": 1});
        let result = filter(&config, &ctx(), &people()).unwrap();
        assert_eq!(result, json!([{"id": 1, "name": "Ana", "team": "a"}]));
    }

    #[test]
    fn find_equals_first_filter_match() {
        let filtered = filter(&on_team("a"), &ctx(), &people()).unwrap();
        let found = find(&on_team("a"), &ctx(), &people()).unwrap();
        assert_eq!(found, filtered[0]);
        assert_eq!(find(&on_team("z"), &ctx(), &people()).unwrap(), Value::Null);
    }

    #[test]
    fn contains_honors_bounds() {
        assert_eq!(contains(&on_team("b"), &ctx(), &people()).unwrap(), json!(true));
        assert_eq!(contains(&on_team("z"), &ctx(), &people()).unwrap(), json!(false));
        let at_most_one = json!({"match": on_team("a"), "max": 1});
        assert_eq!(contains(&at_most_one, &ctx(), &people()).unwrap(), json!(false));
    }

    #[test]
    fn bounds_reject_values_outside_usize() {
        let config = |max: Value| json!({"max": max}).as_object().cloned().unwrap();
        for bad in [json!(-1), json!(1.5), json!("2")] {
            let err = bound(&config(bad), "max").unwrap_err();
            assert!(matches!(err, Error::ValidationFailed(ref m) if m.contains("'max'")));
        }
        let widest = bound(&config(json!(u64::MAX)), "max");
        match usize::try_from(u64::MAX) {
            Ok(n) => assert_eq!(widest.unwrap(), Some(n)),
            Err(_) => assert!(matches!(widest, Err(Error::ValidationFailed(_)))),
        }
    }

    #[test]
    fn source_is_bound_once() {
        let config = json!({
            "source": {"const": 2},
            "match": {"path": "current.id", "equals": {"path": "source"}}
        });
        let result = filter(&config, &ctx(), &people()).unwrap();
        assert_eq!(result[0]["name"], "Luis");
    }

    #[test]
    fn map_binds_current_and_index() {
        let schema = json!({"properties": {"n": {"path": "current.name"}, "i": {"path": "index"}}});
        let result = map(&schema, &ctx(), &people()).unwrap();
        assert_eq!(result[2], json!({"n": "Eva", "i": 2}));
    }

    #[test]
    fn group_join_pairs_with_first_match() {
        let teams = json!([{"code": "a", "label": "Alpha"}]);
        let config = json!({
            "items": {"const": teams},
            "match": {"path": "current.code", "equals": {"path": "outer.team"}}
        });
        let result = group_join(&config, &ctx(), &people()).unwrap();
        assert_eq!(result[0]["group"]["label"], "Alpha");
        assert_eq!(result[1]["group"], Value::Null);
        assert_eq!(result[1]["item"]["name"], "Luis");
    }

    #[test]
    fn select_toggles() {
        let add = json!({"value": 3, "multiple": true});
        assert_eq!(select(&add, &ctx(), &json!([1, 2])).unwrap(), json!([1, 2, 3]));
        let remove = json!({"value": 2, "multiple": true});
        assert_eq!(select(&remove, &ctx(), &json!([1, 2])).unwrap(), json!([1]));
        let capped = json!({"value": 3, "multiple": true, "max": 2});
        assert_eq!(select(&capped, &ctx(), &json!([1, 2])).unwrap(), json!([1, 2]));
    }

    #[test]
    fn single_select_is_idempotent() {
        let config = json!({"value": "x"});
        let once = select(&config, &ctx(), &json!(["a", "b"])).unwrap();
        let twice = select(&config, &ctx(), &once).unwrap();
        assert_eq!(once, json!(["x"]));
        assert_eq!(twice, json!(["x"]));
    }

    #[test]
    fn patch_merges_by_key() {
        let result = apply_patches(&people(), "id", json!([{"id": 2, "team": "a"}])).unwrap();
        assert_eq!(result[1]["team"], "a");
        assert_eq!(result[1]["name"], "Luis");
        let err = apply_patches(&people(), "id", json!({"id": 9})).unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(_)));
    }

    #[test]
    fn array_keys_reject_non_sequences() {
        let err = filter(&on_team("a"), &ctx(), &json!({"a": 1})).unwrap_err();
        assert!(matches!(err, Error::NotAnArray { ref key, .. } if key == "filter"));
    }

    #[tokio::test]
    async fn async_variants_match_sync() {
        let ctx = ctx();
        let data = people();
        assert_eq!(
            filter_async(&on_team("a"), &ctx, &data).await.unwrap(),
            filter(&on_team("a"), &ctx, &data).unwrap()
        );
        let schema = json!({"path": "current.id"});
        assert_eq!(map_async(&schema, &ctx, &data).await.unwrap(), json!([1, 2, 3]));
    }
}
