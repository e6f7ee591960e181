//! Path resolution over nested mappings and sequences.
//!
//! A path is a list of segments, given either as delimited text
//! (`"user.address.city"`) or pre-split. Numeric segments index sequences.
//! Reads never create anything; writes create missing intermediate
//! mappings but never replace a scalar on the way to the leaf.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Default segment separator.
pub const DEFAULT_SEPARATOR: &str = ".";

/// Anything that can be turned into path segments.
pub trait PathLike {
    fn segments(&self, separator: &str) -> Vec<String>;
}

impl PathLike for str {
    fn segments(&self, separator: &str) -> Vec<String> {
        if separator.is_empty() {
            return if self.is_empty() { Vec::new() } else { vec![self.to_string()] };
        }
        self.split(separator)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl PathLike for String {
    fn segments(&self, separator: &str) -> Vec<String> {
        self.as_str().segments(separator)
    }
}

impl PathLike for [String] {
    fn segments(&self, _separator: &str) -> Vec<String> {
        self.to_vec()
    }
}

impl PathLike for Vec<String> {
    fn segments(&self, _separator: &str) -> Vec<String> {
        self.clone()
    }
}

impl PathLike for [&str] {
    fn segments(&self, _separator: &str) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl<const N: usize> PathLike for [&str; N] {
    fn segments(&self, _separator: &str) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

/// Result of [`PathResolver::resolve`]: the immediate container, the final
/// key, and the value under it (if any).
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<'v> {
    pub container: &'v Value,
    pub key: String,
    pub value: Option<&'v Value>,
}

/// Separator-aware path navigator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    separator: String,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

impl PathResolver {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Split a path into segments using this resolver's separator.
    pub fn split<P: PathLike + ?Sized>(&self, path: &P) -> Vec<String> {
        path.segments(&self.separator)
    }

    /// Read the value at `path`. Any missing segment yields `None`.
    pub fn get<'v, P: PathLike + ?Sized>(&self, root: &'v Value, path: &P) -> Option<&'v Value> {
        let segments = self.split(path);
        if segments.is_empty() {
            return Some(root);
        }
        let mut current = root;
        for segment in &segments {
            current = child(current, segment)?;
        }
        Some(current)
    }

    /// Resolve `path` into its container, key and value.
    ///
    /// Fails with [`Error::TargetUnavailable`] when the root or an
    /// intermediate container is absent; a missing leaf is `value: None`.
    pub fn resolve<'v, P: PathLike + ?Sized>(
        &self,
        root: &'v Value,
        path: &P,
    ) -> Result<Resolved<'v>> {
        let segments = self.split(path);
        let unavailable = || Error::TargetUnavailable {
            path: segments.join(&self.separator),
        };
        if root.is_null() {
            return Err(unavailable());
        }
        let Some((last, parents)) = segments.split_last() else {
            return Ok(Resolved {
                container: root,
                key: String::new(),
                value: Some(root),
            });
        };

        let mut container = root;
        for segment in parents {
            container = child(container, segment).ok_or_else(unavailable)?;
        }
        if !is_container(container) {
            return Err(unavailable());
        }
        Ok(Resolved {
            container,
            key: last.clone(),
            value: child(container, last),
        })
    }

    /// Write `value` at `path`, creating intermediate mappings as needed.
    ///
    /// An empty path replaces `root` itself. Null or missing intermediates
    /// become mappings; writing through any other scalar fails with
    /// [`Error::TargetUnavailable`] and leaves `root` untouched.
    pub fn set<P: PathLike + ?Sized>(&self, root: &mut Value, path: &P, value: Value) -> Result<()> {
        let segments = self.split(path);
        let full = segments.join(&self.separator);
        let Some((last, parents)) = segments.split_last() else {
            *root = value;
            return Ok(());
        };

        if blocked(root, parents) {
            return Err(Error::TargetUnavailable { path: full });
        }
        let mut current = root;
        for segment in parents {
            current = descend(current, segment, &full)?;
        }
        insert(current, last, value, &full)
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

fn child<'v>(container: &'v Value, segment: &str) -> Option<&'v Value> {
    match container {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
        _ => None,
    }
}

fn parse_index(segment: &str, full: &str) -> Result<usize> {
    segment.parse::<usize>().map_err(|_| {
        Error::validation(format!(
            "segment '{segment}' of '{full}' is not a sequence index"
        ))
    })
}

/// `true` when an existing non-null scalar sits where a container is needed.
fn blocked(root: &Value, parents: &[String]) -> bool {
    let mut current = root;
    for segment in parents {
        if !occupiable(current) {
            return true;
        }
        match child(current, segment) {
            Some(next) => current = next,
            None => return false,
        }
    }
    !occupiable(current)
}

fn occupiable(value: &Value) -> bool {
    value.is_null() || is_container(value)
}

fn descend<'v>(current: &'v mut Value, segment: &str, full: &str) -> Result<&'v mut Value> {
    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    let next = match current {
        Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
        Value::Array(items) => {
            let idx = parse_index(segment, full)?;
            if idx == items.len() {
                items.push(Value::Null);
            }
            let len = items.len();
            items.get_mut(idx).ok_or_else(|| {
                Error::validation(format!("index {idx} out of bounds ({len}) in '{full}'"))
            })?
        }
        _ => {
            return Err(Error::TargetUnavailable {
                path: full.to_string(),
            });
        }
    };
    if next.is_null() {
        *next = Value::Object(Map::new());
    }
    Ok(next)
}

fn insert(current: &mut Value, key: &str, value: Value, full: &str) -> Result<()> {
    match current {
        Value::Object(map) => {
            map.insert(key.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let idx = parse_index(key, full)?;
            if idx < items.len() {
                items[idx] = value;
            } else if idx == items.len() {
                items.push(value);
            } else {
                return Err(Error::validation(format!(
                    "index {idx} out of bounds ({}) in '{full}'",
                    items.len()
                )));
            }
            Ok(())
        }
        Value::Null => {
            *current = Value::Object(Map::new());
            insert(current, key, value, full)
        }
        _ => Err(Error::TargetUnavailable {
            path: full.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_nested_and_indexed() {
        let resolver = PathResolver::default();
        let data = json!({"user": {"tags": ["a", "b"], "name": "Ana"}});
        assert_eq!(resolver.get(&data, "user.name"), Some(&json!("Ana")));
        assert_eq!(resolver.get(&data, "user.tags.1"), Some(&json!("b")));
        assert_eq!(resolver.get(&data, "user.missing.deep"), None);
        assert_eq!(resolver.get(&data, ""), Some(&data));
    }

    #[test]
    fn get_on_null_root_is_absent() {
        let resolver = PathResolver::default();
        assert_eq!(resolver.get(&Value::Null, "a.b"), None);
    }

    #[test]
    fn set_creates_intermediate_mappings() {
        let resolver = PathResolver::default();
        let mut data = json!({});
        resolver.set(&mut data, "a.b.c", json!(3)).unwrap();
        assert_eq!(data, json!({"a": {"b": {"c": 3}}}));
    }

    #[test]
    fn set_then_get_round_trips() {
        let resolver = PathResolver::default();
        let mut data = json!({"list": [1, 2]});
        for (path, value) in [
            ("x", json!(1)),
            ("deep.er.path", json!({"k": true})),
            ("list.2", json!("appended")),
            ("list.0", json!(null)),
        ] {
            resolver.set(&mut data, path, value.clone()).unwrap();
            assert_eq!(resolver.get(&data, path), Some(&value), "path {path}");
        }
    }

    #[test]
    fn set_past_end_of_sequence_fails() {
        let resolver = PathResolver::default();
        let mut data = json!({"list": [1]});
        let err = resolver.set(&mut data, "list.5", json!(0)).unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(_)));
    }

    #[test]
    fn set_on_null_root_builds_mapping() {
        let resolver = PathResolver::default();
        let mut data = Value::Null;
        resolver.set(&mut data, "a", json!(1)).unwrap();
        assert_eq!(data, json!({"a": 1}));
    }

    #[test]
    fn set_refuses_to_write_through_scalars() {
        let resolver = PathResolver::default();
        let mut data = json!({"a": 5, "list": [1], "gap": null});
        let err = resolver.set(&mut data, "a.b", json!(1)).unwrap_err();
        assert!(matches!(err, Error::TargetUnavailable { ref path } if path == "a.b"));
        let err = resolver.set(&mut data, "list.0.x", json!(1)).unwrap_err();
        assert!(matches!(err, Error::TargetUnavailable { .. }));
        assert_eq!(data, json!({"a": 5, "list": [1], "gap": null}));

        resolver.set(&mut data, "gap.filled", json!(true)).unwrap();
        assert_eq!(data["gap"], json!({"filled": true}));

        let mut scalar_root = json!("text");
        let err = resolver.set(&mut scalar_root, "k", json!(1)).unwrap_err();
        assert!(matches!(err, Error::TargetUnavailable { .. }));
    }

    #[test]
    fn resolve_returns_container_and_key() {
        let resolver = PathResolver::default();
        let data = json!({"a": {"b": 1}});
        let resolved = resolver.resolve(&data, "a.b").unwrap();
        assert_eq!(resolved.container, &json!({"b": 1}));
        assert_eq!(resolved.key, "b");
        assert_eq!(resolved.value, Some(&json!(1)));

        let missing_leaf = resolver.resolve(&data, "a.z").unwrap();
        assert_eq!(missing_leaf.value, None);
    }

    #[test]
    fn resolve_on_absent_root_fails() {
        let resolver = PathResolver::default();
        let err = resolver.resolve(&Value::Null, "a").unwrap_err();
        assert!(matches!(err, Error::TargetUnavailable { .. }));

        let data = json!({"a": 1});
        let err = resolver.resolve(&data, "x.y").unwrap_err();
        assert!(matches!(err, Error::TargetUnavailable { path } if path == "x.y"));
    }

    #[test]
    fn custom_separator_and_segments() {
        let resolver = PathResolver::new("/");
        let mut data = json!({});
        resolver.set(&mut data, "a/b", json!(1)).unwrap();
        assert_eq!(resolver.get(&data, ["a", "b"].as_slice()), Some(&json!(1)));
        assert_eq!(resolver.get(&data, &vec!["a".to_string()]), Some(&json!({"b": 1})));
        assert_eq!(resolver.get(&data, "a.b"), None);
    }
}
