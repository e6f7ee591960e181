//! The shared, mutable root data of an evaluation tree.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use crate::error::Result;
use crate::path::{PathLike, PathResolver};

/// Handle to the caller-owned store.
///
/// Cloning is cheap and every clone observes the same data. Guards are
/// only taken inside these methods, so no lock is ever held across an
/// await point.
#[derive(Debug, Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<Value>>,
}

impl Store {
    pub fn new(root: Value) -> Self {
        Self {
            inner: Arc::new(RwLock::new(root)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Value> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Value> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clone of the whole root value.
    pub fn snapshot(&self) -> Value {
        self.read().clone()
    }

    /// Read a path (cloned). Absent paths are `None`.
    pub fn get<P: PathLike + ?Sized>(&self, resolver: &PathResolver, path: &P) -> Option<Value> {
        resolver.get(&self.read(), path).cloned()
    }

    /// Write a path, creating intermediate mappings.
    pub fn set<P: PathLike + ?Sized>(
        &self,
        resolver: &PathResolver,
        path: &P,
        value: Value,
    ) -> Result<()> {
        resolver.set(&mut self.write(), path, value)
    }

    /// Read-modify-write a path under a single write guard.
    pub fn update<P, F>(&self, resolver: &PathResolver, path: &P, f: F) -> Result<Value>
    where
        P: PathLike + ?Sized,
        F: FnOnce(Option<&Value>) -> Result<Value>,
    {
        let mut root = self.write();
        let next = f(resolver.get(&root, path))?;
        resolver.set(&mut root, path, next.clone())?;
        Ok(next)
    }

    /// `true` when both handles point at the same store.
    pub fn same_as(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl From<Value> for Store {
    fn from(root: Value) -> Self {
        Self::new(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clones_share_data() {
        let resolver = PathResolver::default();
        let store = Store::new(json!({"count": 1}));
        let other = store.clone();
        other.set(&resolver, "count", json!(2)).unwrap();
        assert_eq!(store.get(&resolver, "count"), Some(json!(2)));
        assert!(store.same_as(&other));
    }

    #[test]
    fn update_reads_and_writes_atomically() {
        let resolver = PathResolver::default();
        let store = Store::new(json!({}));
        let next = store
            .update(&resolver, "hits", |current| {
                Ok(json!(current.and_then(Value::as_i64).unwrap_or(0) + 1))
            })
            .unwrap();
        assert_eq!(next, json!(1));
        assert_eq!(store.snapshot(), json!({"hits": 1}));
    }
}
