//! Property composer — builds a mapping from named property schemas.
//!
//! Properties are evaluated in declaration order with `siblings` set to
//! the fields built so far, so `siblings.<name>` sees earlier properties
//! and never later ones. A property marked `computed: true` is kept as a
//! [`LazyProperty`] and re-evaluated against the eager fields whenever it
//! is read.

use serde_json::{Map, Value};
use tracing::debug;

use moldeo_core::schema::Keyword;
use moldeo_core::value::type_name;
use moldeo_core::{Context, Error, Result};

use crate::async_eval::evaluate_async;
use crate::evaluator::evaluate;

/// A deferred property value with an explicit force operation.
#[derive(Debug, Clone)]
pub struct LazyProperty {
    schema: Value,
    ctx: Context,
}

impl LazyProperty {
    pub fn new(schema: Value, ctx: Context) -> Self {
        Self { schema, ctx }
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Evaluate the property against `siblings`.
    pub fn force(&self, siblings: &Map<String, Value>) -> Result<Value> {
        let ctx = self.ctx.clone().with_siblings(siblings.clone());
        evaluate(&self.schema, &ctx)
    }

    pub async fn force_async(&self, siblings: &Map<String, Value>) -> Result<Value> {
        let ctx = self.ctx.clone().with_siblings(siblings.clone());
        evaluate_async(&self.schema, &ctx).await
    }
}

#[derive(Debug, Clone)]
pub enum Slot {
    Ready(Value),
    Computed(LazyProperty),
}

/// The result of composing a property map.
#[derive(Debug, Clone, Default)]
pub struct Composition {
    slots: Vec<(String, Slot)>,
}

impl Composition {
    /// Property names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|(name, _)| name.as_str())
    }

    pub fn is_computed(&self, name: &str) -> bool {
        self.slot(name)
            .is_some_and(|slot| matches!(slot, Slot::Computed(_)))
    }

    /// Read a property, forcing it if it is computed.
    pub fn get(&self, name: &str) -> Result<Option<Value>> {
        match self.slot(name) {
            None => Ok(None),
            Some(Slot::Ready(value)) => Ok(Some(value.clone())),
            Some(Slot::Computed(lazy)) => lazy.force(&self.ready_fields()).map(Some),
        }
    }

    /// The final mapping, in declaration order.
    pub fn force(&self) -> Result<Value> {
        let ready = self.ready_fields();
        let mut out = Map::with_capacity(self.slots.len());
        for (name, slot) in &self.slots {
            let value = match slot {
                Slot::Ready(value) => value.clone(),
                Slot::Computed(lazy) => lazy.force(&ready)?,
            };
            out.insert(name.clone(), value);
        }
        Ok(Value::Object(out))
    }

    pub async fn force_async(&self) -> Result<Value> {
        let ready = self.ready_fields();
        let mut out = Map::with_capacity(self.slots.len());
        for (name, slot) in &self.slots {
            let value = match slot {
                Slot::Ready(value) => value.clone(),
                Slot::Computed(lazy) => lazy.force_async(&ready).await?,
            };
            out.insert(name.clone(), value);
        }
        Ok(Value::Object(out))
    }

    fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots
            .iter()
            .find_map(|(n, slot)| (n == name).then_some(slot))
    }

    fn ready_fields(&self) -> Map<String, Value> {
        self.slots
            .iter()
            .filter_map(|(name, slot)| match slot {
                Slot::Ready(value) => Some((name.clone(), value.clone())),
                Slot::Computed(_) => None,
            })
            .collect()
    }
}

fn is_computed(schema: &Value) -> bool {
    schema
        .as_object()
        .and_then(|node| Keyword::Computed.lookup(node))
        .is_some_and(|flag| *flag == Value::Bool(true))
}

fn properties(props: &Value) -> Result<&Map<String, Value>> {
    props.as_object().ok_or_else(|| {
        Error::validation(format!(
            "properties expects a mapping, found {}",
            type_name(props)
        ))
    })
}

pub struct PropertyComposer;

impl PropertyComposer {
    /// Compose `props` against `ctx`, whose target is the value the
    /// properties are built from.
    pub fn compose(props: &Value, ctx: &Context) -> Result<Composition> {
        let mut built = Map::new();
        let mut composition = Composition::default();
        for (name, schema) in properties(props)? {
            let slot = if is_computed(schema) {
                debug!(property = %name, "Installing computed property");
                Slot::Computed(LazyProperty::new(schema.clone(), ctx.clone()))
            } else {
                let value = evaluate(schema, &ctx.clone().with_siblings(built.clone()))?;
                built.insert(name.clone(), value.clone());
                Slot::Ready(value)
            };
            composition.slots.push((name.clone(), slot));
        }
        Ok(composition)
    }

    pub async fn compose_async(props: &Value, ctx: &Context) -> Result<Composition> {
        let mut built = Map::new();
        let mut composition = Composition::default();
        for (name, schema) in properties(props)? {
            let slot = if is_computed(schema) {
                debug!(property = %name, "Installing computed property");
                Slot::Computed(LazyProperty::new(schema.clone(), ctx.clone()))
            } else {
                let prop_ctx = ctx.clone().with_siblings(built.clone());
                let value = evaluate_async(schema, &prop_ctx).await?;
                built.insert(name.clone(), value.clone());
                Slot::Ready(value)
            };
            composition.slots.push((name.clone(), slot));
        }
        Ok(composition)
    }
}
