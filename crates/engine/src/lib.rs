//! # Moldeo Engine
//!
//! Recursive evaluation of declarative schemas against a [`Context`].
//!
//! A schema node is a constant, a sequence of nodes, or a mapping of
//! recognized keys. Mappings are planned into a [`Pipeline`] whose steps
//! run in a fixed precedence, either synchronously ([`evaluate`]) or with
//! suspension and cancellation ([`evaluate_async`]).
//!
//! ```no_run
//! use moldeo_engine::Engine;
//! use moldeo_core::Store;
//! use serde_json::json;
//!
//! let engine = Engine::new();
//! let ctx = engine.context(Store::new(json!({"nombre": "Melany"})));
//! let same = engine
//!     .evaluate(&json!({"path": "nombre", "equals": {"const": "Melany"}}), &ctx)
//!     .unwrap();
//! assert_eq!(same, json!(true));
//! ```
//!
//! [`Context`]: moldeo_core::Context

pub mod arrays;
pub mod async_eval;
pub mod composer;
pub mod directive;
pub mod engine;
pub mod evaluation;
pub mod evaluator;
pub mod pipeline;

pub use async_eval::evaluate_async;
pub use composer::{Composition, LazyProperty, PropertyComposer};
pub use directive::{Directive, plan};
pub use engine::Engine;
pub use evaluation::{Coordinator, Evaluation, EvaluationState};
pub use evaluator::evaluate;
pub use pipeline::{Pipeline, Settled, Step};
