//! # Moldeo Core
//!
//! Domain types, traits, and error definitions for the Moldeo schema
//! evaluation engine. This crate has **no runtime** of its own: it defines
//! the model that the engine and its collaborators implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is defined as a trait here ([`Operator`],
//! [`Fetcher`]). Implementations live in their respective crates. This
//! enables:
//! - Swapping the HTTP client or operator library via configuration
//! - Easy testing with stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod context;
pub mod error;
pub mod fetch;
pub mod operator;
pub mod path;
pub mod schema;
pub mod store;
pub mod value;

// Re-export key types at crate root for ergonomics
pub use context::Context;
pub use error::{Error, ErrorKind, Result};
pub use fetch::{FetchRequest, FetchResponse, Fetcher};
pub use operator::{EvaluatorHandle, FnOperator, Operator, OperatorRegistry};
pub use path::{PathLike, PathResolver, Resolved};
pub use schema::{DEFAULT_MAX_DEPTH, EvalOptions, Keyword, PRECEDENCE, UnknownKeyPolicy};
pub use store::Store;
pub use tokio_util::sync::CancellationToken;
