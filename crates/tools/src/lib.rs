//! Built-in collaborators for Moldeo.
//!
//! The engine treats these as injectable capabilities: the arithmetic
//! helper behind `calc`, the operator library looked up by `use`,
//! `function` and `call`, and the HTTP fetcher behind `consulta`.

pub mod arithmetic;
pub mod http_fetch;
pub mod operators;

use std::sync::Arc;

use moldeo_core::operator::OperatorRegistry;

pub use arithmetic::Arithmetic;
pub use http_fetch::HttpFetcher;

/// Create an operator registry with every built-in operator.
pub fn default_operators() -> OperatorRegistry {
    let mut registry = OperatorRegistry::new();
    for builtin in operators::BUILTINS {
        registry.register(Arc::new(*builtin));
    }
    for op in Arithmetic::ALL {
        registry.register(Arc::new(operators::ArithmeticOperator(op)));
    }
    registry
}
