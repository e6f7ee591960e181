//! `moldeo keys` — List the schema vocabulary and registered operators.

use moldeo_core::{Keyword, OperatorRegistry, PRECEDENCE};
use moldeo_engine::Engine;

pub fn run() {
    println!("{}", listing(Engine::new().operators()));
}

fn tags(keyword: Keyword) -> &'static str {
    if keyword.is_async_only() {
        "async only"
    } else if keyword.is_array_operation() {
        "sequence"
    } else {
        ""
    }
}

/// Keys in evaluation order, then operators by name.
fn listing(operators: &OperatorRegistry) -> String {
    let mut out = String::from("Schema keys (evaluation order):\n");
    for (position, keyword) in PRECEDENCE.iter().enumerate() {
        let keys = keyword.keys().join(" | ");
        out.push_str(&format!("  {:>2}. {keys:<22} {}\n", position + 1, tags(*keyword)));
    }
    out.push_str("  Modifiers: then, else, bindArg, computed, onError, finally\n");

    out.push_str(&format!("\nOperators ({}):\n", operators.len()));
    for name in operators.names() {
        let description = operators
            .get(name)
            .map(|op| op.description().to_string())
            .unwrap_or_default();
        out.push_str(&format!("  {name:<12} {description}\n"));
    }
    out.trim_end().to_string()
}
