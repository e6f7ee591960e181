//! Built-in operators for the `use`, `function` and `call` keys.
//!
//! Most operators are pure transforms of the current value. `default`
//! and `append` also read the previous value.

use moldeo_core::error::{Error, Result};
use moldeo_core::operator::{EvaluatorHandle, Operator};
use moldeo_core::value::{as_f64, number, type_name};
use serde_json::Value;

use crate::arithmetic::Arithmetic;

type Transform = fn(Value, Value) -> Result<Value>;

/// A pure operator backed by a function pointer.
#[derive(Clone, Copy)]
pub struct Builtin {
    name: &'static str,
    description: &'static str,
    transform: Transform,
}

impl Operator for Builtin {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn apply(&self, current: Value, previous: Value, _: &dyn EvaluatorHandle) -> Result<Value> {
        (self.transform)(current, previous)
    }
}

/// Exposes an [`Arithmetic`] fold as an operator over a sequence.
pub struct ArithmeticOperator(pub Arithmetic);

impl Operator for ArithmeticOperator {
    fn name(&self) -> &str {
        self.0.as_str()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn apply(&self, current: Value, _: Value, _: &dyn EvaluatorHandle) -> Result<Value> {
        self.0.calculate_value(&current)
    }
}

pub const BUILTINS: &[Builtin] = &[
    Builtin {
        name: "upper",
        description: "Uppercase a string",
        transform: upper,
    },
    Builtin {
        name: "lower",
        description: "Lowercase a string",
        transform: lower,
    },
    Builtin {
        name: "trim",
        description: "Strip surrounding whitespace",
        transform: trim,
    },
    Builtin {
        name: "length",
        description: "Length of a string, sequence or mapping",
        transform: length,
    },
    Builtin {
        name: "keys",
        description: "Keys of a mapping",
        transform: keys,
    },
    Builtin {
        name: "values",
        description: "Values of a mapping",
        transform: values,
    },
    Builtin {
        name: "first",
        description: "First item of a sequence, or null",
        transform: first,
    },
    Builtin {
        name: "last",
        description: "Last item of a sequence, or null",
        transform: last,
    },
    Builtin {
        name: "reverse",
        description: "Reverse a sequence or string",
        transform: reverse,
    },
    Builtin {
        name: "join",
        description: "Concatenate a sequence into a string",
        transform: join,
    },
    Builtin {
        name: "to_string",
        description: "Render a value as text",
        transform: to_string,
    },
    Builtin {
        name: "to_number",
        description: "Parse a value as a number, or null",
        transform: to_number,
    },
    Builtin {
        name: "default",
        description: "The previous value when the current one is null",
        transform: default,
    },
    Builtin {
        name: "append",
        description: "Append the current value to the previous sequence",
        transform: append,
    },
];

fn expect_str<'v>(name: &str, value: &'v Value) -> Result<&'v str> {
    value.as_str().ok_or_else(|| {
        Error::validation(format!("{name} expects a string, found {}", type_name(value)))
    })
}

fn upper(current: Value, _: Value) -> Result<Value> {
    Ok(Value::String(expect_str("upper", &current)?.to_uppercase()))
}

fn lower(current: Value, _: Value) -> Result<Value> {
    Ok(Value::String(expect_str("lower", &current)?.to_lowercase()))
}

fn trim(current: Value, _: Value) -> Result<Value> {
    Ok(Value::String(expect_str("trim", &current)?.trim().to_string()))
}

fn length(current: Value, _: Value) -> Result<Value> {
    let len = match &current {
        Value::String(s) => s.chars().count(),
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        Value::Null => 0,
        other => {
            return Err(Error::validation(format!(
                "length is undefined for {}",
                type_name(other)
            )));
        }
    };
    Ok(Value::from(len))
}

fn keys(current: Value, _: Value) -> Result<Value> {
    match current {
        Value::Object(map) => Ok(Value::Array(map.keys().cloned().map(Value::String).collect())),
        other => Err(Error::validation(format!(
            "keys expects a mapping, found {}",
            type_name(&other)
        ))),
    }
}

fn values(current: Value, _: Value) -> Result<Value> {
    match current {
        Value::Object(map) => Ok(Value::Array(map.into_iter().map(|(_, v)| v).collect())),
        other => Err(Error::validation(format!(
            "values expects a mapping, found {}",
            type_name(&other)
        ))),
    }
}

fn first(current: Value, _: Value) -> Result<Value> {
    match current {
        Value::Array(items) => Ok(items.into_iter().next().unwrap_or(Value::Null)),
        other => Err(Error::not_an_array("first", &other)),
    }
}

fn last(current: Value, _: Value) -> Result<Value> {
    match current {
        Value::Array(items) => Ok(items.into_iter().last().unwrap_or(Value::Null)),
        other => Err(Error::not_an_array("last", &other)),
    }
}

fn reverse(current: Value, _: Value) -> Result<Value> {
    match current {
        Value::Array(mut items) => {
            items.reverse();
            Ok(Value::Array(items))
        }
        Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
        other => Err(Error::not_an_array("reverse", &other)),
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn join(current: Value, _: Value) -> Result<Value> {
    match current {
        Value::Array(items) => Ok(Value::String(items.iter().map(text).collect())),
        other => Err(Error::not_an_array("join", &other)),
    }
}

fn to_string(current: Value, _: Value) -> Result<Value> {
    Ok(Value::String(text(&current)))
}

fn to_number(current: Value, _: Value) -> Result<Value> {
    Ok(as_f64(&current).map(number).unwrap_or(Value::Null))
}

fn default(current: Value, previous: Value) -> Result<Value> {
    Ok(if current.is_null() { previous } else { current })
}

fn append(current: Value, previous: Value) -> Result<Value> {
    match previous {
        Value::Array(mut items) => {
            items.push(current);
            Ok(Value::Array(items))
        }
        Value::Null => Ok(Value::Array(vec![current])),
        other => Err(Error::not_an_array("append", &other)),
    }
}
