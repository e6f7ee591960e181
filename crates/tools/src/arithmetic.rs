//! Arithmetic helper behind the `calc` key.
//!
//! Folds a sequence of numbers left-to-right with one of four operations.
//! Spanish names are canonical; English aliases are accepted.

use std::fmt;
use std::str::FromStr;

use moldeo_core::error::{Error, Result};
use moldeo_core::value::{as_f64, number, type_name};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arithmetic {
    Sumar,
    Restar,
    Multiplicar,
    Dividir,
}

impl Arithmetic {
    pub const ALL: [Arithmetic; 4] = [
        Arithmetic::Sumar,
        Arithmetic::Restar,
        Arithmetic::Multiplicar,
        Arithmetic::Dividir,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Arithmetic::Sumar => "sumar",
            Arithmetic::Restar => "restar",
            Arithmetic::Multiplicar => "multiplicar",
            Arithmetic::Dividir => "dividir",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Arithmetic::Sumar => "Sum of a list of numbers",
            Arithmetic::Restar => "First number minus the rest",
            Arithmetic::Multiplicar => "Product of a list of numbers",
            Arithmetic::Dividir => "First number divided by the rest",
        }
    }

    /// Apply the operation over `values`.
    ///
    /// An empty list yields the identity (`0` for sums, `1` for products);
    /// an empty difference or quotient is invalid.
    pub fn calculate(&self, values: &[Value]) -> Result<Value> {
        let numbers = values
            .iter()
            .map(|v| {
                as_f64(v).ok_or_else(|| {
                    Error::validation(format!(
                        "{} expects numbers, found {}",
                        self.as_str(),
                        type_name(v)
                    ))
                })
            })
            .collect::<Result<Vec<f64>>>()?;

        let result = match self {
            Arithmetic::Sumar => numbers.iter().sum(),
            Arithmetic::Multiplicar => numbers.iter().product(),
            Arithmetic::Restar => {
                let (first, rest) = self.split(&numbers)?;
                rest.iter().fold(first, |acc, n| acc - n)
            }
            Arithmetic::Dividir => {
                let (first, rest) = self.split(&numbers)?;
                let mut acc = first;
                for n in rest {
                    if *n == 0.0 {
                        return Err(Error::validation("Division by zero"));
                    }
                    acc /= n;
                }
                acc
            }
        };

        Ok(number(result))
    }

    /// Apply the operation to a sequence value.
    pub fn calculate_value(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Array(items) => self.calculate(items),
            other => Err(Error::not_an_array(self.as_str(), other)),
        }
    }

    fn split<'a>(&self, numbers: &'a [f64]) -> Result<(f64, &'a [f64])> {
        numbers
            .split_first()
            .map(|(first, rest)| (*first, rest))
            .ok_or_else(|| Error::validation(format!("{} needs at least one number", self.as_str())))
    }
}

impl FromStr for Arithmetic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sumar" | "sum" | "add" => Ok(Arithmetic::Sumar),
            "restar" | "subtract" => Ok(Arithmetic::Restar),
            "multiplicar" | "multiply" => Ok(Arithmetic::Multiplicar),
            "dividir" | "divide" => Ok(Arithmetic::Dividir),
            other => Err(Error::validation(format!(
                "unknown calc operation '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Arithmetic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calc(op: &str, values: Value) -> Result<Value> {
        op.parse::<Arithmetic>()?.calculate_value(&values)
    }

    #[test]
    fn four_operations() {
        assert_eq!(calc("sumar", json!([100, 10, 5])).unwrap(), json!(115));
        assert_eq!(calc("restar", json!([100, 10, 5])).unwrap(), json!(85));
        assert_eq!(calc("multiplicar", json!([100, 10, 5])).unwrap(), json!(5000));
        assert_eq!(calc("dividir", json!([100, 10, 5])).unwrap(), json!(2));
    }

    #[test]
    fn english_aliases() {
        assert_eq!(calc("sum", json!([1, 2])).unwrap(), json!(3));
        assert_eq!(calc("divide", json!([9, 2])).unwrap(), json!(4.5));
    }

    #[test]
    fn numeric_strings_are_accepted() {
        assert_eq!(calc("sumar", json!(["1.5", 2])).unwrap(), json!(3.5));
    }

    #[test]
    fn division_by_zero() {
        assert!(calc("dividir", json!([1, 0])).is_err());
    }

    #[test]
    fn empty_list_identities() {
        assert_eq!(calc("sumar", json!([])).unwrap(), json!(0));
        assert_eq!(calc("multiplicar", json!([])).unwrap(), json!(1));
        assert!(calc("restar", json!([])).is_err());
    }

    #[test]
    fn non_numeric_item_is_invalid() {
        let err = calc("sumar", json!([1, {"a": 1}])).unwrap_err();
        assert!(err.to_string().contains("object"));
    }

    #[test]
    fn non_sequence_is_not_an_array() {
        let err = calc("sumar", json!(3)).unwrap_err();
        assert!(matches!(err, Error::NotAnArray { .. }));
    }

    #[test]
    fn unknown_operation() {
        assert!("modulo".parse::<Arithmetic>().is_err());
    }
}
