//! Built-in function implementations

use chrono::Datelike;
use ledger_math::Decimal;

use super::{evaluate_node, BuiltinFunction, ExprError, ExprNode, ExprResult, Scope, Value};

fn wrong_argument(function: BuiltinFunction, value: &Value) -> ExprError {
    ExprError::TypeMismatch {
        operation: function.to_string(),
        left: value.type_name().to_string(),
        right: "argument".to_string(),
    }
}

/// Evaluate a built-in function call; arity is checked at parse time
pub fn evaluate_builtin_function(function: BuiltinFunction, args: &[ExprNode], scope: &dyn Scope) -> ExprResult<Value> {
    let arg = match args.first() {
        Some(node) => evaluate_node(node, scope)?,
        None => Value::Null,
    };

    match function {
        BuiltinFunction::Abs => match arg {
            Value::Integer(i) => Ok(match i.checked_abs() {
                Some(abs) => Value::Integer(abs),
                None => Value::Decimal(Decimal::from(i).abs()),
            }),
            Value::Decimal(d) => Ok(Value::Decimal(d.abs())),
            Value::Amount(a) => Ok(Value::Amount(a.abs())),
            Value::Balance(b) => {
                let mut result = ledger_math::Balance::new();
                for amount in b.amounts() {
                    result += &amount.abs();
                }
                Ok(Value::Balance(result))
            }
            Value::Null => Ok(Value::Null),
            other => Err(wrong_argument(function, &other)),
        },
        BuiltinFunction::Commodity => match arg {
            Value::Amount(a) => Ok(Value::String(a.commodity().unwrap_or("").to_string())),
            Value::Balance(b) => {
                let amount = b.to_amount().map_err(|_| wrong_argument(function, &Value::Balance(b.clone())))?;
                Ok(Value::String(amount.commodity().unwrap_or("").to_string()))
            }
            Value::Integer(_) | Value::Decimal(_) | Value::Null => Ok(Value::String(String::new())),
            other => Err(wrong_argument(function, &other)),
        },
        BuiltinFunction::Quantity => match arg {
            Value::Amount(a) => Ok(Value::Decimal(a.quantity())),
            Value::Integer(_) | Value::Decimal(_) => Ok(arg),
            other => Err(wrong_argument(function, &other)),
        },
        BuiltinFunction::Year | BuiltinFunction::Month | BuiltinFunction::Day => match arg {
            Value::Date(date) => Ok(Value::Integer(match function {
                BuiltinFunction::Year => date.year() as i64,
                BuiltinFunction::Month => date.month() as i64,
                _ => date.day() as i64,
            })),
            other => Err(wrong_argument(function, &other)),
        },
        BuiltinFunction::ToUpper => match arg {
            Value::String(s) => Ok(Value::String(s.to_uppercase())),
            other => Err(wrong_argument(function, &other)),
        },
        BuiltinFunction::ToLower => match arg {
            Value::String(s) => Ok(Value::String(s.to_lowercase())),
            other => Err(wrong_argument(function, &other)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::super::{EmptyScope, Expression};
    use super::*;

    fn eval(source: &str) -> ExprResult<Value> {
        Expression::parse(source)?.evaluate(&EmptyScope)
    }

    #[test]
    fn test_date_parts() {
        assert_eq!(eval("year([2024-03-09])").unwrap(), Value::Integer(2024));
        assert_eq!(eval("month([2024-03-09])").unwrap(), Value::Integer(3));
        assert_eq!(eval("day([2024-03-09])").unwrap(), Value::Integer(9));
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(eval("to_upper(\"food\")").unwrap(), Value::from("FOOD"));
        assert_eq!(eval("to_lower(\"FOOD\")").unwrap(), Value::from("food"));
        assert!(eval("to_upper(3)").is_err());
    }

    #[test]
    fn test_abs() {
        assert_eq!(eval("abs(-5)").unwrap(), Value::Integer(5));
    }
}
