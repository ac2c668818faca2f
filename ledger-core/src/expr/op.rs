//! Operator evaluation for expressions

use std::cmp::Ordering;
use std::ops::{Add, Div, Mul, Neg, Sub};

use chrono::{Days, NaiveDate};
use ledger_math::{Amount, AmountError, Balance, Decimal};

use super::{evaluate_node, BinaryOp, ExprError, ExprNode, ExprResult, Scope, UnaryOp, Value as V};

fn mismatch(operation: &str, left: &V, right: &V) -> ExprError {
    ExprError::TypeMismatch {
        operation: operation.to_string(),
        left: left.type_name().to_string(),
        right: right.type_name().to_string(),
    }
}

fn overflow(operation: &str) -> ExprError {
    ExprError::Overflow(operation.to_string())
}

fn number(value: &V) -> Decimal {
    value.as_decimal().unwrap_or_default()
}

fn shift_date(date: NaiveDate, days: i64) -> ExprResult<V> {
    let step = Days::new(days.unsigned_abs());
    let shifted = if days < 0 { date.checked_sub_days(step) } else { date.checked_add_days(step) };
    shifted.map(V::Date).ok_or_else(|| overflow("date arithmetic"))
}

fn scale_balance(balance: &Balance, factor: Decimal) -> ExprResult<Balance> {
    let mut result = Balance::new();
    for amount in balance.amounts() {
        let scaled = amount.scaled(factor).map_err(|_| overflow("multiplication"))?;
        result.checked_add_amount(&scaled).map_err(|_| overflow("multiplication"))?;
    }
    Ok(result)
}

impl Add for V {
    type Output = ExprResult<V>;

    fn add(self, rhs: V) -> Self::Output {
        match (self, rhs) {
            (V::Null, v) | (v, V::Null) => Ok(v),
            (V::Integer(a), V::Integer(b)) => Ok(match a.checked_add(b) {
                Some(sum) => V::Integer(sum),
                None => V::Decimal(Decimal::from(a) + Decimal::from(b)),
            }),
            (a @ (V::Integer(_) | V::Decimal(_)), b @ (V::Integer(_) | V::Decimal(_))) => {
                number(&a).checked_add(number(&b)).map(V::Decimal).ok_or_else(|| overflow("addition"))
            }
            (V::Amount(a), V::Amount(b)) => match a.checked_add(&b) {
                Ok(sum) => Ok(V::Amount(sum)),
                Err(AmountError::CommodityMismatch(..)) => {
                    let mut balance = Balance::from_amount(&a);
                    balance += &b;
                    Ok(V::Balance(balance))
                }
                Err(_) => Err(overflow("addition")),
            },
            (V::Amount(a), n @ (V::Integer(_) | V::Decimal(_)))
            | (n @ (V::Integer(_) | V::Decimal(_)), V::Amount(a)) => {
                let quantity = a.quantity().checked_add(number(&n)).ok_or_else(|| overflow("addition"))?;
                Ok(V::Amount(Amount::new(quantity, a.commodity())))
            }
            (V::Balance(mut a), V::Amount(b)) | (V::Amount(b), V::Balance(mut a)) => {
                a.checked_add_amount(&b).map_err(|_| overflow("addition"))?;
                Ok(V::Balance(a))
            }
            (V::Balance(mut a), V::Balance(b)) => {
                a.checked_add_balance(&b).map_err(|_| overflow("addition"))?;
                Ok(V::Balance(a))
            }
            (V::String(a), V::String(b)) => Ok(V::String(a + &b)),
            (V::Date(d), V::Integer(days)) | (V::Integer(days), V::Date(d)) => shift_date(d, days),
            (a, b) => Err(mismatch("addition", &a, &b)),
        }
    }
}

impl Sub for V {
    type Output = ExprResult<V>;

    fn sub(self, rhs: V) -> Self::Output {
        match (self, rhs) {
            (V::Date(a), V::Date(b)) => Ok(V::Integer((a - b).num_days())),
            (V::Date(d), V::Integer(days)) => shift_date(d, days.checked_neg().ok_or_else(|| overflow("subtraction"))?),
            (
                a @ (V::Null | V::Integer(_) | V::Decimal(_) | V::Amount(_) | V::Balance(_)),
                b @ (V::Null | V::Integer(_) | V::Decimal(_) | V::Amount(_) | V::Balance(_)),
            ) => a + (-b)?,
            (a, b) => Err(mismatch("subtraction", &a, &b)),
        }
    }
}

impl Mul for V {
    type Output = ExprResult<V>;

    fn mul(self, rhs: V) -> Self::Output {
        match (self, rhs) {
            (V::Integer(a), V::Integer(b)) => match a.checked_mul(b) {
                Some(product) => Ok(V::Integer(product)),
                None => Decimal::from(a)
                    .checked_mul(Decimal::from(b))
                    .map(V::Decimal)
                    .ok_or_else(|| overflow("multiplication")),
            },
            (a @ (V::Integer(_) | V::Decimal(_)), b @ (V::Integer(_) | V::Decimal(_))) => {
                number(&a).checked_mul(number(&b)).map(V::Decimal).ok_or_else(|| overflow("multiplication"))
            }
            (V::Amount(a), n @ (V::Integer(_) | V::Decimal(_)))
            | (n @ (V::Integer(_) | V::Decimal(_)), V::Amount(a)) => {
                a.scaled(number(&n)).map(V::Amount).map_err(|_| overflow("multiplication"))
            }
            (V::Balance(b), n @ (V::Integer(_) | V::Decimal(_)))
            | (n @ (V::Integer(_) | V::Decimal(_)), V::Balance(b)) => {
                Ok(V::Balance(scale_balance(&b, number(&n))?))
            }
            (a, b) => Err(mismatch("multiplication", &a, &b)),
        }
    }
}

impl Div for V {
    type Output = ExprResult<V>;

    fn div(self, rhs: V) -> Self::Output {
        let divisor = match &rhs {
            V::Integer(_) | V::Decimal(_) => rhs.as_decimal(),
            V::Amount(a) => Some(a.quantity()),
            _ => None,
        };
        if divisor.map_or(false, |d| d.is_zero()) {
            return Err(ExprError::DivisionByZero);
        }

        match (self, rhs) {
            (a @ (V::Integer(_) | V::Decimal(_)), b @ (V::Integer(_) | V::Decimal(_))) => {
                number(&a).checked_div(number(&b)).map(V::Decimal).ok_or_else(|| overflow("division"))
            }
            (V::Amount(a), b @ (V::Integer(_) | V::Decimal(_))) => {
                a.divided(number(&b)).map(V::Amount).map_err(|_| overflow("division"))
            }
            (V::Amount(a), V::Amount(b)) => {
                if a.compare(&b).is_err() {
                    return Err(mismatch("division", &V::Amount(a), &V::Amount(b)));
                }
                a.quantity().checked_div(b.quantity()).map(V::Decimal).ok_or_else(|| overflow("division"))
            }
            (a, b) => Err(mismatch("division", &a, &b)),
        }
    }
}

impl Neg for V {
    type Output = ExprResult<V>;

    fn neg(self) -> Self::Output {
        match self {
            V::Null => Ok(V::Null),
            V::Integer(i) => Ok(i.checked_neg().map_or_else(|| V::Decimal(-Decimal::from(i)), V::Integer)),
            V::Decimal(d) => Ok(V::Decimal(-d)),
            V::Amount(a) => Ok(V::Amount(a.negated())),
            V::Balance(b) => Ok(V::Balance(b.negated())),
            other => Err(mismatch("negation", &other, &other)),
        }
    }
}

/// Three-way comparison of two values
///
/// Numbers compare with numbers and with the quantity of an amount.
/// Amounts and balances compare only within one commodity. Null sorts
/// before everything else.
pub fn compare_values(left: &V, right: &V) -> ExprResult<Ordering> {
    let incomparable = || ExprError::Incomparable(left.type_name().to_string(), right.type_name().to_string());

    match (left, right) {
        (V::Null, V::Null) => Ok(Ordering::Equal),
        (V::Null, _) => Ok(Ordering::Less),
        (_, V::Null) => Ok(Ordering::Greater),
        (V::Bool(a), V::Bool(b)) => Ok(a.cmp(b)),
        (V::Integer(a), V::Integer(b)) => Ok(a.cmp(b)),
        (V::Integer(_) | V::Decimal(_), V::Integer(_) | V::Decimal(_)) => Ok(number(left).cmp(&number(right))),
        (V::Amount(a), V::Amount(b)) => a.compare(b).map_err(|_| incomparable()),
        (V::Amount(a), V::Integer(_) | V::Decimal(_)) => Ok(a.quantity().cmp(&number(right))),
        (V::Integer(_) | V::Decimal(_), V::Amount(b)) => Ok(number(left).cmp(&b.quantity())),
        (V::Balance(_), _) | (_, V::Balance(_)) => {
            let a = left.to_balance().map_err(|_| incomparable())?;
            let b = right.to_balance().map_err(|_| incomparable())?;
            a.compare(&b).map_err(|_| incomparable())
        }
        (V::String(a), V::String(b)) => Ok(a.cmp(b)),
        (V::Date(a), V::Date(b)) => Ok(a.cmp(b)),
        _ => Err(incomparable()),
    }
}

/// Commodity-keyed components of a numeric value, in symbol order
///
/// Numbers and the empty balance act as a commodity-less amount.
fn sort_components(value: &V) -> Option<Vec<(&str, Decimal)>> {
    match value {
        V::Integer(_) | V::Decimal(_) => Some(vec![("", number(value))]),
        V::Amount(a) => Some(vec![(a.commodity().unwrap_or(""), a.quantity())]),
        V::Balance(b) if b.is_empty() => Some(vec![("", Decimal::ZERO)]),
        V::Balance(b) => Some(b.amounts().map(|a| (a.commodity().unwrap_or(""), a.quantity())).collect()),
        _ => None,
    }
}

/// Ordering used for sort keys
///
/// Total over the numeric kinds: amounts of different commodities order
/// by commodity symbol, then quantity, and balances compare component by
/// component. Other kinds compare as in [`compare_values`].
pub fn sort_compare(left: &V, right: &V) -> ExprResult<Ordering> {
    match (left, right) {
        (V::Null, _) | (_, V::Null) => compare_values(left, right),
        _ => match (sort_components(left), sort_components(right)) {
            (Some(a), Some(b)) => Ok(a.cmp(&b)),
            _ => compare_values(left, right),
        },
    }
}

/// Stably sort `items` by their keys using [`sort_compare`]
///
/// Fails without reordering when two keys have no common order.
pub fn sort_by_key_values<T>(items: &mut [(V, T)]) -> ExprResult<()> {
    // Comparability is shared by kind, so checking against one key suffices
    if let Some((first, _)) = items.iter().find(|(key, _)| !matches!(key, V::Null)) {
        for (key, _) in items.iter() {
            sort_compare(first, key)?;
        }
    }
    items.sort_by(|(left, _), (right, _)| sort_compare(left, right).unwrap_or(Ordering::Equal));
    Ok(())
}

fn values_equal(left: &V, right: &V) -> bool {
    compare_values(left, right).map_or(false, |ordering| ordering == Ordering::Equal)
}

/// Evaluate a binary operation
pub fn evaluate_binary_op(op: BinaryOp, left: &ExprNode, right: &ExprNode, scope: &dyn Scope) -> ExprResult<V> {
    // Logical operators short-circuit
    match op {
        BinaryOp::And => {
            if !evaluate_node(left, scope)?.is_truthy() {
                return Ok(V::Bool(false));
            }
            return Ok(V::Bool(evaluate_node(right, scope)?.is_truthy()));
        }
        BinaryOp::Or => {
            if evaluate_node(left, scope)?.is_truthy() {
                return Ok(V::Bool(true));
            }
            return Ok(V::Bool(evaluate_node(right, scope)?.is_truthy()));
        }
        _ => {}
    }

    let lhs = evaluate_node(left, scope)?;
    let rhs = evaluate_node(right, scope)?;

    match op {
        BinaryOp::Add => lhs + rhs,
        BinaryOp::Sub => lhs - rhs,
        BinaryOp::Mul => lhs * rhs,
        BinaryOp::Div => lhs / rhs,
        BinaryOp::Eq => Ok(V::Bool(values_equal(&lhs, &rhs))),
        BinaryOp::Ne => Ok(V::Bool(!values_equal(&lhs, &rhs))),
        BinaryOp::Lt => Ok(V::Bool(compare_values(&lhs, &rhs)? == Ordering::Less)),
        BinaryOp::Gt => Ok(V::Bool(compare_values(&lhs, &rhs)? == Ordering::Greater)),
        BinaryOp::Le => Ok(V::Bool(compare_values(&lhs, &rhs)? != Ordering::Greater)),
        BinaryOp::Ge => Ok(V::Bool(compare_values(&lhs, &rhs)? != Ordering::Less)),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

/// Evaluate a unary operation
pub fn evaluate_unary_op(op: UnaryOp, operand: &ExprNode, scope: &dyn Scope) -> ExprResult<V> {
    let value = evaluate_node(operand, scope)?;
    match op {
        UnaryOp::Neg => -value,
        UnaryOp::Not => Ok(V::Bool(!value.is_truthy())),
    }
}
