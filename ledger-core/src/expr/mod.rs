//! Expression evaluation engine
//!
//! Report stages are configured with small value expressions: filter
//! predicates (`account =~ "Food" && amount > 10`), sort keys (`date`,
//! `-amount`) and total expressions (`total`). This module provides:
//! - Arithmetic operations (+, -, *, /)
//! - Comparison operations (==, !=, <, >, <=, >=)
//! - Logical operations (&&, ||, !, and, or, not)
//! - Regex matching (`=~`) with patterns compiled once, at parse time
//! - Date literals (`[2024-01-31]`) and built-in functions
//! - Conditional expressions (ternary operator)
//!
//! Identifiers resolve through a [`Scope`], which the reporting layer
//! implements for postings and accounts.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate as Date;
use ledger_math::{Amount, Balance, Decimal};
use regex::Regex;
use thiserror::Error;

pub mod functions;
pub mod op;
pub mod parser;
pub mod predicate;

pub use predicate::ItemPredicate;

/// Value type that expressions can evaluate to
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null/empty value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Integer(i64),
    /// Decimal value (for precise monetary calculations)
    Decimal(Decimal),
    /// Amount with optional commodity
    Amount(Amount),
    /// Multi-commodity balance
    Balance(Balance),
    /// String value
    String(String),
    /// Date value
    Date(Date),
}

impl Value {
    /// Check if value is truthy for logical operations
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Decimal(d) => !d.is_zero(),
            Value::Amount(a) => !a.is_zero(),
            Value::Balance(b) => !b.is_zero(),
            Value::String(s) => !s.is_empty(),
            Value::Date(_) => true,
        }
    }

    /// Get the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Decimal(_) => "decimal",
            Value::Amount(_) => "amount",
            Value::Balance(_) => "balance",
            Value::String(_) => "string",
            Value::Date(_) => "date",
        }
    }

    /// Numeric view of integers and decimals
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Integer(i) => Some(Decimal::from(*i)),
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// Convert to a balance: amounts and numbers become single-component
    /// balances, null becomes the empty balance
    pub fn to_balance(&self) -> ExprResult<Balance> {
        match self {
            Value::Null => Ok(Balance::new()),
            Value::Amount(a) => Ok(Balance::from_amount(a)),
            Value::Balance(b) => Ok(b.clone()),
            Value::Integer(_) | Value::Decimal(_) => {
                let quantity = self.as_decimal().unwrap_or_default();
                Ok(Balance::from_amount(&Amount::new(quantity, None)))
            }
            other => Err(ExprError::TypeMismatch {
                operation: "conversion to balance".to_string(),
                left: other.type_name().to_string(),
                right: "balance".to_string(),
            }),
        }
    }

    /// Three-way comparison, failing for incomparable kinds
    pub fn compare(&self, other: &Value) -> ExprResult<Ordering> {
        op::compare_values(self, other)
    }

    /// Three-way comparison for sort keys; see [`op::sort_compare`]
    pub fn sort_compare(&self, other: &Value) -> ExprResult<Ordering> {
        op::sort_compare(self, other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Amount(a) => write!(f, "{}", a),
            Value::Balance(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d),
        }
    }
}

impl From<Amount> for Value {
    fn from(amount: Amount) -> Self {
        Value::Amount(amount)
    }
}

impl From<Balance> for Value {
    fn from(balance: Balance) -> Self {
        Value::Balance(balance)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Date> for Value {
    fn from(date: Date) -> Self {
        Value::Date(date)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division
    Div,
    /// Equality
    Eq,
    /// Inequality
    Ne,
    /// Less than
    Lt,
    /// Greater than
    Gt,
    /// Less or equal
    Le,
    /// Greater or equal
    Ge,
    /// Logical and (short-circuit)
    And,
    /// Logical or (short-circuit)
    Or,
}

impl BinaryOp {
    /// Get operator precedence (higher binds tighter)
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::Ne => 3,
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div => 6,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        f.write_str(symbol)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation
    Neg,
    /// Logical not
    Not,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Neg => write!(f, "-"),
            UnaryOp::Not => write!(f, "!"),
        }
    }
}

/// Built-in functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFunction {
    /// Absolute value
    Abs,
    /// Commodity symbol of an amount
    Commodity,
    /// Bare quantity of an amount
    Quantity,
    /// Year of a date
    Year,
    /// Month of a date
    Month,
    /// Day of month of a date
    Day,
    /// Upper-case a string
    ToUpper,
    /// Lower-case a string
    ToLower,
}

impl BuiltinFunction {
    /// Look up a function by name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "abs" => Some(BuiltinFunction::Abs),
            "commodity" => Some(BuiltinFunction::Commodity),
            "quantity" => Some(BuiltinFunction::Quantity),
            "year" => Some(BuiltinFunction::Year),
            "month" => Some(BuiltinFunction::Month),
            "day" => Some(BuiltinFunction::Day),
            "to_upper" => Some(BuiltinFunction::ToUpper),
            "to_lower" => Some(BuiltinFunction::ToLower),
            _ => None,
        }
    }

    /// Number of arguments the function takes
    pub fn arity(&self) -> usize {
        1
    }
}

impl fmt::Display for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuiltinFunction::Abs => "abs",
            BuiltinFunction::Commodity => "commodity",
            BuiltinFunction::Quantity => "quantity",
            BuiltinFunction::Year => "year",
            BuiltinFunction::Month => "month",
            BuiltinFunction::Day => "day",
            BuiltinFunction::ToUpper => "to_upper",
            BuiltinFunction::ToLower => "to_lower",
        };
        f.write_str(name)
    }
}

/// Expression AST node
#[derive(Debug, Clone)]
pub enum ExprNode {
    /// Literal value
    Value(Value),

    /// Variable identifier
    Identifier(String),

    /// Binary operation
    Binary { op: BinaryOp, left: Box<ExprNode>, right: Box<ExprNode> },

    /// Unary operation
    Unary { op: UnaryOp, operand: Box<ExprNode> },

    /// Regex match against a precompiled pattern
    Match { operand: Box<ExprNode>, pattern: Regex },

    /// Function call
    FunctionCall { function: BuiltinFunction, args: Vec<ExprNode> },

    /// Conditional expression (ternary operator)
    Conditional { condition: Box<ExprNode>, if_true: Box<ExprNode>, if_false: Box<ExprNode> },
}

impl ExprNode {
    /// Create a binary operation
    pub fn binary(op: BinaryOp, left: ExprNode, right: ExprNode) -> Self {
        ExprNode::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    /// Create a unary operation
    pub fn unary(op: UnaryOp, operand: ExprNode) -> Self {
        ExprNode::Unary { op, operand: Box::new(operand) }
    }
}

impl PartialEq for ExprNode {
    fn eq(&self, other: &Self) -> bool {
        use ExprNode::*;
        match (self, other) {
            (Value(a), Value(b)) => a == b,
            (Identifier(a), Identifier(b)) => a == b,
            (Binary { op: o1, left: l1, right: r1 }, Binary { op: o2, left: l2, right: r2 }) => {
                o1 == o2 && l1 == l2 && r1 == r2
            }
            (Unary { op: o1, operand: a }, Unary { op: o2, operand: b }) => o1 == o2 && a == b,
            (Match { operand: a, pattern: p1 }, Match { operand: b, pattern: p2 }) => {
                a == b && p1.as_str() == p2.as_str()
            }
            (FunctionCall { function: f1, args: a1 }, FunctionCall { function: f2, args: a2 }) => {
                f1 == f2 && a1 == a2
            }
            (
                Conditional { condition: c1, if_true: t1, if_false: e1 },
                Conditional { condition: c2, if_true: t2, if_false: e2 },
            ) => c1 == c2 && t1 == t2 && e1 == e2,
            _ => false,
        }
    }
}

impl fmt::Display for ExprNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprNode::Value(Value::String(s)) => write!(f, "\"{}\"", s),
            ExprNode::Value(Value::Date(d)) => write!(f, "[{}]", d),
            ExprNode::Value(v) => write!(f, "{}", v),
            ExprNode::Identifier(name) => write!(f, "{}", name),
            ExprNode::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
            ExprNode::Unary { op, operand } => write!(f, "({}{})", op, operand),
            ExprNode::Match { operand, pattern } => write!(f, "({} =~ /{}/)", operand, pattern),
            ExprNode::FunctionCall { function, args } => {
                write!(f, "{}(", function)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            ExprNode::Conditional { condition, if_true, if_false } => {
                write!(f, "({} ? {} : {})", condition, if_true, if_false)
            }
        }
    }
}

/// Name resolution for expression identifiers
pub trait Scope {
    /// Resolve an identifier, `None` when the name is unknown here
    fn lookup(&self, name: &str) -> Option<Value>;
}

/// A scope that knows no names
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyScope;

impl Scope for EmptyScope {
    fn lookup(&self, _name: &str) -> Option<Value> {
        None
    }
}

impl Scope for HashMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// Error types for expression compilation and evaluation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    /// The source text failed to compile
    #[error("In expression '{source_text}': {message}")]
    Compile { source_text: String, message: String },
    /// Unknown identifier
    #[error("Unknown identifier: {0}")]
    UnknownIdentifier(String),
    /// Type mismatch in operation
    #[error("Type mismatch in {operation}: {left} and {right}")]
    TypeMismatch { operation: String, left: String, right: String },
    /// Values of these kinds have no ordering
    #[error("Cannot compare {0} with {1}")]
    Incomparable(String, String),
    /// Division by zero
    #[error("Division by zero")]
    DivisionByZero,
    /// The result of an operation does not fit its value kind
    #[error("Arithmetic overflow in {0}")]
    Overflow(String),
}

/// Result type for expression operations
pub type ExprResult<T> = Result<T, ExprError>;

/// Compiled expression with its source text
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    /// Root AST node
    pub root: ExprNode,
    source: String,
}

impl Expression {
    /// Parse and compile an expression
    pub fn parse(input: &str) -> ExprResult<Self> {
        let root = parser::parse_expression(input)
            .map_err(|message| ExprError::Compile { source_text: input.to_string(), message })?;
        Ok(Expression { root, source: input.to_string() })
    }

    /// Expression that reads a single scope name
    pub fn identifier(name: &str) -> Self {
        Expression { root: ExprNode::Identifier(name.to_string()), source: name.to_string() }
    }

    /// Original source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate the expression against a scope
    pub fn evaluate(&self, scope: &dyn Scope) -> ExprResult<Value> {
        evaluate_node(&self.root, scope)
    }
}

impl FromStr for Expression {
    type Err = ExprError;

    fn from_str(s: &str) -> ExprResult<Self> {
        Expression::parse(s)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Evaluate an AST node against a scope
pub fn evaluate_node(node: &ExprNode, scope: &dyn Scope) -> ExprResult<Value> {
    match node {
        ExprNode::Value(v) => Ok(v.clone()),

        ExprNode::Identifier(name) => {
            scope.lookup(name).ok_or_else(|| ExprError::UnknownIdentifier(name.clone()))
        }

        ExprNode::Binary { op, left, right } => op::evaluate_binary_op(*op, left, right, scope),

        ExprNode::Unary { op, operand } => op::evaluate_unary_op(*op, operand, scope),

        ExprNode::Match { operand, pattern } => {
            let value = evaluate_node(operand, scope)?;
            Ok(Value::Bool(pattern.is_match(&value.to_string())))
        }

        ExprNode::FunctionCall { function, args } => {
            functions::evaluate_builtin_function(*function, args, scope)
        }

        ExprNode::Conditional { condition, if_true, if_false } => {
            if evaluate_node(condition, scope)?.is_truthy() {
                evaluate_node(if_true, scope)
            } else {
                evaluate_node(if_false, scope)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> HashMap<String, Value> {
        let mut scope = HashMap::new();
        scope.insert("amount".to_string(), Value::Amount("$12.50".parse().unwrap()));
        scope.insert("account".to_string(), Value::from("Expenses:Food"));
        scope.insert("date".to_string(), Value::Date(Date::from_ymd_opt(2024, 1, 15).unwrap()));
        scope
    }

    #[test]
    fn test_evaluate_against_scope() {
        let expr = Expression::parse("account =~ \"Food\" && amount > 10").unwrap();
        assert_eq!(expr.evaluate(&scope()).unwrap(), Value::Bool(true));

        let expr = Expression::parse("date < [2024-01-10]").unwrap();
        assert_eq!(expr.evaluate(&scope()).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_unknown_identifier() {
        let expr = Expression::parse("payee").unwrap();
        assert_eq!(
            expr.evaluate(&scope()),
            Err(ExprError::UnknownIdentifier("payee".to_string()))
        );
    }

    #[test]
    fn test_compile_error_names_source() {
        let err = Expression::parse("amount >").unwrap_err();
        match &err {
            ExprError::Compile { source_text, .. } => assert_eq!(source_text, "amount >"),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.to_string().starts_with("In expression 'amount >'"));
    }

    #[test]
    fn test_conditional() {
        let expr = Expression::parse("amount > 100 ? \"big\" : \"small\"").unwrap();
        assert_eq!(expr.evaluate(&scope()).unwrap(), Value::from("small"));
    }

    #[test]
    fn test_to_balance() {
        let value = Value::Amount("$3".parse().unwrap());
        assert_eq!(value.to_balance().unwrap().to_string(), "$3");
        assert!(Value::Null.to_balance().unwrap().is_empty());
        assert!(Value::from("x").to_balance().is_err());
    }
}
