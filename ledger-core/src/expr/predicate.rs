//! Item predicates
//!
//! A predicate is an optional compiled expression evaluated for truth
//! against an item's scope. The empty predicate accepts everything.

use std::fmt;

use super::{ExprResult, Expression, Scope};

/// Boolean filter over report items
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPredicate {
    expr: Option<Expression>,
}

impl ItemPredicate {
    /// Compile a predicate; blank source yields the always-true predicate
    pub fn new(source: &str) -> ExprResult<Self> {
        if source.trim().is_empty() {
            return Ok(Self::always());
        }
        Ok(Self { expr: Some(Expression::parse(source)?) })
    }

    /// The predicate that accepts every item
    pub fn always() -> Self {
        Self { expr: None }
    }

    /// Wrap an already compiled expression
    pub fn from_expression(expr: Expression) -> Self {
        Self { expr: Some(expr) }
    }

    /// Whether this predicate accepts everything without evaluating
    pub fn is_always(&self) -> bool {
        self.expr.is_none()
    }

    /// Evaluate the predicate for one item
    pub fn matches(&self, scope: &dyn Scope) -> ExprResult<bool> {
        match &self.expr {
            Some(expr) => Ok(expr.evaluate(scope)?.is_truthy()),
            None => Ok(true),
        }
    }
}

impl fmt::Display for ItemPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expr {
            Some(expr) => write!(f, "{}", expr),
            None => Ok(()),
        }
    }
}
