//! Error types for report runs

use ledger_math::{AmountError, BalanceError};
use thiserror::Error;

use crate::datetime::PeriodParseError;
use crate::expr::ExprError;

/// Errors raised while configuring or running a report
#[derive(Error, Debug)]
pub enum ReportError {
    /// An expression failed to compile or evaluate
    #[error(transparent)]
    Expr(#[from] ExprError),

    /// A sort key failed to compile or two keys could not be compared
    #[error("In sort string '{source_text}': {message}")]
    SortString { source_text: String, message: String },

    /// A period expression failed to parse
    #[error(transparent)]
    Period(#[from] PeriodParseError),

    /// Amount arithmetic failed
    #[error(transparent)]
    Amount(#[from] AmountError),

    /// Balance conversion failed
    #[error(transparent)]
    Balance(#[from] BalanceError),

    /// Writing report output failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReportError {
    /// Wrap an expression error raised by a sort key
    pub fn in_sort_string(source_text: &str, error: ExprError) -> Self {
        let message = match error {
            ExprError::Compile { message, .. } => message,
            other => other.to_string(),
        };
        ReportError::SortString { source_text: source_text.to_string(), message }
    }
}

/// Result type for report operations
pub type ReportResult<T> = Result<T, ReportError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expression;

    #[test]
    fn test_sort_string_wraps_compile_error() {
        let err = Expression::parse("date +").unwrap_err();
        let wrapped = ReportError::in_sort_string("date +", err);
        let text = wrapped.to_string();
        assert!(text.starts_with("In sort string 'date +':"), "{}", text);
        assert!(!text.contains("In expression"));
    }

    #[test]
    fn test_conversions() {
        let err: ReportError = ExprError::DivisionByZero.into();
        assert_eq!(err.to_string(), "Division by zero");
        let err: ReportError = PeriodParseError::MissingPeriod.into();
        assert!(matches!(err, ReportError::Period(_)));
    }
}
