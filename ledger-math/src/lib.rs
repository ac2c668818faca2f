//! Value types for Ledger reporting
//!
//! This crate provides the amount value types the reporting core treats as
//! opaque: `Amount` (a single-commodity decimal quantity), `Balance` (a
//! multi-commodity sum) and `PriceHistory` (dated commodity prices used
//! when revaluing totals).

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod amount;
pub mod balance;
pub mod commodity;

// Re-export main types
pub use amount::{Amount, AmountError, AmountResult, CommoditySymbol};
pub use balance::{Balance, BalanceError, BalanceResult};
pub use commodity::{PriceHistory, PricePoint};

// Re-export for convenience
pub use rust_decimal::Decimal;
