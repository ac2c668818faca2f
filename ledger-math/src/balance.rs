//! Balance module providing a multi-commodity amounts container
//!
//! A `Balance` sums amounts of any number of commodities. Zero components
//! are dropped eagerly, so an empty balance is the zero balance.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{AddAssign, Neg, Sub, SubAssign};

use chrono::NaiveDate;
use compact_str::CompactString;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::amount::Amount;
use crate::commodity::PriceHistory;

/// Error type for balance operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalanceError {
    /// Cannot convert a multi-commodity balance to a single amount
    #[error("Cannot convert a balance with multiple commodities to an amount")]
    MultiCommodityToAmount,

    /// Balances with different commodity sets have no natural order
    #[error("Cannot compare balances holding different commodities")]
    Incomparable,

    /// A component does not fit in a decimal quantity
    #[error("Balance arithmetic overflowed")]
    Overflow,
}

/// Result type for balance operations
pub type BalanceResult<T> = Result<T, BalanceError>;

/// Balance container keyed by commodity symbol (empty key for no commodity)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    amounts: BTreeMap<CompactString, Amount>,
}

impl Balance {
    /// Create an empty (zero) balance
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a balance holding a single amount
    pub fn from_amount(amount: &Amount) -> Self {
        let mut balance = Self::new();
        balance.add_amount(amount);
        balance
    }

    fn key(amount: &Amount) -> CompactString {
        CompactString::from(amount.commodity().unwrap_or(""))
    }

    fn store(&mut self, key: CompactString, sum: Decimal, commodity: Option<&str>) {
        if sum.is_zero() {
            self.amounts.remove(&key);
        } else {
            self.amounts.insert(key, Amount::new(sum, commodity));
        }
    }

    fn current(&self, key: &str) -> Decimal {
        self.amounts.get(key).map_or(Decimal::ZERO, Amount::quantity)
    }

    /// Add an amount into the balance, saturating at the decimal range
    pub fn add_amount(&mut self, amount: &Amount) {
        if amount.is_zero() {
            return;
        }
        let key = Self::key(amount);
        let sum = self.current(&key).saturating_add(amount.quantity());
        self.store(key, sum, amount.commodity());
    }

    /// Add every component of another balance
    pub fn add_balance(&mut self, other: &Balance) {
        for amount in other.amounts.values() {
            self.add_amount(amount);
        }
    }

    /// Add an amount, failing instead of saturating; the balance is
    /// unchanged on error
    pub fn checked_add_amount(&mut self, amount: &Amount) -> BalanceResult<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let key = Self::key(amount);
        let sum = self.current(&key).checked_add(amount.quantity()).ok_or(BalanceError::Overflow)?;
        self.store(key, sum, amount.commodity());
        Ok(())
    }

    /// Add every component of another balance, failing on overflow
    pub fn checked_add_balance(&mut self, other: &Balance) -> BalanceResult<()> {
        let mut result = self.clone();
        for amount in other.amounts.values() {
            result.checked_add_amount(amount)?;
        }
        *self = result;
        Ok(())
    }

    /// Whether the balance holds nothing
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    /// Whether every component is zero
    pub fn is_zero(&self) -> bool {
        self.amounts.values().all(Amount::is_zero)
    }

    /// Number of distinct commodities held
    pub fn commodity_count(&self) -> usize {
        self.amounts.len()
    }

    /// Components in commodity-symbol order
    pub fn amounts(&self) -> impl Iterator<Item = &Amount> {
        self.amounts.values()
    }

    /// Component for a commodity (`None` for commodity-less)
    pub fn amount(&self, commodity: Option<&str>) -> Option<&Amount> {
        self.amounts.get(commodity.unwrap_or(""))
    }

    /// The single amount of a balance holding at most one commodity
    pub fn to_amount(&self) -> BalanceResult<Amount> {
        match self.amounts.len() {
            0 => Ok(Amount::zero()),
            1 => Ok(self.amounts.values().next().cloned().unwrap_or_default()),
            _ => Err(BalanceError::MultiCommodityToAmount),
        }
    }

    /// Return a negated copy
    pub fn negated(&self) -> Self {
        Self { amounts: self.amounts.iter().map(|(k, a)| (k.clone(), a.negated())).collect() }
    }

    /// Compare two balances; defined when both hold at most the same single commodity
    pub fn compare(&self, other: &Balance) -> BalanceResult<Ordering> {
        let left = self.to_amount().map_err(|_| BalanceError::Incomparable)?;
        let right = other.to_amount().map_err(|_| BalanceError::Incomparable)?;
        left.compare(&right).map_err(|_| BalanceError::Incomparable)
    }

    /// Market value of the balance at `date`, converting every commodity with a
    /// known price; components without a price are kept as they are
    pub fn value(&self, prices: &PriceHistory, date: NaiveDate) -> Balance {
        let mut result = Balance::new();
        for amount in self.amounts.values() {
            match prices.value_of(amount, date) {
                Some(valued) => result.add_amount(&valued),
                None => result.add_amount(amount),
            }
        }
        result
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Balance::from_amount(&amount)
    }
}

impl AddAssign<&Amount> for Balance {
    fn add_assign(&mut self, rhs: &Amount) {
        self.add_amount(rhs);
    }
}

impl AddAssign<&Balance> for Balance {
    fn add_assign(&mut self, rhs: &Balance) {
        self.add_balance(rhs);
    }
}

impl SubAssign<&Balance> for Balance {
    fn sub_assign(&mut self, rhs: &Balance) {
        self.add_balance(&rhs.negated());
    }
}

impl Sub for &Balance {
    type Output = Balance;

    fn sub(self, rhs: &Balance) -> Balance {
        let mut result = self.clone();
        result -= rhs;
        result
    }
}

impl Neg for &Balance {
    type Output = Balance;

    fn neg(self) -> Balance {
        self.negated()
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.amounts.is_empty() {
            return write!(f, "0");
        }
        for (i, amount) in self.amounts.values().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", amount)?;
        }
        Ok(())
    }
}
