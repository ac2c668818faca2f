//! Amount module providing exact decimal quantities with commodity support
//!
//! An `Amount` is a single-commodity quantity. The reporting core treats it
//! as an opaque, ordered, summable value: it never inspects the quantity
//! beyond the operations exposed here.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Neg;
use std::str::FromStr;

use compact_str::CompactString;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Commodity symbol, e.g. `$`, `USD`, `AAPL`
pub type CommoditySymbol = CompactString;

/// Errors that can occur during amount operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    /// The two amounts carry different commodities
    #[error("Cannot combine amounts with different commodities: {0} and {1}")]
    CommodityMismatch(String, String),
    /// The text is not a valid amount
    #[error("Cannot parse amount from string: {0}")]
    ParseError(String),
    /// The result does not fit in a decimal quantity
    #[error("Amount arithmetic overflowed")]
    Overflow,
}

/// Result type for amount operations
pub type AmountResult<T> = Result<T, AmountError>;

/// A decimal quantity with an optional commodity symbol
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amount {
    quantity: Decimal,
    commodity: Option<CommoditySymbol>,
}

impl Amount {
    /// Create an amount from a quantity and an optional commodity symbol
    pub fn new(quantity: Decimal, commodity: Option<&str>) -> Self {
        Self {
            quantity,
            commodity: commodity.filter(|c| !c.is_empty()).map(CommoditySymbol::from),
        }
    }

    /// Create a commodity-less amount from an integer
    pub fn from_i64(value: i64) -> Self {
        Self { quantity: Decimal::from(value), commodity: None }
    }

    /// Create an amount in the given commodity
    pub fn with_commodity(quantity: Decimal, commodity: &str) -> Self {
        Self::new(quantity, Some(commodity))
    }

    /// A commodity-less zero
    pub fn zero() -> Self {
        Self::default()
    }

    /// The decimal quantity
    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    /// The commodity symbol, if any
    pub fn commodity(&self) -> Option<&str> {
        self.commodity.as_deref()
    }

    /// Whether this amount carries a commodity
    pub fn has_commodity(&self) -> bool {
        self.commodity.is_some()
    }

    /// Whether the quantity is exactly zero
    pub fn is_zero(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Sign of the quantity: -1, 0 or 1
    pub fn sign(&self) -> i32 {
        if self.quantity.is_zero() {
            0
        } else if self.quantity.is_sign_negative() {
            -1
        } else {
            1
        }
    }

    /// Return a negated copy
    pub fn negated(&self) -> Self {
        Self { quantity: -self.quantity, commodity: self.commodity.clone() }
    }

    /// Return the absolute value
    pub fn abs(&self) -> Self {
        Self { quantity: self.quantity.abs(), commodity: self.commodity.clone() }
    }

    /// Return a copy with a different commodity
    pub fn in_commodity(&self, commodity: Option<&str>) -> Self {
        Self::new(self.quantity, commodity)
    }

    /// Scale the quantity, keeping the commodity
    pub fn scaled(&self, factor: Decimal) -> AmountResult<Self> {
        let quantity = self.quantity.checked_mul(factor).ok_or(AmountError::Overflow)?;
        Ok(Self { quantity, commodity: self.commodity.clone() })
    }

    /// Divide the quantity, keeping the commodity
    pub fn divided(&self, divisor: Decimal) -> AmountResult<Self> {
        let quantity = self.quantity.checked_div(divisor).ok_or(AmountError::Overflow)?;
        Ok(Self { quantity, commodity: self.commodity.clone() })
    }

    fn compatible(&self, other: &Amount) -> bool {
        self.commodity == other.commodity
            || (self.commodity.is_none() && self.is_zero())
            || (other.commodity.is_none() && other.is_zero())
    }

    fn mismatch(&self, other: &Amount) -> AmountError {
        AmountError::CommodityMismatch(
            self.commodity().unwrap_or("<none>").to_string(),
            other.commodity().unwrap_or("<none>").to_string(),
        )
    }

    /// Add two amounts of the same commodity
    pub fn checked_add(&self, other: &Amount) -> AmountResult<Amount> {
        if !self.compatible(other) {
            return Err(self.mismatch(other));
        }
        let commodity = self.commodity.clone().or_else(|| other.commodity.clone());
        let quantity = self.quantity.checked_add(other.quantity).ok_or(AmountError::Overflow)?;
        Ok(Amount { quantity, commodity })
    }

    /// Subtract two amounts of the same commodity
    pub fn checked_sub(&self, other: &Amount) -> AmountResult<Amount> {
        self.checked_add(&other.negated())
    }

    /// Compare two amounts of the same commodity
    pub fn compare(&self, other: &Amount) -> AmountResult<Ordering> {
        if !self.compatible(other) {
            return Err(self.mismatch(other));
        }
        Ok(self.quantity.cmp(&other.quantity))
    }

    fn is_prefix_symbol(symbol: &str) -> bool {
        symbol.chars().all(|c| !c.is_alphanumeric())
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Self::Output {
        self.negated()
    }
}

impl Neg for &Amount {
    type Output = Amount;

    fn neg(self) -> Self::Output {
        self.negated()
    }
}

impl PartialOrd for Amount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other).ok()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.commodity() {
            Some(symbol) if Self::is_prefix_symbol(symbol) => {
                if self.quantity.is_sign_negative() && !self.quantity.is_zero() {
                    write!(f, "-{}{}", symbol, self.quantity.abs())
                } else {
                    write!(f, "{}{}", symbol, self.quantity)
                }
            }
            Some(symbol) => write!(f, "{} {}", self.quantity, symbol),
            None => write!(f, "{}", self.quantity),
        }
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    /// Parse `$10.50`, `-$3`, `10 USD`, `-2.5 EUR` or a bare number
    fn from_str(input: &str) -> AmountResult<Self> {
        let text = input.trim();
        let (negative, rest) = match text.strip_prefix('-') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, text),
        };

        let is_number_char = |c: char| c.is_ascii_digit() || c == '.' || c == ',' || c == '-';
        let number_start = rest.find(is_number_char).ok_or_else(|| AmountError::ParseError(input.to_string()))?;
        let prefix = rest[..number_start].trim();
        let after = &rest[number_start..];
        let number_end = after.find(|c: char| !is_number_char(c)).unwrap_or(after.len());
        let number: String = after[..number_end].chars().filter(|c| *c != ',').collect();
        let suffix = after[number_end..].trim();

        if !prefix.is_empty() && !suffix.is_empty() {
            return Err(AmountError::ParseError(input.to_string()));
        }

        let mut quantity =
            Decimal::from_str(&number).map_err(|_| AmountError::ParseError(input.to_string()))?;
        if negative {
            quantity = -quantity;
        }

        let symbol = if prefix.is_empty() { suffix } else { prefix };
        Ok(Amount::new(quantity, Some(symbol)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefix_and_suffix_commodities() {
        let dollars: Amount = "$10.50".parse().unwrap();
        assert_eq!(dollars.commodity(), Some("$"));
        assert_eq!(dollars.quantity(), Decimal::from_str("10.50").unwrap());

        let euros: Amount = "-2.5 EUR".parse().unwrap();
        assert_eq!(euros.commodity(), Some("EUR"));
        assert_eq!(euros.sign(), -1);

        let bare: Amount = "1,000".parse().unwrap();
        assert!(!bare.has_commodity());
        assert_eq!(bare.quantity(), Decimal::from(1000));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("USD".parse::<Amount>().is_err());
        assert!("$ 5 USD".parse::<Amount>().is_err());
    }

    #[test]
    fn test_add_requires_matching_commodity() {
        let a: Amount = "$5".parse().unwrap();
        let b: Amount = "$7".parse().unwrap();
        assert_eq!(a.checked_add(&b).unwrap(), "$12".parse().unwrap());

        let c: Amount = "3 EUR".parse().unwrap();
        assert!(matches!(a.checked_add(&c), Err(AmountError::CommodityMismatch(_, _))));

        // A commodity-less zero is compatible with anything
        assert_eq!(Amount::zero().checked_add(&c).unwrap(), c);
    }

    #[test]
    fn test_arithmetic_overflow_is_an_error() {
        let huge = Amount::new(Decimal::MAX, Some("$"));
        assert_eq!(huge.checked_add(&huge), Err(AmountError::Overflow));
        assert_eq!(huge.scaled(Decimal::from(2)), Err(AmountError::Overflow));
        assert_eq!(huge.divided(Decimal::new(1, 1)), Err(AmountError::Overflow));
        assert_eq!(huge.divided(Decimal::ZERO), Err(AmountError::Overflow));
        assert_eq!(huge.scaled(Decimal::ONE).unwrap(), huge);
    }

    #[test]
    fn test_display() {
        let a: Amount = "-$3.25".parse().unwrap();
        assert_eq!(a.to_string(), "-$3.25");
        let b: Amount = "12 AAPL".parse().unwrap();
        assert_eq!(b.to_string(), "12 AAPL");
    }

    #[test]
    fn test_ordering_within_commodity() {
        let a: Amount = "$5".parse().unwrap();
        let b: Amount = "$7".parse().unwrap();
        assert!(a < b);
        let c: Amount = "3 EUR".parse().unwrap();
        assert_eq!(a.partial_cmp(&c), None);
    }
}
