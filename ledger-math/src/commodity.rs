//! Commodity price history
//!
//! Prices are recorded per commodity as dated amounts in another commodity
//! (`AAPL` priced at `$180` on 2024-01-02). Lookups find the most recent
//! price on or before a moment, which is what revaluation needs.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use compact_str::CompactString;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;

/// A price found for a commodity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricePoint {
    /// Date the price was recorded
    pub when: NaiveDate,
    /// Price of one unit
    pub price: Amount,
}

/// Dated prices for every known commodity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceHistory {
    prices: HashMap<CompactString, BTreeMap<NaiveDate, Amount>>,
}

impl PriceHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the price of one unit of `commodity` on `date`, replacing any
    /// price already recorded for that date
    pub fn add_price(&mut self, commodity: &str, date: NaiveDate, price: Amount) {
        debug!("add_price to {}: {}, {}", commodity, date, price);
        self.prices.entry(CompactString::from(commodity)).or_default().insert(date, price);
    }

    /// Remove the price recorded on `date`; returns whether one existed
    pub fn remove_price(&mut self, commodity: &str, date: NaiveDate) -> bool {
        debug!("remove_price: {}, {}", commodity, date);
        self.prices.get_mut(commodity).map_or(false, |history| history.remove(&date).is_some())
    }

    /// Find the nearest price on or before `moment`, or the most recent price
    /// when no moment is given
    pub fn find_price(&self, commodity: &str, moment: Option<NaiveDate>) -> Option<PricePoint> {
        let history = self.prices.get(commodity)?;
        let found = match moment {
            Some(moment) => history.range(..=moment).next_back(),
            None => history.iter().next_back(),
        };
        match found {
            Some((when, price)) => Some(PricePoint { when: *when, price: price.clone() }),
            None => {
                debug!("no price for {} on or before {:?}", commodity, moment);
                None
            }
        }
    }

    /// Value `amount` at `date` in its price commodity; `None` without a
    /// price or when the value overflows
    pub fn value_of(&self, amount: &Amount, date: NaiveDate) -> Option<Amount> {
        let commodity = amount.commodity()?;
        let point = self.find_price(commodity, Some(date))?;
        point.price.scaled(amount.quantity()).ok()
    }

    /// Whether any price is known
    pub fn is_empty(&self) -> bool {
        self.prices.values().all(BTreeMap::is_empty)
    }
}
