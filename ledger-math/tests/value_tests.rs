// Integration tests for the ledger-math value types

use chrono::NaiveDate;
use ledger_math::{Amount, Balance, Decimal, PriceHistory};

fn amt(s: &str) -> Amount {
    s.parse().unwrap()
}

#[cfg(test)]
mod amount_tests {
    use super::*;

    #[test]
    fn test_display_round_trips_through_parse() {
        for text in ["$10.50", "-$3", "2.5 EUR", "-7 AAPL", "42"] {
            assert_eq!(amt(text).to_string(), text);
        }
    }

    #[test]
    fn test_ordering_within_commodity() {
        assert!(amt("$3") < amt("$10"));
        assert!(amt("-$3") < amt("$0"));
        assert_eq!(amt("$3").partial_cmp(&amt("3 EUR")), None);
    }

    #[test]
    fn test_negation_and_scaling() {
        assert_eq!(-amt("$5"), amt("-$5"));
        assert_eq!(amt("2 AAPL").scaled(Decimal::from(3)).unwrap(), amt("6 AAPL"));
        assert_eq!(amt("-4 EUR").abs(), amt("4 EUR"));
    }
}

#[cfg(test)]
mod balance_tests {
    use super::*;

    #[test]
    fn test_empty_balance_is_zero() {
        let balance = Balance::new();
        assert!(balance.is_empty());
        assert!(balance.is_zero());
        assert_eq!(balance.to_amount().unwrap(), Amount::zero());
        assert_eq!(balance.to_string(), "0");
    }

    #[test]
    fn test_amounts_sorted_by_commodity() {
        let mut balance = Balance::new();
        balance += &amt("1 EUR");
        balance += &amt("$2");
        balance += &amt("3 AAPL");
        let commodities: Vec<&str> = balance.amounts().filter_map(Amount::commodity).collect();
        assert_eq!(commodities, vec!["$", "AAPL", "EUR"]);
    }

    #[test]
    fn test_single_commodity_balances_compare() {
        let small = Balance::from_amount(&amt("$1"));
        let large = Balance::from_amount(&amt("$9"));
        assert_eq!(small.compare(&large).unwrap(), std::cmp::Ordering::Less);

        let mut mixed = small.clone();
        mixed += &amt("1 EUR");
        assert!(mixed.compare(&large).is_err());
    }

    #[test]
    fn test_market_value_keeps_unpriced_components() {
        let mut prices = PriceHistory::new();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        prices.add_price("AAPL", date, amt("$150"));

        let mut holdings = Balance::from_amount(&amt("2 AAPL"));
        holdings += &amt("10 EUR");
        let valued = holdings.value(&prices, date);
        assert_eq!(valued.amount(Some("$")), Some(&amt("$300")));
        assert_eq!(valued.amount(Some("EUR")), Some(&amt("10 EUR")));
        assert!(valued.amount(Some("AAPL")).is_none());
    }

    #[test]
    fn test_serde_shape() {
        let balance = Balance::from_amount(&amt("$5"));
        let json = serde_json::to_string(&balance).unwrap();
        let back: Balance = serde_json::from_str(&json).unwrap();
        assert_eq!(back, balance);
    }
}

// Property-based tests using proptest
#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn commodity() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just("$"), Just("EUR"), Just("AAPL")]
    }

    fn amount() -> impl Strategy<Value = Amount> {
        (-100_000i64..100_000, commodity()).prop_map(|(cents, symbol)| Amount::new(Decimal::new(cents, 2), Some(symbol)))
    }

    proptest! {
        #[test]
        fn balance_sum_is_order_independent(amounts in prop::collection::vec(amount(), 0..20)) {
            let mut forward = Balance::new();
            for amount in &amounts {
                forward += amount;
            }
            let mut backward = Balance::new();
            for amount in amounts.iter().rev() {
                backward += amount;
            }
            prop_assert_eq!(forward, backward);
        }

        #[test]
        fn balance_minus_itself_is_empty(amounts in prop::collection::vec(amount(), 0..20)) {
            let mut balance = Balance::new();
            for amount in &amounts {
                balance += amount;
            }
            prop_assert!((&balance - &balance).is_empty());
            prop_assert_eq!(-&(-&balance), balance);
        }

        #[test]
        fn parse_inverts_display(amount in amount()) {
            let text = amount.to_string();
            prop_assert_eq!(text.parse::<Amount>().unwrap(), amount);
        }
    }
}
