use std::{cmp::Ordering, fmt::Display};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

//--------------------------------------     MoneyValue       --------------------------------------------------------

/// An amount of money in a specific currency.
///
/// All arithmetic is fallible: combining two values of different currencies is rejected with
/// [`MoneyError::CurrencyMismatch`]. The one exception is the *neutral* value produced by
/// [`MoneyValue::default`] — a zero amount with an empty currency code — which unifies with any
/// currency so that it can serve as a fold identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyValue {
    amount: Decimal,
    currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("Cannot combine amounts in {left} with amounts in {right}")]
    CurrencyMismatch { left: String, right: String },
}

impl Default for MoneyValue {
    fn default() -> Self {
        Self { amount: Decimal::ZERO, currency: String::new() }
    }
}

impl MoneyValue {
    pub fn new<S: Into<String>>(amount: Decimal, currency: S) -> Self {
        Self { amount, currency: currency.into() }
    }

    /// A zero value in the given currency.
    pub fn zero<S: Into<String>>(currency: S) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    /// True if there is a strictly positive balance.
    pub fn has_balance(&self) -> bool {
        self.is_positive()
    }

    pub fn abs(&self) -> Self {
        Self::new(self.amount.abs(), self.currency.clone())
    }

    /// The currency both operands agree on, or an error if they disagree.
    ///
    /// The neutral value (empty currency code with a zero amount) adopts the other operand's
    /// currency.
    fn unified_currency(&self, other: &Self) -> Result<String, MoneyError> {
        if self.currency == other.currency {
            return Ok(self.currency.clone());
        }
        if self.currency.is_empty() && self.amount.is_zero() {
            return Ok(other.currency.clone());
        }
        if other.currency.is_empty() && other.amount.is_zero() {
            return Ok(self.currency.clone());
        }
        Err(MoneyError::CurrencyMismatch { left: self.currency.clone(), right: other.currency.clone() })
    }

    pub fn checked_add(&self, other: &Self) -> Result<Self, MoneyError> {
        let currency = self.unified_currency(other)?;
        Ok(Self::new(self.amount + other.amount, currency))
    }

    pub fn checked_sub(&self, other: &Self) -> Result<Self, MoneyError> {
        let currency = self.unified_currency(other)?;
        Ok(Self::new(self.amount - other.amount, currency))
    }

    /// Compares two amounts, requiring matching currencies.
    pub fn compare(&self, other: &Self) -> Result<Ordering, MoneyError> {
        self.unified_currency(other)?;
        Ok(self.amount.cmp(&other.amount))
    }

    pub fn same_currency(&self, other: &Self) -> bool {
        self.unified_currency(other).is_ok()
    }
}

impl Display for MoneyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.currency.is_empty() {
            write!(f, "{}", self.amount)
        } else {
            write!(f, "{} {}", self.amount, self.currency)
        }
    }
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;

    fn usd(amount: Decimal) -> MoneyValue {
        MoneyValue::new(amount, "USD")
    }

    #[test]
    fn add_and_subtract_same_currency() {
        let total = usd(dec!(100)).checked_add(&usd(dec!(25.50))).unwrap();
        assert_eq!(total, usd(dec!(125.50)));
        let rest = total.checked_sub(&usd(dec!(125.50))).unwrap();
        assert!(rest.is_zero());
        assert_eq!(rest.currency(), "USD");
    }

    #[test]
    fn cross_currency_arithmetic_is_rejected() {
        let err = usd(dec!(10)).checked_add(&MoneyValue::new(dec!(10), "EUR")).unwrap_err();
        assert_eq!(err, MoneyError::CurrencyMismatch { left: "USD".to_string(), right: "EUR".to_string() });
        // A zero in a real currency is not neutral either.
        let zero_eur = MoneyValue::zero("EUR");
        assert!(usd(dec!(10)).checked_add(&zero_eur).is_err());
    }

    #[test]
    fn neutral_value_adopts_the_other_currency() {
        let sum = MoneyValue::default().checked_add(&usd(dec!(42))).unwrap();
        assert_eq!(sum, usd(dec!(42)));
        let diff = usd(dec!(42)).checked_sub(&MoneyValue::default()).unwrap();
        assert_eq!(diff, usd(dec!(42)));
    }

    #[test]
    fn compare_orders_amounts() {
        assert_eq!(usd(dec!(10)).compare(&usd(dec!(20))).unwrap(), Ordering::Less);
        assert_eq!(usd(dec!(20)).compare(&usd(dec!(20))).unwrap(), Ordering::Equal);
        assert!(usd(dec!(10)).compare(&MoneyValue::new(dec!(10), "EUR")).is_err());
    }

    #[test]
    fn balance_predicates() {
        assert!(usd(dec!(0.01)).has_balance());
        assert!(!MoneyValue::zero("USD").has_balance());
        assert!(usd(dec!(-5)).is_negative());
        assert_eq!(usd(dec!(-5)).abs(), usd(dec!(5)));
    }

    #[test]
    fn serde_round_trip() {
        let value = usd(dec!(19.99));
        let json = serde_json::to_string(&value).unwrap();
        let back: MoneyValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
