//! Exact decimal types for prices and quantities
//!
//! The exchange sends both as decimal strings. They are parsed with
//! rust_decimal so "10.5" and "10.50000000" address the same level and a
//! quantity of "0.00000000" is recognized as zero.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::NumericError;

fn parse_non_negative(s: &str) -> Result<Decimal, NumericError> {
    let value = Decimal::from_str(s.trim()).map_err(|e| NumericError::Invalid {
        value: s.to_string(),
        reason: e.to_string(),
    })?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(NumericError::Negative(s.to_string()));
    }
    Ok(value)
}

/// Price of a book level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    pub fn parse(s: &str) -> Result<Self, NumericError> {
        parse_non_negative(s).map(Self)
    }

    /// Wrap a decimal, rejecting negative values.
    pub fn try_new(value: Decimal) -> Option<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl FromStr for Price {
    type Err = NumericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Quantity resting at a book level. Zero means "remove the level".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    pub fn parse(s: &str) -> Result<Self, NumericError> {
        parse_non_negative(s).map(Self)
    }

    pub fn try_new(value: Decimal) -> Option<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl FromStr for Quantity {
    type Err = NumericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_keeps_exchange_formatting() {
        let price = Price::parse("10.50000000").unwrap();
        assert_eq!(price.to_string(), "10.50000000");
    }

    #[test]
    fn test_equal_prices_with_different_scale() {
        assert_eq!(Price::parse("10.5").unwrap(), Price::parse("10.50").unwrap());
    }

    #[test]
    fn test_zero_quantity() {
        assert!(Quantity::parse("0").unwrap().is_zero());
        assert!(Quantity::parse("0.00000000").unwrap().is_zero());
        assert!(!Quantity::parse("2.3").unwrap().is_zero());
    }

    #[test]
    fn test_invalid_and_negative() {
        assert!(matches!(Quantity::parse("abc"), Err(NumericError::Invalid { .. })));
        assert!(matches!(Price::parse("-1"), Err(NumericError::Negative(_))));
        assert!(Quantity::parse("").is_err());
    }

    #[test]
    fn test_serializes_as_string() {
        let qty = Quantity::parse("1.25").unwrap();
        assert_eq!(serde_json::to_string(&qty).unwrap(), "\"1.25\"");
    }

    proptest! {
        #[test]
        fn prop_integer_quantities_parse(n in 0u64..1_000_000_000) {
            let qty = Quantity::parse(&n.to_string()).unwrap();
            prop_assert_eq!(qty.is_zero(), n == 0);
            prop_assert_eq!(qty.as_decimal(), Decimal::from(n));
        }
    }
}
