//! Integer amount types: token units, reserve currency and the exchange price.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LedgerError;

/// A quantity of fungible token units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Units(u128);

impl Units {
    /// Zero units.
    pub const ZERO: Units = Units(0);

    /// Create a new unit amount.
    pub const fn new(value: u128) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub const fn value(&self) -> u128 {
        self.0
    }

    /// Check if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Units) -> Option<Units> {
        self.0.checked_add(other.0).map(Units)
    }

    pub fn checked_sub(self, other: Units) -> Option<Units> {
        self.0.checked_sub(other.0).map(Units)
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u128> for Units {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

/// An amount of reserve currency, in its smallest indivisible denomination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reserve(u128);

impl Reserve {
    /// Zero reserve.
    pub const ZERO: Reserve = Reserve(0);

    /// Create a new reserve amount.
    pub const fn new(value: u128) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub const fn value(&self) -> u128 {
        self.0
    }

    /// Check if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Reserve) -> Option<Reserve> {
        self.0.checked_add(other.0).map(Reserve)
    }

    pub fn checked_sub(self, other: Reserve) -> Option<Reserve> {
        self.0.checked_sub(other.0).map(Reserve)
    }

    /// Multiply by a scalar (used for `gas_used * gas_price`).
    pub fn checked_mul(self, factor: u128) -> Option<Reserve> {
        self.0.checked_mul(factor).map(Reserve)
    }
}

impl fmt::Display for Reserve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u128> for Reserve {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

/// Result of converting reserve currency into units at a fixed price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    /// Whole units bought.
    pub units: Units,
    /// Reserve left over after truncation (`amount mod price`).
    pub remainder: Reserve,
}

/// Reserve-currency cost of one unit. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u128", into = "u128")]
pub struct Price(u128);

impl Price {
    /// Create a price, rejecting zero.
    pub fn new(value: u128) -> Result<Self, LedgerError> {
        if value == 0 {
            return Err(LedgerError::InvalidPrice);
        }
        Ok(Self(value))
    }

    /// Get the raw value.
    pub const fn value(&self) -> u128 {
        self.0
    }

    /// Units bought by `amount`, truncating toward zero.
    pub fn units_for(&self, amount: Reserve) -> Conversion {
        Conversion {
            units: Units(amount.0 / self.0),
            remainder: Reserve(amount.0 % self.0),
        }
    }

    /// Exact reserve value of `units`; `None` on overflow.
    pub fn reserve_for(&self, units: Units) -> Option<Reserve> {
        units.0.checked_mul(self.0).map(Reserve)
    }
}

impl TryFrom<u128> for Price {
    type Error = LedgerError;

    fn try_from(value: u128) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Price> for u128 {
    fn from(price: Price) -> Self {
        price.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_checked_arithmetic() {
        let a = Units::new(10);
        assert_eq!(a.checked_add(Units::new(5)), Some(Units::new(15)));
        assert_eq!(a.checked_sub(Units::new(11)), None);
        assert_eq!(Units::new(u128::MAX).checked_add(Units::new(1)), None);
    }

    #[test]
    fn test_price_rejects_zero() {
        assert!(matches!(Price::new(0), Err(LedgerError::InvalidPrice)));
        assert!(serde_json::from_str::<Price>("0").is_err());
        assert_eq!(serde_json::from_str::<Price>("1000").unwrap().value(), 1000);
    }

    #[test]
    fn test_units_for_truncates() {
        let price = Price::new(1000).unwrap();

        let c = price.units_for(Reserve::new(100_111));
        assert_eq!(c.units, Units::new(100));
        assert_eq!(c.remainder, Reserve::new(111));

        let c = price.units_for(Reserve::new(999));
        assert_eq!(c.units, Units::ZERO);
        assert_eq!(c.remainder, Reserve::new(999));

        let c = price.units_for(Reserve::new(50_000));
        assert_eq!(c.units, Units::new(50));
        assert!(c.remainder.is_zero());
    }

    #[test]
    fn test_reserve_for_is_exact() {
        let price = Price::new(1000).unwrap();
        assert_eq!(price.reserve_for(Units::new(100)), Some(Reserve::new(100_000)));
        assert_eq!(price.reserve_for(Units::new(u128::MAX)), None);
    }
}
