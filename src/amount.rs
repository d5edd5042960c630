//! Fixed-point currency amounts with 8 decimal places.
//!
//! Every balance, value and fee in the ledger is an [`Amount`]: a count of
//! base units where one coin is 10^8 units. Keeping money in integer units
//! makes the fee and reward arithmetic exact and identical on every node;
//! the decimal string form ("123.45678900") only appears at the wire and
//! display boundaries.

use crate::error::{ChainError, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Base units per whole coin (8 decimal places).
pub const UNITS_PER_COIN: u64 = 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);
    /// Smallest representable value, 0.00000001.
    pub const MINIMUM: Amount = Amount(1);

    pub const fn from_units(units: u64) -> Self {
        Amount(units)
    }

    /// A whole number of coins.
    pub const fn from_coins(coins: u64) -> Self {
        Amount(coins * UNITS_PER_COIN)
    }

    pub const fn units(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    /// Checked addition mapped onto the ledger's error model.
    pub fn try_add(self, other: Amount) -> Result<Amount> {
        self.checked_add(other)
            .ok_or_else(|| ChainError::Integrity("amount overflow".to_string()))
    }

    pub fn try_sub(self, other: Amount) -> Result<Amount> {
        self.checked_sub(other)
            .ok_or_else(|| ChainError::Integrity("amount underflow".to_string()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08}", self.0 / UNITS_PER_COIN, self.0 % UNITS_PER_COIN)
    }
}

impl FromStr for Amount {
    type Err = ChainError;

    /// Parses a non-negative decimal with at most 8 fractional digits.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ChainError::Validation(format!("invalid amount: {s}"));
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if frac.len() > 8 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let whole: u64 = whole.parse().map_err(|_| invalid())?;
        let mut units = whole.checked_mul(UNITS_PER_COIN).ok_or_else(invalid)?;
        if !frac.is_empty() {
            let scale = 10u64.pow(8 - frac.len() as u32);
            let frac: u64 = frac.parse().map_err(|_| invalid())?;
            units = units.checked_add(frac * scale).ok_or_else(invalid)?;
        }
        Ok(Amount(units))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl ToSql for Amount {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0 as i64))
    }
}

impl FromSql for Amount {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = i64::column_result(value)?;
        u64::try_from(raw)
            .map(Amount)
            .map_err(|_| FromSqlError::OutOfRange(raw))
    }
}
