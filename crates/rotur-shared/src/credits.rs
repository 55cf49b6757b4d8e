//! The internal unit of account.
//!
//! Balances are held as whole hundredths so arithmetic is exact. On the wire
//! and on disk they are plain JSON numbers with at most two decimals. The
//! decoder also accepts strings and integers, which normalizes older files
//! that stored balances inconsistently.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Credits(i64);

impl Credits {
    pub const ZERO: Credits = Credits(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// `units` whole credits, saturating at the representable range.
    pub const fn whole(units: i64) -> Self {
        Self(units.saturating_mul(100))
    }

    pub const fn checked_whole(units: i64) -> Option<Self> {
        match units.checked_mul(100) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Round a float to two decimals. Non-finite values are rejected.
    pub fn from_f64(value: f64) -> Result<Self, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::Amount(format!("{value} is not finite")));
        }
        let cents = (value * 100.0).round();
        if cents.abs() > i64::MAX as f64 / 2.0 {
            return Err(ValidationError::Amount(format!("{value} is out of range")));
        }
        Ok(Self(cents as i64))
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Credits) -> Option<Credits> {
        self.0.checked_add(other.0).map(Credits)
    }

    /// Subtract, refusing to go below zero.
    pub fn checked_sub(self, other: Credits) -> Option<Credits> {
        match self.0.checked_sub(other.0) {
            Some(v) if v >= 0 => Some(Credits(v)),
            _ => None,
        }
    }

    pub fn saturating_add(self, other: Credits) -> Credits {
        Credits(self.0.saturating_add(other.0))
    }

    pub fn negate(self) -> Credits {
        Credits(-self.0)
    }

    /// Parse a user-supplied transfer amount: positive, at most two decimals.
    pub fn parse_amount(value: f64) -> Result<Self, ValidationError> {
        let credits = Self::from_f64(value)?;
        if ((value * 100.0) - credits.0 as f64).abs() > 1e-6 {
            return Err(ValidationError::Amount(
                "at most two decimal places are allowed".to_string(),
            ));
        }
        if !credits.is_positive() {
            return Err(ValidationError::Amount("must be greater than zero".to_string()));
        }
        Ok(credits)
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl FromStr for Credits {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: f64 = s
            .trim()
            .parse()
            .map_err(|_| ValidationError::Amount(format!("'{s}' is not a number")))?;
        Self::from_f64(value)
    }
}

impl Serialize for Credits {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0 % 100 == 0 {
            serializer.serialize_i64(self.0 / 100)
        } else {
            serializer.serialize_f64(self.to_f64())
        }
    }
}

struct CreditsVisitor;

impl<'de> Visitor<'de> for CreditsVisitor {
    type Value = Credits;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a credit amount as a number or numeric string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Credits, E> {
        v.checked_mul(100)
            .map(Credits)
            .ok_or_else(|| E::custom("credit amount out of range"))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Credits, E> {
        i64::try_from(v)
            .ok()
            .and_then(|v| v.checked_mul(100))
            .map(Credits)
            .ok_or_else(|| E::custom("credit amount out of range"))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Credits, E> {
        Credits::from_f64(v).map_err(E::custom)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Credits, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Credits, E> {
        Ok(Credits::ZERO)
    }
}

impl<'de> Deserialize<'de> for Credits {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(CreditsVisitor)
    }
}
