//! Billing periods for subscription keys.
//!
//! Month and year steps use calendar month addition (Jan 31 + 1 month lands
//! on the last day of February) rather than a fixed number of days. All
//! instants are UTC milliseconds since the epoch.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
    Year,
}

impl FromStr for Period {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "day" | "daily" => Ok(Self::Day),
            "week" | "weekly" => Ok(Self::Week),
            "month" | "monthly" => Ok(Self::Month),
            "year" | "yearly" => Ok(Self::Year),
            other => Err(ValidationError::Period(other.to_string())),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        };
        f.write_str(s)
    }
}

/// `frequency` units of `period` between two charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingCycle {
    pub period: Period,
    pub frequency: u32,
}

impl BillingCycle {
    pub fn new(period: Period, frequency: u32) -> Result<Self, ValidationError> {
        if frequency == 0 {
            return Err(ValidationError::Frequency);
        }
        Ok(Self { period, frequency })
    }

    /// The instant one full cycle after `from_ms`.
    ///
    /// Returns `None` when the result leaves chrono's representable range.
    pub fn advance(&self, from_ms: i64) -> Option<i64> {
        let from = DateTime::<Utc>::from_timestamp_millis(from_ms)?;
        let n = self.frequency;
        let next = match self.period {
            Period::Day => from.checked_add_signed(Duration::days(i64::from(n)))?,
            Period::Week => from.checked_add_signed(Duration::weeks(i64::from(n)))?,
            Period::Month => from.checked_add_months(Months::new(n))?,
            Period::Year => from.checked_add_months(Months::new(n.checked_mul(12)?))?,
        };
        Some(next.timestamp_millis())
    }
}
