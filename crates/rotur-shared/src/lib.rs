//! # rotur-shared
//!
//! Types shared by the store and the server: the `Credits` unit of account,
//! billing periods, account tiers and standings, identity helpers, and
//! global limits.

pub mod constants;
pub mod credits;
pub mod error;
pub mod period;
pub mod tier;
pub mod types;

pub use credits::Credits;
pub use error::ValidationError;
pub use period::{BillingCycle, Period};
pub use tier::{Standing, StandingLevel, Tier};
