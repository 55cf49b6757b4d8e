use serde::{Deserialize, Serialize};

use crate::constants::DAY_MS;
use crate::credits::Credits;

/// Subscription tier of a user account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    #[default]
    Free,
    Lite,
    Plus,
    Drive,
    Pro,
    Max,
}

impl Tier {
    /// OFSF storage quota in bytes.
    pub fn ofsf_quota(self) -> u64 {
        const MB: u64 = 1_000_000;
        match self {
            Tier::Free => 5 * MB,
            Tier::Lite => 25 * MB,
            Tier::Plus => 100 * MB,
            Tier::Drive => 500 * MB,
            Tier::Pro => 1_000 * MB,
            Tier::Max => 5_000 * MB,
        }
    }

    /// Credits paid out by one daily claim.
    pub fn daily_claim(self) -> Credits {
        Credits::from_cents(match self {
            Tier::Free => 100,
            Tier::Lite => 150,
            Tier::Plus => 200,
            Tier::Drive => 250,
            Tier::Pro => 300,
            Tier::Max => 400,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StandingLevel {
    #[default]
    Good,
    Warning,
    Suspended,
    Banned,
}

const WARNING_RECOVERY_MS: i64 = 7 * DAY_MS;
const SUSPENSION_RECOVERY_MS: i64 = 14 * DAY_MS;

/// A disciplinary level plus the moment it was set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub level: StandingLevel,
    /// When `level` was assigned (ms).
    pub since: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Standing {
    pub fn new(level: StandingLevel, since: i64, reason: Option<String>) -> Self {
        Self { level, since, reason }
    }

    /// The level in force at `now` after automatic recovery.
    ///
    /// A warning lapses to good after 7 days. A suspension drops to a
    /// warning after 14 days, and that warning lapses 7 days later.
    /// Bans never lapse.
    pub fn effective(&self, now: i64) -> StandingLevel {
        let elapsed = now.saturating_sub(self.since);
        match self.level {
            StandingLevel::Good => StandingLevel::Good,
            StandingLevel::Banned => StandingLevel::Banned,
            StandingLevel::Warning if elapsed >= WARNING_RECOVERY_MS => StandingLevel::Good,
            StandingLevel::Warning => StandingLevel::Warning,
            StandingLevel::Suspended if elapsed >= SUSPENSION_RECOVERY_MS + WARNING_RECOVERY_MS => {
                StandingLevel::Good
            }
            StandingLevel::Suspended if elapsed >= SUSPENSION_RECOVERY_MS => {
                StandingLevel::Warning
            }
            StandingLevel::Suspended => StandingLevel::Suspended,
        }
    }

    /// Whether the account may perform authenticated writes at `now`.
    pub fn can_act(&self, now: i64) -> bool {
        matches!(
            self.effective(now),
            StandingLevel::Good | StandingLevel::Warning
        )
    }
}
