//! Delay tiers.
//!
//! The broker does not accept arbitrary delays. A message selects one of a fixed
//! table of levels, addressed 1-based:
//!
//! ```text
//! 1s 5s 10s 30s 1m 2m 3m 4m 5m 6m 7m 8m 9m 10m 20m 30m 1h 2h
//! ```

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;

const fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// The broker-defined delay table, indexed by `level - 1`.
pub const DELAY_LEVELS: [Duration; 18] = [
    secs(1),
    secs(5),
    secs(10),
    secs(30),
    secs(60),
    secs(2 * 60),
    secs(3 * 60),
    secs(4 * 60),
    secs(5 * 60),
    secs(6 * 60),
    secs(7 * 60),
    secs(8 * 60),
    secs(9 * 60),
    secs(10 * 60),
    secs(20 * 60),
    secs(30 * 60),
    secs(60 * 60),
    secs(2 * 60 * 60),
];

/// One broker-supported delay level.
///
/// A `DelayTier` can only be built from a valid level, so holding one is proof
/// that the broker will accept it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DelayTier(u8);

impl DelayTier {
    pub const ONE_SECOND: DelayTier = DelayTier(1);
    pub const FIVE_SECONDS: DelayTier = DelayTier(2);
    pub const TEN_SECONDS: DelayTier = DelayTier(3);
    pub const THIRTY_SECONDS: DelayTier = DelayTier(4);
    pub const ONE_MINUTE: DelayTier = DelayTier(5);
    pub const THIRTY_MINUTES: DelayTier = DelayTier(16);
    pub const TWO_HOURS: DelayTier = DelayTier(18);

    /// Highest supported level.
    pub const MAX_LEVEL: u8 = DELAY_LEVELS.len() as u8;

    /// Validates a raw 1-based level.
    pub fn from_level(level: u8) -> Result<Self, ConfigurationError> {
        if (1..=Self::MAX_LEVEL).contains(&level) {
            Ok(Self(level))
        } else {
            Err(ConfigurationError::InvalidDelayLevel {
                level,
                max: Self::MAX_LEVEL,
            })
        }
    }

    /// Tier used for the n-th redelivery of a failed batch.
    ///
    /// Starts at 10s for the first redelivery and saturates at the last level.
    pub fn for_redelivery(reconsume_times: u32) -> Self {
        let level = 2u32.saturating_add(reconsume_times).min(Self::MAX_LEVEL as u32);
        Self(level as u8)
    }

    pub fn level(self) -> u8 {
        self.0
    }

    pub fn duration(self) -> Duration {
        DELAY_LEVELS[(self.0 - 1) as usize]
    }

    /// All tiers, shortest first.
    pub fn all() -> impl Iterator<Item = DelayTier> {
        (1..=Self::MAX_LEVEL).map(DelayTier)
    }
}

impl TryFrom<u8> for DelayTier {
    type Error = ConfigurationError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        Self::from_level(level)
    }
}

impl From<DelayTier> for u8 {
    fn from(tier: DelayTier) -> Self {
        tier.0
    }
}

impl Display for DelayTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.duration().as_secs();
        if secs >= 3600 {
            write!(f, "{}h", secs / 3600)
        } else if secs >= 60 {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{}s", secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_level_maps_to_table() {
        let tiers: Vec<_> = DelayTier::all().collect();
        assert_eq!(tiers.len(), 18);
        assert_eq!(tiers[0].duration(), Duration::from_secs(1));
        assert_eq!(tiers[17].duration(), Duration::from_secs(7200));
        assert!(tiers.windows(2).all(|w| w[0].duration() < w[1].duration()));
    }

    #[test]
    fn test_out_of_range_levels_rejected() {
        assert_eq!(
            DelayTier::from_level(0),
            Err(ConfigurationError::InvalidDelayLevel { level: 0, max: 18 })
        );
        assert!(DelayTier::from_level(19).is_err());
        assert!(serde_json::from_str::<DelayTier>("42").is_err());
    }

    #[test]
    fn test_named_tiers() {
        assert_eq!(DelayTier::FIVE_SECONDS.duration(), Duration::from_secs(5));
        assert_eq!(DelayTier::TEN_SECONDS.to_string(), "10s");
        assert_eq!(DelayTier::ONE_MINUTE.to_string(), "1m");
        assert_eq!(DelayTier::TWO_HOURS.to_string(), "2h");
    }

    #[test]
    fn test_redelivery_backoff_saturates() {
        assert_eq!(DelayTier::for_redelivery(1), DelayTier::TEN_SECONDS);
        assert_eq!(DelayTier::for_redelivery(2), DelayTier::THIRTY_SECONDS);
        assert_eq!(DelayTier::for_redelivery(100), DelayTier::TWO_HOURS);
    }
}
