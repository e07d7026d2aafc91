//! Retention policy for cache sets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Configuration for time-based eviction of cache sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// How long a cache set is kept after its index was last written
    pub max_age: Duration,
    /// Whether eviction is enabled
    pub enabled: bool,
}

impl RetentionPolicy {
    /// Create a new policy with default settings.
    ///
    /// Default: 7 days.
    pub fn new() -> Self {
        Self {
            max_age: Duration::from_secs(7 * SECS_PER_DAY),
            enabled: true,
        }
    }

    /// Retention expressed in whole days, the unit the maintenance entry point uses.
    pub fn days(days: u32) -> Self {
        Self::new().max_age(Duration::from_secs(u64::from(days) * SECS_PER_DAY))
    }

    /// Set the maximum age.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Enable or disable eviction.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Disable eviction entirely.
    pub fn disabled() -> Self {
        Self {
            max_age: Duration::ZERO,
            enabled: false,
        }
    }

    /// Oldest modification time that is still retained at `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Calculate an appropriate scheduling interval based on the retention window.
    ///
    /// Rules:
    /// - For retention <= 1 day: every 10 minutes
    /// - For retention <= 7 days: every hour
    /// - For retention <= 30 days: every 4 hours
    /// - Otherwise: every 12 hours
    pub fn recommended_interval(&self) -> Duration {
        match self.max_age.as_secs() {
            0..=86400 => Duration::from_secs(600),
            86401..=604800 => Duration::from_secs(3600),
            604801..=2592000 => Duration::from_secs(14400),
            _ => Duration::from_secs(43200),
        }
    }

    /// Check whether a cache set last modified at `modified` has expired.
    pub fn is_expired(&self, modified: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.enabled && modified < self.cutoff(now)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_is_expired() {
        let policy = RetentionPolicy::days(7);
        let now = Utc::now();

        assert!(policy.is_expired(now - ChronoDuration::days(10), now));
        assert!(!policy.is_expired(now - ChronoDuration::days(1), now));
    }

    #[test]
    fn test_disabled_never_expires() {
        let policy = RetentionPolicy::disabled();
        let now = Utc::now();

        assert!(!policy.is_expired(now - ChronoDuration::days(365), now));
    }

    #[test]
    fn test_recommended_interval() {
        assert_eq!(
            RetentionPolicy::days(1).recommended_interval(),
            Duration::from_secs(600)
        );
        assert_eq!(
            RetentionPolicy::days(7).recommended_interval(),
            Duration::from_secs(3600)
        );
        assert_eq!(
            RetentionPolicy::days(90).recommended_interval(),
            Duration::from_secs(43200)
        );
    }
}
