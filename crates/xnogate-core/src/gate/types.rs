//! ============================================================================
//! Gate Types - Unlock rules and cached verdicts
//! ============================================================================

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One independent way to unlock the gate: the monitored account must have
/// received (or, with `count_receivable`, be owed) at least `amount` raw
/// within the last `timeout_secs` seconds.
///
/// Keys are registered per account; registering a second key for the same
/// account replaces the first. Keys live for the lifetime of the gate and
/// are never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    /// XNO public address to monitor.
    pub account: String,
    /// Minimum qualifying amount in raw.
    pub amount: u128,
    /// Unlock window in seconds, measured from the qualifying payment.
    pub timeout_secs: i64,
    /// Whether pending (receivable) payments also satisfy this key.
    pub count_receivable: bool,
}

impl Key {
    pub fn new(
        account: impl Into<String>,
        amount: u128,
        timeout_secs: i64,
        count_receivable: bool,
    ) -> Self {
        Self {
            account: account.into(),
            amount,
            timeout_secs,
            count_receivable,
        }
    }

    /// The unlock window as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::seconds(self.timeout_secs)
    }
}

/// The cached open/closed verdict plus its validity horizon. Implicitly
/// invalid once `until` is in the past; there is no explicit deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    pub unlocked: bool,
    pub until: DateTime<Utc>,
}

impl LockState {
    pub fn new(unlocked: bool, until: DateTime<Utc>) -> Self {
        Self { unlocked, until }
    }

    /// Whether the verdict may still be trusted at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.until > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_timeout() {
        let key = Key::new("xno_1abc", 1000, 300, false);
        assert_eq!(key.timeout(), Duration::seconds(300));
    }

    #[test]
    fn test_lock_state_freshness() {
        let now = Utc::now();
        let fresh = LockState::new(true, now + Duration::seconds(30));
        let stale = LockState::new(true, now - Duration::seconds(30));
        let boundary = LockState::new(true, now);

        assert!(fresh.is_fresh(now));
        assert!(!stale.is_fresh(now));
        // An exactly-expired horizon is no longer trusted
        assert!(!boundary.is_fresh(now));
    }
}
