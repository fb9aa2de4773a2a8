//! ============================================================================
//! Gate Engine - Payment-keyed unlock decisions with cached verdicts
//! ============================================================================
//! Combines independent payment requirements (keys) into a single
//! open/closed decision. The verdict is memoized through the ledger's
//! lock-state cache so a request burst does not turn into a node query
//! burst; payment data itself is never cached.
//! ============================================================================

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::types::Key;
use crate::ledger::Ledger;
use crate::payment::Received;

/// Decides whether appropriate payments have been made or are pending, for
/// the purposes of being open or closed.
pub struct Gate<L: Ledger> {
    ledger: L,
    keys: HashMap<String, Key>,
}

impl<L: Ledger> Gate<L> {
    /// Use the given ledger to verify payments.
    pub fn new(ledger: L) -> Self {
        Self {
            ledger,
            keys: HashMap::new(),
        }
    }

    /// Register an unlock rule for `account`. A rule already registered for
    /// the same account is replaced.
    pub fn add_key(
        &mut self,
        account: impl Into<String>,
        amount: u128,
        timeout_secs: i64,
        count_receivable: bool,
    ) {
        let key = Key::new(account, amount, timeout_secs, count_receivable);
        self.keys.insert(key.account.clone(), key);
    }

    /// The registered unlock rules, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.values()
    }

    /// The underlying ledger.
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Received payments for `account`, newest first. The stable sort keeps
    /// the ledger's fetch order for equal timestamps.
    async fn received_newest_first(&self, account: &str) -> Result<Vec<Received>> {
        let mut payments = self.ledger.received(account).await?;
        payments.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(payments)
    }

    /// When was the last time `account` got paid at least `amount` raw?
    pub async fn been_paid(&self, account: &str, amount: u128) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .received_newest_first(account)
            .await?
            .into_iter()
            .find(|payment| payment.amount >= amount)
            .map(|payment| payment.time))
    }

    /// Total raw received by `account` at or after `when`.
    pub async fn total_received_since(
        &self,
        account: &str,
        when: DateTime<Utc>,
    ) -> Result<u128> {
        Ok(self
            .ledger
            .received(account)
            .await?
            .iter()
            .filter(|payment| payment.time >= when)
            .map(|payment| payment.amount)
            .sum())
    }

    /// Does `account` have a pending payment of at least `amount` raw?
    pub async fn has_receivable(&self, account: &str, amount: u128) -> Result<bool> {
        Ok(!self.ledger.receivable(account, amount).await?.is_empty())
    }

    /// Total pending raw for `account`, regardless of threshold.
    pub async fn total_receivable(&self, account: &str) -> Result<u128> {
        Ok(self
            .ledger
            .receivable(account, 1)
            .await?
            .iter()
            .map(|payment| payment.amount)
            .sum())
    }

    /// Is the gate currently unlocked, and until when?
    ///
    /// A cached verdict whose horizon is still in the future is trusted
    /// without querying the ledger — including a locked verdict, so a
    /// payment arriving inside the cache window only opens the gate once
    /// the window expires. On a cache miss the keys are evaluated longest
    /// timeout first; the first satisfied key therefore carries the longest
    /// unlock window any single key can grant, and the remaining keys are
    /// skipped. The fresh verdict is persisted either way.
    pub async fn unlocked(&self) -> Result<Option<DateTime<Utc>>> {
        let now = Utc::now();

        if let Some(state) = self.ledger.load_lock_state().await? {
            if state.is_fresh(now) {
                debug!(
                    "Lock state cache hit: unlocked={} until={}",
                    state.unlocked, state.until
                );
                return Ok(state.unlocked.then_some(state.until));
            }
        }

        let mut keys: Vec<&Key> = self.keys.values().collect();
        keys.sort_by_key(|key| std::cmp::Reverse(key.timeout_secs));

        for key in keys {
            if key.count_receivable && self.has_receivable(&key.account, key.amount).await? {
                let until = now + key.timeout();
                info!("Unlocked by receivable on {} until {}", key.account, until);
                self.ledger.save_lock_state(true, Some(until)).await?;
                return Ok(Some(until));
            }

            if let Some(paid) = self.been_paid(&key.account, key.amount).await? {
                if paid > now - key.timeout() {
                    let until = paid + key.timeout();
                    info!(
                        "Unlocked by payment to {} at {} until {}",
                        key.account, paid, until
                    );
                    self.ledger.save_lock_state(true, Some(until)).await?;
                    return Ok(Some(until));
                }
            }
        }

        debug!("No key satisfied, locking");
        self.ledger.save_lock_state(false, None).await?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::payment::Receivable;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ACCOUNT: &str = "xno_1ipx847tk8o46pwxt5qjdbncjqcbwcc1rrmqnkztrfjy5k7z4imsrata9est";
    const OTHER: &str = "xno_38ztgpejb7yrm7rr586nenkn597s3a1sqiy3m3uyqjicht7kzuhnihdk6zpz";

    fn standard_payments() -> [Received; 3] {
        [
            Received::new(1500, Utc.with_ymd_and_hms(2024, 2, 27, 10, 33, 19).unwrap()),
            Received::new(3500, Utc.with_ymd_and_hms(2023, 8, 2, 13, 4, 7).unwrap()),
            Received::new(5500, Utc.with_ymd_and_hms(2022, 6, 15, 10, 33, 19).unwrap()),
        ]
    }

    fn standard_gate() -> Gate<MemoryLedger> {
        let mut ledger = MemoryLedger::new();
        for payment in standard_payments() {
            ledger.add_received(ACCOUNT, payment.amount, payment.time);
        }
        ledger.add_receivable(ACCOUNT, 500);
        ledger.add_receivable(ACCOUNT, 1000);
        Gate::new(ledger)
    }

    /// Ledger wrapper counting payment queries, for cache short-circuit
    /// assertions.
    struct CountingLedger {
        inner: MemoryLedger,
        received_calls: AtomicUsize,
        receivable_calls: AtomicUsize,
    }

    impl CountingLedger {
        fn new(inner: MemoryLedger) -> Self {
            Self {
                inner,
                received_calls: AtomicUsize::new(0),
                receivable_calls: AtomicUsize::new(0),
            }
        }

        fn queries(&self) -> usize {
            self.received_calls.load(Ordering::SeqCst)
                + self.receivable_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Ledger for CountingLedger {
        async fn received(&self, account: &str) -> Result<Vec<Received>> {
            self.received_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.received(account).await
        }

        async fn receivable(&self, account: &str, threshold: u128) -> Result<Vec<Receivable>> {
            self.receivable_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.receivable(account, threshold).await
        }

        async fn save_lock_state(
            &self,
            unlocked: bool,
            until: Option<DateTime<Utc>>,
        ) -> Result<()> {
            self.inner.save_lock_state(unlocked, until).await
        }

        async fn load_lock_state(&self) -> Result<Option<crate::gate::LockState>> {
            self.inner.load_lock_state().await
        }
    }

    #[tokio::test]
    async fn test_been_paid() {
        let gate = standard_gate();
        let [p1, p2, p3] = standard_payments();

        assert_eq!(gate.been_paid(ACCOUNT, 1000).await.unwrap(), Some(p1.time));
        assert_eq!(gate.been_paid(ACCOUNT, 2000).await.unwrap(), Some(p2.time));
        assert_eq!(gate.been_paid(ACCOUNT, 4000).await.unwrap(), Some(p3.time));
        assert_eq!(gate.been_paid(ACCOUNT, 6000).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_been_paid_empty_account() {
        let gate = standard_gate();
        assert_eq!(gate.been_paid(OTHER, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_total_received_since() {
        let gate = standard_gate();
        let [p1, p2, p3] = standard_payments();

        let all = Utc.with_ymd_and_hms(2020, 1, 1, 12, 0, 0).unwrap();
        let recent = Utc.with_ymd_and_hms(2023, 1, 1, 12, 0, 0).unwrap();
        let newest = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let future = Utc.with_ymd_and_hms(2024, 8, 1, 12, 0, 0).unwrap();

        assert_eq!(
            gate.total_received_since(ACCOUNT, all).await.unwrap(),
            p1.amount + p2.amount + p3.amount
        );
        assert_eq!(
            gate.total_received_since(ACCOUNT, recent).await.unwrap(),
            p1.amount + p2.amount
        );
        assert_eq!(
            gate.total_received_since(ACCOUNT, newest).await.unwrap(),
            p1.amount
        );
        assert_eq!(gate.total_received_since(ACCOUNT, future).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_has_receivable() {
        let gate = standard_gate();

        assert!(gate.has_receivable(ACCOUNT, 200).await.unwrap());
        assert!(gate.has_receivable(ACCOUNT, 1000).await.unwrap());
        assert!(!gate.has_receivable(ACCOUNT, 1001).await.unwrap());
    }

    #[tokio::test]
    async fn test_total_receivable() {
        let gate = standard_gate();
        assert_eq!(gate.total_receivable(ACCOUNT).await.unwrap(), 1500);
    }

    #[test]
    fn test_key_replacement() {
        let mut gate = Gate::new(MemoryLedger::new());
        gate.add_key(ACCOUNT, 1000, 60, false);
        gate.add_key(ACCOUNT, 2000, 120, true);

        let keys: Vec<&Key> = gate.keys().collect();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].amount, 2000);
        assert_eq!(keys[0].timeout_secs, 120);
        assert!(keys[0].count_receivable);
    }

    #[tokio::test]
    async fn test_unlocked_by_recent_payment() {
        let mut ledger = MemoryLedger::new();
        let paid = Utc::now() - Duration::seconds(10);
        ledger.add_received(ACCOUNT, 1500, paid);

        let mut gate = Gate::new(ledger);
        gate.add_key(ACCOUNT, 1000, 60, false);

        let until = gate.unlocked().await.unwrap().expect("gate should open");
        assert_eq!(until, paid + Duration::seconds(60));

        let state = gate.ledger().load_lock_state().await.unwrap().unwrap();
        assert!(state.unlocked);
        assert_eq!(state.until, until);
    }

    #[tokio::test]
    async fn test_locked_when_payment_too_old() {
        let mut ledger = MemoryLedger::new();
        ledger.add_received(ACCOUNT, 1500, Utc::now() - Duration::seconds(120));

        let mut gate = Gate::new(ledger);
        gate.add_key(ACCOUNT, 1000, 60, false);

        assert_eq!(gate.unlocked().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_locked_when_amount_too_small() {
        let mut ledger = MemoryLedger::new();
        ledger.add_received(ACCOUNT, 900, Utc::now() - Duration::seconds(10));

        let mut gate = Gate::new(ledger);
        gate.add_key(ACCOUNT, 1000, 60, false);

        assert_eq!(gate.unlocked().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_no_keys_locks_and_persists() {
        let gate = Gate::new(MemoryLedger::new());

        assert_eq!(gate.unlocked().await.unwrap(), None);

        let state = gate.ledger().load_lock_state().await.unwrap().unwrap();
        assert!(!state.unlocked);
        // Locked verdicts get the ledger's rate-limit horizon
        assert!(state.until > Utc::now());
    }

    #[tokio::test]
    async fn test_unlocked_by_receivable() {
        let mut ledger = MemoryLedger::new();
        ledger.add_receivable(ACCOUNT, 2500);

        let mut gate = Gate::new(ledger);
        gate.add_key(ACCOUNT, 2000, 300, true);

        let before = Utc::now();
        let until = gate.unlocked().await.unwrap().expect("gate should open");
        assert!(until >= before + Duration::seconds(300));
        assert!(until <= Utc::now() + Duration::seconds(300));

        let state = gate.ledger().load_lock_state().await.unwrap().unwrap();
        assert!(state.unlocked);
        assert_eq!(state.until, until);
    }

    #[tokio::test]
    async fn test_receivable_key_falls_back_to_received() {
        let mut ledger = MemoryLedger::new();
        let paid = Utc::now() - Duration::seconds(5);
        ledger.add_received(ACCOUNT, 2500, paid);

        let mut gate = Gate::new(ledger);
        gate.add_key(ACCOUNT, 2000, 300, true);

        let until = gate.unlocked().await.unwrap().expect("gate should open");
        assert_eq!(until, paid + Duration::seconds(300));
    }

    #[tokio::test]
    async fn test_longest_window_wins() {
        let mut ledger = MemoryLedger::new();
        let paid_short = Utc::now() - Duration::seconds(10);
        let paid_long = Utc::now() - Duration::seconds(20);
        ledger.add_received(ACCOUNT, 1500, paid_short);
        ledger.add_received(OTHER, 1500, paid_long);

        let mut gate = Gate::new(ledger);
        gate.add_key(ACCOUNT, 1000, 60, false);
        gate.add_key(OTHER, 1000, 600, false);

        // Both keys are satisfied; the 600s key is evaluated first
        let until = gate.unlocked().await.unwrap().expect("gate should open");
        assert_eq!(until, paid_long + Duration::seconds(600));
    }

    #[tokio::test]
    async fn test_fresh_cache_short_circuits_ledger() {
        let mut inner = MemoryLedger::new();
        inner.add_received(ACCOUNT, 1500, Utc::now());
        let ledger = CountingLedger::new(inner);

        let until = Utc::now() + Duration::seconds(30);
        ledger.save_lock_state(true, Some(until)).await.unwrap();

        let mut gate = Gate::new(ledger);
        gate.add_key(ACCOUNT, 1000, 60, false);

        assert_eq!(gate.unlocked().await.unwrap(), Some(until));
        assert_eq!(gate.ledger().queries(), 0);
    }

    #[tokio::test]
    async fn test_fresh_locked_cache_keeps_gate_closed() {
        // A payment arriving during the cache window does not open the gate
        let mut inner = MemoryLedger::new();
        inner.add_received(ACCOUNT, 1500, Utc::now());
        let ledger = CountingLedger::new(inner);

        ledger
            .save_lock_state(false, Some(Utc::now() + Duration::seconds(30)))
            .await
            .unwrap();

        let mut gate = Gate::new(ledger);
        gate.add_key(ACCOUNT, 1000, 60, false);

        assert_eq!(gate.unlocked().await.unwrap(), None);
        assert_eq!(gate.ledger().queries(), 0);
    }

    #[tokio::test]
    async fn test_expired_cache_falls_back_to_ledger() {
        let mut inner = MemoryLedger::new();
        let paid = Utc::now() - Duration::seconds(10);
        inner.add_received(ACCOUNT, 1500, paid);
        let ledger = CountingLedger::new(inner);

        ledger
            .save_lock_state(false, Some(Utc::now() - Duration::seconds(5)))
            .await
            .unwrap();

        let mut gate = Gate::new(ledger);
        gate.add_key(ACCOUNT, 1000, 60, false);

        let until = gate.unlocked().await.unwrap().expect("gate should open");
        assert_eq!(until, paid + Duration::seconds(60));
        assert!(gate.ledger().queries() > 0);

        let state = gate.ledger().load_lock_state().await.unwrap().unwrap();
        assert!(state.unlocked);
        assert_eq!(state.until, until);
    }
}
