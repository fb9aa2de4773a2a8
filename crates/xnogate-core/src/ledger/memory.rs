//! ============================================================================
//! Memory Ledger - Simulated in-memory ledger
//! ============================================================================
//! Seedable implementation of the ledger interface so gate logic can be
//! exercised without network I/O. Lock state lives in-process.
//! ============================================================================

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use super::Ledger;
use crate::gate::LockState;
use crate::payment::{Receivable, Received};

/// Rate-limit default mirroring [`super::DEFAULT_RATE_LIMIT_SECS`].
const MEMORY_RATE_LIMIT_SECS: i64 = 60;

/// In-memory ledger for tests and simulation.
pub struct MemoryLedger {
    received: HashMap<String, Vec<Received>>,
    receivable: HashMap<String, Vec<Receivable>>,
    lock_state: RwLock<Option<LockState>>,
    rate_limit_secs: i64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::with_rate_limit(MEMORY_RATE_LIMIT_SECS)
    }

    /// Create with a custom locked-verdict horizon.
    pub fn with_rate_limit(rate_limit_secs: i64) -> Self {
        Self {
            received: HashMap::new(),
            receivable: HashMap::new(),
            lock_state: RwLock::new(None),
            rate_limit_secs,
        }
    }

    /// Seed a confirmed payment to `account`.
    pub fn add_received(&mut self, account: &str, amount: u128, time: DateTime<Utc>) {
        self.received
            .entry(account.to_string())
            .or_default()
            .push(Received::new(amount, time));
    }

    /// Seed a pending payment to `account`.
    pub fn add_receivable(&mut self, account: &str, amount: u128) {
        self.receivable
            .entry(account.to_string())
            .or_default()
            .push(Receivable::new(amount));
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn received(&self, account: &str) -> Result<Vec<Received>> {
        Ok(self.received.get(account).cloned().unwrap_or_default())
    }

    async fn receivable(&self, account: &str, threshold: u128) -> Result<Vec<Receivable>> {
        Ok(self
            .receivable
            .get(account)
            .map(|pending| {
                pending
                    .iter()
                    .filter(|p| p.amount >= threshold)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn save_lock_state(&self, unlocked: bool, until: Option<DateTime<Utc>>) -> Result<()> {
        let until =
            until.unwrap_or_else(|| Utc::now() + Duration::seconds(self.rate_limit_secs));
        *self.lock_state.write().await = Some(LockState::new(unlocked, until));
        Ok(())
    }

    async fn load_lock_state(&self) -> Result<Option<LockState>> {
        Ok(*self.lock_state.read().await)
    }
}
