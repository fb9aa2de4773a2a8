//! ============================================================================
//! Payment Types - Observed and pending payments on the XNO ledger
//! ============================================================================
//! Immutable value types produced by a ledger implementation and consumed by
//! the gate for threshold and recency checks. All amounts are in raw, the
//! ledger's smallest indivisible unit.
//! ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw per whole XNO (10^30).
pub const RAW_PER_XNO: u128 = 1_000_000_000_000_000_000_000_000_000_000;

/// A confirmed, settled incoming payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Received {
    /// Amount in raw.
    pub amount: u128,
    /// Block local timestamp, second resolution.
    pub time: DateTime<Utc>,
}

impl Received {
    pub fn new(amount: u128, time: DateTime<Utc>) -> Self {
        Self { amount, time }
    }
}

/// A payment that has been sent but not yet received by the monitored
/// account. No timestamp — pending payments count as available now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receivable {
    /// Amount in raw.
    pub amount: u128,
}

impl Receivable {
    pub fn new(amount: u128) -> Self {
        Self { amount }
    }
}

/// Convert whole XNO to raw. Exact integer arithmetic.
pub fn to_raw(xno: u128) -> u128 {
    xno * RAW_PER_XNO
}
