//! ============================================================================
//! Ledger Module - External interface to the XNO block lattice
//! ============================================================================
//! The gate consumes payment data through the [`Ledger`] capability rather
//! than a concrete transport. Two implementations are provided:
//! - [`RpcLedger`]: speaks the node RPC protocol over HTTP
//! - [`MemoryLedger`]: seedable in-memory ledger for tests and simulation
//! ============================================================================

mod memory;
mod rpc;

pub use memory::MemoryLedger;
pub use rpc::{RpcLedger, DEFAULT_LOOKBACK, DEFAULT_RATE_LIMIT_SECS};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::gate::LockState;
use crate::payment::{Receivable, Received};

/// Protocol-level failures raised by ledger implementations. These propagate
/// unchanged through the gate to the caller; there is no retry or fallback.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("RPC {action} call failed with status {status}: {body}")]
    BadStatus {
        action: &'static str,
        status: u16,
        body: String,
    },

    #[error("RPC {action} response missing '{field}' (status {status})")]
    MissingField {
        action: &'static str,
        field: &'static str,
        status: u16,
    },
}

/// External interface to the XNO block lattice, or a simulation of it.
///
/// Payment queries are read-only and idempotent. The lock-state operations
/// let the gate memoize its verdict; implementations that want no rate
/// limiting may no-op them.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Received payments to the given account. The implementation chooses
    /// the transaction lookback count; order is unspecified.
    async fn received(&self, account: &str) -> Result<Vec<Received>>;

    /// Receivable payments for the given account with amount >= threshold.
    async fn receivable(&self, account: &str, threshold: u128) -> Result<Vec<Receivable>>;

    /// Persist the gate's verdict. With `until` of `None` the implementation
    /// applies its own rate-limit default horizon.
    async fn save_lock_state(&self, unlocked: bool, until: Option<DateTime<Utc>>) -> Result<()>;

    /// The cached verdict, or `None` when nothing usable is cached.
    async fn load_lock_state(&self) -> Result<Option<LockState>>;
}
