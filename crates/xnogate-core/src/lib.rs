//! ============================================================================
//! XNOGATE-CORE: Payment-gated access control
//! ============================================================================
//! This crate decides whether a protected resource should be considered
//! unlocked based on XNO payments observed (or pending) on monitored
//! accounts:
//! - Gate engine combining per-account unlock keys into one verdict
//! - Ledger capability trait with node-RPC and in-memory implementations
//! - redb-backed lock-state cache bounding the node query rate
//! ============================================================================

pub mod gate;
pub mod ledger;
pub mod payment;
pub mod store;

// Re-export main types for convenience
pub use gate::{Gate, Key, LockState};
pub use ledger::{Ledger, LedgerError, MemoryLedger, RpcLedger};
pub use payment::{to_raw, Receivable, Received, RAW_PER_XNO};
pub use store::LockStore;
