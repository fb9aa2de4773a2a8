//! ============================================================================
//! Gate Module - Payment-keyed access control
//! ============================================================================
//! Provide means for the admin to determine whether appropriate payments
//! have been made or are pending.
//!
//! ## Usage
//! ```rust,ignore
//! use xnogate_core::{Gate, RpcLedger};
//!
//! let mut gate = Gate::new(RpcLedger::new("https://rpc.nano.to"));
//! gate.add_key("xno_1abc...", xnogate_core::to_raw(1), 3600, false);
//! let open_until = gate.unlocked().await?;
//! ```
//! ============================================================================

mod engine;
mod types;

// Re-export public types
pub use engine::Gate;
pub use types::{Key, LockState};
