//! ============================================================================
//! RPC Ledger - Node RPC implementation of the ledger interface
//! ============================================================================
//! Speaks the XNO node RPC protocol over HTTP:
//! - `account_history` for received payments (receive blocks only)
//! - `receivable` for pending payments above a threshold
//! Lock state is persisted through an optional [`LockStore`]; without one the
//! ledger is cacheless and the save/load operations are no-ops.
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use tracing::debug;

use super::{Ledger, LedgerError};
use crate::gate::LockState;
use crate::payment::{Receivable, Received};
use crate::store::LockStore;

/// Default number of transaction records reviewed per `account_history`
/// call, per the RPC spec.
pub const DEFAULT_LOOKBACK: u32 = 25;

/// Default validity horizon for a locked verdict, in seconds. Bounds how
/// often a closed gate re-queries the node.
pub const DEFAULT_RATE_LIMIT_SECS: i64 = 60;

/// Ledger implementation backed by an XNO node (or proxy) RPC endpoint.
pub struct RpcLedger {
    client: reqwest::Client,
    node_url: String,
    lookback: u32,
    rate_limit_secs: i64,
    store: Option<LockStore>,
}

impl RpcLedger {
    /// Create a cacheless RPC ledger with default lookback and rate limit.
    pub fn new(node_url: &str) -> Self {
        Self::with_config(node_url, DEFAULT_LOOKBACK, DEFAULT_RATE_LIMIT_SECS)
    }

    /// Create a cacheless RPC ledger with custom lookback and rate limit.
    pub fn with_config(node_url: &str, lookback: u32, rate_limit_secs: i64) -> Self {
        Self {
            client: reqwest::Client::new(),
            node_url: node_url.to_string(),
            lookback,
            rate_limit_secs,
            store: None,
        }
    }

    /// Attach a lock-state store, enabling the verdict cache.
    pub fn set_store(&mut self, store: LockStore) {
        self.store = Some(store);
    }

    /// POST one RPC action and return the response status and JSON body.
    async fn call(&self, action: &'static str, body: Value) -> Result<(u16, Value)> {
        debug!("RPC {} -> {}", action, self.node_url);

        let response = self
            .client
            .post(&self.node_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to reach node RPC: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::BadStatus {
                action,
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let value = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse {} response: {}", action, e))?;

        Ok((status.as_u16(), value))
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn received(&self, account: &str) -> Result<Vec<Received>> {
        let call = json!({
            "action": "account_history",
            "account": account,
            "count": self.lookback,
        });

        let (status, value) = self.call("account_history", call).await?;
        parse_history_response(status, &value)
    }

    async fn receivable(&self, account: &str, threshold: u128) -> Result<Vec<Receivable>> {
        let call = json!({
            "action": "receivable",
            "account": account,
            "threshold": threshold.to_string(),
        });

        let (status, value) = self.call("receivable", call).await?;
        parse_receivable_response(status, &value)
    }

    async fn save_lock_state(&self, unlocked: bool, until: Option<DateTime<Utc>>) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let until =
            until.unwrap_or_else(|| Utc::now() + Duration::seconds(self.rate_limit_secs));
        store.save(unlocked, until)
    }

    async fn load_lock_state(&self) -> Result<Option<LockState>> {
        match &self.store {
            Some(store) => Ok(store.load()),
            None => Ok(None),
        }
    }
}

/// Extract received payments from an `account_history` response.
fn parse_history_response(status: u16, value: &Value) -> Result<Vec<Received>> {
    let history = value.get("history").ok_or(LedgerError::MissingField {
        action: "account_history",
        field: "history",
        status,
    })?;

    // The node encodes an empty history as "" rather than []
    let entries = match history.as_array() {
        Some(entries) => entries,
        None => return Ok(Vec::new()),
    };

    Ok(entries.iter().filter_map(history_to_received).collect())
}

/// Extract pending payments from a `receivable` response. "blocks" is a
/// hash -> amount map, or "" when nothing is pending.
fn parse_receivable_response(status: u16, value: &Value) -> Result<Vec<Receivable>> {
    let blocks = value.get("blocks").ok_or(LedgerError::MissingField {
        action: "receivable",
        field: "blocks",
        status,
    })?;

    let map = match blocks.as_object() {
        Some(map) => map,
        None => return Ok(Vec::new()),
    };

    Ok(map
        .values()
        .filter_map(|v| Some(Receivable::new(amount_field(v)?)))
        .collect())
}

/// Convert an `account_history` transaction record into a [`Received`], or
/// `None` for sends and records that do not parse.
fn history_to_received(entry: &Value) -> Option<Received> {
    if entry.get("type")?.as_str()? != "receive" {
        return None;
    }

    let amount = amount_field(entry.get("amount")?)?;
    let timestamp = entry.get("local_timestamp")?.as_str()?.parse::<i64>().ok()?;
    let time = Utc.timestamp_opt(timestamp, 0).single()?;

    Some(Received::new(amount, time))
}

/// Raw amounts arrive as decimal strings; tolerate plain numbers too.
fn amount_field(value: &Value) -> Option<u128> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64().map(u128::from),
        _ => None,
    }
}
