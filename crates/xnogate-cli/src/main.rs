// ============================================================================
// xno-gate — CLI for payment checks against an XNO node
// ============================================================================
// Usage:
//   xno-gate --node URL been-paid ACCOUNT XNO      When was the account last paid?
//   xno-gate --node URL receivable ACCOUNT         Total pending raw
//   xno-gate --node URL check --key ACCT:XNO:SECS  Evaluate unlock keys
// ============================================================================

use anyhow::Result;
use clap::{Parser, Subcommand};
use xnogate_core::{to_raw, Gate, LockStore, RpcLedger};

/// Ask an XNO node about payments gating a protected resource
#[derive(Parser)]
#[command(name = "xno-gate", version, about = "Check XNO payments gating a protected resource")]
struct Cli {
    /// RPC node or proxy url (see https://docs.nano.org/integration-guides/#public-apis)
    #[arg(long)]
    node: String,

    /// Lock-state cache database path; without it every check hits the node
    #[arg(long)]
    cache_db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// When was the last time the account received at least this much?
    BeenPaid {
        /// XNO account (public address) to check
        account: String,

        /// How many XNO?
        xno: u128,
    },

    /// Total receivable (pending) raw for the account
    Receivable {
        /// XNO account (public address) to check
        account: String,
    },

    /// Evaluate unlock keys and report whether the gate is open
    Check {
        /// Unlock rule ACCOUNT:XNO:TIMEOUT_SECS[:receivable]; repeatable
        #[arg(long = "key", required = true)]
        keys: Vec<String>,
    },
}

/// An unlock rule parsed from ACCOUNT:XNO:TIMEOUT_SECS[:receivable].
struct KeyRule {
    account: String,
    amount: u128,
    timeout_secs: i64,
    count_receivable: bool,
}

fn parse_key(rule: &str) -> Result<KeyRule> {
    let parts: Vec<&str> = rule.split(':').collect();
    let (account, xno, timeout_secs, receivable) = match parts.as_slice() {
        [account, xno, timeout] => (account, xno, timeout, false),
        [account, xno, timeout, "receivable"] => (account, xno, timeout, true),
        _ => anyhow::bail!(
            "Bad key '{}'. Expected ACCOUNT:XNO:TIMEOUT_SECS[:receivable]",
            rule
        ),
    };

    let xno: u128 = xno
        .parse()
        .map_err(|_| anyhow::anyhow!("Bad XNO amount in key '{}'", rule))?;
    let timeout_secs: i64 = timeout_secs
        .parse()
        .map_err(|_| anyhow::anyhow!("Bad timeout in key '{}'", rule))?;

    Ok(KeyRule {
        account: account.to_string(),
        amount: to_raw(xno),
        timeout_secs,
        count_receivable: receivable,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut ledger = RpcLedger::new(&cli.node);
    if let Some(path) = cli.cache_db.as_deref() {
        ledger.set_store(LockStore::open(Some(path))?);
    }

    match cli.command {
        Commands::BeenPaid { account, xno } => cmd_been_paid(ledger, &account, xno).await,
        Commands::Receivable { account } => cmd_receivable(ledger, &account).await,
        Commands::Check { keys } => cmd_check(ledger, &keys).await,
    }
}

async fn cmd_been_paid(ledger: RpcLedger, account: &str, xno: u128) -> Result<()> {
    let gate = Gate::new(ledger);

    match gate.been_paid(account, to_raw(xno)).await? {
        Some(when) => println!("{}", when.to_rfc3339()),
        None => println!("Never"),
    }

    Ok(())
}

async fn cmd_receivable(ledger: RpcLedger, account: &str) -> Result<()> {
    let gate = Gate::new(ledger);
    let total = gate.total_receivable(account).await?;

    println!("{} raw", total);
    Ok(())
}

async fn cmd_check(ledger: RpcLedger, keys: &[String]) -> Result<()> {
    let mut gate = Gate::new(ledger);

    for rule in keys {
        let key = parse_key(rule)?;
        gate.add_key(key.account, key.amount, key.timeout_secs, key.count_receivable);
    }

    match gate.unlocked().await? {
        Some(until) => println!("unlocked until {}", until.to_rfc3339()),
        None => println!("locked"),
    }

    Ok(())
}
