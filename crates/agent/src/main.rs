//! # OCS Agent CLI
//!
//! ## Commands
//!
//! - `public-key`: authority signing key for an identity
//! - `fetch`: snapshot items for a root
//! - `deploy`: create the ledger account, keyed to the authority's key
//! - `status`: confirmed `(root, version)` on the ledger
//! - `sync`: one counter increment cycle, retried on lost races
//!
//! ## Environment Variables
//!
//! - `OCS_AUTHORITY_URL`: authority base URL (default: http://127.0.0.1:3001)
//! - `OCS_LEDGER_URL`: ledger RPC base URL (default: http://127.0.0.1:8545)

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use ocs_agent::{increment_leaf, AuthorityApi, RetryConfig, StorageClient, SyncClient};
use ocs_chain::HttpLedgerClient;
use ocs_common::{DatasetId, Hash32, LeafIndex};

#[derive(Parser)]
#[command(version, about = "OCS Agent CLI")]
struct Cli {
    /// Storage authority base URL
    #[arg(long, global = true, env = "OCS_AUTHORITY_URL", default_value = "http://127.0.0.1:3001")]
    authority: String,

    /// Ledger RPC base URL
    #[arg(long, global = true, env = "OCS_LEDGER_URL", default_value = "http://127.0.0.1:8545")]
    ledger: String,

    /// tracing filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the authority's public key (base58)
    PublicKey {
        #[arg(long)]
        identity: DatasetId,
    },

    /// Print the items stored for a root
    Fetch {
        #[arg(long)]
        identity: DatasetId,
        #[arg(long)]
        root: Hash32,
    },

    /// Create the ledger account with the authority's current key
    Deploy {
        #[arg(long)]
        identity: DatasetId,
        #[arg(long, default_value_t = 8)]
        height: u8,
        /// Leaf policy: "any" or "increment-by-one"
        #[arg(long)]
        policy: Option<String>,
    },

    /// Print the ledger's confirmed commitment
    Status {
        #[arg(long)]
        identity: DatasetId,
    },

    /// Increment one counter leaf and commit it
    Sync {
        #[arg(long)]
        identity: DatasetId,
        #[arg(long, default_value_t = 8)]
        height: u8,
        #[arg(long)]
        index: LeafIndex,
        /// Attempts before giving up on a contended identity
        #[arg(long, default_value_t = 5)]
        attempts: u32,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let authority = StorageClient::new(&cli.authority)?;
    let ledger = HttpLedgerClient::new(&cli.ledger)?;

    match cli.cmd {
        Commands::PublicKey { identity } => {
            let key = authority.public_key(&identity).await?;
            println!("{}", key);
        }
        Commands::Fetch { identity, root } => {
            let items = authority.fetch(&identity, &root).await?;
            println!("{}", serde_json::to_string_pretty(&json!({ "items": items }))?);
        }
        Commands::Deploy { identity, height, policy } => {
            let key = authority
                .public_key(&identity)
                .await
                .context("reading authority key")?;
            let record = ledger
                .deploy(&identity, height, key, policy.as_deref())
                .await?;
            println!("deployed {} at {}", identity, record);
        }
        Commands::Status { identity } => {
            let record = ledger.read_commitment(&identity).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Sync { identity, height, index, attempts } => {
            let client = SyncClient::new(Arc::new(authority), Arc::new(ledger)).with_retry(
                RetryConfig {
                    max_attempts: attempts,
                    ..RetryConfig::default()
                },
            );
            let outcome = client
                .sync_with_retry(&identity, height, index, &increment_leaf)
                .await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "old": outcome.old,
                    "new": outcome.new,
                    "index": outcome.index,
                    "oldValue": outcome.old_value,
                    "newValue": outcome.new_value,
                }))?
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use ocs_common::config::AuthorityConfig;

    #[test]
    fn test_default_authority_url_matches_authority_bind() {
        let cmd = Cli::command();
        let arg = cmd
            .get_arguments()
            .find(|a| a.get_id() == "authority")
            .expect("authority arg");
        let default = arg
            .get_default_values()
            .first()
            .and_then(|v| v.to_str())
            .expect("default url");
        assert_eq!(default, format!("http://{}", AuthorityConfig::default().bind_addr));
    }
}
