//! # OCS Dev Ledger
//!
//! Runs the in-memory [`CommitmentLedger`] behind its HTTP RPC. State is
//! lost on exit; this is a development stand-in for the on-chain account.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ocs_chain::{rpc, CommitmentLedger};

#[derive(Parser)]
#[command(version, about = "OCS development commitment ledger")]
struct Cli {
    /// Address the RPC listens on
    #[arg(long, env = "OCS_LEDGER_BIND", default_value = "127.0.0.1:8545")]
    bind: SocketAddr,

    /// tracing filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let ledger = Arc::new(CommitmentLedger::new());
    let app = rpc::router(ledger);

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;
    info!("ledger listening on {}", cli.bind);
    axum::serve(listener, app).await.context("ledger server stopped")?;
    Ok(())
}
