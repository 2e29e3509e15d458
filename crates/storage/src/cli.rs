//! # OCS Authority CLI Module
//!
//! Flag parsing, config resolution and the server entry point.
//!
//! Config precedence, lowest first: built-in defaults, `--config` TOML
//! file, `OCS_*` environment variables, command-line flags.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ocs_chain::HttpLedgerClient;
use ocs_common::config::{load_from_file, AuthorityConfig};
use ocs_storage::{server, FileStateStore, SnapshotCollector, StorageAuthority};

#[derive(Parser, Debug)]
#[command(version, about = "OCS storage authority")]
pub struct Cli {
    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// HTTP bind address
    #[arg(long)]
    pub bind: Option<String>,

    /// State document path
    #[arg(long)]
    pub state_path: Option<PathBuf>,

    /// Largest tree height accepted by store
    #[arg(long)]
    pub max_height: Option<u8>,

    /// Ledger RPC base URL; enables snapshot GC
    #[arg(long)]
    pub ledger_url: Option<String>,

    /// Seconds between GC sweeps
    #[arg(long)]
    pub gc_interval_secs: Option<u64>,

    /// tracing filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn resolve_config(&self) -> Result<AuthorityConfig> {
        self.resolve_config_with(|key| std::env::var(key).ok())
    }

    /// Defaults, then file, then `lookup` as the environment, then flags.
    pub fn resolve_config_with<F>(&self, lookup: F) -> Result<AuthorityConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match &self.config {
            Some(path) => load_from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => AuthorityConfig::default(),
        };
        cfg.apply_overrides(lookup)?;
        if let Some(v) = &self.bind {
            cfg.bind_addr = v.clone();
        }
        if let Some(v) = &self.state_path {
            cfg.state_path = v.clone();
        }
        if let Some(v) = self.max_height {
            cfg.max_height = v;
        }
        if let Some(v) = &self.ledger_url {
            cfg.ledger_url = Some(v.clone());
        }
        if let Some(v) = self.gc_interval_secs {
            cfg.gc_interval_secs = v;
        }
        Ok(cfg)
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(cfg: AuthorityConfig) -> Result<()> {
    let addr: SocketAddr = cfg
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {}", cfg.bind_addr))?;

    let state = Arc::new(FileStateStore::new(&cfg.state_path));
    let authority = Arc::new(
        StorageAuthority::open(state, cfg.max_height)
            .with_context(|| format!("opening state {}", cfg.state_path.display()))?,
    );

    let gc_task = match &cfg.ledger_url {
        Some(url) => {
            let ledger = Arc::new(HttpLedgerClient::new(url.clone())?);
            let collector = Arc::new(SnapshotCollector::new(authority.clone(), ledger));
            info!("snapshot GC every {}s against {}", cfg.gc_interval_secs, url);
            Some(collector.spawn(Duration::from_secs(cfg.gc_interval_secs.max(1))))
        }
        None => {
            info!("no ledger configured, snapshot GC disabled");
            None
        }
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("authority listening on {}", addr);

    axum::serve(listener, server::router(authority))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("server stopped")?;

    if let Some(task) = gc_task {
        task.abort();
    }
    Ok(())
}

/// Entry point; returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let cfg = match cli.resolve_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("configuration error: {:#}", e);
            return 2;
        }
    };

    match serve(cfg).await {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    }
}
