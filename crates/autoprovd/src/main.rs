//! autoprovd — the auto-provisioning daemon.
//!
//! Single binary that assembles the whole demand pipeline:
//! - Count store (redb) and cache mirror
//! - Count generator (sharded counters + export loop)
//! - Region aggregator (interval evaluation + fast path)
//! - Cluster autoscale on alerts
//! - REST API
//!
//! # Usage
//!
//! ```text
//! autoprovd standalone --config /etc/autoprov.toml --port 8450
//! autoprovd print-config > autoprov.toml
//! ```

mod standalone;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use autoprov_core::AutoProvConfig;

#[derive(Parser)]
#[command(name = "autoprovd", about = "Auto-provisioning daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every subsystem in one process.
    Standalone {
        /// TOML config file. Flags override its values.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Aggregator and export interval in seconds.
        #[arg(long)]
        interval: Option<f64>,

        /// Aggregator offset in seconds.
        #[arg(long)]
        offset: Option<f64>,

        /// Name this node reports counts under.
        #[arg(long)]
        node_name: Option<String>,
    },
    /// Print the default configuration as TOML.
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,autoprovd=debug,autoprov_aggr=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            config,
            port,
            data_dir,
            interval,
            offset,
            node_name,
        } => {
            let mut cfg = match config {
                Some(path) => AutoProvConfig::from_file(&path)?,
                None => AutoProvConfig::default(),
            };
            if let Some(port) = port {
                cfg.api_port = port;
            }
            if let Some(dir) = data_dir {
                cfg.data_dir = dir;
            }
            if let Some(interval) = interval {
                cfg.aggregator.interval_sec = interval;
                cfg.stats.interval_sec = interval;
            }
            if let Some(offset) = offset {
                cfg.aggregator.offset_sec = offset;
            }
            if let Some(name) = node_name {
                cfg.node_name = name;
            }
            cfg.validate()?;
            standalone::run_standalone(cfg).await
        }
        Command::PrintConfig => {
            print!("{}", AutoProvConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}
