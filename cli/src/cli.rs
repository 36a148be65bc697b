use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

#[derive(Parser)]
#[command(name = "quids", author, version, about = "Quids L2 rollup node")]
pub struct Cli {
    #[command(flatten)]
    pub opts: Options,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Parser, Debug, Clone)]
pub struct Options {
    #[arg(
        long = "log-level",
        value_name = "LEVEL",
        default_value_t = Level::INFO,
        env = "QUIDS_LOG_LEVEL",
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub log_level: Level,
}

#[derive(Subcommand)]
pub enum Command {
    /// Runs the rollup node: admits transactions, cuts batches, and drives
    /// them through execution, proving, and consensus until a shutdown
    /// signal arrives.
    Serve {
        #[arg(long, value_name = "PATH", env = "QUIDS_CONFIG", help = "TOML config file")]
        config: Option<PathBuf>,
    },
    /// Builds and signs a transaction, printing its hex-encoded wire
    /// encoding to stdout.
    SubmitTx {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        nonce: u64,
        #[arg(long, default_value_t = quids_common::MIN_GAS_LIMIT)]
        gas_limit: u64,
        #[arg(long, default_value_t = 1)]
        gas_price: u64,
        #[arg(long, value_name = "PATH", help = "32-byte raw Ed25519 private key")]
        key: PathBuf,
    },
    /// Generates and verifies an emergency-exit proof for `address` against
    /// the rollup's own persisted state.
    Exit {
        #[arg(long)]
        address: String,
        #[arg(long, value_name = "PATH", env = "QUIDS_CONFIG", help = "TOML config file naming the node's data_dir")]
        config: Option<PathBuf>,
    },
    /// Prints the effective configuration a `serve` invocation would use.
    Inspect {
        #[arg(long, value_name = "PATH", env = "QUIDS_CONFIG")]
        config: Option<PathBuf>,
    },
}
