mod cli;
mod config;
mod logging;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tracing::{error, info};

use cli::{Cli, Command};
use quids_common::{Ed25519Signer, Transaction};
use quids_provers::EmergencyExitProver;
use quids_rollup::{BatchProcessor, FileKvStore, InMemoryKvStore, KvStore, NullBroadcaster, RollupConfig};
use quids_state::StateManager;
use quids_zk::ZKProofEngine;

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

fn main() {
    let cli = Cli::parse();
    logging::init_tracing(cli.opts.log_level);

    let code = match run(cli.command) {
        Ok(()) => 0,
        Err(CliError::Config(msg)) => {
            error!("configuration error: {msg}");
            2
        }
        Err(CliError::Other(err)) => {
            error!("fatal: {err:#}");
            1
        }
    };
    std::process::exit(code);
}

fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Serve { config } => serve(config),
        Command::SubmitTx {
            from,
            to,
            amount,
            nonce,
            gas_limit,
            gas_price,
            key,
        } => submit_tx(from, to, amount, nonce, gas_limit, gas_price, key),
        Command::Exit { address, config } => exit(address, config),
        Command::Inspect { config } => inspect(config),
    }
}

/// Opens the store a `RollupConfig` points at: a file-backed store rooted at
/// `data_dir` if configured, otherwise an in-memory store that does not
/// survive this process (and so is invisible to a later `exit` invocation).
fn open_store(config: &RollupConfig) -> Result<Arc<dyn KvStore>, CliError> {
    match &config.data_dir {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|e| {
                CliError::Other(anyhow::anyhow!("creating data directory {}: {e}", dir.display()))
            })?;
            let store = FileKvStore::open(dir.join("store.json")).map_err(|e| CliError::Other(e.into()))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryKvStore::new())),
    }
}

fn serve(config_path: Option<std::path::PathBuf>) -> Result<(), CliError> {
    let rollup_config = config::load_rollup_config(config_path.as_deref())
        .map_err(|e| CliError::Config(e.to_string()))?;
    let store = open_store(&rollup_config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Other(e.into()))?;

    runtime.block_on(async move {
        let processor = Arc::new(
            BatchProcessor::new(rollup_config.clone(), store, Arc::new(NullBroadcaster::default()))
                .map_err(|e| CliError::Other(e.into()))?,
        );

        info!("quids node started, max_batch_size={}, max_wait_time={:?}",
            rollup_config.max_batch_size, rollup_config.max_wait_time);
        info!("transaction ingress is wired by the embedding application; this process idles until shutdown");

        let mut ticker = tokio::time::interval(rollup_config.max_wait_time.max(Duration::from_millis(100)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(batch) = processor.produce_batch().map_err(|e| CliError::Other(e.into()))? {
                        info!(sequence = batch.sequence, witnesses = batch.witnesses.len(), "cut a batch");
                    }
                    processor.expire_stale_batch();
                    let metrics = processor.metrics();
                    info!(?metrics, "heartbeat");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    })
}

#[allow(clippy::too_many_arguments)]
fn submit_tx(
    from: String,
    to: String,
    amount: u64,
    nonce: u64,
    gas_limit: u64,
    gas_price: u64,
    key_path: std::path::PathBuf,
) -> Result<(), CliError> {
    let key_bytes = fs::read(&key_path)
        .map_err(|e| CliError::Other(anyhow::anyhow!("reading key file {}: {e}", key_path.display())))?;
    let signer = Ed25519Signer::from_bytes(&key_bytes).map_err(|e| CliError::Other(e.into()))?;

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let mut tx = Transaction::new(from, to, amount, nonce, gas_limit, gas_price, timestamp);
    tx.sign(&signer).map_err(|e| CliError::Other(e.into()))?;

    println!("{}", hex::encode(tx.serialize()));
    Ok(())
}

/// Generates and verifies an emergency-exit proof for `address` against the
/// rollup's own last persisted state — never against a caller-supplied
/// balance, which would let the proof attest to whatever the caller claims
/// rather than what the rollup actually recorded.
fn exit(address: String, config_path: Option<std::path::PathBuf>) -> Result<(), CliError> {
    let rollup_config = config::load_rollup_config(config_path.as_deref())
        .map_err(|e| CliError::Config(e.to_string()))?;
    if rollup_config.data_dir.is_none() {
        return Err(CliError::Config(
            "exit requires a config with data_dir set to the running node's persisted store".to_string(),
        ));
    }
    let store = open_store(&rollup_config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Other(e.into()))?;

    runtime.block_on(async move {
        let state = reconstruct_state(store.as_ref()).await?;

        let zk = ZKProofEngine::default();
        let prover = EmergencyExitProver::new(&zk);
        let proof = prover
            .generate_exit_proof(&address, &state)
            .map_err(|e| CliError::Other(e.into()))?;

        println!("exit proof for {address}: balance={}, state_root={}", proof.balance, hex::encode(proof.state_root));
        let verified = prover.verify_exit_proof(&proof, &state);
        println!("proof verifies: {verified}");

        prover.process_emergency_exit(&proof, &state);
        println!("post-exit balance: {}", state.get_account(&address).balance);
        Ok(())
    })
}

/// Rebuilds a `StateManager` from every `account:<address>` record a store
/// holds. The rollup never persists the full ledger under one key, so this
/// is the only way a one-shot invocation can see real account balances.
async fn reconstruct_state(store: &dyn KvStore) -> Result<StateManager, CliError> {
    let state = StateManager::new();
    for (key, value) in store.snapshot().await.map_err(|e| CliError::Other(e.into()))? {
        let Some(stored_address) = key
            .strip_prefix(b"account:")
            .and_then(|rest| std::str::from_utf8(rest).ok())
        else {
            continue;
        };
        let account: quids_common::Account = serde_json::from_slice(&value)
            .map_err(|e| CliError::Other(anyhow::anyhow!("decoding persisted account {stored_address}: {e}")))?;
        state.add_account(stored_address.to_string(), account);
    }
    Ok(state)
}

fn inspect(config_path: Option<std::path::PathBuf>) -> Result<(), CliError> {
    let rollup_config = config::load_rollup_config(config_path.as_deref())
        .map_err(|e| CliError::Config(e.to_string()))?;

    println!("max_batch_size = {}", rollup_config.max_batch_size);
    println!("min_batch_size = {}", rollup_config.min_batch_size);
    println!("max_wait_time = {:?}", rollup_config.max_wait_time);
    println!("ingress_capacity = {}", rollup_config.ingress_capacity);
    println!("witness_count = {}", rollup_config.consensus.witness_count);
    println!("consensus_threshold = {}", rollup_config.consensus.consensus_threshold);
    Ok(())
}
