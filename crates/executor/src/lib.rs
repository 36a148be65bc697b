//! Dependency-aware scheduling of transactions and contract calls across a
//! worker pool (spec component C10). The EVM opcode interpreter behind a
//! [`ContractRunner`] is an external collaborator, never implemented here.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::DashMap;
use rayon::prelude::*;

use quids_common::{Address, QuidsError, Transaction};
use quids_state::StateManager;

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub num_worker_threads: usize,
    pub max_parallel_contracts: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            num_worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_parallel_contracts: 100,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ContractCall {
    pub contract_address: Address,
    pub input: Vec<u8>,
    pub gas_limit: u64,
}

/// The opaque interpreter a `ParallelExecutor` dispatches contract calls
/// to. Scheduling and serialization live here; execution semantics don't.
pub trait ContractRunner: Send + Sync {
    fn execute(&self, call: &ContractCall) -> Result<Vec<u8>, QuidsError>;
}

#[derive(Clone, Debug, Default)]
pub struct ExecutorMetrics {
    pub processed_transactions: u64,
    pub failed_transactions: u64,
    pub processed_contracts: u64,
    pub failed_contracts: u64,
    pub avg_transaction_time_micros: f64,
    pub avg_contract_time_micros: f64,
}

#[derive(Default)]
struct MetricsInner {
    processed_transactions: u64,
    failed_transactions: u64,
    processed_contracts: u64,
    failed_contracts: u64,
    avg_transaction_time_micros: f64,
    avg_contract_time_micros: f64,
}

impl MetricsInner {
    fn record_transaction(&mut self, success: bool, elapsed_micros: f64) {
        self.processed_transactions += 1;
        if !success {
            self.failed_transactions += 1;
        }
        self.avg_transaction_time_micros = (self.avg_transaction_time_micros
            * (self.processed_transactions - 1) as f64
            + elapsed_micros)
            / self.processed_transactions as f64;
    }

    fn record_contract(&mut self, success: bool, elapsed_micros: f64) {
        self.processed_contracts += 1;
        if !success {
            self.failed_contracts += 1;
        }
        self.avg_contract_time_micros = (self.avg_contract_time_micros
            * (self.processed_contracts - 1) as f64
            + elapsed_micros)
            / self.processed_contracts as f64;
    }
}

pub struct ParallelExecutor {
    pool: rayon::ThreadPool,
    contract_pool: rayon::ThreadPool,
    account_locks: DashMap<Address, Arc<Mutex<()>>>,
    contract_locks: DashMap<Address, Arc<Mutex<()>>>,
    metrics: Mutex<MetricsInner>,
}

impl ParallelExecutor {
    pub fn new(config: ExecutorConfig) -> Result<Self, QuidsError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_worker_threads.max(1))
            .build()
            .map_err(|e| QuidsError::Fatal(format!("failed to build executor pool: {e}")))?;
        let contract_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_parallel_contracts.max(1))
            .build()
            .map_err(|e| QuidsError::Fatal(format!("failed to build contract pool: {e}")))?;

        Ok(Self {
            pool,
            contract_pool,
            account_locks: DashMap::new(),
            contract_locks: DashMap::new(),
            metrics: Mutex::new(MetricsInner::default()),
        })
    }

    pub fn metrics(&self) -> ExecutorMetrics {
        let guard = lock(&self.metrics);
        ExecutorMetrics {
            processed_transactions: guard.processed_transactions,
            failed_transactions: guard.failed_transactions,
            processed_contracts: guard.processed_contracts,
            failed_contracts: guard.failed_contracts,
            avg_transaction_time_micros: guard.avg_transaction_time_micros,
            avg_contract_time_micros: guard.avg_contract_time_micros,
        }
    }

    /// Groups `transactions` into dependency-free batches (no two
    /// transactions in a batch share a sender or recipient), then applies
    /// each batch to `state` in parallel internally, sequentially across
    /// batches. Account locks are always acquired in address-sorted order,
    /// so no two workers can deadlock against each other.
    pub fn execute_batch(&self, transactions: &[Transaction], state: &StateManager) {
        for batch in create_independent_batches(transactions) {
            self.pool.install(|| {
                batch.par_iter().for_each(|tx| {
                    let started = Instant::now();
                    let ok = self.apply_with_locks(tx, state);
                    let elapsed = started.elapsed().as_micros() as f64;
                    lock(&self.metrics).record_transaction(ok, elapsed);
                });
            });
        }
    }

    fn apply_with_locks(&self, tx: &Transaction, state: &StateManager) -> bool {
        let mut addresses = vec![tx.sender.clone(), tx.recipient.clone()];
        addresses.sort();
        addresses.dedup();

        let guards: Vec<Arc<Mutex<()>>> = addresses
            .iter()
            .map(|addr| {
                self.account_locks
                    .entry(addr.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(())))
                    .clone()
            })
            .collect();
        let _held: Vec<_> = guards.iter().map(|m| lock(m)).collect();

        state.apply_transaction(tx).is_ok()
    }

    /// Dispatches `calls` onto a pool capped at `max_parallel_contracts`
    /// concurrent workers; calls to the same contract address serialize
    /// against each other via a per-address lock.
    pub fn execute_contract_batch(
        &self,
        calls: &[ContractCall],
        runner: &dyn ContractRunner,
    ) -> Vec<Result<Vec<u8>, QuidsError>> {
        self.contract_pool.install(|| {
            calls
                .par_iter()
                .map(|call| {
                    let lock_handle = self
                        .contract_locks
                        .entry(call.contract_address.clone())
                        .or_insert_with(|| Arc::new(Mutex::new(())))
                        .clone();
                    let _held = lock(&lock_handle);

                    let started = Instant::now();
                    let result = runner.execute(call);
                    let elapsed = started.elapsed().as_micros() as f64;
                    lock(&self.metrics).record_contract(result.is_ok(), elapsed);
                    result
                })
                .collect()
        })
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Two transactions are dependent iff they share a sender or recipient.
fn depends(a: &Transaction, b: &Transaction) -> bool {
    a.sender == b.sender
        || a.sender == b.recipient
        || a.recipient == b.sender
        || a.recipient == b.recipient
}

/// First-fit bucketing: walk transactions in order, place each into the
/// first existing batch it doesn't conflict with, else open a new batch.
/// Preserves per-sender order across batches since a sender can appear at
/// most once per batch and batches run in sequence.
fn create_independent_batches(transactions: &[Transaction]) -> Vec<Vec<Transaction>> {
    let mut batches: Vec<Vec<Transaction>> = Vec::new();
    for tx in transactions {
        let target = batches
            .iter_mut()
            .find(|batch| batch.iter().all(|existing| !depends(existing, tx)));
        match target {
            Some(batch) => batch.push(tx.clone()),
            None => batches.push(vec![tx.clone()]),
        }
    }
    batches
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use quids_common::Account;

    fn tx(sender: &str, recipient: &str, amount: u64, nonce: u64) -> Transaction {
        let mut tx = Transaction::new(
            sender.to_string(),
            recipient.to_string(),
            amount,
            nonce,
            21_000,
            1,
            1_000,
        );
        tx.signature = vec![0u8; quids_common::SIGNATURE_LEN];
        tx
    }

    fn funded_state(addresses_and_balances: &[(&str, u64)]) -> StateManager {
        let state = StateManager::new();
        for (addr, balance) in addresses_and_balances {
            let mut account = Account::new(addr.to_string());
            account.balance = *balance;
            state.add_account(addr.to_string(), account);
        }
        state
    }

    #[test]
    fn independent_batches_never_repeat_a_sender_or_recipient() {
        let txs = vec![
            tx("a", "b", 1, 1),
            tx("c", "d", 1, 1),
            tx("a", "e", 2, 2),
        ];
        let batches = create_independent_batches(&txs);
        for batch in &batches {
            for i in 0..batch.len() {
                for j in (i + 1)..batch.len() {
                    assert!(!depends(&batch[i], &batch[j]));
                }
            }
        }
    }

    #[test]
    fn executing_independent_batches_matches_serial_application() {
        let executor = ParallelExecutor::new(ExecutorConfig::default()).expect("executor");
        let parallel_state = funded_state(&[("a", 1_000), ("c", 1_000)]);
        let serial_state = funded_state(&[("a", 1_000), ("c", 1_000)]);

        let txs = vec![tx("a", "b", 100, 1), tx("c", "d", 100, 1)];

        executor.execute_batch(&txs, &parallel_state);
        for t in &txs {
            serial_state.apply_transaction(t).expect("apply");
        }

        assert_eq!(parallel_state.state_root(), serial_state.state_root());
    }

    #[test]
    fn per_sender_order_is_preserved_across_sequential_batches() {
        let executor = ParallelExecutor::new(ExecutorConfig::default()).expect("executor");
        let state = funded_state(&[("a", 1_000)]);

        let txs = vec![tx("a", "b", 100, 1), tx("a", "c", 100, 2)];
        executor.execute_batch(&txs, &state);

        assert_eq!(state.get_account("a").nonce, 2);
        assert_eq!(state.get_account("b").balance, 100);
        assert_eq!(state.get_account("c").balance, 100);
    }

    struct EchoRunner;
    impl ContractRunner for EchoRunner {
        fn execute(&self, call: &ContractCall) -> Result<Vec<u8>, QuidsError> {
            Ok(call.input.clone())
        }
    }

    #[test]
    fn contract_calls_to_distinct_addresses_all_succeed() {
        let executor = ParallelExecutor::new(ExecutorConfig::default()).expect("executor");
        let calls = vec![
            ContractCall { contract_address: "c1".into(), input: vec![1], gas_limit: 21_000 },
            ContractCall { contract_address: "c2".into(), input: vec![2], gas_limit: 21_000 },
        ];
        let results = executor.execute_contract_batch(&calls, &EchoRunner);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_ok()));
    }
}
