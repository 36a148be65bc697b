//! Rollup-wide performance counters, recorded under a single lock (grounds
//! on the source system's `RollupPerformanceMetrics`; the quantum-energy and
//! chain-identity fields there don't correspond to anything this crate
//! actually measures and are left out).

use std::sync::Mutex;
use std::time::Duration;

/// Point-in-time snapshot of [`crate::BatchProcessor`] throughput.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metrics {
    pub tx_throughput: f64,
    pub total_transactions: u64,
    pub pending_transactions: usize,
    pub avg_tx_latency: f64,
    pub success_rate: f64,
    pub proof_generation_time: f64,
    pub verification_time: f64,
    pub active_witnesses: usize,
    pub block_height: u64,
}

#[derive(Default)]
pub(crate) struct MetricsInner {
    total_transactions: u64,
    successful_transactions: u64,
    total_latency_secs: f64,
    proof_generation_time: f64,
    verification_time: f64,
    active_witnesses: usize,
    block_height: u64,
}

impl MetricsInner {
    pub(crate) fn record_batch(
        &mut self,
        transaction_count: usize,
        successes: usize,
        wall_clock: Duration,
        proof_generation: Duration,
    ) {
        self.total_transactions += transaction_count as u64;
        self.successful_transactions += successes as u64;
        self.total_latency_secs += wall_clock.as_secs_f64();
        self.proof_generation_time = proof_generation.as_secs_f64();
        self.block_height += 1;
    }

    pub(crate) fn record_verification(&mut self, verification: Duration) {
        self.verification_time = verification.as_secs_f64();
    }

    pub(crate) fn set_active_witnesses(&mut self, count: usize) {
        self.active_witnesses = count;
    }

    pub(crate) fn snapshot(&self, pending_transactions: usize) -> Metrics {
        let tx_throughput = if self.total_latency_secs > 0.0 {
            self.total_transactions as f64 / self.total_latency_secs
        } else {
            0.0
        };
        let avg_tx_latency = if self.total_transactions > 0 {
            self.total_latency_secs / self.total_transactions as f64
        } else {
            0.0
        };
        let success_rate = if self.total_transactions > 0 {
            self.successful_transactions as f64 / self.total_transactions as f64
        } else {
            0.0
        };

        Metrics {
            tx_throughput,
            total_transactions: self.total_transactions,
            pending_transactions,
            avg_tx_latency,
            success_rate,
            proof_generation_time: self.proof_generation_time,
            verification_time: self.verification_time,
            active_witnesses: self.active_witnesses,
            block_height: self.block_height,
        }
    }
}

pub(crate) fn lock(m: &Mutex<MetricsInner>) -> std::sync::MutexGuard<'_, MetricsInner> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
