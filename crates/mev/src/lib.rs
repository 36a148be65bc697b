//! Fair transaction ordering, commitment hashing, and sandwich/frontrunning
//! detection (spec component C8).

use std::sync::RwLock;

use sha2::{Digest, Sha256};

use quids_common::Transaction;

const FRONTRUN_GAS_PRICE_RATIO: f64 = 1.5;
const FRONTRUN_TIMESTAMP_PROXIMITY: u64 = 1_000;

/// Commitment to a fixed transaction ordering, binding the batch hash to
/// the exact sequence so reordering after the fact is detectable.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderingCommitment {
    pub batch_hash: [u8; 32],
    pub transactions: Vec<Transaction>,
    pub timestamp: u64,
}

#[derive(Default)]
pub struct MEVOrderingEngine {
    pending: RwLock<Vec<Transaction>>,
}

impl MEVOrderingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_transaction(&self, tx: Transaction) {
        let mut guard = match self.pending.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(tx);
    }

    /// Returns pending transactions sorted by estimated profit, descending.
    /// Ties keep their relative order (`sort_by` is stable).
    pub fn get_optimal_ordering(&self) -> Vec<Transaction> {
        let guard = match self.pending.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut ordered = guard.clone();
        ordered.sort_by(|a, b| estimate_profit(b).cmp(&estimate_profit(a)));
        ordered
    }

    pub fn create_ordering_commitment(
        &self,
        transactions: &[Transaction],
        timestamp: u64,
    ) -> OrderingCommitment {
        OrderingCommitment {
            batch_hash: compute_fairness_hash(transactions),
            transactions: transactions.to_vec(),
            timestamp,
        }
    }
}

fn estimate_profit(tx: &Transaction) -> u64 {
    tx.amount
}

/// SHA-256 over the canonical concatenation of each transaction's
/// sender/recipient/amount/nonce, in order. Any reordering of `transactions`
/// changes the hash.
pub fn compute_fairness_hash(transactions: &[Transaction]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for tx in transactions {
        hasher.update(tx.sender.as_bytes());
        hasher.update(tx.recipient.as_bytes());
        hasher.update(tx.amount.to_le_bytes());
        hasher.update(tx.nonce.to_le_bytes());
    }
    hasher.finalize().into()
}

/// A tx1→tx2→tx3 pattern where tx1 and tx3 share a sender and both tx2 and
/// tx3 target the same recipient as the would-be victim tx2 — the classic
/// buy-victim-sell sandwich.
pub fn detect_sandwich_attack(transactions: &[Transaction]) -> bool {
    if transactions.len() < 3 {
        return false;
    }
    transactions.windows(3).any(|w| {
        let (tx1, tx2, tx3) = (&w[0], &w[1], &w[2]);
        tx1.sender == tx3.sender && tx1.recipient == tx2.recipient && tx2.recipient == tx3.recipient
    })
}

/// A consecutive pair targeting the same recipient where the earlier
/// transaction pays materially more gas and lands within a narrow
/// timestamp window of the later one.
pub fn detect_frontrunning(transactions: &[Transaction]) -> bool {
    transactions.windows(2).any(|w| {
        let (tx1, tx2) = (&w[0], &w[1]);
        tx1.recipient == tx2.recipient
            && (tx1.gas_price as f64) > (tx2.gas_price as f64) * FRONTRUN_GAS_PRICE_RATIO
            && tx1.timestamp.abs_diff(tx2.timestamp) < FRONTRUN_TIMESTAMP_PROXIMITY
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn tx(sender: &str, recipient: &str, amount: u64, gas_price: u64, timestamp: u64) -> Transaction {
        Transaction::new(
            sender.to_string(),
            recipient.to_string(),
            amount,
            1,
            21_000,
            gas_price,
            timestamp,
        )
    }

    #[test]
    fn optimal_ordering_sorts_by_amount_descending() {
        let engine = MEVOrderingEngine::new();
        let tx1 = tx("a", "x", 50, 1, 1);
        let tx2 = tx("b", "x", 500, 1, 2);
        let tx3 = tx("c", "x", 100, 1, 3);
        engine.add_transaction(tx1.clone());
        engine.add_transaction(tx2.clone());
        engine.add_transaction(tx3.clone());

        let ordered = engine.get_optimal_ordering();
        assert_eq!(ordered, vec![tx2, tx3, tx1]);
    }

    #[test]
    fn fairness_hash_changes_when_two_transactions_swap() {
        let tx1 = tx("a", "x", 50, 1, 1);
        let tx2 = tx("b", "x", 500, 1, 2);

        let hash_ab = compute_fairness_hash(&[tx1.clone(), tx2.clone()]);
        let hash_ba = compute_fairness_hash(&[tx2, tx1]);
        assert_ne!(hash_ab, hash_ba);
    }

    #[test]
    fn sandwich_pattern_is_detected() {
        let victim = tx("victim", "pool", 100, 1, 10);
        let attacker_buy = tx("attacker", "pool", 100, 1, 9);
        let attacker_sell = tx("attacker", "pool", 100, 1, 11);
        assert!(detect_sandwich_attack(&[attacker_buy, victim, attacker_sell]));
    }

    #[test]
    fn non_sandwich_sequence_is_not_flagged() {
        let a = tx("a", "pool", 100, 1, 1);
        let b = tx("b", "other", 100, 1, 2);
        let c = tx("c", "pool", 100, 1, 3);
        assert!(!detect_sandwich_attack(&[a, b, c]));
    }

    #[test]
    fn frontrunning_pattern_is_detected() {
        let tx1 = tx("attacker", "pool", 100, 100, 1_000);
        let tx2 = tx("victim", "pool", 100, 10, 1_010);
        assert!(detect_frontrunning(&[tx1, tx2]));
    }

    #[test]
    fn distant_timestamps_are_not_flagged_as_frontrunning() {
        let tx1 = tx("attacker", "pool", 100, 100, 1_000);
        let tx2 = tx("victim", "pool", 100, 10, 50_000);
        assert!(!detect_frontrunning(&[tx1, tx2]));
    }
}
