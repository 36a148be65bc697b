//! Account ledger and state-root computation (spec component C2).
//!
//! All external methods serialize on a single lock; fine-grained per-account
//! locking during parallel execution is the `quids-executor` crate's concern
//! (spec §4.2/§5).

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use quids_common::{Account, Address, QuidsError, Transaction};

const STATE_ROOT_CONTEXT: &[u8] = b"QUIDS_STATE_ROOT_V1";

#[derive(Debug, Default)]
struct Inner {
    accounts: BTreeMap<Address, Account>,
    history: BTreeMap<Address, Vec<Transaction>>,
}

/// Account mapping plus per-address transaction history.
///
/// Cheaply clonable: a clone is an independent logical snapshot that shares
/// no mutable state with its source (mirrors the source's copy-constructible
/// `StateManager`, but without the shared lock — `Arc<RwLock<_>>` is cloned
/// by value into a fresh lock, not aliased).
#[derive(Debug)]
pub struct StateManager {
    inner: Arc<RwLock<Inner>>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for StateManager {
    fn clone(&self) -> Self {
        let guard = read_lock(&self.inner);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                accounts: guard.accounts.clone(),
                history: guard.history.clone(),
            })),
        }
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Returns a zeroed default account if `address` is unknown.
    pub fn get_account(&self, address: &str) -> Account {
        let guard = read_lock(&self.inner);
        guard
            .accounts
            .get(address)
            .cloned()
            .unwrap_or_else(|| Account::new(address.to_string()))
    }

    /// Inserts or replaces the account at `address`.
    pub fn add_account(&self, address: Address, account: Account) {
        let mut guard = write_lock(&self.inner);
        guard.accounts.insert(address, account);
    }

    pub fn get_account_history(&self, address: &str) -> Vec<Transaction> {
        let guard = read_lock(&self.inner);
        guard.history.get(address).cloned().unwrap_or_default()
    }

    pub fn get_all_accounts(&self) -> BTreeMap<Address, Account> {
        read_lock(&self.inner).accounts.clone()
    }

    /// Atomically applies `tx`: requires `tx.nonce == sender.nonce + 1` and
    /// `sender.balance >= tx.total_cost()`. On success, debits the sender by
    /// `total_cost()`, credits the recipient by `amount`, bumps the sender's
    /// nonce, and records `tx` in both addresses' history. State is
    /// unchanged on any precondition failure.
    pub fn apply_transaction(&self, tx: &Transaction) -> Result<(), QuidsError> {
        let mut guard = write_lock(&self.inner);

        let sender = guard
            .accounts
            .get(&tx.sender)
            .cloned()
            .unwrap_or_else(|| Account::new(tx.sender.clone()));

        if tx.nonce != sender.nonce + 1 {
            return Err(QuidsError::state_rule(format!(
                "nonce mismatch: expected {}, got {}",
                sender.nonce + 1,
                tx.nonce
            )));
        }

        let cost = tx.total_cost();
        if sender.balance < cost {
            return Err(QuidsError::state_rule(format!(
                "insufficient balance: have {}, need {}",
                sender.balance, cost
            )));
        }

        let mut recipient = guard
            .accounts
            .get(&tx.recipient)
            .cloned()
            .unwrap_or_else(|| Account::new(tx.recipient.clone()));

        let mut sender = sender;
        sender.balance -= cost;
        sender.nonce += 1;
        recipient.balance = recipient.balance.saturating_add(tx.amount);

        guard.accounts.insert(tx.sender.clone(), sender);
        guard.accounts.insert(tx.recipient.clone(), recipient);
        guard
            .history
            .entry(tx.sender.clone())
            .or_default()
            .push(tx.clone());
        guard
            .history
            .entry(tx.recipient.clone())
            .or_default()
            .push(tx.clone());

        Ok(())
    }

    /// 32-byte digest over the sorted address→account serialization.
    pub fn state_root(&self) -> [u8; 32] {
        let guard = read_lock(&self.inner);
        let mut hasher = blake3::Hasher::new();
        hasher.update(STATE_ROOT_CONTEXT);
        for (address, account) in &guard.accounts {
            hasher.update(address.as_bytes());
            hasher.update(&account.serialize());
        }
        *hasher.finalize().as_bytes()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

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

    fn state_with_alice(balance: u64) -> StateManager {
        let state = StateManager::new();
        let mut alice = Account::new("alice".to_string());
        alice.balance = balance;
        state.add_account("alice".to_string(), alice);
        state
    }

    #[test]
    fn apply_transaction_debits_sender_credits_recipient() {
        let state = state_with_alice(1_000);
        state.apply_transaction(&tx("alice", "bob", 100, 1)).expect("apply");

        let alice = state.get_account("alice");
        let bob = state.get_account("bob");
        assert_eq!(alice.balance, 1_000 - 100 - 21_000);
        assert_eq!(alice.nonce, 1);
        assert_eq!(bob.balance, 100);
    }

    #[test]
    fn wrong_nonce_is_rejected_and_state_is_unchanged() {
        let state = state_with_alice(1_000);
        let root_before = state.state_root();
        let err = state.apply_transaction(&tx("alice", "bob", 100, 2)).unwrap_err();
        assert!(matches!(err, QuidsError::StateRule(_)));
        assert_eq!(state.state_root(), root_before);
    }

    #[test]
    fn insufficient_balance_is_rejected() {
        let state = state_with_alice(10);
        let err = state.apply_transaction(&tx("alice", "bob", 100, 1)).unwrap_err();
        assert!(matches!(err, QuidsError::StateRule(_)));
    }

    #[test]
    fn history_is_recorded_for_both_parties() {
        let state = state_with_alice(1_000);
        state.apply_transaction(&tx("alice", "bob", 100, 1)).expect("apply");
        assert_eq!(state.get_account_history("alice").len(), 1);
        assert_eq!(state.get_account_history("bob").len(), 1);
    }

    #[test]
    fn clone_is_an_independent_snapshot() {
        let state = state_with_alice(1_000);
        let clone = state.clone();
        clone.apply_transaction(&tx("alice", "bob", 100, 1)).expect("apply");

        assert_ne!(clone.state_root(), state.state_root());
        assert_eq!(state.get_account("alice").balance, 1_000);
    }

    #[test]
    fn state_root_is_order_independent_of_insertion() {
        let a = StateManager::new();
        a.add_account("alice".to_string(), Account::new("alice".to_string()));
        a.add_account("bob".to_string(), Account::new("bob".to_string()));

        let b = StateManager::new();
        b.add_account("bob".to_string(), Account::new("bob".to_string()));
        b.add_account("alice".to_string(), Account::new("alice".to_string()));

        assert_eq!(a.state_root(), b.state_root());
    }
}
