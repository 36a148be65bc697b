use std::collections::HashMap;

use quids_common::{QuidsError, Transaction};
use quids_state::StateManager;
use quids_zk::{VerificationResult, ZKProof, ZKProofEngine};

use crate::commitment::encode_state_diff;

/// Binds `(pre_root, post_root, transactions)` behind a ZK proof of the
/// diff (spec component C5).
#[derive(Clone, Debug, PartialEq)]
pub struct StateTransitionProof {
    pub pre_state_root: [u8; 32],
    pub post_state_root: [u8; 32],
    pub transactions: Vec<Transaction>,
    pub proof_blob: ZKProof,
}

pub struct StateTransitionProver<'a> {
    zk: &'a ZKProofEngine,
}

impl<'a> StateTransitionProver<'a> {
    pub fn new(zk: &'a ZKProofEngine) -> Self {
        Self { zk }
    }

    /// Applies `batch` to a clone of `state`, computes pre/post roots, and
    /// bundles a ZK proof of the diff.
    pub fn generate(
        &self,
        batch: &[Transaction],
        state: &StateManager,
    ) -> Result<StateTransitionProof, QuidsError> {
        let pre_state_root = state.state_root();
        let working = state.clone();
        for tx in batch {
            working.apply_transaction(tx)?;
        }
        let post_state_root = working.state_root();

        let commitment = encode_state_diff(&pre_state_root, &post_state_root)?;
        let proof_blob = self.zk.generate_proof(&commitment)?;

        Ok(StateTransitionProof {
            pre_state_root,
            post_state_root,
            transactions: batch.to_vec(),
            proof_blob,
        })
    }

    /// Replays `transactions` on `pre`, checks the resulting root matches
    /// `post_state_root`, verifies the per-sender nonce sequence, and
    /// verifies the embedded ZK proof.
    pub fn verify(
        &self,
        pre: &StateManager,
        post_state_root: [u8; 32],
        transactions: &[Transaction],
        proof_blob: &ZKProof,
    ) -> Result<bool, QuidsError> {
        if !verify_transaction_sequence(pre, transactions) {
            return Ok(false);
        }

        let working = pre.clone();
        for tx in transactions {
            if working.apply_transaction(tx).is_err() {
                return Ok(false);
            }
        }
        if working.state_root() != post_state_root {
            return Ok(false);
        }

        let commitment = encode_state_diff(&pre.state_root(), &post_state_root)?;
        let details = self.zk.verify_proof(proof_blob, &commitment);
        Ok(details.result == VerificationResult::Valid)
    }
}

/// Per-sender nonces must increase by exactly one with no gaps beyond the
/// account's starting nonce (spec §4.5).
pub fn verify_transaction_sequence(pre: &StateManager, transactions: &[Transaction]) -> bool {
    let mut expected: HashMap<String, u64> = HashMap::new();
    for tx in transactions {
        let next = *expected
            .entry(tx.sender.clone())
            .or_insert_with(|| pre.get_account(&tx.sender).nonce)
            + 1;
        if tx.nonce != next {
            return false;
        }
        expected.insert(tx.sender.clone(), next);
    }
    true
}
