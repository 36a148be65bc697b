use quids_common::{QuidsError, Transaction};
use quids_state::StateManager;
use quids_zk::{ZKProof, ZKProofEngine};

use crate::commitment::encode_state_diff;

/// Packages a claimed `(pre, post, txs)` transition plus a ZK proof of the
/// diff so a third party can attest whether the claim is fraudulent
/// (spec component C6).
#[derive(Clone, Debug, PartialEq)]
pub struct InvalidTransitionProof {
    pub pre_state_root: [u8; 32],
    pub post_state_root: [u8; 32],
    pub transactions: Vec<Transaction>,
    pub validity_proof: ZKProof,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FraudVerificationResult {
    pub is_valid: bool,
    pub message: String,
}

pub struct FraudProver<'a> {
    zk: &'a ZKProofEngine,
}

impl<'a> FraudProver<'a> {
    pub fn new(zk: &'a ZKProofEngine) -> Self {
        Self { zk }
    }

    pub fn generate_fraud_proof(
        &self,
        pre: &StateManager,
        post: &StateManager,
        transactions: &[Transaction],
    ) -> Result<InvalidTransitionProof, QuidsError> {
        let pre_state_root = pre.state_root();
        let post_state_root = post.state_root();
        let commitment = encode_state_diff(&pre_state_root, &post_state_root)?;
        let validity_proof = self.zk.generate_proof(&commitment)?;

        Ok(InvalidTransitionProof {
            pre_state_root,
            post_state_root,
            transactions: transactions.to_vec(),
            validity_proof,
        })
    }

    /// Re-executes `proof.transactions` against a fresh replay of
    /// `proof.pre_state_root`. Fraud is confirmed (`is_valid: true`) when
    /// the honestly-computed root diverges from the claimed post root.
    pub fn verify(&self, proof: &InvalidTransitionProof, pre: &StateManager) -> FraudVerificationResult {
        if pre.state_root() != proof.pre_state_root {
            return FraudVerificationResult {
                is_valid: false,
                message: "pre-state root does not match the supplied state".to_string(),
            };
        }

        let replay = pre.clone();
        let mut replay_failed = false;
        for tx in &proof.transactions {
            if replay.apply_transaction(tx).is_err() {
                replay_failed = true;
                break;
            }
        }

        let honest_root = replay.state_root();
        if replay_failed || honest_root != proof.post_state_root {
            return FraudVerificationResult {
                is_valid: true,
                message: "claimed post-state does not follow from the pre-state under the given transactions".to_string(),
            };
        }

        FraudVerificationResult {
            is_valid: false,
            message: "claimed transition is consistent; no fraud detected".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use quids_common::Account;

    fn signed_tx(sender: &str, recipient: &str, amount: u64, nonce: u64) -> Transaction {
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
    fn tampered_post_state_is_flagged_as_fraud() {
        let zk = ZKProofEngine::default();
        let prover = FraudProver::new(&zk);
        let pre = state_with_alice(1_000);
        let batch = vec![signed_tx("alice", "bob", 100, 1)];

        let honest_post = pre.clone();
        honest_post.apply_transaction(&batch[0]).expect("apply");

        let mut tampered_bob = honest_post.get_account("bob");
        tampered_bob.balance = 200;
        let tampered_post = honest_post.clone();
        tampered_post.add_account("bob".to_string(), tampered_bob);

        let proof = prover
            .generate_fraud_proof(&pre, &tampered_post, &batch)
            .expect("generate");
        let result = prover.verify(&proof, &pre);
        assert!(result.is_valid);
    }

    #[test]
    fn honest_transition_is_not_flagged() {
        let zk = ZKProofEngine::default();
        let prover = FraudProver::new(&zk);
        let pre = state_with_alice(1_000);
        let batch = vec![signed_tx("alice", "bob", 100, 1)];

        let post = pre.clone();
        post.apply_transaction(&batch[0]).expect("apply");

        let proof = prover
            .generate_fraud_proof(&pre, &post, &batch)
            .expect("generate");
        let result = prover.verify(&proof, &pre);
        assert!(!result.is_valid);
    }
}
